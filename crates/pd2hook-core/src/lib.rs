//! # pd2hook-core
//!
//! Core library for retrofitting behavior onto a running native process.
//!
//! This crate provides:
//! - Masked byte-signature matching and a one-shot signature registry
//! - Typed function-pointer slots for the resolved symbols
//! - Reversible detours on function-pointer slots
//! - Typed event queues drained on the host's own thread

pub mod config;
pub mod detour;
pub mod error;
pub mod event;
pub mod memory;
pub mod prelude;
pub mod runtime;
pub mod signature;
pub mod symbol;

pub use config::{FailurePolicy, RuntimeConfig, RuntimeConfigBuilder};
pub use detour::{Detour, DetourState, DetourTarget};
pub use error::{Error, Result};
pub use event::{EventFunction, EventItem, EventQueue, EventQueueMaster, ProcessEvents};
pub use memory::{BufferRegion, CodeRegion, HostModule};
pub use runtime::HookRuntime;
pub use signature::{
    Pattern, SearchReport, SignatureDef, SignatureRegistry, SignatureRequest,
    SignatureResolution, SignatureSet, find, find_all, find_position, format_pattern,
    load_signatures, parse_mask, parse_pattern, save_signatures,
};
pub use symbol::{AddressSlot, CallConv, FnPtr, FunctionSlot, SlotHandle, SlotTarget};
