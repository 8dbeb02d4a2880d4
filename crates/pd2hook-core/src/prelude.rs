//! Prelude module for convenient imports
//!
//! ```ignore
//! use pd2hook_core::prelude::*;
//! ```

// Application root
pub use crate::config::{FailurePolicy, RuntimeConfig};
pub use crate::runtime::HookRuntime;

// Error handling
pub use crate::error::{Error, Result};

// Signatures and slots
pub use crate::signature::{Pattern, SearchReport, SignatureSet};
pub use crate::symbol::{FnPtr, FunctionSlot, SlotTarget};

// Detours
pub use crate::detour::{Detour, DetourTarget};

// Events
pub use crate::event::{EventQueue, EventQueueMaster};
