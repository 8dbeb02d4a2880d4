//! Application root owning the signature registry and the event queues.
//!
//! ## Example
//!
//! ```ignore
//! use pd2hook_core::prelude::*;
//!
//! static LUA_CALL: FunctionSlot<unsafe extern "C" fn(*mut c_void, i32, i32)> =
//!     FunctionSlot::new("lua_call");
//!
//! let runtime = HookRuntime::new(RuntimeConfig::default());
//! runtime.register("lua_call", &LUA_CALL, "55 8B EC ?? ?? 83".parse()?, 0)?;
//! runtime.search()?;
//!
//! // any thread
//! runtime.add_to_queue(print_message, String::from("hello"));
//!
//! // host tick
//! runtime.process_events()?;
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::event::{EventFunction, EventQueue, EventQueueMaster};
use crate::memory::CodeRegion;
use crate::signature::{Pattern, SearchReport, SignatureRegistry, SignatureSet};
use crate::symbol::{AddressSlot, SlotHandle};

pub struct HookRuntime {
    config: RuntimeConfig,
    signatures: SignatureRegistry,
    events: EventQueueMaster,
}

impl HookRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        info!(
            "Hook runtime created (failure policy: {}, strict consumer: {})",
            config.failure_policy, config.strict_consumer
        );
        Self {
            signatures: SignatureRegistry::new(),
            events: EventQueueMaster::with_config(&config),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn signatures(&self) -> &SignatureRegistry {
        &self.signatures
    }

    pub fn events(&self) -> &EventQueueMaster {
        &self.events
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        target: impl Into<SlotHandle>,
        pattern: Pattern,
        offset: isize,
    ) -> Result<()> {
        self.signatures.register(name, target, pattern, offset)
    }

    /// Register every entry of a definition file; see [`SignatureSet::register_all`].
    pub fn register_set(&self, set: &SignatureSet) -> Result<Vec<Arc<AddressSlot>>> {
        set.register_all(&self.signatures)
    }

    /// Resolve all registered signatures against the host's main module.
    pub fn search(&self) -> Result<SearchReport> {
        self.signatures.search()
    }

    pub fn search_in<R: CodeRegion + ?Sized>(&self, region: &R) -> Result<SearchReport> {
        self.signatures.search_in(region)
    }

    pub fn queue<T: Send + 'static>(&self) -> Arc<EventQueue<T>> {
        self.events.queue::<T>()
    }

    pub fn add_to_queue<T: Send + 'static>(&self, function: EventFunction<T>, data: T) {
        self.events.add_to_queue(function, data);
    }

    /// Run everything queued so far; call once per host tick.
    pub fn process_events(&self) -> Result<usize> {
        self.events.process_all()
    }
}

impl Default for HookRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
