//! Typed event queues drained on a host thread.
//!
//! Threads that must not act directly (hooked callbacks running on threads
//! the host owns, workers) push `(function, payload)` items into the queue
//! for the payload type. The host tick calls
//! [`EventQueueMaster::process_all`], which drains every queue on the
//! calling thread.

mod master;
mod queue;

pub use master::*;
pub use queue::*;
