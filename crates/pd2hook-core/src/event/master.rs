use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};

use tracing::debug;

use super::{EventFunction, EventQueue, ProcessEvents};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};

#[derive(Default)]
struct Queues {
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// Registration order, which is also drain order
    order: Vec<Arc<dyn ProcessEvents>>,
}

/// Owner of one [`EventQueue`] per payload type.
///
/// A queue is created and registered the first time its payload type is
/// requested; concurrent first requests all observe the same instance.
///
/// The master's consumer thread, bound by the first
/// [`process_all`](Self::process_all), is also the consumer of every queue it
/// owns. Draining one of those queues directly never binds it.
pub struct EventQueueMaster {
    config: RuntimeConfig,
    queues: RwLock<Queues>,
    consumer: Arc<OnceLock<ThreadId>>,
}

impl EventQueueMaster {
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self {
            config: config.clone(),
            queues: RwLock::new(Queues::default()),
            consumer: Arc::new(OnceLock::new()),
        }
    }

    /// The queue for payload type `T`, created on first use.
    pub fn queue<T: Send + 'static>(&self) -> Arc<EventQueue<T>> {
        let id = TypeId::of::<T>();
        if let Some(existing) = self.read().by_type.get(&id) {
            return downcast_queue(Arc::clone(existing));
        }

        let mut queues = self.write();
        if let Some(existing) = queues.by_type.get(&id) {
            return downcast_queue(Arc::clone(existing));
        }

        let queue = Arc::new(EventQueue::<T>::with_master_consumer(
            &self.config,
            Arc::clone(&self.consumer),
        ));
        queues.by_type.insert(id, Arc::clone(&queue) as Arc<dyn Any + Send + Sync>);
        queues.order.push(Arc::clone(&queue) as Arc<dyn ProcessEvents>);
        debug!(
            "Registered event queue #{} for {}",
            queues.order.len(),
            type_name::<T>()
        );
        queue
    }

    /// Queue `function(data)` for the next [`process_all`](Self::process_all).
    pub fn add_to_queue<T: Send + 'static>(&self, function: EventFunction<T>, data: T) {
        self.queue::<T>().add_to_queue(function, data);
    }

    pub fn queue_count(&self) -> usize {
        self.read().order.len()
    }

    /// Items waiting across all queues.
    pub fn pending(&self) -> usize {
        self.read().order.iter().map(|queue| queue.pending()).sum()
    }

    /// Drain every registered queue, in registration order, on the calling
    /// thread. Returns the number of items that ran to completion.
    pub fn process_all(&self) -> Result<usize> {
        self.check_consumer()?;

        // Snapshot so that items may request new queue types while running.
        let queues = self.read().order.clone();
        let mut executed = 0;
        for queue in queues {
            executed += queue.process_events()?;
        }
        Ok(executed)
    }

    fn check_consumer(&self) -> Result<()> {
        if !self.config.strict_consumer {
            return Ok(());
        }

        let current = thread::current().id();
        if *self.consumer.get_or_init(|| current) == current {
            Ok(())
        } else {
            Err(Error::ForeignConsumer {
                queue: type_name::<Self>(),
            })
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Queues> {
        self.queues.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Queues> {
        self.queues.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventQueueMaster {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast_queue<T: Send + 'static>(queue: Arc<dyn Any + Send + Sync>) -> Arc<EventQueue<T>> {
    match queue.downcast::<EventQueue<T>>() {
        Ok(queue) => queue,
        Err(_) => unreachable!("event queue registered under another payload type"),
    }
}
