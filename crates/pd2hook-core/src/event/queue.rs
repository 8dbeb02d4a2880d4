use std::any::{Any, type_name};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{error, trace};

use crate::config::{FailurePolicy, RuntimeConfig};
use crate::error::{Error, Result};

pub type EventFunction<T> = fn(T);

/// A queued call: a free function and the payload it will receive.
pub struct EventItem<T> {
    function: EventFunction<T>,
    data: T,
}

impl<T> EventItem<T> {
    pub fn new(function: EventFunction<T>, data: T) -> Self {
        Self { function, data }
    }

    pub fn run(self) {
        (self.function)(self.data)
    }
}

/// Type-erased view of a queue, as held by the master.
pub trait ProcessEvents: Send + Sync {
    /// Drain and run everything queued so far. Returns the number of items
    /// that ran to completion.
    fn process_events(&self) -> Result<usize>;

    fn queue_name(&self) -> &'static str;

    fn pending(&self) -> usize;
}

/// Which thread may drain a queue.
enum Consumer {
    /// Bound by the first drain of the queue itself
    Own(OnceLock<ThreadId>),
    /// Bound by the owning [`EventQueueMaster`](super::EventQueueMaster);
    /// drains of the queue never bind it
    Master(Arc<OnceLock<ThreadId>>),
}

/// Thread-safe FIFO of events for one payload type.
///
/// Any thread may add items. Draining belongs to a single consumer thread:
/// with `strict_consumer` enabled the first thread that drains becomes the
/// consumer and drains from other threads fail with
/// [`Error::ForeignConsumer`]. A queue handed out by an
/// [`EventQueueMaster`](super::EventQueueMaster) belongs to the master's
/// consumer instead, and direct drains succeed only on that thread.
pub struct EventQueue<T> {
    items: Mutex<VecDeque<EventItem<T>>>,
    consumer: Consumer,
    config: RuntimeConfig,
}

impl<T: Send + 'static> EventQueue<T> {
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            consumer: Consumer::Own(OnceLock::new()),
            config: config.clone(),
        }
    }

    pub(crate) fn with_master_consumer(
        config: &RuntimeConfig,
        consumer: Arc<OnceLock<ThreadId>>,
    ) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            consumer: Consumer::Master(consumer),
            config: config.clone(),
        }
    }

    pub fn add_to_queue(&self, function: EventFunction<T>, data: T) {
        self.push(EventItem::new(function, data));
    }

    pub fn push(&self, item: EventItem<T>) {
        self.lock().push_back(item);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every queued item and run the batch on the calling thread.
    ///
    /// The lock is held only while the batch is taken. Items added while the
    /// batch runs are left for the next call.
    pub fn drain_and_run(&self) -> Result<usize> {
        self.check_consumer()?;

        let batch = std::mem::take(&mut *self.lock());
        if batch.is_empty() {
            return Ok(0);
        }
        trace!("Running {} events from {}", batch.len(), type_name::<T>());

        match self.config.failure_policy {
            FailurePolicy::Propagate => Ok(self.run_propagating(batch)),
            FailurePolicy::CatchAndLog => Ok(self.run_isolated(batch)),
        }
    }

    fn run_propagating(&self, mut batch: VecDeque<EventItem<T>>) -> usize {
        let mut executed = 0;
        while let Some(item) = batch.pop_front() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| item.run())) {
                // Remaining items go back ahead of anything queued meanwhile.
                let mut items = self.lock();
                batch.append(&mut items);
                *items = batch;
                drop(items);
                panic::resume_unwind(payload);
            }
            executed += 1;
        }
        executed
    }

    fn run_isolated(&self, batch: VecDeque<EventItem<T>>) -> usize {
        let mut executed = 0;
        for item in batch {
            match panic::catch_unwind(AssertUnwindSafe(|| item.run())) {
                Ok(()) => executed += 1,
                Err(payload) => error!(
                    "Event item in {} panicked: {}",
                    type_name::<T>(),
                    panic_message(payload.as_ref())
                ),
            }
        }
        executed
    }

    fn check_consumer(&self) -> Result<()> {
        if !self.config.strict_consumer {
            return Ok(());
        }

        let current = thread::current().id();
        let bound = match &self.consumer {
            Consumer::Own(consumer) => Some(*consumer.get_or_init(|| current)),
            Consumer::Master(consumer) => consumer.get().copied(),
        };
        if bound == Some(current) {
            Ok(())
        } else {
            Err(Error::ForeignConsumer {
                queue: type_name::<T>(),
            })
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EventItem<T>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + 'static> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> ProcessEvents for EventQueue<T> {
    fn process_events(&self) -> Result<usize> {
        self.drain_and_run()
    }

    fn queue_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn pending(&self) -> usize {
        self.len()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Weak};

    type Log = Arc<Mutex<Vec<u32>>>;

    fn record((log, value): (Log, u32)) {
        log.lock().unwrap().push(value);
    }

    fn record_or_panic((log, value): (Log, u32)) {
        if value == 0 {
            panic!("zero is not allowed");
        }
        log.lock().unwrap().push(value);
    }

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new();
        let log = Log::default();

        for value in [1, 2, 3] {
            queue.add_to_queue(record, (Arc::clone(&log), value));
        }
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.drain_and_run().unwrap(), 3);
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert!(queue.is_empty());
        assert_eq!(queue.drain_and_run().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_producers() {
        const THREADS: u32 = 16;
        const PER_THREAD: u32 = 50;

        let queue = Arc::new(EventQueue::new());
        let log = Log::default();

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let queue = Arc::clone(&queue);
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        queue.add_to_queue(record, (Arc::clone(&log), t * PER_THREAD + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.drain_and_run().unwrap(), (THREADS * PER_THREAD) as usize);

        let mut values = log.lock().unwrap().clone();
        values.sort_unstable();
        assert_eq!(values, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
    }

    struct Reenqueue {
        queue: Weak<EventQueue<Reenqueue>>,
        log: Log,
        depth: u32,
    }

    fn reenqueue(event: Reenqueue) {
        event.log.lock().unwrap().push(event.depth);
        if event.depth < 3
            && let Some(queue) = event.queue.upgrade()
        {
            queue.add_to_queue(
                reenqueue,
                Reenqueue {
                    queue: Weak::clone(&event.queue),
                    log: Arc::clone(&event.log),
                    depth: event.depth + 1,
                },
            );
        }
    }

    #[test]
    fn test_items_added_during_drain_wait_for_next_drain() {
        let queue = Arc::new(EventQueue::new());
        let log = Log::default();
        queue.add_to_queue(
            reenqueue,
            Reenqueue {
                queue: Arc::downgrade(&queue),
                log: Arc::clone(&log),
                depth: 0,
            },
        );

        assert_eq!(queue.drain_and_run().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec![0]);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.drain_and_run().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_foreign_consumer_is_rejected() {
        let queue = Arc::new(EventQueue::<(Log, u32)>::new());
        queue.drain_and_run().unwrap();

        let other = Arc::clone(&queue);
        let result = thread::spawn(move || other.drain_and_run()).join().unwrap();
        assert!(matches!(result, Err(Error::ForeignConsumer { .. })));
    }

    #[test]
    fn test_concurrent_drains_without_strict_consumer() {
        let config = RuntimeConfig::builder().strict_consumer(false).build();
        let queue = Arc::new(EventQueue::with_config(&config));
        let log = Log::default();
        for value in 0..200 {
            queue.add_to_queue(record, (Arc::clone(&log), value));
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.drain_and_run().unwrap())
            })
            .collect();
        let executed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(executed, 200);
        let mut values = log.lock().unwrap().clone();
        values.sort_unstable();
        assert_eq!(values, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_catch_and_log_keeps_running_batch() {
        let config = RuntimeConfig::builder()
            .failure_policy(FailurePolicy::CatchAndLog)
            .build();
        let queue = EventQueue::with_config(&config);
        let log = Log::default();

        for value in [1, 0, 2] {
            queue.add_to_queue(record_or_panic, (Arc::clone(&log), value));
        }

        assert_eq!(queue.drain_and_run().unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_propagate_requeues_remaining_items() {
        let queue = EventQueue::new();
        let log = Log::default();

        for value in [1, 0, 2, 3] {
            queue.add_to_queue(record_or_panic, (Arc::clone(&log), value));
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| queue.drain_and_run()));
        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.drain_and_run().unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = panic::catch_unwind(|| panic!("{}", String::from("formatted"))).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted");
    }
}
