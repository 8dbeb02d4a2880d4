//! Pump command: worker threads queue events, the main thread drains them
//! once per simulated host tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use pd2hook_core::HookRuntime;
use tracing::{debug, info};

struct WorkerEvent {
    worker: usize,
    sequence: usize,
    processed: Arc<AtomicUsize>,
}

fn handle_worker_event(event: WorkerEvent) {
    event.processed.fetch_add(1, Ordering::Relaxed);
    debug!("Worker {} event {}", event.worker, event.sequence);
}

/// Summary of a pump run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpSummary {
    pub processed: usize,
    pub ticks: usize,
}

/// Run the pump command
pub fn run(
    runtime: &HookRuntime,
    workers: usize,
    events_per_worker: usize,
    tick: Duration,
) -> Result<PumpSummary> {
    let processed = Arc::new(AtomicUsize::new(0));
    let queue = runtime.queue::<WorkerEvent>();

    info!(
        "Starting {} workers with {} events each",
        workers, events_per_worker
    );

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let queue = Arc::clone(&queue);
            let processed = Arc::clone(&processed);
            thread::spawn(move || {
                for sequence in 0..events_per_worker {
                    queue.add_to_queue(
                        handle_worker_event,
                        WorkerEvent {
                            worker,
                            sequence,
                            processed: Arc::clone(&processed),
                        },
                    );
                    thread::yield_now();
                }
            })
        })
        .collect();

    let mut ticks = 0;
    loop {
        let executed = runtime.process_events()?;
        ticks += 1;
        if executed > 0 {
            debug!("Tick {}: {} events", ticks, executed);
        }

        if handles.iter().all(|handle| handle.is_finished()) && runtime.events().pending() == 0 {
            break;
        }
        thread::sleep(tick);
    }

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("Worker thread panicked"))?;
    }

    let summary = PumpSummary {
        processed: processed.load(Ordering::Relaxed),
        ticks,
    };
    println!(
        "Processed {} events from {} workers in {} ticks",
        summary.processed, workers, summary.ticks
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pump_processes_every_event() {
        let runtime = HookRuntime::default();
        let summary = run(&runtime, 4, 25, Duration::from_millis(1)).unwrap();
        assert_eq!(summary.processed, 100);
        assert!(summary.ticks >= 1);
    }

    #[test]
    fn test_pump_without_workers() {
        let runtime = HookRuntime::default();
        let summary = run(&runtime, 0, 10, Duration::from_millis(1)).unwrap();
        assert_eq!(summary, PumpSummary { processed: 0, ticks: 1 });
    }
}
