//! Background batch feeding.
//!
//! Worker threads pull batches from a shared `BatchSource` into a bounded
//! queue, so batch assembly overlaps with the evaluation steps draining it.
//! A worker that hits a data error forwards the error and exits; the main
//! loop surfaces it on the next `next()` call.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, sync_channel},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use mmeval_data::{Batch, BatchSource, DataError};

use crate::evaluator::RuntimeComputeError;

pub struct BackgroundFeeder {
    rx: Option<Receiver<Result<Batch, DataError>>>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl BackgroundFeeder {
    /// Spawn `workers` threads filling a queue of at most `capacity` batches.
    #[must_use]
    pub fn start(source: Box<dyn BatchSource>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = sync_channel(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let source = Arc::new(Mutex::new(source));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let tx = tx.clone();
                let stop = Arc::clone(&stop);
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let batch = source.lock().next_batch();
                        let failed = batch.is_err();
                        // Send fails once the receiver is dropped at release.
                        if tx.send(batch).is_err() || failed {
                            break;
                        }
                    }
                    debug!(worker, "feeder worker exiting");
                })
            })
            .collect();

        Self {
            rx: Some(rx),
            stop,
            workers,
        }
    }

    /// Next batch from the queue, blocking until one is available.
    pub fn next(&mut self) -> Result<Batch, RuntimeComputeError> {
        let Some(rx) = self.rx.as_ref() else {
            return Err(RuntimeComputeError::Disconnected);
        };
        match rx.recv() {
            Ok(Ok(batch)) => Ok(batch),
            Ok(Err(err)) => Err(RuntimeComputeError::Feeder(err)),
            Err(_) => Err(RuntimeComputeError::Disconnected),
        }
    }

    /// Stop the workers and drain the queue. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Dropping the receiver unblocks workers waiting on a full queue.
        drop(self.rx.take());

        let deadline = Instant::now() + Duration::from_secs(5);
        for handle in self.workers.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // A worker stuck inside its source is detached, not awaited.
                warn!("feeder worker did not stop in time, detaching");
            }
        }
    }
}

impl Drop for BackgroundFeeder {
    fn drop(&mut self) {
        self.stop();
    }
}
