//! Partitioning hits across recorder queues
//!
//! Hits of one visitor always land on the same recorder so their relative
//! order is kept. The partition hash is stable across runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crossbeam_channel::Sender;
use xxhash_rust::xxh3::xxh3_64;

use super::types::Batch;
use crate::error::ImportError;
use crate::hit::Hit;
use crate::platform::CancelToken;

/// Recorder index for a visitor key
pub fn partition(visitor_key: &str, workers: usize) -> usize {
    (xxh3_64(visitor_key.as_bytes()) % workers.max(1) as u64) as usize
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Number of dispatched batches not yet processed by a recorder
#[derive(Debug, Default)]
pub(crate) struct PendingBatches {
    count: Mutex<usize>,
    drained: Condvar,
}

impl PendingBatches {
    pub(crate) fn add(&self) {
        *lock(&self.count) += 1;
    }

    pub(crate) fn done(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    pub(crate) fn wait_zero(&self) {
        let mut count = lock(&self.count);
        while *count > 0 {
            count = self
                .drained
                .wait(count)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// First fatal recording error; once set, the run is aborted
#[derive(Debug, Default)]
pub(crate) struct AbortSlot {
    aborted: AtomicBool,
    error: Mutex<Option<ImportError>>,
}

impl AbortSlot {
    pub(crate) fn set(&self, error: ImportError) {
        let mut slot = lock(&self.error);
        if slot.is_none() {
            tracing::error!(%error, "recording aborted");
            *slot = Some(error);
            self.aborted.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn take(&self) -> Option<ImportError> {
        lock(&self.error).take()
    }
}

/// State shared between the producer and the recorder threads
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) pending: PendingBatches,
    pub(crate) abort: AbortSlot,
}

pub struct Dispatcher {
    queues: Vec<Sender<Batch>>,
    shared: std::sync::Arc<Shared>,
    cancel: CancelToken,
    max_payload_size: usize,
    replay_tracking: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        queues: Vec<Sender<Batch>>,
        shared: std::sync::Arc<Shared>,
        cancel: CancelToken,
        max_payload_size: usize,
        replay_tracking: bool,
    ) -> Self {
        Self {
            queues,
            shared,
            cancel,
            max_payload_size: max_payload_size.max(1),
            replay_tracking,
        }
    }

    /// Error to report when the pipeline can no longer accept hits
    fn halted(&self) -> Option<ImportError> {
        if self.shared.abort.is_aborted() {
            return Some(self.shared.abort.take().unwrap_or(ImportError::Cancelled));
        }
        if self.cancel.is_cancelled() {
            return Some(ImportError::Cancelled);
        }
        None
    }

    /// Split `hits` by visitor and push them as batches onto the recorder
    /// queues. Blocks while a target queue is full.
    pub fn dispatch(&self, hits: Vec<Hit>) -> Result<(), ImportError> {
        if let Some(err) = self.halted() {
            return Err(err);
        }
        let workers = self.queues.len();
        let mut buckets: Vec<Batch> = (0..workers).map(|_| Vec::new()).collect();
        for hit in hits {
            let index = partition(hit.visitor_key(self.replay_tracking), workers);
            buckets[index].push(hit);
        }

        for (queue, mut bucket) in self.queues.iter().zip(buckets) {
            while !bucket.is_empty() {
                let rest = bucket.split_off(bucket.len().min(self.max_payload_size));
                self.shared.pending.add();
                if queue.send(bucket).is_err() {
                    self.shared.pending.done();
                    return Err(self.halted().unwrap_or_else(|| {
                        ImportError::Config("recorder thread stopped unexpectedly".to_string())
                    }));
                }
                bucket = rest;
            }
        }
        Ok(())
    }

    /// Block until every dispatched batch has been processed
    pub fn wait_empty(&self) -> Result<(), ImportError> {
        self.shared.pending.wait_zero();
        match self.halted() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn close(self) {
        drop(self.queues);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn hit(ip: &str, lineno: usize) -> Hit {
        Hit {
            ip: ip.to_string(),
            lineno,
            ..Default::default()
        }
    }

    #[test]
    fn test_partition_is_stable() {
        // xxh3 is seedless: the same key maps to the same recorder in every run
        assert_eq!(partition("1.2.3.4", 4), partition("1.2.3.4", 4));
        assert_eq!(partition("anything", 1), 0);
        assert!(partition("5.6.7.8", 3) < 3);
        assert_eq!(
            partition("1.2.3.4", 7),
            (xxh3_64(b"1.2.3.4") % 7) as usize
        );
    }

    #[test]
    fn test_dispatch_splits_batches_in_order() {
        let (tx0, rx0) = crossbeam_channel::unbounded();
        let (tx1, rx1) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::default());
        let dispatcher = Dispatcher::new(vec![tx0, tx1], Arc::clone(&shared), CancelToken::new(), 2, false);

        let hits: Vec<Hit> = (0..5).map(|i| hit("10.0.0.1", i)).collect();
        dispatcher.dispatch(hits).unwrap();

        let target = partition("10.0.0.1", 2);
        let rx = if target == 0 { &rx0 } else { &rx1 };
        let other = if target == 0 { &rx1 } else { &rx0 };
        let batches: Vec<Batch> = rx.try_iter().collect();
        assert!(other.try_iter().next().is_none());

        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        let linenos: Vec<usize> = batches.iter().flatten().map(|h| h.lineno).collect();
        assert_eq!(linenos, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_wait_empty_counts_batches() {
        let (tx, rx) = crossbeam_channel::unbounded::<Batch>();
        let shared = Arc::new(Shared::default());
        let dispatcher = Dispatcher::new(vec![tx], Arc::clone(&shared), CancelToken::new(), 10, false);
        dispatcher.dispatch(vec![hit("a", 0), hit("b", 1)]).unwrap();

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::spawn(move || {
            for _batch in rx.iter() {
                std::thread::sleep(std::time::Duration::from_millis(10));
                worker_shared.pending.done();
            }
        });
        dispatcher.wait_empty().unwrap();
        dispatcher.close();
        worker.join().unwrap();
    }

    #[test]
    fn test_dispatch_after_abort() {
        let (tx, _rx) = crossbeam_channel::unbounded::<Batch>();
        let shared = Arc::new(Shared::default());
        shared.abort.set(ImportError::SinkFatal {
            file: "a.log".to_string(),
            line: 3,
            message: "refused".to_string(),
        });
        let dispatcher = Dispatcher::new(vec![tx], Arc::clone(&shared), CancelToken::new(), 10, false);
        let err = dispatcher.dispatch(vec![hit("a", 0)]).unwrap_err();
        assert_eq!(err.resume_point(), Some(("a.log", 3)));
    }

    #[test]
    fn test_dispatch_after_cancel() {
        let (tx, _rx) = crossbeam_channel::unbounded::<Batch>();
        let cancel = CancelToken::new();
        cancel.cancel(crate::platform::ExitCode::SignalInt);
        let dispatcher = Dispatcher::new(vec![tx], Arc::new(Shared::default()), cancel, 10, false);
        assert!(matches!(
            dispatcher.dispatch(vec![hit("a", 0)]),
            Err(ImportError::Cancelled)
        ));
    }

    proptest! {
        #[test]
        fn prop_dispatch_conserves_hits_and_visitor_order(
            visitors in proptest::collection::vec(0u8..6, 0..60),
            workers in 1usize..5,
            max_payload in 1usize..8,
        ) {
            let (senders, receivers): (Vec<_>, Vec<_>) =
                (0..workers).map(|_| crossbeam_channel::unbounded::<Batch>()).unzip();
            let dispatcher =
                Dispatcher::new(senders, Arc::new(Shared::default()), CancelToken::new(), max_payload, false);
            let hits: Vec<Hit> = visitors
                .iter()
                .enumerate()
                .map(|(lineno, v)| hit(&format!("10.0.0.{}", v), lineno))
                .collect();
            dispatcher.dispatch(hits).unwrap();

            let mut total = 0;
            for (worker, rx) in receivers.iter().enumerate() {
                let mut last_seen: std::collections::HashMap<String, usize> = Default::default();
                for batch in rx.try_iter() {
                    prop_assert!(!batch.is_empty() && batch.len() <= max_payload);
                    for h in &batch {
                        prop_assert_eq!(partition(&h.ip, workers), worker);
                        if let Some(previous) = last_seen.insert(h.ip.clone(), h.lineno) {
                            prop_assert!(previous < h.lineno);
                        }
                        total += 1;
                    }
                }
            }
            prop_assert_eq!(total, visitors.len());
        }
    }
}
