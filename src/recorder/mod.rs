//! Concurrent recording of accepted hits
//!
//! The producer hands buffered hits to the [`Dispatcher`], which partitions
//! them by visitor onto one bounded queue per recorder thread. Each recorder
//! owns its queue and its [`Sink`] and retries failed submissions.
//!
//! # Module Structure
//!
//! - `types`: settings, retry policy and batch alias
//! - `dispatcher`: visitor partitioning, completion count and abort slot
//! - `worker`: recorder thread and the retry loop
//! - `sink`: `Sink` trait, dry-run sink and HTTP bulk tracking sink

mod dispatcher;
mod sink;
mod types;
mod worker;

use std::sync::Arc;
use std::thread;

pub use dispatcher::{partition, Dispatcher};
pub use sink::{
    parse_tracker_response, tracking_params, tracking_request, DryRunSink, HttpTrackerSink, Sink,
    SubmitOutcome,
};
pub use types::{Batch, RecordMode, RecorderSettings, RetryPolicy, QUEUE_CAPACITY};
pub use worker::record_with_retry;

use crate::config::RecordingConfig;
use crate::error::ImportError;
use crate::hit::Hit;
use crate::platform::CancelToken;
use crate::stats::StatsRegistry;
use dispatcher::Shared;

/// One sink per recorder: dry-run or HTTP bulk tracking
pub fn build_sinks(config: &RecordingConfig) -> Result<Vec<Box<dyn Sink>>, ImportError> {
    (0..config.recorders.max(1))
        .map(|_| -> Result<Box<dyn Sink>, ImportError> {
            if config.dry_run {
                return Ok(Box::new(DryRunSink));
            }
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| ImportError::Config("--url is required unless --dry-run is used".to_string()))?;
            Ok(Box::new(HttpTrackerSink::new(
                url,
                config.token_auth.clone(),
                config.request_timeout,
                &config.title_category_delimiter,
                config.replay_tracking,
            )?))
        })
        .collect()
}

/// Running recorder threads plus the dispatcher feeding them
pub struct RecorderPool {
    dispatcher: Dispatcher,
    shared: Arc<Shared>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl RecorderPool {
    /// Spawn one recorder thread per sink
    pub fn launch(
        settings: &RecorderSettings,
        sinks: Vec<Box<dyn Sink>>,
        stats: Arc<StatsRegistry>,
        cancel: CancelToken,
    ) -> Self {
        let shared = Arc::new(Shared::default());
        let mut queues = Vec::with_capacity(sinks.len());
        let mut handles = Vec::with_capacity(sinks.len());

        for (worker_id, sink) in sinks.into_iter().enumerate() {
            let (tx, rx) = crossbeam_channel::bounded::<Batch>(QUEUE_CAPACITY);
            queues.push(tx);
            let mode = settings.mode;
            let policy = settings.retry;
            let stats = Arc::clone(&stats);
            let cancel = cancel.clone();
            let shared = Arc::clone(&shared);
            handles.push(thread::spawn(move || {
                worker::recorder_thread(worker_id, rx, sink, mode, policy, stats, cancel, shared)
            }));
        }

        let dispatcher = Dispatcher::new(
            queues,
            Arc::clone(&shared),
            cancel,
            settings.max_payload_size,
            settings.replay_tracking,
        );
        Self {
            dispatcher,
            shared,
            handles,
        }
    }

    pub fn dispatch(&self, hits: Vec<Hit>) -> Result<(), ImportError> {
        self.dispatcher.dispatch(hits)
    }

    pub fn wait_empty(&self) -> Result<(), ImportError> {
        self.dispatcher.wait_empty()
    }

    /// Close the queues, join every recorder and report the abort error, if any
    pub fn finish(self) -> Result<(), ImportError> {
        self.dispatcher.close();
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("recorder thread panicked");
            }
        }
        match self.shared.abort.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubmitError;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records which hits reached which sink, in order
    struct CollectingSink {
        id: usize,
        seen: Arc<Mutex<Vec<(usize, String, usize)>>>,
    }

    impl Sink for CollectingSink {
        fn submit(&mut self, hits: &[Hit]) -> Result<SubmitOutcome, SubmitError> {
            let mut seen = self.seen.lock().unwrap();
            for hit in hits {
                seen.push((self.id, hit.ip.clone(), hit.lineno));
            }
            Ok(SubmitOutcome::all(hits))
        }
    }

    struct BrokenSink;

    impl Sink for BrokenSink {
        fn submit(&mut self, _hits: &[Hit]) -> Result<SubmitOutcome, SubmitError> {
            Err(SubmitError::Transient("down".to_string()))
        }
    }

    struct PanickingSink;

    impl Sink for PanickingSink {
        fn submit(&mut self, _hits: &[Hit]) -> Result<SubmitOutcome, SubmitError> {
            panic!("sink exploded")
        }
    }

    fn settings(workers: usize, max_payload_size: usize) -> RecorderSettings {
        RecorderSettings {
            workers,
            max_payload_size,
            mode: RecordMode::Bulk,
            retry: RetryPolicy {
                max_attempts: 2,
                delay: Duration::ZERO,
            },
            replay_tracking: false,
        }
    }

    fn hits(ips: &[&str]) -> Vec<Hit> {
        ips.iter()
            .enumerate()
            .map(|(lineno, ip)| Hit {
                filename: "access.log".to_string(),
                ip: ip.to_string(),
                lineno,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_per_visitor_order_and_routing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn Sink>> = (0..3)
            .map(|id| {
                Box::new(CollectingSink {
                    id,
                    seen: Arc::clone(&seen),
                }) as Box<dyn Sink>
            })
            .collect();
        let stats = Arc::new(StatsRegistry::new());
        let pool = RecorderPool::launch(&settings(3, 2), sinks, Arc::clone(&stats), CancelToken::new());

        let ips = ["1.1.1.1", "2.2.2.2", "1.1.1.1", "3.3.3.3", "1.1.1.1", "2.2.2.2"];
        pool.dispatch(hits(&ips)).unwrap();
        pool.dispatch(hits(&ips)).unwrap();
        pool.wait_empty().unwrap();
        pool.finish().unwrap();

        assert_eq!(stats.recorded.get(), 12);
        let seen = seen.lock().unwrap();
        for ip in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            let entries: Vec<_> = seen.iter().filter(|(_, i, _)| i == ip).collect();
            // Every hit of a visitor went to the recorder its key partitions to
            assert!(entries.iter().all(|(id, _, _)| *id == partition(ip, 3)));
        }
        let first_visitor: Vec<usize> = seen
            .iter()
            .filter(|(_, ip, _)| ip == "1.1.1.1")
            .map(|(_, _, lineno)| *lineno)
            .collect();
        assert_eq!(first_visitor, vec![0, 2, 4, 0, 2, 4]);
    }

    #[test]
    fn test_abort_surfaces_on_wait_and_finish() {
        let stats = Arc::new(StatsRegistry::new());
        let pool = RecorderPool::launch(
            &settings(1, 10),
            vec![Box::new(BrokenSink)],
            Arc::clone(&stats),
            CancelToken::new(),
        );
        pool.dispatch(hits(&["1.1.1.1", "1.1.1.1"])).unwrap();
        let err = pool.wait_empty().unwrap_err();
        assert!(matches!(err, ImportError::SubmissionExhausted { attempts: 2, .. }));

        // The error was handed out once; later dispatches still refuse to block
        assert!(pool.dispatch(hits(&["1.1.1.1"])).is_err());
        pool.finish().unwrap();
        assert_eq!(stats.recorded.get(), 0);
    }

    #[test]
    fn test_panicking_sink_aborts_instead_of_hanging() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            let pool = RecorderPool::launch(
                &settings(1, 10),
                vec![Box::new(PanickingSink)],
                Arc::new(StatsRegistry::new()),
                CancelToken::new(),
            );
            pool.dispatch(hits(&["1.1.1.1", "2.2.2.2"])).unwrap();
            let waited = pool.wait_empty();
            let later = pool.dispatch(hits(&["1.1.1.1"]));
            let finished = pool.finish();
            let _ = tx.send((waited, later.is_err(), finished));
        });

        let (waited, later_refused, finished) = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("wait_empty should return after a sink panic");
        match waited {
            Err(ImportError::RecorderPanic { worker_id, message }) => {
                assert_eq!(worker_id, 0);
                assert_eq!(message, "sink exploded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(later_refused);
        assert!(finished.is_ok());
    }

    #[test]
    fn test_build_sinks() {
        let config = RecordingConfig {
            recorders: 3,
            ..Default::default()
        };
        assert_eq!(build_sinks(&config).unwrap().len(), 3);

        let config = RecordingConfig {
            dry_run: false,
            url: None,
            ..Default::default()
        };
        assert!(build_sinks(&config).is_err());
    }
}
