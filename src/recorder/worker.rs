//! Recorder thread: drains one queue into one sink

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use super::dispatcher::{PendingBatches, Shared};
use super::sink::Sink;
use super::types::{Batch, RecordMode, RetryPolicy};
use crate::error::{ImportError, SubmitError};
use crate::hit::Hit;
use crate::platform::CancelToken;
use crate::stats::StatsRegistry;

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Sleep for `duration`, returning false early if the run is cancelled
pub(crate) fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

/// Submit `hits` until all are acknowledged.
///
/// Acknowledged prefixes are counted as recorded and never resent. The sink
/// is called at most `policy.max_attempts` times.
pub fn record_with_retry(
    sink: &mut dyn Sink,
    hits: &[Hit],
    policy: &RetryPolicy,
    stats: &StatsRegistry,
    cancel: &CancelToken,
) -> Result<(), ImportError> {
    let mut remaining = hits;
    let mut attempt = 0;
    while !remaining.is_empty() {
        attempt += 1;
        let message = match sink.submit(remaining) {
            Ok(outcome) => {
                let accepted = outcome.accepted.min(remaining.len());
                stats.recorded.advance(accepted as u64);
                remaining = &remaining[accepted..];
                if remaining.is_empty() {
                    break;
                }
                outcome
                    .message
                    .unwrap_or_else(|| format!("{} of the hits were not tracked", remaining.len()))
            }
            Err(SubmitError::Fatal(message)) => {
                let first = &remaining[0];
                return Err(ImportError::SinkFatal {
                    file: first.filename.clone(),
                    line: first.lineno,
                    message,
                });
            }
            Err(SubmitError::Transient(message)) => message,
        };

        if attempt >= policy.max_attempts {
            let first = &remaining[0];
            return Err(ImportError::SubmissionExhausted {
                file: first.filename.clone(),
                line: first.lineno,
                attempts: attempt,
                message,
            });
        }
        tracing::warn!(
            attempt,
            max_attempts = policy.max_attempts,
            remaining = remaining.len(),
            "error when connecting to the tracker: {}, retrying in {:?}",
            message,
            policy.delay
        );
        if !sleep_unless_cancelled(policy.delay, cancel) {
            return Err(ImportError::Cancelled);
        }
    }
    Ok(())
}

fn record_batch(
    sink: &mut dyn Sink,
    batch: &[Hit],
    mode: RecordMode,
    policy: &RetryPolicy,
    stats: &StatsRegistry,
    cancel: &CancelToken,
    shared: &Shared,
) -> Result<(), ImportError> {
    match mode {
        RecordMode::Bulk => record_with_retry(sink, batch, policy, stats, cancel),
        RecordMode::Single { interval } => {
            for hit in batch {
                if let Some(interval) = interval {
                    if !sleep_unless_cancelled(interval, cancel) {
                        return Ok(());
                    }
                }
                if cancel.is_cancelled() || shared.abort.is_aborted() {
                    return Ok(());
                }
                record_with_retry(sink, std::slice::from_ref(hit), policy, stats, cancel)?;
            }
            Ok(())
        }
    }
}

/// Marks one received batch as processed when dropped, also on unwind
struct BatchDone<'a> {
    pending: &'a PendingBatches,
}

impl Drop for BatchDone<'_> {
    fn drop(&mut self) {
        self.pending.done();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Recorder thread body. Every received batch is acknowledged in `shared`,
/// also the ones dropped after an abort or cancellation. A panicking sink
/// aborts the run instead of leaving its batch pending.
#[allow(clippy::too_many_arguments)]
pub(crate) fn recorder_thread(
    worker_id: usize,
    queue: Receiver<Batch>,
    mut sink: Box<dyn Sink>,
    mode: RecordMode,
    policy: RetryPolicy,
    stats: Arc<StatsRegistry>,
    cancel: CancelToken,
    shared: Arc<Shared>,
) {
    tracing::debug!(worker_id, "launched recorder");
    for batch in queue.iter() {
        let _done = BatchDone {
            pending: &shared.pending,
        };
        if batch.is_empty() || shared.abort.is_aborted() || cancel.is_cancelled() {
            continue;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            record_batch(sink.as_mut(), &batch, mode, &policy, &stats, &cancel, &shared)
        }));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(ImportError::Cancelled)) => {
                tracing::debug!(worker_id, "recording interrupted");
            }
            Ok(Err(err)) => shared.abort.set(err),
            Err(payload) => shared.abort.set(ImportError::RecorderPanic {
                worker_id,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
    tracing::debug!(worker_id, "recorder finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::sink::SubmitOutcome;
    use std::collections::VecDeque;

    /// Sink answering from a script, then accepting everything
    struct ScriptedSink {
        script: VecDeque<Result<SubmitOutcome, SubmitError>>,
        calls: usize,
        received: Vec<usize>,
    }

    impl ScriptedSink {
        fn new(script: Vec<Result<SubmitOutcome, SubmitError>>) -> Self {
            Self {
                script: script.into(),
                calls: 0,
                received: Vec::new(),
            }
        }
    }

    impl Sink for ScriptedSink {
        fn submit(&mut self, hits: &[Hit]) -> Result<SubmitOutcome, SubmitError> {
            self.calls += 1;
            self.received.extend(hits.iter().map(|h| h.lineno));
            self.script
                .pop_front()
                .unwrap_or_else(|| Ok(SubmitOutcome::all(hits)))
        }
    }

    fn hits(n: usize) -> Vec<Hit> {
        (0..n)
            .map(|i| Hit {
                filename: "access.log".to_string(),
                lineno: i,
                ..Default::default()
            })
            .collect()
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    fn transient() -> Result<SubmitOutcome, SubmitError> {
        Err(SubmitError::Transient("connection refused".to_string()))
    }

    #[test]
    fn test_always_failing_sink_called_max_attempts_times() {
        let mut sink = ScriptedSink::new(vec![transient(); 10]);
        let stats = StatsRegistry::new();
        let err = record_with_retry(&mut sink, &hits(3), &policy(3), &stats, &CancelToken::new())
            .unwrap_err();
        assert_eq!(sink.calls, 3);
        assert_eq!(stats.recorded.get(), 0);
        match err {
            ImportError::SubmissionExhausted { file, line, attempts, message } => {
                assert_eq!(file, "access.log");
                assert_eq!(line, 0);
                assert_eq!(attempts, 3);
                assert_eq!(message, "connection refused");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_fail_once_loses_nothing() {
        let mut sink = ScriptedSink::new(vec![transient()]);
        let stats = StatsRegistry::new();
        record_with_retry(&mut sink, &hits(4), &policy(3), &stats, &CancelToken::new()).unwrap();
        assert_eq!(sink.calls, 2);
        assert_eq!(stats.recorded.get(), 4);
    }

    #[test]
    fn test_partial_ack_resends_only_the_rest() {
        let mut sink = ScriptedSink::new(vec![Ok(SubmitOutcome {
            accepted: 2,
            message: Some("invalid request".to_string()),
        })]);
        let stats = StatsRegistry::new();
        record_with_retry(&mut sink, &hits(5), &policy(3), &stats, &CancelToken::new()).unwrap();
        assert_eq!(sink.received, vec![0, 1, 2, 3, 4, 2, 3, 4]);
        assert_eq!(stats.recorded.get(), 5);
    }

    #[test]
    fn test_exhaustion_reports_first_unacknowledged_hit() {
        let partial = Ok(SubmitOutcome {
            accepted: 1,
            message: None,
        });
        let mut sink = ScriptedSink::new(vec![partial, transient()]);
        let stats = StatsRegistry::new();
        let err = record_with_retry(&mut sink, &hits(3), &policy(2), &stats, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.resume_point(), Some(("access.log", 1)));
        assert_eq!(stats.recorded.get(), 1);
    }

    #[test]
    fn test_fatal_error_stops_immediately() {
        let mut sink = ScriptedSink::new(vec![Err(SubmitError::Fatal("forbidden".to_string()))]);
        let stats = StatsRegistry::new();
        let err = record_with_retry(&mut sink, &hits(2), &policy(5), &stats, &CancelToken::new())
            .unwrap_err();
        assert_eq!(sink.calls, 1);
        assert!(matches!(err, ImportError::SinkFatal { .. }));
    }

    #[test]
    fn test_cancel_during_retry_delay() {
        let mut sink = ScriptedSink::new(vec![transient()]);
        let cancel = CancelToken::new();
        cancel.cancel(crate::platform::ExitCode::SignalInt);
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(60),
        };
        let err = record_with_retry(&mut sink, &hits(1), &policy, &StatsRegistry::new(), &cancel)
            .unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
        assert_eq!(sink.calls, 1);
    }

    #[test]
    fn test_single_mode_sends_one_hit_per_call() {
        let mut sink = ScriptedSink::new(Vec::new());
        let stats = StatsRegistry::new();
        let shared = Shared::default();
        record_batch(
            &mut sink,
            &hits(3),
            RecordMode::Single { interval: None },
            &policy(3),
            &stats,
            &CancelToken::new(),
            &shared,
        )
        .unwrap();
        assert_eq!(sink.calls, 3);
        assert_eq!(stats.recorded.get(), 3);
    }
}
