//! Settings shared by the dispatcher and the recorder threads

use std::time::Duration;

use crate::config::RecordingConfig;
use crate::hit::Hit;

/// Hits sent to one recorder in one queue slot
pub type Batch = Vec<Hit>;

/// Capacity of each recorder queue, in batches
pub const QUEUE_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordMode {
    /// One sink call per batch
    Bulk,
    /// One sink call per hit, optionally throttled
    Single { interval: Option<Duration> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total sink calls allowed for one batch, first attempt included
    pub max_attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub workers: usize,
    pub max_payload_size: usize,
    pub mode: RecordMode,
    pub retry: RetryPolicy,
    pub replay_tracking: bool,
}

impl RecorderSettings {
    pub fn from_config(config: &RecordingConfig) -> Self {
        let mode = if config.bulk {
            RecordMode::Bulk
        } else {
            RecordMode::Single {
                interval: config.force_one_hit_interval,
            }
        };
        Self {
            workers: config.recorders.max(1),
            max_payload_size: config.max_payload_size.max(1),
            mode,
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                delay: config.retry_delay,
            },
            replay_tracking: config.replay_tracking,
        }
    }

    /// Producer buffer size that triggers a flush
    pub fn flush_threshold(&self) -> usize {
        self.max_payload_size * self.workers
    }
}
