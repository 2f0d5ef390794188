//! Core library for the loghit access log importer
//!
//! # Module Structure
//!
//! - `cli` / `config` / `config_file`: arguments, resolved settings, `.loghitrc` defaults
//! - `readers` / `decompression`: line sources with transparent decompression
//! - `formats` / `detection`: log format grammars and auto-detection
//! - `builder` / `hit`: turning matched fields into hits
//! - `filters` / `sites`: exclusion checks and site resolution
//! - `importer`: the producer loop over every input file
//! - `recorder`: ordered parallel recording with retries
//! - `stats` / `platform` / `logging`: counters, signals, diagnostics

pub mod builder;
pub mod cli;
pub mod config;
pub mod config_file;
pub mod decompression;
pub mod detection;
pub mod error;
pub mod filters;
pub mod formats;
pub mod hit;
pub mod importer;
pub mod logging;
pub mod platform;
pub mod readers;
pub mod recorder;
pub mod sites;
pub mod stats;

use std::sync::Arc;

use crossbeam_channel::Receiver;

pub use config::ImportConfig;
pub use error::ImportError;
pub use hit::Hit;
pub use importer::Importer;
pub use stats::{StatsRegistry, StatsSnapshot};

use platform::{CancelToken, Ctrl};
use recorder::{RecorderPool, RecorderSettings, Sink};
use stats::ProgressMonitor;

/// What an import run leaves behind: the final counters and the error that stopped it
#[derive(Debug)]
pub struct ImportReport {
    pub snapshot: StatsSnapshot,
    pub result: Result<(), ImportError>,
}

/// Import every configured file through `sinks`.
///
/// Counters are snapshotted after the recorders have drained, so the report
/// is complete even when the run was cancelled or aborted.
pub fn run_import(
    config: &ImportConfig,
    sinks: Vec<Box<dyn Sink>>,
    cancel: CancelToken,
    ctrl_rx: Receiver<Ctrl>,
) -> ImportReport {
    let stats = Arc::new(StatsRegistry::new());
    stats.start_timer();

    let interval = config
        .output
        .show_progress
        .then_some(config.output.progress_delay);
    let monitor = ProgressMonitor::spawn(Arc::clone(&stats), interval, ctrl_rx);

    let result = match Importer::new(config, Arc::clone(&stats), cancel.clone()) {
        Ok(mut importer) => {
            let settings = RecorderSettings::from_config(&config.recording);
            let pool = RecorderPool::launch(&settings, sinks, Arc::clone(&stats), cancel);
            let produced = importer
                .import_all(&pool)
                .and_then(|()| pool.wait_empty());
            let drained = pool.finish();
            // The producer's error wins; an abort it already reported is not repeated
            produced.and(drained)
        }
        Err(err) => Err(err),
    };

    stats.stop_timer();
    monitor.stop();
    ImportReport {
        snapshot: stats.snapshot(),
        result,
    }
}

/// Resolve the format the first input would be imported with, without importing anything
pub fn describe_format(config: &ImportConfig) -> Result<Option<formats::LogFormat>, ImportError> {
    let stats = Arc::new(StatsRegistry::new());
    Importer::new(config, stats, CancelToken::new())?.describe_format()
}
