//! Error types for the import pipeline
//!
//! Line-local problems (`LineRejection`, `FieldNotFound`) are absorbed into
//! counters by the caller. `ImportError` is what stops a file or the run.

use std::path::PathBuf;
use thiserror::Error;

/// A named field was not captured for the current line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot find group '{0}'")]
pub struct FieldNotFound(pub String);

/// Why a single line was not turned into a recordable hit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineRejection {
    #[error("line did not match")]
    NoMatch,
    #[error("invalid encoding")]
    Encoding,
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("invalid date")]
    InvalidDate,
    #[error("invalid timezone")]
    InvalidTimezone,
    #[error("no query string, or path does not end with the tracker file")]
    NotTrackingRequest,
    #[error("missing idsite")]
    MissingSiteId,
}

impl LineRejection {
    /// Lines that never matched the active format are outside the parsed count
    pub fn before_match(&self) -> bool {
        matches!(self, LineRejection::NoMatch | LineRejection::Encoding)
    }
}

impl From<FieldNotFound> for LineRejection {
    fn from(err: FieldNotFound) -> Self {
        LineRejection::MissingField(err.0)
    }
}

/// Failure reported by a sink for one submission attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Worth another attempt after the retry delay
    #[error("{0}")]
    Transient(String),
    /// Retrying cannot help
    #[error("{0}")]
    Fatal(String),
}

/// Errors that abort a file import or the whole run
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(
        "cannot automatically determine the log format using the first {lines} lines of {file}. \
         Maybe try specifying the format with the --log-format-name command line argument"
    )]
    DetectionFailure { file: String, lines: usize },

    #[error(
        "{file} is not in the correct format, is there a '#Fields:' line? \
         If not, use the --w3c-fields option"
    )]
    MissingW3cFields { file: String },

    #[error("recording failed after {attempts} attempts: {message}")]
    SubmissionExhausted {
        file: String,
        line: usize,
        attempts: u32,
        message: String,
    },

    #[error("recording failed: {message}")]
    SinkFatal {
        file: String,
        line: usize,
        message: String,
    },

    #[error("recorder {worker_id} panicked: {message}")]
    RecorderPanic { worker_id: usize, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("import interrupted")]
    Cancelled,
}

impl ImportError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// File and line to resume from with `--skip`, when the failure has one
    pub fn resume_point(&self) -> Option<(&str, usize)> {
        match self {
            ImportError::SubmissionExhausted { file, line, .. }
            | ImportError::SinkFatal { file, line, .. } => Some((file.as_str(), *line)),
            _ => None,
        }
    }
}
