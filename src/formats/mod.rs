//! Log format grammars
//!
//! A format is a closed set of variants sharing one capability surface:
//! match a line, optionally build itself from a file header, and extract
//! named fields from a match.
//!
//! # Module Structure
//!
//! - `regex`: delimited-text formats described by one regular expression
//! - `w3c`: W3C Extended and its IIS / CloudFront flavors, built from `#Fields:`
//! - `json`: one JSON object per line (nginx `log_format ... escape=json`)
//! - `catalog`: built-in formats in registration order

pub mod catalog;
pub mod json;
pub mod regex;
pub mod w3c;

use indexmap::IndexMap;
use std::borrow::Cow;

use crate::error::FieldNotFound;

pub use catalog::FormatCatalog;
pub use json::JsonFormat;
pub use regex::RegexFormat;
pub use w3c::{W3cFlavor, W3cFormat, W3cOptions};

/// Timestamp layout used by the Apache/nginx family
pub const CLF_DATE_FORMAT: &str = "%d/%b/%Y:%H:%M:%S";

/// Named fields captured from one line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMatch {
    fields: IndexMap<String, String>,
    score: usize,
}

impl FieldMatch {
    pub fn new(fields: IndexMap<String, String>) -> Self {
        let score = fields.len();
        Self { fields, score }
    }

    /// Build a match whose detection score differs from its field count
    pub fn with_score(fields: IndexMap<String, String>, score: usize) -> Self {
        Self { fields, score }
    }

    pub fn get(&self, name: &str) -> Result<&str, FieldNotFound> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| FieldNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of named captures, used to rank competing formats
    pub fn score(&self) -> usize {
        self.score
    }

    /// Drop groups the user asked to ignore (`--ignore-groups`)
    pub fn remove_groups(&mut self, groups: &[String]) {
        for group in groups {
            self.fields.shift_remove(group);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A log format: one of the supported grammar families
#[derive(Debug, Clone)]
pub enum LogFormat {
    Regex(RegexFormat),
    W3c(W3cFormat),
    Json(JsonFormat),
}

impl LogFormat {
    pub fn name(&self) -> &str {
        match self {
            LogFormat::Regex(f) => f.name(),
            LogFormat::W3c(f) => f.name(),
            LogFormat::Json(f) => f.name(),
        }
    }

    /// Match a single line, returning the named captures on success
    pub fn matches_line(&self, line: &str) -> Option<FieldMatch> {
        match self {
            LogFormat::Regex(f) => f.matches_line(line),
            LogFormat::W3c(f) => f.matches_line(line),
            LogFormat::Json(f) => f.matches_line(line),
        }
    }

    /// Build a ready-to-use format from the header lines of a file.
    ///
    /// Only header-declared formats (the W3C family) can do this; every
    /// other variant returns `None`.
    pub fn matches_header(&self, header: &[String]) -> Option<LogFormat> {
        match self {
            LogFormat::W3c(f) => f.with_header(header).map(LogFormat::W3c),
            _ => None,
        }
    }

    pub fn is_header_declared(&self) -> bool {
        matches!(self, LogFormat::W3c(_))
    }

    /// Whether the format can match lines yet (W3C needs a `#Fields:` line first)
    pub fn is_ready(&self) -> bool {
        match self {
            LogFormat::W3c(f) => f.is_ready(),
            _ => true,
        }
    }

    /// Value of a named field, with variant-specific defaults and decoding
    pub fn field<'a>(
        &self,
        matched: &'a FieldMatch,
        name: &str,
    ) -> Result<Cow<'a, str>, FieldNotFound> {
        match self {
            LogFormat::W3c(f) => f.field(matched, name),
            _ => matched.get(name).map(Cow::Borrowed),
        }
    }

    pub fn timestamp_layout(&self) -> &str {
        match self {
            LogFormat::Regex(f) => f.date_format(),
            LogFormat::W3c(_) => w3c::W3C_DATE_FORMAT,
            LogFormat::Json(_) => json::JSON_DATE_FORMAT,
        }
    }

    /// Regex source, for `--dump-log-regex`
    pub fn regex_pattern(&self) -> Option<&str> {
        match self {
            LogFormat::Regex(f) => Some(f.pattern()),
            LogFormat::W3c(f) => f.pattern(),
            LogFormat::Json(_) => None,
        }
    }

    /// Emit format-specific warnings once the format is chosen for a file
    pub fn warn_on_selection(&self) {
        if let LogFormat::W3c(f) = self {
            f.check_iis_time_taken();
        }
    }
}
