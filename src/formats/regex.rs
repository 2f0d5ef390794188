use indexmap::IndexMap;
use regex::Regex;

use super::{FieldMatch, CLF_DATE_FORMAT};
use crate::error::ImportError;

// Combined/common building blocks, shared by several built-in formats.
// Example: 192.168.1.1 - - [25/Dec/1995:10:00:00 +0000] "GET /index.html HTTP/1.0" 200 1234
pub const HOST_PREFIX: &str = r"(?P<host>[\w\-\.]*)(?::\d+)?\s+";

pub const COMMON_LOG_FORMAT: &str = concat!(
    r#"(?P<ip>\S+)\s+\S+\s+\S+\s+\[(?P<date>.*?)\s+(?P<timezone>.*?)\]\s+"#,
    r#""\S+\s+(?P<path>.*?)\s+\S+"\s+(?P<status>\S+)\s+(?P<length>\S+)"#
);

pub const NCSA_EXTENDED_SUFFIX: &str = r#"\s+"(?P<referrer>.*?)"\s+"(?P<user_agent>.*?)""#;

pub const S3_LOG_FORMAT: &str = concat!(
    r#"\S+\s+(?P<host>\S+)\s+\[(?P<date>.*?)\s+(?P<timezone>.*?)\]\s+(?P<ip>\S+)\s+"#,
    r#"\S+\s+\S+\s+\S+\s+\S+\s+"\S+\s+(?P<path>.*?)\s+\S+"\s+(?P<status>\S+)\s+\S+\s+(?P<length>\S+)\s+"#,
    r#"\S+\s+\S+\s+\S+\s+"(?P<referrer>.*?)"\s+"(?P<user_agent>.*?)""#
);

pub const ICECAST2_SUFFIX: &str = r"\s+(?P<session_time>\S+)";

/// Delimited-text format described by a single regex with named groups
#[derive(Debug, Clone)]
pub struct RegexFormat {
    name: String,
    pattern: String,
    regex: Regex,
    date_format: String,
}

impl RegexFormat {
    /// Compile a format; the pattern is anchored at the start of the line
    pub fn new(name: &str, pattern: &str) -> Result<Self, ImportError> {
        let regex = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
            ImportError::Config(format!("cannot compile regex for format '{}': {}", name, e))
        })?;

        if regex.capture_names().flatten().next().is_none() {
            return Err(ImportError::Config(format!(
                "regex for format '{}' must contain at least one named group, e.g. (?P<ip>\\S+)",
                name
            )));
        }

        Ok(Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            regex,
            date_format: CLF_DATE_FORMAT.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    pub fn matches_line(&self, line: &str) -> Option<FieldMatch> {
        captures_to_match(&self.regex, line)
    }
}

/// Collect the named groups that took part in a match
pub(crate) fn captures_to_match(regex: &Regex, line: &str) -> Option<FieldMatch> {
    let captures = regex.captures(line)?;
    let mut fields = IndexMap::new();
    for name in regex.capture_names().flatten() {
        if let Some(value) = captures.name(name) {
            fields.insert(name.to_string(), value.as_str().to_string());
        }
    }
    Some(FieldMatch::new(fields))
}
