//! W3C Extended log format and the formats derived from it
//!
//! The grammar is not fixed: it is computed from the `#Fields:` directive of
//! each file by mapping every declared column to a named capture. IIS and
//! Amazon CloudFront are the same machinery with a different field table.

use indexmap::IndexMap;
use regex::Regex;
use std::borrow::Cow;
use std::sync::Arc;

use super::regex::captures_to_match;
use super::FieldMatch;
use crate::error::{FieldNotFound, ImportError};

pub const FIELDS_LINE_PREFIX: &str = "#Fields:";
pub const W3C_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Pattern for declared columns that have no entry in the field table
const UNKNOWN_FIELD_PATTERN: &str = r#"(?:".*?"|\S+)"#;

const BASE_FIELDS: &[(&str, &str)] = &[
    ("date", r"(?P<date>\d+[-\d+]+)"),
    ("time", r"(?P<time>[\d+:]+)[.\d]*?"),
    ("cs-uri-stem", r"(?P<path>/\S*)"),
    ("cs-uri-query", r"(?P<query_string>\S*)"),
    ("c-ip", r#""?(?P<ip>[\w*.:-]*)"?"#),
    ("cs(User-Agent)", r#"(?P<user_agent>".*?"|\S+)"#),
    ("cs(Referer)", r"(?P<referrer>\S+)"),
    ("sc-status", r"(?P<status>\d+)"),
    ("sc-bytes", r"(?P<length>\S+)"),
    ("cs-host", r"(?P<host>\S+)"),
    ("cs-username", r"(?P<userid>\S+)"),
    ("time-taken", r"(?P<generation_time_secs>[.\d]+)"),
];

// The win32 status is useless for importing, but capturing it makes IIS
// outscore plain W3C when detecting the format of an IIS file.
const IIS_FIELDS: &[(&str, &str)] = &[
    ("time-taken", r"(?P<generation_time_milli>[.\d]+)"),
    ("sc-win32-status", r"(?P<__win32_status>\S+)"),
];

// The x-edge columns only exist so CloudFront outscores plain W3C.
const CLOUDFRONT_FIELDS: &[(&str, &str)] = &[
    ("x-event", r"(?P<event_action>\S+)"),
    ("x-sname", r"(?P<event_name>\S+)"),
    ("cs-uri-stem", r"(?:rtmp:/)?(?P<path>/\S*)"),
    ("c-user-agent", r#"(?P<user_agent>".*?"|\S+)"#),
    ("x-edge-location", r#"(?P<x_edge_location>".*?"|\S+)"#),
    ("x-edge-result-type", r#"(?P<x_edge_result_type>".*?"|\S+)"#),
    ("x-edge-request-id", r#"(?P<x_edge_request_id>".*?"|\S+)"#),
    ("x-host-header", r#"(?P<x_host_header>".*?"|\S+)"#),
];

/// Which field table a W3C format uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum W3cFlavor {
    Extended,
    Iis,
    CloudFront,
}

impl W3cFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            W3cFlavor::Extended => "w3c_extended",
            W3cFlavor::Iis => "iis",
            W3cFlavor::CloudFront => "amazon_cloudfront",
        }
    }

    /// Column name to capture pattern, in declaration order
    pub fn field_table(&self) -> IndexMap<String, String> {
        let mut table: IndexMap<String, String> = BASE_FIELDS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let overrides = match self {
            W3cFlavor::Extended => &[][..],
            W3cFlavor::Iis => IIS_FIELDS,
            W3cFlavor::CloudFront => CLOUDFRONT_FIELDS,
        };
        for (column, pattern) in overrides {
            table.insert(column.to_string(), pattern.to_string());
        }
        table
    }
}

/// User-supplied adjustments to the W3C field tables
#[derive(Debug, Clone, Default)]
pub struct W3cOptions {
    /// Explicit `#Fields:` line for files that lack one
    pub fields_line: Option<String>,
    /// Interpret `time-taken` as milliseconds
    pub time_taken_millis: bool,
    /// `(custom column, default column)` renames
    pub mapped_fields: Vec<(String, String)>,
    /// `(column, regex)` overrides; each regex has a named group
    pub field_regexes: Vec<(String, String)>,
}

impl W3cOptions {
    /// Reject mappings and regexes that can never produce a usable grammar
    pub fn validate(&self) -> Result<(), ImportError> {
        let known = W3cFlavor::Extended.field_table();
        let cloudfront = W3cFlavor::CloudFront.field_table();
        for (custom, default) in &self.mapped_fields {
            if !known.contains_key(default) && !cloudfront.contains_key(default) {
                return Err(ImportError::Config(format!(
                    "custom W3C field mapping error: don't know how to parse and use the '{}' field (mapped from '{}')",
                    default, custom
                )));
            }
        }
        for (field, pattern) in &self.field_regexes {
            let compiled = Regex::new(pattern).map_err(|e| {
                ImportError::Config(format!(
                    "invalid custom w3c field regex '{}' for field '{}': {}",
                    pattern, field, e
                ))
            })?;
            if compiled.capture_names().flatten().next().is_none() {
                return Err(ImportError::Config(format!(
                    "cannot find named group in custom w3c field regex '{}' for field '{}'",
                    pattern, field
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct W3cGrammar {
    pattern: String,
    regex: Regex,
    header_lines: Vec<String>,
}

/// A W3C-family format; a template until a `#Fields:` line gives it a grammar
#[derive(Debug, Clone)]
pub struct W3cFormat {
    flavor: W3cFlavor,
    options: Arc<W3cOptions>,
    grammar: Option<W3cGrammar>,
}

impl W3cFormat {
    pub fn new(flavor: W3cFlavor, options: Arc<W3cOptions>) -> Self {
        Self {
            flavor,
            options,
            grammar: None,
        }
    }

    pub fn name(&self) -> &str {
        self.flavor.name()
    }

    pub fn flavor(&self) -> W3cFlavor {
        self.flavor
    }

    pub fn is_ready(&self) -> bool {
        self.grammar.is_some()
    }

    pub fn pattern(&self) -> Option<&str> {
        self.grammar.as_ref().map(|g| g.pattern.as_str())
    }

    /// Build a ready format from header lines.
    ///
    /// The explicit fields line from the options wins over the file's own
    /// `#Fields:` directive. Returns `None` when no fields line is available
    /// or the computed regex does not compile.
    pub fn with_header(&self, header: &[String]) -> Option<W3cFormat> {
        let mut fields_line = self.options.fields_line.clone();
        let mut header_lines = Vec::new();

        for line in header {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with(FIELDS_LINE_PREFIX) {
                if fields_line.is_none() {
                    fields_line = Some(line.to_string());
                }
            } else {
                header_lines.push(line.to_string());
            }
        }

        let fields_line = fields_line?;
        let pattern = self.build_pattern(&fields_line);

        match Regex::new(&format!("^(?:{})", pattern)) {
            Ok(regex) => {
                tracing::debug!(
                    format = self.name(),
                    regex = %pattern,
                    "computed regex from 'Fields:' line"
                );
                Some(W3cFormat {
                    flavor: self.flavor,
                    options: Arc::clone(&self.options),
                    grammar: Some(W3cGrammar {
                        pattern,
                        regex,
                        header_lines,
                    }),
                })
            }
            Err(e) => {
                tracing::debug!(format = self.name(), error = %e, "W3C fields line produced an invalid regex");
                None
            }
        }
    }

    fn build_pattern(&self, fields_line: &str) -> String {
        let mut table = self.flavor.field_table();

        if self.options.time_taken_millis {
            table.insert(
                "time-taken".to_string(),
                r"(?P<generation_time_milli>[\d.]+)".to_string(),
            );
        }

        for (custom, default) in &self.options.mapped_fields {
            if let Some(pattern) = table.shift_remove(default) {
                table.insert(custom.clone(), pattern);
            }
        }

        for (field, pattern) in &self.options.field_regexes {
            table.insert(field.clone(), pattern.clone());
        }

        let declared = fields_line
            .trim()
            .strip_prefix(FIELDS_LINE_PREFIX)
            .unwrap_or(fields_line);

        declared
            .split_whitespace()
            .map(|column| {
                table
                    .get(column)
                    .map(String::as_str)
                    .unwrap_or(UNKNOWN_FIELD_PATTERN)
            })
            .collect::<Vec<_>>()
            .join(r"\s+")
    }

    pub fn matches_line(&self, line: &str) -> Option<FieldMatch> {
        let grammar = self.grammar.as_ref()?;
        captures_to_match(&grammar.regex, line)
    }

    pub fn field<'a>(
        &self,
        matched: &'a FieldMatch,
        name: &str,
    ) -> Result<Cow<'a, str>, FieldNotFound> {
        if self.flavor != W3cFlavor::CloudFront {
            return matched.get(name).map(Cow::Borrowed);
        }

        match name {
            "event_category" if !matched.contains("event_category") => {
                Ok(Cow::Borrowed("cloudfront_rtmp"))
            }
            "status" if !matched.contains("status") => Ok(Cow::Borrowed("200")),
            "user_agent" => {
                let raw = matched.get(name)?;
                Ok(urlencoding::decode(raw)
                    .map(|decoded| Cow::Owned(decoded.into_owned()))
                    .unwrap_or(Cow::Borrowed(raw)))
            }
            _ => matched.get(name).map(Cow::Borrowed),
        }
    }

    /// Warn when an IIS file is read with time-taken in seconds
    pub fn check_iis_time_taken(&self) {
        let Some(grammar) = &self.grammar else {
            return;
        };
        let time_taken_in_secs = !grammar.pattern.contains("generation_time_milli");
        let is_iis = grammar.header_lines.iter().any(|line| {
            let lower = line.to_lowercase();
            lower.contains("internet information services") || lower.contains("iis")
        });
        if time_taken_in_secs && is_iis {
            tracing::warn!(
                "IIS log file being parsed without --w3c-time-taken-millisecs. IIS stores \
                 millisecond values in the time-taken field. If your log file does this, that \
                 option must be used in order to get accurate generation times."
            );
        }
    }

    #[cfg(test)]
    fn header_mentions_iis(&self) -> bool {
        self.grammar.as_ref().is_some_and(|g| {
            g.header_lines
                .iter()
                .any(|l| l.to_lowercase().contains("iis"))
        })
    }
}
