//! Format auto-detection
//!
//! Detection runs in two stages over a sample of the file:
//!
//! 1. Header stage: the leading `#` directive lines are offered to every
//!    header-declared format (the W3C family). A format qualifies if it can
//!    build a grammar from them and that grammar matches the first data line.
//! 2. Line stage: data lines are tried one at a time against every format
//!    that can match lines. The first line matched by any candidate decides.
//!
//! In both stages the highest score wins and ties keep registration order.

use crate::formats::{FormatCatalog, LogFormat};

/// Maximum number of lines read while looking for a matching format
pub const DETECTION_LINE_LIMIT: usize = 100_000;

#[derive(Debug)]
pub enum DetectOutcome {
    Found(LogFormat),
    /// The sample holds no data line at all
    Empty,
    NoMatch,
}

pub struct FormatDetector<'a> {
    catalog: &'a FormatCatalog,
}

impl<'a> FormatDetector<'a> {
    pub fn new(catalog: &'a FormatCatalog) -> Self {
        Self { catalog }
    }

    pub fn detect(&self, sample: &[String]) -> DetectOutcome {
        let header: Vec<String> = sample
            .iter()
            .take_while(|line| line.trim().is_empty() || is_directive(line))
            .cloned()
            .collect();
        let mut data_lines = sample
            .iter()
            .filter(|line| !line.trim().is_empty() && !is_directive(line))
            .peekable();

        let Some(first_data) = data_lines.peek().map(|l| l.as_str()) else {
            return DetectOutcome::Empty;
        };

        let mut candidates: Vec<LogFormat> = Vec::new();
        let mut best: Option<(usize, LogFormat)> = None;

        for entry in self.catalog.entries() {
            if !entry.is_header_declared() {
                candidates.push(entry.clone());
                continue;
            }
            let Some(ready) = entry.matches_header(&header) else {
                continue;
            };
            if let Some(matched) = ready.matches_line(first_data) {
                tracing::debug!(format = ready.name(), score = matched.score(), "header stage match");
                if best.as_ref().is_none_or(|(score, _)| matched.score() > *score) {
                    best = Some((matched.score(), ready.clone()));
                }
            }
            candidates.push(ready);
        }

        if let Some((_, format)) = best {
            return self.found(format);
        }

        for line in data_lines {
            if let Some(format) = best_match(&candidates, line) {
                return self.found(format.clone());
            }
        }

        DetectOutcome::NoMatch
    }

    fn found(&self, format: LogFormat) -> DetectOutcome {
        tracing::debug!(format = format.name(), "format detected");
        format.warn_on_selection();
        DetectOutcome::Found(format)
    }
}

/// `#Version:`, `#Fields:` and friends
pub fn is_directive(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Highest-scoring candidate matching the line; the first one wins a tie
fn best_match<'f>(candidates: &'f [LogFormat], line: &str) -> Option<&'f LogFormat> {
    let mut best: Option<(usize, &LogFormat)> = None;
    for format in candidates {
        if let Some(matched) = format.matches_line(line) {
            if best.is_none_or(|(score, _)| matched.score() > score) {
                best = Some((matched.score(), format));
            }
        }
    }
    best.map(|(_, format)| format)
}
