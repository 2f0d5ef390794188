//! The producer side of an import: reading, matching, building, filtering and
//! resolving hits, then handing them to the recorders in batches.

use std::mem;
use std::path::Path;
use std::sync::Arc;

use encoding_rs::Encoding;

use crate::builder::HitBuilder;
use crate::config::{FormatChoice, ImportConfig};
use crate::detection::{is_directive, DetectOutcome, FormatDetector, DETECTION_LINE_LIMIT};
use crate::error::ImportError;
use crate::filters::{FilterChain, Verdict};
use crate::formats::{FormatCatalog, LogFormat};
use crate::hit::Hit;
use crate::platform::CancelToken;
use crate::readers::{resolve_encoding, InputSource, LineReader};
use crate::recorder::RecorderPool;
use crate::sites::SiteResolver;
use crate::stats::StatsRegistry;

/// Lines read to find the header of a file with a forced W3C format
const HEADER_LINE_LIMIT: usize = 100;

/// Where a batch of hits goes once the producer flushes its buffer
pub trait HitDispatch {
    fn dispatch(&self, hits: Vec<Hit>) -> Result<(), ImportError>;
}

impl HitDispatch for RecorderPool {
    fn dispatch(&self, hits: Vec<Hit>) -> Result<(), ImportError> {
        RecorderPool::dispatch(self, hits)
    }
}

pub struct Importer<'a> {
    config: &'a ImportConfig,
    catalog: FormatCatalog,
    forced: Option<LogFormat>,
    builder: HitBuilder<'a>,
    filters: FilterChain,
    resolver: SiteResolver,
    encoding: &'static Encoding,
    stats: Arc<StatsRegistry>,
    cancel: CancelToken,
    flush_threshold: usize,
}

impl<'a> Importer<'a> {
    pub fn new(
        config: &'a ImportConfig,
        stats: Arc<StatsRegistry>,
        cancel: CancelToken,
    ) -> Result<Self, ImportError> {
        let catalog = FormatCatalog::builtin(&config.input.w3c)?;
        let forced = match &config.input.format {
            FormatChoice::Detect => None,
            FormatChoice::Regex(pattern) => Some(FormatCatalog::custom(pattern)?),
            FormatChoice::Named(name) => Some(
                catalog
                    .by_name(name)
                    .cloned()
                    .ok_or_else(|| {
                        ImportError::Config(format!(
                            "invalid log format name '{}', available formats: {}",
                            name,
                            catalog.names().join(", ")
                        ))
                    })?,
            ),
        };

        Ok(Self {
            config,
            forced,
            catalog,
            builder: HitBuilder::new(&config.extraction),
            filters: FilterChain::new(&config.filters)?,
            resolver: SiteResolver::with_static_table(&config.sites, config.extraction.replay_tracking),
            encoding: resolve_encoding(&config.input.encoding)?,
            stats,
            cancel,
            flush_threshold: config.recording.max_payload_size.max(1)
                * config.recording.recorders.max(1),
        })
    }

    /// Open a source, warning about and skipping missing files
    fn open(&self, arg: &str) -> Result<Option<LineReader>, ImportError> {
        let source = InputSource::from_arg(arg);
        if let InputSource::File(path) = &source {
            if !Path::new(path).exists() {
                tracing::warn!("file {} does not exist, skipping", path.display());
                return Ok(None);
            }
        }
        LineReader::open(source, self.encoding).map(Some)
    }

    /// Format used for the source, leaving the reader at its first line.
    ///
    /// `None` means the file has nothing to import.
    fn choose_format(&self, reader: &mut LineReader) -> Result<Option<LogFormat>, ImportError> {
        let file = reader.source().display_name();
        let format = match &self.forced {
            Some(format) if format.is_header_declared() => {
                let sample = reader.sample(HEADER_LINE_LIMIT);
                reader.rewind();
                let header: Vec<String> = sample
                    .into_iter()
                    .take_while(|line| line.trim().is_empty() || is_directive(line))
                    .collect();
                let format = format
                    .matches_header(&header)
                    .ok_or_else(|| ImportError::MissingW3cFields { file: file.clone() })?;
                format.warn_on_selection();
                format
            }
            Some(format) => format.clone(),
            None => {
                let sample = reader.sample(DETECTION_LINE_LIMIT);
                reader.rewind();
                match FormatDetector::new(&self.catalog).detect(&sample) {
                    DetectOutcome::Found(format) => format,
                    DetectOutcome::Empty => {
                        tracing::info!("{} contains no log lines, skipping", file);
                        return Ok(None);
                    }
                    DetectOutcome::NoMatch => {
                        return Err(ImportError::DetectionFailure {
                            file,
                            lines: sample.len().min(DETECTION_LINE_LIMIT),
                        })
                    }
                }
            }
        };
        tracing::debug!(file = %file, format = format.name(), "using format");
        Ok(Some(format))
    }

    /// Format and regex of the first file that has one, for `--dump-log-regex`
    pub fn describe_format(&self) -> Result<Option<LogFormat>, ImportError> {
        for arg in &self.config.input.files {
            let Some(mut reader) = self.open(arg)? else {
                continue;
            };
            if let Some(format) = self.choose_format(&mut reader)? {
                return Ok(Some(format));
            }
        }
        Ok(None)
    }

    /// Import every configured file in order
    pub fn import_all(&mut self, dispatch: &dyn HitDispatch) -> Result<(), ImportError> {
        for arg in &self.config.input.files {
            if self.cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            let Some(reader) = self.open(arg)? else {
                continue;
            };
            self.import_reader(reader, dispatch)?;
        }
        Ok(())
    }

    /// Read one source to the end, dispatching accepted hits
    pub fn import_reader(
        &mut self,
        mut reader: LineReader,
        dispatch: &dyn HitDispatch,
    ) -> Result<(), ImportError> {
        let Some(mut format) = self.choose_format(&mut reader)? else {
            return Ok(());
        };
        let filename = reader.source().display_name();
        tracing::info!("parsing log {}...", filename);

        let skip = self.config.input.skip;
        let mut buffer: Vec<Hit> = Vec::new();

        loop {
            if self.cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            let next = reader.next_line().map_err(|e| match reader.source() {
                InputSource::File(path) => ImportError::io(path.clone(), e),
                InputSource::Stdin => ImportError::io("-", e),
            })?;
            let Some((lineno, text)) = next else {
                break;
            };
            self.stats.lines_read.increment();
            if lineno < skip {
                continue;
            }

            let line = match text {
                Ok(line) => line,
                Err(reason) => {
                    tracing::trace!(file = %filename, lineno, "invalid line detected ({})", reason);
                    self.stats.invalid.increment();
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if format.is_header_declared() && is_directive(&line) {
                // A new #Fields: line replaces the grammar for the lines below it
                if let Some(rebuilt) = format.matches_header(std::slice::from_ref(&line)) {
                    tracing::debug!(file = %filename, lineno, "W3C fields redefined");
                    format = rebuilt;
                }
                continue;
            }

            if let Some(hit) = self.process_line(&format, &line, &filename, lineno)? {
                buffer.push(hit);
                if buffer.len() >= self.flush_threshold {
                    dispatch.dispatch(mem::take(&mut buffer))?;
                }
            }
        }

        if !buffer.is_empty() {
            dispatch.dispatch(buffer)?;
        }
        Ok(())
    }

    /// Turn one line into a recordable hit, counting every other outcome
    fn process_line(
        &mut self,
        format: &LogFormat,
        line: &str,
        filename: &str,
        lineno: usize,
    ) -> Result<Option<Hit>, ImportError> {
        let Some(matched) = format.matches_line(line) else {
            tracing::trace!(file = %filename, lineno, line, "invalid line detected (line did not match)");
            self.stats.invalid.increment();
            return Ok(None);
        };
        self.stats.parsed.increment();

        let mut pending = match self.builder.build(format, matched, filename, lineno) {
            Ok(pending) => pending,
            Err(reason) => {
                tracing::trace!(file = %filename, lineno, "malformed line ({})", reason);
                self.stats.malformed.increment();
                return Ok(None);
            }
        };

        if let Verdict::Reject(rejection) = self.filters.evaluate(&mut pending.hit, &self.stats) {
            tracing::trace!(file = %filename, lineno, ?rejection, "hit excluded");
            return Ok(None);
        }

        let mut hit = match self.builder.finish(format, pending) {
            Ok(hit) => hit,
            Err(reason) => {
                tracing::trace!(file = %filename, lineno, "malformed line ({})", reason);
                self.stats.malformed.increment();
                return Ok(None);
            }
        };

        match self.resolver.resolve(&hit, &self.stats)? {
            Some(site_id) => {
                hit.site_id = Some(site_id);
                Ok(Some(hit))
            }
            None => Ok(None),
        }
    }
}
