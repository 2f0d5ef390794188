//! Line sources: files of unknown compression and standard input
//!
//! A `LineReader` yields decoded lines tagged with their 0-based physical line
//! number. Detection reads a sample and then rewinds by replaying the lines
//! recorded while sampling, so no source is read or decompressed twice.

use encoding_rs::Encoding;
use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use crate::decompression::{maybe_decompress, open_log_file};
use crate::error::{ImportError, LineRejection};

/// Where log lines come from; `-` on the command line means stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            InputSource::Stdin
        } else {
            InputSource::File(PathBuf::from(arg))
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            InputSource::Stdin => "(stdin)".to_string(),
            InputSource::File(path) => path.display().to_string(),
        }
    }
}

/// Look up an `--encoding` label such as `utf-8`, `latin1` or `windows-1252`
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding, ImportError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| ImportError::Config(format!("unknown encoding '{}'", label)))
}

/// One physical line: its number and either its text or why it could not be decoded
pub type NumberedLine = (usize, Result<String, LineRejection>);

pub struct LineReader {
    source: InputSource,
    inner: Box<dyn BufRead + Send>,
    encoding: &'static Encoding,
    next_lineno: usize,
    buf: Vec<u8>,
    recorded: Option<Vec<NumberedLine>>,
    replay: VecDeque<NumberedLine>,
}

impl LineReader {
    pub fn open(source: InputSource, encoding: &'static Encoding) -> Result<Self, ImportError> {
        let inner = open_source(&source)?;
        Ok(Self::from_reader(source, inner, encoding))
    }

    pub fn from_reader(
        source: InputSource,
        inner: Box<dyn BufRead + Send>,
        encoding: &'static Encoding,
    ) -> Self {
        Self {
            source,
            inner,
            encoding,
            next_lineno: 0,
            buf: Vec::with_capacity(1024),
            recorded: None,
            replay: VecDeque::new(),
        }
    }

    pub fn source(&self) -> &InputSource {
        &self.source
    }

    /// Next physical line, or `None` at end of input
    pub fn next_line(&mut self) -> io::Result<Option<NumberedLine>> {
        if let Some(line) = self.replay.pop_front() {
            return Ok(Some(line));
        }

        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }

        let mut bytes = self.buf.as_slice();
        if let Some(stripped) = bytes.strip_suffix(b"\n") {
            bytes = stripped;
        }
        if let Some(stripped) = bytes.strip_suffix(b"\r") {
            bytes = stripped;
        }

        let text = self
            .encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|s| s.into_owned())
            .ok_or(LineRejection::Encoding);

        let line = (self.next_lineno, text);
        self.next_lineno += 1;

        if let Some(recorded) = &mut self.recorded {
            recorded.push(line.clone());
        }
        Ok(Some(line))
    }

    /// Decodable lines for format detection, at most `limit` of them read.
    ///
    /// A read error ends the sample; the import proper continues reading
    /// the source from where the sample stopped.
    pub fn sample(&mut self, limit: usize) -> Vec<String> {
        self.recorded = Some(Vec::new());

        let mut sample = Vec::new();
        for _ in 0..limit {
            match self.next_line() {
                Ok(Some((_, Ok(text)))) => sample.push(text),
                Ok(Some((_, Err(_)))) => continue,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(source = %self.source.display_name(), error = %e, "read error while detecting format");
                    break;
                }
            }
        }
        sample
    }

    /// Start again from the first line read by `sample`
    pub fn rewind(&mut self) {
        let recorded = self.recorded.take().unwrap_or_default();
        let mut replay: VecDeque<NumberedLine> = recorded.into();
        replay.extend(self.replay.drain(..));
        self.replay = replay;
    }
}

fn open_source(source: &InputSource) -> Result<Box<dyn BufRead + Send>, ImportError> {
    match source {
        InputSource::Stdin => {
            maybe_decompress(io::stdin()).map_err(|e| ImportError::io(Path::new("-"), e))
        }
        InputSource::File(path) => open_log_file(path),
    }
}
