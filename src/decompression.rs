use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::Path;

use crate::error::ImportError;

/// Compression detected from the first bytes of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// 1F 8B 08
    Gzip,
    /// `BZh`
    Bzip2,
    /// 28 B5 2F FD
    Zstd,
    Plain,
}

impl Compression {
    pub fn from_magic(head: &[u8]) -> Self {
        match head {
            [0x1F, 0x8B, 0x08, ..] => Compression::Gzip,
            [b'B', b'Z', b'h', ..] => Compression::Bzip2,
            [0x28, 0xB5, 0x2F, 0xFD, ..] => Compression::Zstd,
            _ => Compression::Plain,
        }
    }
}

/// Sniff the magic bytes of any reader and wrap it in the matching decoder
pub fn maybe_decompress<R: Read + Send + 'static>(
    mut reader: R,
) -> io::Result<Box<dyn BufRead + Send>> {
    let mut head = [0u8; 4];
    let n = read_head(&mut reader, &mut head)?;

    // Put the sniffed bytes back in front of the stream
    let chained = Cursor::new(head[..n].to_vec()).chain(reader);

    let decoded: Box<dyn BufRead + Send> = match Compression::from_magic(&head[..n]) {
        Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(chained))),
        Compression::Bzip2 => Box::new(BufReader::new(bzip2_rs::DecoderReader::new(chained))),
        Compression::Zstd => Box::new(BufReader::new(zstd::Decoder::new(chained)?)),
        Compression::Plain => Box::new(BufReader::new(chained)),
    };
    Ok(decoded)
}

// A single read() may legitimately return fewer bytes than requested
fn read_head<R: Read>(reader: &mut R, head: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < head.len() {
        match reader.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Open a log file, transparently decompressing gzip, bzip2 and zstd
pub fn open_log_file(path: &Path) -> Result<Box<dyn BufRead + Send>, ImportError> {
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        if extension.eq_ignore_ascii_case("zip") {
            return Err(ImportError::Config(format!(
                "ZIP file decompression is not supported. Only gzip, bzip2 and zstd files can be \
                 read directly. Extract the ZIP file first: unzip {}",
                path.display()
            )));
        }
    }

    let file = File::open(path).map_err(|e| ImportError::io(path, e))?;
    maybe_decompress(file).map_err(|e| ImportError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn read_all(mut reader: Box<dyn BufRead + Send>) -> String {
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn test_magic_detection() {
        assert_eq!(Compression::from_magic(&[0x1F, 0x8B, 0x08, 0x00]), Compression::Gzip);
        assert_eq!(Compression::from_magic(b"BZh9"), Compression::Bzip2);
        assert_eq!(Compression::from_magic(&[0x28, 0xB5, 0x2F, 0xFD]), Compression::Zstd);
        assert_eq!(Compression::from_magic(b"1.2."), Compression::Plain);
        assert_eq!(Compression::from_magic(b"B"), Compression::Plain);
        assert_eq!(Compression::from_magic(&[]), Compression::Plain);
    }

    #[test]
    fn test_plain_file_passthrough() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "line 1").unwrap();
        writeln!(temp_file, "line 2").unwrap();
        temp_file.flush().unwrap();

        let content = read_all(open_log_file(temp_file.path()).unwrap());
        assert_eq!(content, "line 1\nline 2\n");
    }

    #[test]
    fn test_short_plain_input() {
        let content = read_all(maybe_decompress(Cursor::new(b"ab".to_vec())).unwrap());
        assert_eq!(content, "ab");
    }

    #[test]
    fn test_gzip_stream() {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"compressed line\n").unwrap();
        let bytes = encoder.finish().unwrap();

        let content = read_all(maybe_decompress(Cursor::new(bytes)).unwrap());
        assert_eq!(content, "compressed line\n");
    }

    #[test]
    fn test_bzip2_file() {
        use std::process::Command;

        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "bzip2 line").unwrap();
        temp_file.flush().unwrap();

        let status = Command::new("bzip2")
            .arg("-k")
            .arg("-f")
            .arg(temp_file.path())
            .status();
        if !matches!(status, Ok(s) if s.success()) {
            eprintln!("Skipping bzip2 test: bzip2 command not available");
            return;
        }

        let bz2_path = std::path::PathBuf::from(format!("{}.bz2", temp_file.path().display()));
        let content = read_all(open_log_file(&bz2_path).unwrap());
        assert_eq!(content, "bzip2 line\n");
        let _ = std::fs::remove_file(&bz2_path);
    }

    #[test]
    fn test_zip_file_rejection() {
        let temp_dir = tempfile::tempdir().unwrap();
        let zip_path = temp_dir.path().join("access.zip");
        std::fs::write(&zip_path, b"fake zip content").unwrap();

        let err = open_log_file(&zip_path).err().unwrap();
        assert!(err.to_string().contains("ZIP file decompression is not supported"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = open_log_file(Path::new("/nonexistent/access.log")).err().unwrap();
        assert!(matches!(err, ImportError::Io { .. }));
    }
}
