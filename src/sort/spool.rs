//! Key-tagged spool and spill files
//!
//! Each line is `<key>\t<ordinal>\t<record line>`. Keys are written with the
//! shortest representation that parses back to the same value, so decoding a
//! line always reproduces the key it was written with.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    error::{Result, SortError},
    key::SortKey,
};

/// Buffer size for spool readers and writers
pub const SPOOL_BUFFER_SIZE: usize = 64 * 1024;

/// One decoded spool line
#[derive(Debug, Clone, PartialEq)]
pub struct SpoolEntry {
    pub key: SortKey,
    pub ordinal: u64,
    pub line: String,
}
impl SpoolEntry {
    /// Approximate heap footprint, used for chunk accounting
    #[must_use]
    pub fn footprint(&self) -> usize {
        std::mem::size_of::<Self>() + self.line.capacity()
    }
}

/// Split a spool line into key, ordinal and record
#[must_use]
pub fn decode(line: &str) -> Option<(SortKey, u64, &str)> {
    let bytes = line.as_bytes();
    let first = memchr::memchr(b'\t', bytes)?;
    let second = first + 1 + memchr::memchr(b'\t', &bytes[first + 1..])?;
    let key = line[..first].parse().ok()?;
    let ordinal = line[first + 1..second].parse().ok()?;
    Some((key, ordinal, &line[second + 1..]))
}

enum Sink {
    Plain(BufWriter<File>),
    Zstd(zstd::Encoder<'static, BufWriter<File>>),
}
impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Plain(w) => w,
            Self::Zstd(w) => w,
        }
    }
}

/// Appends key-tagged records to a spool or spill file
pub struct SpoolWriter {
    path: PathBuf,
    sink: Sink,
    records: u64,
    ordinal_buf: itoa::Buffer,
}
impl SpoolWriter {
    /// Create the file; a `compression` level of 0 writes plain text
    pub fn create(path: &Path, compression: i32) -> io::Result<Self> {
        let handle = BufWriter::with_capacity(SPOOL_BUFFER_SIZE, File::create(path)?);
        let sink = if compression > 0 {
            Sink::Zstd(zstd::Encoder::new(handle, compression)?)
        } else {
            Sink::Plain(handle)
        };
        Ok(Self {
            path: path.to_path_buf(),
            sink,
            records: 0,
            ordinal_buf: itoa::Buffer::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn push(&mut self, key: SortKey, ordinal: u64, line: &str) -> io::Result<()> {
        let ordinal = self.ordinal_buf.format(ordinal);
        let writer = self.sink.writer();
        write!(writer, "{key}\t")?;
        writer.write_all(ordinal.as_bytes())?;
        writer.write_all(b"\t")?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Flush and close the file, returning the number of records written
    pub fn finish(self) -> io::Result<u64> {
        match self.sink {
            Sink::Plain(mut w) => w.flush()?,
            Sink::Zstd(w) => w.finish()?.flush()?,
        }
        Ok(self.records)
    }
}

/// Streams entries back out of a spool or spill file
pub struct SpoolReader {
    path: PathBuf,
    reader: Box<dyn BufRead>,
    line_no: u64,
    buf: String,
}
impl SpoolReader {
    pub fn open(path: &Path, compressed: bool) -> Result<Self> {
        let io_err = |source| SortError::Io {
            path: path.to_path_buf(),
            source,
        };
        let handle = File::open(path).map_err(io_err)?;
        let reader: Box<dyn BufRead> = if compressed {
            let decoder = zstd::Decoder::new(handle).map_err(io_err)?;
            Box::new(BufReader::with_capacity(SPOOL_BUFFER_SIZE, decoder))
        } else {
            Box::new(BufReader::with_capacity(SPOOL_BUFFER_SIZE, handle))
        };
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            line_no: 0,
            buf: String::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines read so far
    #[must_use]
    pub fn line(&self) -> u64 {
        self.line_no
    }

    /// Read the next entry; a line that does not decode is a [`SortError`]
    pub fn next_entry(&mut self) -> Result<Option<SpoolEntry>> {
        self.buf.clear();
        let n = self
            .reader
            .read_line(&mut self.buf)
            .map_err(|source| SortError::Io {
                path: self.path.clone(),
                source,
            })?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        let corrupt = || SortError::CorruptSpool {
            path: self.path.clone(),
            line: self.line_no,
        };
        let line = self.buf.strip_suffix('\n').ok_or_else(corrupt)?;
        let (key, ordinal, record) = decode(line).ok_or_else(corrupt)?;
        Ok(Some(SpoolEntry {
            key,
            ordinal,
            line: record.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: f64) -> SortKey {
        SortKey::new(v).unwrap()
    }

    #[test]
    fn test_decode() {
        let (k, o, rest) = decode("-1.5\t42\t1\t100\tA\tC").unwrap();
        assert_eq!(k, key(-1.5));
        assert_eq!(o, 42);
        assert_eq!(rest, "1\t100\tA\tC");
        assert!(decode("1.0\tx\tline").is_none());
        assert!(decode("abc\t1\tline").is_none());
        assert!(decode("1.0 only").is_none());
    }

    #[test]
    fn test_plain_and_compressed() {
        let dir = tempfile::tempdir().unwrap();
        for level in [0, 1] {
            let path = dir.path().join(format!("s{level}.spool"));
            let mut writer = SpoolWriter::create(&path, level).unwrap();
            writer.push(key(3.25), 0, "1\t10\tx").unwrap();
            writer.push(key(0.1), 7, "2\t20\ty").unwrap();
            assert_eq!(writer.finish().unwrap(), 2);

            let mut reader = SpoolReader::open(&path, level > 0).unwrap();
            let first = reader.next_entry().unwrap().unwrap();
            assert_eq!(first.key, key(3.25));
            assert_eq!(first.line, "1\t10\tx");
            let second = reader.next_entry().unwrap().unwrap();
            assert_eq!(second.ordinal, 7);
            assert_eq!(second.key, key(0.1));
            assert!(reader.next_entry().unwrap().is_none());
        }
    }

    #[test]
    fn test_corrupt_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.spool");
        std::fs::write(&path, "1\t0\tok\nnot-a-key\t1\tbad\n").unwrap();
        let mut reader = SpoolReader::open(&path, false).unwrap();
        assert!(reader.next_entry().unwrap().is_some());
        let err = reader.next_entry().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::SortError(SortError::CorruptSpool { line: 2, .. })
        ));
    }

    #[test]
    fn test_truncated_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.spool");
        std::fs::write(&path, "1\t0\tno newline").unwrap();
        let mut reader = SpoolReader::open(&path, false).unwrap();
        assert!(reader.next_entry().is_err());
    }
}
