//! Final output
//!
//! The [`OutputWriter`] emits the header block exactly once and then the
//! sorted record lines. File output is staged in a temporary file next to the
//! destination and only moved into place by [`OutputWriter::finish`], so a
//! failed run never leaves a file that looks complete.

use std::{
    fmt,
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Stdout, Write},
    path::{Path, PathBuf},
};

use log::debug;
use tempfile::NamedTempFile;

use crate::{
    error::{OutputError, Result},
    header::Header,
};

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Where the output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    Path(PathBuf),
    /// Nothing is written (silent runs)
    Discard,
}
impl OutputTarget {
    /// Resolve the CLI output options
    #[must_use]
    pub fn resolve(path: Option<&Path>, silent: bool) -> Self {
        match path {
            Some(path) => Self::Path(path.to_path_buf()),
            None if silent => Self::Discard,
            None => Self::Stdout,
        }
    }
}
impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("<stdout>"),
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Discard => f.write_str("<discarded>"),
        }
    }
}

enum Sink {
    Stdout(BufWriter<Stdout>),
    Staged {
        file: BufWriter<NamedTempFile>,
        dest: PathBuf,
    },
    Discard,
}

pub struct OutputWriter {
    sink: Sink,
    target: String,
    header_written: bool,
    records: u64,
}
impl OutputWriter {
    pub fn create(target: &OutputTarget) -> Result<Self> {
        let name = target.to_string();
        let sink = match target {
            OutputTarget::Stdout => {
                Sink::Stdout(BufWriter::with_capacity(WRITE_BUFFER_SIZE, io::stdout()))
            }
            OutputTarget::Path(dest) => {
                let dir = match dest.parent() {
                    Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                let staged = tempfile::Builder::new()
                    .prefix(".genmod_out_")
                    .tempfile_in(&dir)
                    .map_err(|source| OutputError::Write {
                        target: name.clone(),
                        source,
                    })?;
                debug!("Staging output in {}", staged.path().display());
                Sink::Staged {
                    file: BufWriter::with_capacity(WRITE_BUFFER_SIZE, staged),
                    dest: dest.clone(),
                }
            }
            OutputTarget::Discard => Sink::Discard,
        };
        Ok(Self {
            sink,
            target: name,
            header_written: false,
            records: 0,
        })
    }

    fn write_err(&self, source: io::Error) -> OutputError {
        OutputError::Write {
            target: self.target.clone(),
            source,
        }
    }

    fn writer(&mut self) -> Option<&mut dyn Write> {
        match &mut self.sink {
            Sink::Stdout(w) => Some(w),
            Sink::Staged { file, .. } => Some(file),
            Sink::Discard => None,
        }
    }

    /// Write the header block; allowed once, before any record
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        if self.header_written {
            return Err(OutputError::HeaderOrder.into());
        }
        self.header_written = true;
        let Some(writer) = self.writer() else {
            return Ok(());
        };
        let result = header
            .emit()
            .iter()
            .try_for_each(|line| writeln!(writer, "{line}"));
        result.map_err(|e| self.write_err(e).into())
    }

    /// Stream a sorted file of record lines into the output
    ///
    /// Returns the number of records copied.
    pub fn copy_records(&mut self, path: &Path) -> Result<u64> {
        if !self.header_written {
            return Err(OutputError::HeaderOrder.into());
        }
        let handle = File::open(path).map_err(|e| self.write_err(e))?;
        let mut reader = BufReader::with_capacity(WRITE_BUFFER_SIZE, handle);
        let mut copied = 0u64;
        loop {
            let chunk = reader.fill_buf().map_err(|e| self.write_err(e))?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len();
            copied += memchr::memchr_iter(b'\n', chunk).count() as u64;
            let written = match self.writer() {
                Some(writer) => writer.write_all(chunk),
                None => Ok(()),
            };
            written.map_err(|e| self.write_err(e))?;
            reader.consume(len);
        }
        self.records += copied;
        Ok(copied)
    }

    /// Records written so far
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush the output and, for files, move it into place
    pub fn finish(self) -> Result<u64> {
        if !self.header_written {
            return Err(OutputError::HeaderOrder.into());
        }
        let target = self.target;
        match self.sink {
            Sink::Stdout(mut w) => w.flush().map_err(|source| OutputError::Write {
                target: target.clone(),
                source,
            })?,
            Sink::Staged { file, dest } => {
                let staged = file.into_inner().map_err(|e| OutputError::Write {
                    target: target.clone(),
                    source: e.into_error(),
                })?;
                staged.persist(&dest).map_err(|e| OutputError::Persist {
                    path: dest.clone(),
                    source: e.error,
                })?;
                debug!("Wrote {}", dest.display());
            }
            Sink::Discard => {}
        }
        Ok(self.records)
    }
}
