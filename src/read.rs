//! Variant stream input
//!
//! [`VariantReader`] classifies every input line as a meta line (`##`), the
//! column line (`#`), or a data line, numbering data lines in input order.
//! [`Batcher`] groups the data lines into queue items following the
//! engine's batching policy.

use std::{
    collections::HashSet,
    fmt,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    annotate::{AnnotationContext, AnnotationEngine},
    error::{InputError, Result},
    header::Header,
    record::{Batch, VariantRecord},
};

/// Default number of feature-less records grouped into one batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Where the variant stream comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Read from stdin
    Stdin,
    /// Read from a (possibly compressed) file
    Path(PathBuf),
}
impl InputSource {
    /// `-` selects stdin
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdin
        } else {
            Self::Path(PathBuf::from(arg))
        }
    }

    fn open(&self) -> Result<Box<dyn BufRead>> {
        let (handle, _format) = match self {
            Self::Stdin => niffler::get_reader(Box::new(std::io::stdin())),
            Self::Path(path) => {
                if !path.is_file() {
                    return Err(InputError::MissingFile(path.clone()).into());
                }
                niffler::from_path(path)
            }
        }
        .map_err(|e| InputError::Unreadable {
            path: self.path_or_dash(),
            source: std::io::Error::other(e),
        })?;
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, handle)))
    }

    fn path_or_dash(&self) -> PathBuf {
        match self {
            Self::Stdin => PathBuf::from("-"),
            Self::Path(path) => path.clone(),
        }
    }
}
impl From<&Path> for InputSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}
impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => f.write_str("<stdin>"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Streams the header and the data lines of a variant file
pub struct VariantReader {
    reader: Box<dyn BufRead>,
    name: String,
    header: Header,
    buf: String,
    line_no: u64,
    next_ordinal: u64,
    pending: Option<VariantRecord>,
    chromosomes: Vec<String>,
    seen: HashSet<String>,
}
impl VariantReader {
    /// Open the source and read its header block
    ///
    /// Everything up to the first data line is parsed before returning, so
    /// [`VariantReader::header`] carries the sample names.
    pub fn open(source: &InputSource) -> Result<Self> {
        let reader = source.open()?;
        Self::from_reader(reader, &source.to_string())
    }

    pub fn from_reader<R: Read + 'static>(reader: R, name: &str) -> Result<Self> {
        let mut this = Self {
            reader: Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, reader)),
            name: name.to_string(),
            header: Header::new(),
            buf: String::new(),
            line_no: 0,
            next_ordinal: 0,
            pending: None,
            chromosomes: Vec::new(),
            seen: HashSet::new(),
        };
        this.pending = this.read_data_line()?;
        debug!(
            "Read {} header line(s) from {}",
            this.header.emit().len(),
            this.name
        );
        Ok(this)
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Consume the reader, keeping the header
    #[must_use]
    pub fn into_header(self) -> Header {
        self.header
    }

    /// Chromosomes in the order they first appeared
    #[must_use]
    pub fn chromosomes(&self) -> &[String] {
        &self.chromosomes
    }

    /// Number of data lines read so far
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.next_ordinal
    }

    /// The next data line as a record
    pub fn next_record(&mut self) -> Result<Option<VariantRecord>> {
        match self.pending.take() {
            Some(record) => Ok(Some(record)),
            None => self.read_data_line(),
        }
    }

    /// Read lines until a data line, parsing any header lines on the way
    fn read_data_line(&mut self) -> Result<Option<VariantRecord>> {
        loop {
            self.buf.clear();
            let n = self
                .reader
                .read_line(&mut self.buf)
                .map_err(|source| InputError::Read {
                    source_name: self.name.clone(),
                    line: self.line_no + 1,
                    source,
                })?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buf.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }
            if line.starts_with("##") {
                self.header.parse_meta_line(line)?;
            } else if line.starts_with('#') {
                self.header.parse_column_line(line)?;
            } else {
                let record = VariantRecord::new(self.next_ordinal, line);
                self.next_ordinal += 1;
                if !self.seen.contains(record.chrom()) {
                    self.seen.insert(record.chrom().to_string());
                    self.chromosomes.push(record.chrom().to_string());
                }
                return Ok(Some(record));
            }
        }
    }
}

/// Groups consecutive records into batches
///
/// A record joins the open batch when the engine asks for it (shared gene),
/// or when neither it nor the last record overlaps a gene and the batch is
/// below `batch_size`. A chromosome change always closes the batch.
pub struct Batcher<'a, E: ?Sized> {
    engine: &'a E,
    ctx: &'a AnnotationContext,
    batch_size: usize,
    current: Vec<VariantRecord>,
    next_id: u64,
}
impl<'a, E: AnnotationEngine + ?Sized> Batcher<'a, E> {
    pub fn new(engine: &'a E, ctx: &'a AnnotationContext, batch_size: usize) -> Self {
        Self {
            engine,
            ctx,
            batch_size: batch_size.max(1),
            current: Vec::new(),
            next_id: 0,
        }
    }

    /// Add a record, returning the batch it closed if any
    pub fn push(&mut self, record: VariantRecord) -> Option<Batch> {
        if self.current.is_empty() || self.joins(&record) {
            self.current.push(record);
            return None;
        }
        let closed = self.take();
        self.current.push(record);
        closed
    }

    /// Close the open batch
    pub fn finish(&mut self) -> Option<Batch> {
        self.take()
    }

    fn joins(&self, next: &VariantRecord) -> bool {
        if self.engine.joins_batch(&self.current, next, self.ctx) {
            return true;
        }
        let Some(last) = self.current.last() else {
            return false;
        };
        last.chrom() == next.chrom()
            && self.current.len() < self.batch_size
            && self.ctx.genes(next).is_empty()
            && self.ctx.genes(last).is_empty()
    }

    fn take(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            return None;
        }
        let batch = Batch::new(self.next_id, std::mem::take(&mut self.current));
        self.next_id += 1;
        Some(batch)
    }
}
