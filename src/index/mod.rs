//! Gene and exon interval indexes
//!
//! An [`IntervalIndex`] answers "which features overlap this position" per
//! chromosome. Indexes are either built from an annotation file (see
//! [`AnnotationType`]) or loaded from a versioned text artifact written by
//! [`AnnotationIndex::write`]. Loading never executes anything from the
//! artifact: it is a plain tab-separated table behind a magic/version line.
//!
//! Artifact layout:
//!
//! ```text
//! #genmod-index<TAB>1
//! gene<TAB>chrom<TAB>start<TAB>end<TAB>name
//! exon<TAB>chrom<TAB>start<TAB>end<TAB>name
//! ```

mod parse;

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use log::info;

pub use parse::AnnotationType;

use crate::error::{IndexError, Result};

pub const INDEX_MAGIC: &str = "#genmod-index";
pub const INDEX_VERSION: u32 = 1;

/// Default number of bases exons are padded with to cover splice sites
pub const DEFAULT_SPLICE_PADDING: u64 = 2;

/// A closed interval `[start, end]` labelled with a feature name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
struct ChromIntervals {
    intervals: Vec<Interval>,
    max_span: u64,
    sorted: bool,
}
impl ChromIntervals {
    fn push(&mut self, interval: Interval) {
        self.max_span = self.max_span.max(interval.end - interval.start);
        self.intervals.push(interval);
        self.sorted = false;
    }

    fn finalize(&mut self) {
        if !self.sorted {
            self.intervals
                .sort_by(|a, b| (a.start, a.end, &a.name).cmp(&(b.start, b.end, &b.name)));
            self.intervals.dedup();
            self.sorted = true;
        }
    }
}

/// Per-chromosome interval lookup
#[derive(Debug, Clone, Default)]
pub struct IntervalIndex {
    chroms: HashMap<String, ChromIntervals>,
}
impl IntervalIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interval; `start` and `end` are swapped if given in reverse
    pub fn insert(&mut self, chrom: &str, start: u64, end: u64, name: &str) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.chroms.entry(chrom.to_string()).or_default().push(Interval {
            start,
            end,
            name: name.to_string(),
        });
    }

    /// Sort the intervals; must be called after the last insert
    pub fn finalize(&mut self) {
        self.chroms.values_mut().for_each(ChromIntervals::finalize);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chroms.values().all(|c| c.intervals.is_empty())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chroms.values().map(|c| c.intervals.len()).sum()
    }

    /// Chromosome labels present in the index, sorted
    #[must_use]
    pub fn chromosomes(&self) -> Vec<&str> {
        let mut chroms: Vec<&str> = self.chroms.keys().map(String::as_str).collect();
        chroms.sort_unstable();
        chroms
    }

    /// Names of all features overlapping `pos`, sorted and deduplicated
    #[must_use]
    pub fn query(&self, chrom: &str, pos: u64) -> Vec<&str> {
        let Some(entry) = self.chroms.get(chrom) else {
            return Vec::new();
        };
        debug_assert!(entry.sorted, "query on an unfinalized index");
        let upper = entry.intervals.partition_point(|iv| iv.start <= pos);
        let lower_bound = pos.saturating_sub(entry.max_span);
        let mut names: Vec<&str> = entry.intervals[..upper]
            .iter()
            .rev()
            .take_while(|iv| iv.start >= lower_bound)
            .filter(|iv| iv.end >= pos)
            .map(|iv| iv.name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &Interval)> {
        self.chroms
            .iter()
            .flat_map(|(chrom, c)| c.intervals.iter().map(move |iv| (chrom.as_str(), iv)))
    }
}

/// The pair of gene and exon indexes consumed by the annotation engine
#[derive(Debug, Clone, Default)]
pub struct AnnotationIndex {
    pub genes: IntervalIndex,
    pub exons: IntervalIndex,
}
impl AnnotationIndex {
    /// Build indexes from an annotation file
    pub fn build(path: &Path, kind: AnnotationType, splice_padding: u64) -> Result<Self> {
        let mut index = parse::parse_annotation(path, kind, splice_padding)?;
        index.genes.finalize();
        index.exons.finalize();
        info!(
            "Parsed {} genes and {} exons from {}",
            index.genes.len(),
            index.exons.len(),
            path.display()
        );
        Ok(index)
    }

    /// Load a previously written index artifact
    ///
    /// Fails with [`IndexError::NotBuilt`] if the artifact does not exist and
    /// [`IndexError::IncompatibleVersion`] if it was written in another format.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(IndexError::NotBuilt(path.to_path_buf()).into());
        }
        let io_err = |source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut first = String::new();
        reader.read_line(&mut first).map_err(io_err)?;
        let first = first.trim_end();
        let expected = format!("{INDEX_MAGIC}\t{INDEX_VERSION}");
        if first != expected {
            return Err(IndexError::IncompatibleVersion {
                path: path.to_path_buf(),
                found: first.to_string(),
            }
            .into());
        }

        let mut index = Self::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.is_empty() {
                continue;
            }
            let line_no = idx as u64 + 2;
            let malformed = |reason: &str| IndexError::Malformed {
                path: path.to_path_buf(),
                line: line_no,
                reason: reason.to_string(),
            };
            let columns: Vec<&str> = line.split('\t').collect();
            let [kind, chrom, start, end, name] = columns[..] else {
                return Err(malformed("expected 5 columns").into());
            };
            let start = start.parse().map_err(|_| malformed("invalid start"))?;
            let end = end.parse().map_err(|_| malformed("invalid end"))?;
            match kind {
                "gene" => index.genes.insert(chrom, start, end, name),
                "exon" => index.exons.insert(chrom, start, end, name),
                _ => return Err(malformed("unknown feature kind").into()),
            }
        }
        index.genes.finalize();
        index.exons.finalize();
        Ok(index)
    }

    /// Write the index as a versioned artifact
    pub fn write(&self, path: &Path) -> Result<()> {
        let io_err = |source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        writeln!(writer, "{INDEX_MAGIC}\t{INDEX_VERSION}").map_err(io_err)?;
        let mut rows: Vec<(&str, &str, &Interval)> = self
            .genes
            .iter()
            .map(|(c, iv)| ("gene", c, iv))
            .chain(self.exons.iter().map(|(c, iv)| ("exon", c, iv)))
            .collect();
        rows.sort_by(|a, b| (a.0, a.1, a.2.start).cmp(&(b.0, b.1, b.2.start)));
        for (kind, chrom, iv) in rows {
            writeln!(writer, "{kind}\t{chrom}\t{}\t{}\t{}", iv.start, iv.end, iv.name)
                .map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> IntervalIndex {
        let mut index = IntervalIndex::new();
        index.insert("1", 100, 200, "A");
        index.insert("1", 150, 5000, "B");
        index.insert("1", 300, 400, "C");
        index.insert("2", 10, 20, "D");
        index.finalize();
        index
    }

    // ==================== Query Tests ====================

    #[test]
    fn test_query_overlaps() {
        let index = sample_index();
        assert_eq!(index.query("1", 99), Vec::<&str>::new());
        assert_eq!(index.query("1", 100), vec!["A"]);
        assert_eq!(index.query("1", 160), vec!["A", "B"]);
        assert_eq!(index.query("1", 350), vec!["B", "C"]);
        assert_eq!(index.query("1", 4000), vec!["B"]);
        assert_eq!(index.query("2", 20), vec!["D"]);
        assert!(index.query("3", 20).is_empty());
        assert_eq!(index.len(), 4);
        assert_eq!(index.chromosomes(), vec!["1", "2"]);
    }

    #[test]
    fn test_reversed_bounds() {
        let mut index = IntervalIndex::new();
        index.insert("X", 50, 10, "R");
        index.finalize();
        assert_eq!(index.query("X", 30), vec!["R"]);
    }

    // ==================== Artifact Tests ====================

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genes.idx");
        let index = AnnotationIndex {
            genes: sample_index(),
            exons: {
                let mut exons = IntervalIndex::new();
                exons.insert("1", 120, 130, "A");
                exons.finalize();
                exons
            },
        };
        index.write(&path).unwrap();

        let loaded = AnnotationIndex::load(&path).unwrap();
        assert_eq!(loaded.genes.len(), 4);
        assert_eq!(loaded.exons.query("1", 125), vec!["A"]);
        assert_eq!(loaded.genes.query("1", 160), vec!["A", "B"]);
    }

    #[test]
    fn test_not_built() {
        let dir = tempfile::tempdir().unwrap();
        let err = AnnotationIndex::load(&dir.path().join("missing.idx")).unwrap_err();
        assert!(err.is_not_built());
    }

    #[test]
    fn test_incompatible_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.idx");
        std::fs::write(&path, "#genmod-index\t0\ngene\t1\t1\t2\tA\n").unwrap();
        let err = AnnotationIndex::load(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::IndexError(IndexError::IncompatibleVersion { .. })
        ));

        std::fs::write(&path, b"\x80\x02pickle").unwrap();
        assert!(AnnotationIndex::load(&path).is_err());
    }

    #[test]
    fn test_malformed_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.idx");
        std::fs::write(&path, "#genmod-index\t1\ngene\t1\tx\t2\tA\n").unwrap();
        let err = AnnotationIndex::load(&path).unwrap_err();
        assert!(format!("{err}").contains("line 2"));
    }
}
