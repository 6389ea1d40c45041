//! Run configuration
//!
//! Every path and tunable of a run is resolved up front into one of these
//! structs; nothing is looked up relative to the installation.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    annotate::AnnotationSettings,
    index::{AnnotationType, DEFAULT_SPLICE_PADDING},
    key::SortOrder,
    queue::{DEFAULT_QUEUE_CAPACITY, MIN_STALL_TIMEOUT},
    read::{InputSource, DEFAULT_BATCH_SIZE},
    sort::{ExternalSorter, DEFAULT_MAX_FAN_IN, DEFAULT_MEMORY_LIMIT, DEFAULT_SPILL_COMPRESSION},
    write::OutputTarget,
};

/// How long the coordinator waits without progress before declaring a stall
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(600);

/// External sort parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSettings {
    pub order: SortOrder,
    pub memory_limit: usize,
    pub max_records: Option<usize>,
    pub max_fan_in: usize,
    /// zstd level for spool and spill files, 0 for plain text
    pub compression: i32,
}
impl Default for SortSettings {
    fn default() -> Self {
        Self {
            order: SortOrder::default(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
            max_records: None,
            max_fan_in: DEFAULT_MAX_FAN_IN,
            compression: DEFAULT_SPILL_COMPRESSION,
        }
    }
}
impl SortSettings {
    #[must_use]
    pub fn sorter(&self) -> ExternalSorter {
        ExternalSorter::new(self.order)
            .memory_limit(self.memory_limit)
            .max_records(self.max_records)
            .max_fan_in(self.max_fan_in)
            .spill_compression(self.compression)
    }
}

/// Where the gene and exon intervals come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    /// Build from an annotation file at startup
    Annotation { path: PathBuf, kind: AnnotationType },
    /// Load a prebuilt index artifact
    Prebuilt(PathBuf),
    /// Read genes from the VEP `CSQ` entry of each record
    Vep,
    /// Run without gene or exon features
    Empty,
}

/// Configuration of an `annotate` run
#[derive(Debug, Clone)]
pub struct AnnotateConfig {
    pub pedigree: PathBuf,
    pub input: InputSource,
    pub output: OutputTarget,
    pub index: IndexSource,
    pub splice_padding: u64,
    /// Score tables, consulted in order
    pub score_files: Vec<PathBuf>,
    pub family_id: Option<String>,
    pub settings: AnnotationSettings,
    /// 0 means one worker per core
    pub workers: usize,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub stall_timeout: Duration,
    pub sort: SortSettings,
    pub tmp_dir: Option<PathBuf>,
}
impl AnnotateConfig {
    pub fn new(pedigree: &Path, input: InputSource) -> Self {
        Self {
            pedigree: pedigree.to_path_buf(),
            input,
            output: OutputTarget::Stdout,
            index: IndexSource::Empty,
            splice_padding: DEFAULT_SPLICE_PADDING,
            score_files: Vec::new(),
            family_id: None,
            settings: AnnotationSettings::default(),
            workers: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            sort: SortSettings::default(),
            tmp_dir: None,
        }
    }

    #[must_use]
    pub fn output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn index(mut self, index: IndexSource) -> Self {
        self.index = index;
        self
    }

    #[must_use]
    pub fn splice_padding(mut self, padding: u64) -> Self {
        self.splice_padding = padding;
        self
    }

    #[must_use]
    pub fn score_file(mut self, path: &Path) -> Self {
        self.score_files.push(path.to_path_buf());
        self
    }

    #[must_use]
    pub fn family_id(mut self, family_id: Option<String>) -> Self {
        self.family_id = family_id;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: AnnotationSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Clamped to at least [`MIN_STALL_TIMEOUT`]
    #[must_use]
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout.max(MIN_STALL_TIMEOUT);
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: SortSettings) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn tmp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.tmp_dir = dir;
        self
    }
}

/// Configuration of a standalone `sort` run
#[derive(Debug, Clone)]
pub struct SortConfig {
    pub input: InputSource,
    pub output: OutputTarget,
    /// Selects the `family:score` entry used as the key
    pub family_id: Option<String>,
    pub sort: SortSettings,
    pub tmp_dir: Option<PathBuf>,
}
impl SortConfig {
    pub fn new(input: InputSource) -> Self {
        Self {
            input,
            output: OutputTarget::Stdout,
            family_id: None,
            sort: SortSettings::default(),
            tmp_dir: None,
        }
    }

    #[must_use]
    pub fn output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn family_id(mut self, family_id: Option<String>) -> Self {
        self.family_id = family_id;
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: SortSettings) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn tmp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.tmp_dir = dir;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnnotateConfig::new(Path::new("fam.ped"), InputSource::Stdin);
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.workers, 0);
        assert_eq!(config.splice_padding, 2);
        assert_eq!(config.sort.order, SortOrder::Descending);
        assert_eq!(config.index, IndexSource::Empty);
        assert_eq!(config.output, OutputTarget::Stdout);
    }

    #[test]
    fn test_builder() {
        let config = AnnotateConfig::new(Path::new("fam.ped"), InputSource::Stdin)
            .queue_capacity(0)
            .batch_size(0)
            .workers(3)
            .stall_timeout(Duration::ZERO)
            .score_file(Path::new("a.tsv"))
            .score_file(Path::new("b.tsv"));
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.workers, 3);
        assert_eq!(config.stall_timeout, MIN_STALL_TIMEOUT);
        assert_eq!(config.score_files.len(), 2);

        let sort = SortConfig::new(InputSource::Stdin).family_id(Some("1".into()));
        assert_eq!(sort.family_id.as_deref(), Some("1"));
    }
}
