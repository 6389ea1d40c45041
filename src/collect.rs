//! Result collection and chromosome partitioning
//!
//! A single collector thread drains the result channel, computes each record's
//! [`SortKey`] and appends the record to the spool file of its chromosome.
//! Partition files are opened lazily and stay open until the collector
//! receives [`Collected::Close`]; nothing else writes to them.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    thread::JoinHandle,
};

use crossbeam_channel::Receiver;
use log::{debug, info};

use crate::{
    error::{ResourceError, Result, WorkerFailure},
    key::SortKey,
    parallel::Collected,
    sort::spool::SpoolWriter,
};

/// One chromosome's spool file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    chrom: String,
    path: PathBuf,
    records: u64,
}
impl Partition {
    #[must_use]
    pub fn chrom(&self) -> &str {
        &self.chrom
    }
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }
}

/// Partitions keyed by chromosome, in the order they were created
///
/// File names come from a counter, so the registry is the only way to find a
/// chromosome's spool file.
#[derive(Debug, Clone)]
pub struct PartitionRegistry {
    dir: PathBuf,
    compressed: bool,
    partitions: Vec<Partition>,
    by_chrom: HashMap<String, usize>,
}
impl PartitionRegistry {
    #[must_use]
    pub fn new(dir: &Path, compressed: bool) -> Self {
        Self {
            dir: dir.to_path_buf(),
            compressed,
            partitions: Vec::new(),
            by_chrom: HashMap::new(),
        }
    }

    /// Whether the spool files are zstd-compressed
    #[must_use]
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    #[must_use]
    pub fn get(&self, chrom: &str) -> Option<&Partition> {
        self.by_chrom.get(chrom).map(|idx| &self.partitions[*idx])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    /// Records spooled across every partition
    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.partitions.iter().map(Partition::records).sum()
    }

    fn index_of(&self, chrom: &str) -> Option<usize> {
        self.by_chrom.get(chrom).copied()
    }

    fn register(&mut self, chrom: &str) -> usize {
        let idx = self.partitions.len();
        self.partitions.push(Partition {
            chrom: chrom.to_string(),
            path: self.dir.join(format!("partition_{idx:05}.spool")),
            records: 0,
        });
        self.by_chrom.insert(chrom.to_string(), idx);
        idx
    }
}

/// Handle to the running collector thread
pub struct Collector {
    handle: JoinHandle<Result<PartitionRegistry>>,
}
impl Collector {
    /// Start collecting into spool files under `dir`
    ///
    /// `family` selects the `RankScore` entry used as the sort key. A
    /// `compression` level of 0 writes plain spool files.
    #[must_use]
    pub fn spawn(
        receiver: Receiver<Collected>,
        dir: &Path,
        family: Option<String>,
        compression: i32,
    ) -> Self {
        let registry = PartitionRegistry::new(dir, compression > 0);
        let handle = std::thread::spawn(move || {
            let result = collect(&receiver, registry, family.as_deref(), compression);
            // workers sending after a failure observe a closed channel
            drop(receiver);
            result
        });
        Self { handle }
    }

    /// Wait for the collector to finish and return its partitions
    pub fn join(self) -> Result<PartitionRegistry> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(WorkerFailure::CollectorGone.into()),
        }
    }
}

fn collect(
    receiver: &Receiver<Collected>,
    mut registry: PartitionRegistry,
    family: Option<&str>,
    compression: i32,
) -> Result<PartitionRegistry> {
    let mut writers: Vec<SpoolWriter> = Vec::new();
    let mut batches = 0usize;
    for message in receiver {
        match message {
            Collected::Batch(batch) => {
                batches += 1;
                for record in batch.into_records() {
                    let key = SortKey::from_record(&record, family)?;
                    let idx = if let Some(idx) = registry.index_of(record.chrom()) {
                        idx
                    } else {
                        let idx = registry.register(record.chrom());
                        let path = &registry.partitions[idx].path;
                        debug!("Opening partition {} at {}", record.chrom(), path.display());
                        writers.push(
                            SpoolWriter::create(path, compression).map_err(|source| {
                                ResourceError::Spool {
                                    path: path.clone(),
                                    source,
                                }
                            })?,
                        );
                        idx
                    };
                    writers[idx]
                        .push(key, record.ordinal(), record.line())
                        .map_err(|source| ResourceError::Spool {
                            path: registry.partitions[idx].path.clone(),
                            source,
                        })?;
                    registry.partitions[idx].records += 1;
                }
            }
            Collected::Close => {
                for writer in writers {
                    let path = writer.path().to_path_buf();
                    writer
                        .finish()
                        .map_err(|source| ResourceError::Spool { path, source })?;
                }
                info!(
                    "Collected {} records from {batches} batch(es) into {} partition(s)",
                    registry.total_records(),
                    registry.len()
                );
                return Ok(registry);
            }
            Collected::Abort => {
                debug!("Collector aborted after {batches} batch(es)");
                return Err(WorkerFailure::Aborted.into());
            }
        }
    }
    // every sender dropped without a close signal
    Err(WorkerFailure::Aborted.into())
}
