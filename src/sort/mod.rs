//! External merge-sort for key-tagged spool files
//!
//! Sorts partitions larger than memory by spilling sorted chunks to the
//! scratch directory and merging them back together.
//!
//! # Algorithm
//!
//! 1. **Accumulate phase**: read spool entries until the memory limit is reached
//! 2. **Sort phase**: sort the chunk by `(key, ordinal)` in the configured order
//! 3. **Spill phase**: write the chunk to its own spill file
//! 4. **Merge phase**: k-way merge of the spill files using a binary heap,
//!    in several passes when there are more spill files than `max_fan_in`
//!
//! If the whole partition fits in one chunk it is sorted in memory and never
//! spilled. The output carries the record lines only; keys are stripped.

mod merge;
pub mod spool;

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    error::{Result, SortError},
    key::SortOrder,
    scratch::ScratchSpace,
};
use merge::{merge_files, MergeSink};
use spool::{SpoolEntry, SpoolReader, SpoolWriter, SPOOL_BUFFER_SIZE};

/// Default memory limit per chunk (256 MB)
pub const DEFAULT_MEMORY_LIMIT: usize = 256 * 1024 * 1024;

/// Default number of spill files merged at once
pub const DEFAULT_MAX_FAN_IN: usize = 64;

/// Compression level for spill files (fast compression)
pub const DEFAULT_SPILL_COMPRESSION: i32 = 1;

/// Statistics from a sort operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Total records read from the input spool
    pub total_records: u64,
    /// Records written to the output
    pub output_records: u64,
    /// Number of spill files written, intermediate merges included
    pub chunks_written: usize,
    /// Number of merge passes (0 for in-memory sorts)
    pub merge_passes: usize,
}
impl std::ops::AddAssign for SortStats {
    fn add_assign(&mut self, rhs: Self) {
        self.total_records += rhs.total_records;
        self.output_records += rhs.output_records;
        self.chunks_written += rhs.chunks_written;
        self.merge_passes += rhs.merge_passes;
    }
}

/// External sorter for spool files
#[derive(Debug, Clone)]
pub struct ExternalSorter {
    order: SortOrder,
    memory_limit: usize,
    max_records: Option<usize>,
    max_fan_in: usize,
    spill_compression: i32,
}
impl Default for ExternalSorter {
    fn default() -> Self {
        Self::new(SortOrder::default())
    }
}
impl ExternalSorter {
    #[must_use]
    pub fn new(order: SortOrder) -> Self {
        Self {
            order,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            max_records: None,
            max_fan_in: DEFAULT_MAX_FAN_IN,
            spill_compression: DEFAULT_SPILL_COMPRESSION,
        }
    }

    /// Set the memory limit for one in-memory chunk
    #[must_use]
    pub fn memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit.max(1);
        self
    }

    /// Additionally cap the number of records in one in-memory chunk
    #[must_use]
    pub fn max_records(mut self, records: Option<usize>) -> Self {
        self.max_records = records.map(|n| n.max(1));
        self
    }

    /// Set the maximum number of spill files merged in one pass (minimum 2)
    #[must_use]
    pub fn max_fan_in(mut self, fan_in: usize) -> Self {
        self.max_fan_in = fan_in.max(2);
        self
    }

    /// Set the zstd level of spill files; 0 disables compression
    #[must_use]
    pub fn spill_compression(mut self, level: i32) -> Self {
        self.spill_compression = level.max(0);
        self
    }

    #[must_use]
    pub fn order(&self) -> SortOrder {
        self.order
    }

    fn sort_chunk(&self, chunk: &mut [SpoolEntry]) {
        let order = self.order;
        // ordinals are unique, so an unstable sort is still deterministic
        chunk.sort_unstable_by(|a, b| order.compare((a.key, a.ordinal), (b.key, b.ordinal)));
    }

    fn spill(&self, chunk: &mut Vec<SpoolEntry>, scratch: &ScratchSpace) -> Result<PathBuf> {
        self.sort_chunk(chunk);
        let path = scratch.file("spill", "spill");
        let io_err = |source| SortError::Io {
            path: path.clone(),
            source,
        };
        let mut writer = SpoolWriter::create(&path, self.spill_compression).map_err(io_err)?;
        for entry in chunk.drain(..) {
            writer
                .push(entry.key, entry.ordinal, &entry.line)
                .map_err(io_err)?;
        }
        let written = writer.finish().map_err(io_err)?;
        debug!("Spilled {written} records to {}", path.display());
        Ok(path)
    }

    /// Sort one spool file into `output`, writing record lines only
    ///
    /// The input spool is left in place; every spill file is removed once it
    /// has been merged.
    pub fn sort(
        &self,
        input: &Path,
        input_compressed: bool,
        output: &Path,
        scratch: &ScratchSpace,
    ) -> Result<SortStats> {
        let mut stats = SortStats::default();
        let mut reader = SpoolReader::open(input, input_compressed)?;

        // Phase 1: read and spill sorted chunks
        let mut spills: Vec<PathBuf> = Vec::new();
        let mut chunk: Vec<SpoolEntry> = Vec::new();
        let mut memory_used = 0usize;
        while let Some(entry) = reader.next_entry()? {
            stats.total_records += 1;
            memory_used += entry.footprint();
            chunk.push(entry);
            if memory_used >= self.memory_limit
                || self.max_records.is_some_and(|n| chunk.len() >= n)
            {
                spills.push(self.spill(&mut chunk, scratch)?);
                memory_used = 0;
            }
        }

        let out_err = |source| SortError::Io {
            path: output.to_path_buf(),
            source,
        };
        let mut out = BufWriter::with_capacity(
            SPOOL_BUFFER_SIZE,
            File::create(output).map_err(out_err)?,
        );

        if spills.is_empty() {
            // Phase 2a: everything fit in memory
            self.sort_chunk(&mut chunk);
            for entry in &chunk {
                writeln!(out, "{}", entry.line).map_err(out_err)?;
            }
            stats.output_records = chunk.len() as u64;
        } else {
            if !chunk.is_empty() {
                spills.push(self.spill(&mut chunk, scratch)?);
            }
            stats.chunks_written = spills.len();

            // Phase 2b: reduce to at most `max_fan_in` runs
            while spills.len() > self.max_fan_in {
                let mut next = Vec::with_capacity(spills.len().div_ceil(self.max_fan_in));
                for group in spills.chunks(self.max_fan_in) {
                    let path = scratch.file("spill", "spill");
                    let mut writer = SpoolWriter::create(&path, self.spill_compression)
                        .map_err(|source| SortError::Io {
                            path: path.clone(),
                            source,
                        })?;
                    merge_files(group, self.compressed(), self.order, MergeSink::Spool(&mut writer))?;
                    writer.finish().map_err(|source| SortError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    remove_spills(group);
                    next.push(path);
                }
                stats.merge_passes += 1;
                stats.chunks_written += next.len();
                spills = next;
            }

            // Phase 3: final merge
            debug!("Merging {} spill file(s)", spills.len());
            stats.output_records = merge_files(
                &spills,
                self.compressed(),
                self.order,
                MergeSink::Lines {
                    writer: &mut out,
                    path: output,
                },
            )?;
            stats.merge_passes += 1;
            remove_spills(&spills);
        }
        out.flush().map_err(out_err)?;

        info!(
            "Sorted {} records ({} spill file(s), {} merge pass(es))",
            stats.total_records, stats.chunks_written, stats.merge_passes
        );
        Ok(stats)
    }

    fn compressed(&self) -> bool {
        self.spill_compression > 0
    }
}

fn remove_spills(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            // the scratch directory removal catches anything left behind
            debug!("Could not remove spill file {}: {e}", path.display());
        }
    }
}
