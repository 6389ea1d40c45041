//! K-way merge of sorted spill files

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    error::{Result, SortError},
    key::{SortKey, SortOrder},
};

use super::spool::{SpoolEntry, SpoolReader, SpoolWriter};

/// Where merged entries go
pub(super) enum MergeSink<'a> {
    /// Another spill file, keys kept for a later pass
    Spool(&'a mut SpoolWriter),
    /// Final output, record lines only
    Lines {
        writer: &'a mut dyn Write,
        path: &'a Path,
    },
}

/// Entry in the merge heap
///
/// `BinaryHeap` is a max-heap, so the ordering is reversed: the entry that
/// must be emitted first compares greatest.
struct HeapEntry {
    entry: SpoolEntry,
    source: usize,
    order: SortOrder,
}
impl HeapEntry {
    fn rank(&self) -> (SortKey, u64) {
        (self.entry.key, self.entry.ordinal)
    }
}
impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(other.rank(), self.rank())
    }
}

/// A spill reader that checks its own ordering
struct Run {
    reader: SpoolReader,
    last: Option<(SortKey, u64)>,
}
impl Run {
    fn next(&mut self, order: SortOrder) -> Result<Option<SpoolEntry>> {
        let Some(entry) = self.reader.next_entry()? else {
            return Ok(None);
        };
        let rank = (entry.key, entry.ordinal);
        if let Some(last) = self.last {
            if order.compare(last, rank) != Ordering::Less {
                return Err(SortError::CorruptSpool {
                    path: self.reader.path().to_path_buf(),
                    line: self.reader.line(),
                }
                .into());
            }
        }
        self.last = Some(rank);
        Ok(Some(entry))
    }
}

/// Merge sorted spill files into `sink`, returning the number of entries
pub(super) fn merge_files(
    paths: &[PathBuf],
    compressed: bool,
    order: SortOrder,
    mut sink: MergeSink<'_>,
) -> Result<u64> {
    let mut runs = paths
        .iter()
        .map(|path| {
            Ok(Run {
                reader: SpoolReader::open(path, compressed)?,
                last: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (source, run) in runs.iter_mut().enumerate() {
        if let Some(entry) = run.next(order)? {
            heap.push(HeapEntry {
                entry,
                source,
                order,
            });
        }
    }

    let mut emitted = 0u64;
    while let Some(HeapEntry { entry, source, .. }) = heap.pop() {
        match &mut sink {
            MergeSink::Spool(writer) => {
                writer
                    .push(entry.key, entry.ordinal, &entry.line)
                    .map_err(|source| SortError::Io {
                        path: writer.path().to_path_buf(),
                        source,
                    })?;
            }
            MergeSink::Lines { writer, path } => {
                writer
                    .write_all(entry.line.as_bytes())
                    .and_then(|()| writer.write_all(b"\n"))
                    .map_err(|source| SortError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }
        }
        emitted += 1;
        if let Some(next) = runs[source].next(order)? {
            heap.push(HeapEntry {
                entry: next,
                source,
                order,
            });
        }
    }
    Ok(emitted)
}
