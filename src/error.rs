use std::{fmt, path::PathBuf, time::Duration};

use crate::pipeline::RunState;

/// Custom Result type for genmod operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The stage of a run in which a fatal error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Input,
    Annotation,
    Collection,
    Sorting,
    Scratch,
    Output,
    Index,
    Pedigree,
    Control,
}
impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Input => "input",
            Self::Annotation => "annotation",
            Self::Collection => "collection",
            Self::Sorting => "sorting",
            Self::Scratch => "scratch space",
            Self::Output => "output",
            Self::Index => "annotation index",
            Self::Pedigree => "pedigree",
            Self::Control => "run control",
        };
        f.write_str(name)
    }
}

/// The main error type for the genmod library, encompassing every fatal
/// condition a pipeline run can surface.
///
/// Per-record annotation failures are not part of this hierarchy: they are
/// absorbed at the worker boundary (see [`AnnotationError`]).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing or unreadable input files, raised before any worker starts
    #[error("Error reading input: {0}")]
    InputError(#[from] InputError),

    /// A worker crashed, stalled, or the pool was torn down
    #[error("Worker failure: {0}")]
    WorkerFailure(#[from] WorkerFailure),

    /// Corrupt or unsortable keys, or corrupt spool/spill files
    #[error("Error sorting variants: {0}")]
    SortError(#[from] SortError),

    /// The scratch directory or one of its files could not be managed
    #[error("Scratch space error: {0}")]
    ResourceError(#[from] ResourceError),

    /// Errors loading or building the gene/exon interval index
    #[error("Error loading annotation index: {0}")]
    IndexError(#[from] IndexError),

    /// Errors parsing the pedigree file
    #[error("Error parsing pedigree: {0}")]
    PedigreeError(#[from] PedigreeError),

    /// Errors related to the variant file header
    #[error("Error processing header: {0}")]
    HeaderError(#[from] HeaderError),

    /// Errors writing the final output
    #[error("Error writing output: {0}")]
    OutputError(#[from] OutputError),

    /// A run attempted a state change its lifecycle does not allow
    #[error("Illegal run state transition from {from} to {to}")]
    InvalidTransition { from: RunState, to: RunState },
}
impl Error {
    /// The stage of the run that raised this error
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::InputError(_) => Stage::Input,
            Self::WorkerFailure(_) => Stage::Annotation,
            Self::SortError(SortError::InvalidKey { .. }) => Stage::Collection,
            Self::SortError(_) => Stage::Sorting,
            Self::ResourceError(_) => Stage::Scratch,
            Self::IndexError(_) => Stage::Index,
            Self::PedigreeError(_) => Stage::Pedigree,
            Self::HeaderError(_) => Stage::Input,
            Self::OutputError(_) => Stage::Output,
            Self::InvalidTransition { .. } => Stage::Control,
        }
    }

    /// Checks if the error is a missing annotation index
    ///
    /// # Returns
    ///
    /// * `true` if the error is an `IndexError::NotBuilt`
    /// * `false` for all other error types
    #[must_use]
    pub fn is_not_built(&self) -> bool {
        matches!(self, Self::IndexError(IndexError::NotBuilt(_)))
    }
}

/// Errors opening or reading the variant stream and other input files
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    /// The file does not exist
    #[error("The file {0} does not exist")]
    MissingFile(PathBuf),

    /// The file exists but could not be opened
    #[error("Unable to open {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading failed partway through the stream
    #[error("Failed reading {source_name} at line {line}: {source}")]
    Read {
        source_name: String,
        line: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal conditions raised by the worker pool and its coordinator
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerFailure {
    /// A worker thread panicked before acknowledging its item
    #[error("Worker {worker} crashed: {reason}")]
    Panicked { worker: usize, reason: String },

    /// No worker made progress within the configured bound
    #[error("No progress after {waited:?} with {outstanding} item(s) outstanding")]
    Stalled { waited: Duration, outstanding: usize },

    /// The collector stopped receiving results
    #[error("Result collector terminated early")]
    CollectorGone,

    /// The queue was shut down after a failure elsewhere in the run
    #[error("Task queue was shut down after a failure")]
    Aborted,

    /// Fewer records reached the collector than were read
    #[error("Only {collected} of {expected} records were collected")]
    Lost { expected: u64, collected: u64 },
}

/// Errors raised while computing keys or running the external sort
#[derive(thiserror::Error, Debug)]
pub enum SortError {
    /// The rank score of a record could not be turned into a numeric key
    #[error("Unsortable rank score '{value}' for variant #{ordinal}")]
    InvalidKey { value: String, ordinal: u64 },

    /// A spool or spill line could not be decoded
    #[error("Corrupt sort file {path} at line {line}")]
    CorruptSpool { path: PathBuf, line: u64 },

    /// Reading or writing a spool or spill file failed
    #[error("I/O failure on sort file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors managing the run's scratch directory
#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    /// The scratch directory could not be created
    #[error("Unable to create scratch directory under {path}: {source}")]
    CreateScratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scratch directory could not be removed
    #[error("Unable to remove scratch directory {path}: {source}")]
    RemoveScratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A spool file could not be created or written
    #[error("Unable to write spool file {path}: {source}")]
    Spool {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors loading, building or validating the annotation index
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// No index artifact exists at the configured location
    #[error("Annotation index {0} has not been built")]
    NotBuilt(PathBuf),

    /// The artifact was written by an incompatible version
    #[error("Annotation index {path} has incompatible version '{found}'")]
    IncompatibleVersion { path: PathBuf, found: String },

    /// An annotation or index line could not be parsed
    #[error("Malformed line {line} in {path}: {reason}")]
    Malformed {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    /// The annotation type is not one of the supported formats
    #[error("Unsupported annotation type: {0}")]
    UnknownAnnotationType(String),

    /// Reading or writing the index failed
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors parsing the pedigree file
#[derive(thiserror::Error, Debug)]
pub enum PedigreeError {
    /// A pedigree line has too few columns
    #[error("Malformed pedigree line {line} in {path}: expected 6 columns, found {found}")]
    Malformed {
        path: PathBuf,
        line: u64,
        found: usize,
    },

    /// No family was found in the file
    #[error("No families found in {0}")]
    NoFamilies(PathBuf),

    /// The requested family is not in the file
    #[error("Family '{0}' not found in pedigree")]
    UnknownFamily(String),
}

/// Errors related to the variant file header
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// A `##` line without a key
    #[error("Invalid meta line: {0}")]
    InvalidMetaLine(String),

    /// The `#CHROM` line is missing its fixed columns
    #[error("Invalid column header line: {0}")]
    InvalidColumnLine(String),
}

/// Errors writing the final output
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    /// Writing to the destination failed
    #[error("Unable to write to {target}: {source}")]
    Write {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The staged output file could not be moved into place
    #[error("Unable to persist output to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Records were written before the header block
    #[error("Header must be written exactly once before any record")]
    HeaderOrder,
}

/// A failure annotating a single record
///
/// These never abort a run. The affected record is tagged with
/// `GM_ERROR=<code>` and forwarded like any other record.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    /// The record has no FORMAT column but the family has samples
    #[error("Record has no genotype columns")]
    MissingGenotypes,

    /// A family member has no column in the variant file
    #[error("Sample '{0}' is not present in the variant file")]
    MissingSample(String),

    /// A genotype field could not be parsed
    #[error("Malformed genotype '{value}' for sample '{sample}'")]
    MalformedGenotype { sample: String, value: String },

    /// The engine returned no outcome for this record
    #[error("Annotation engine returned no outcome")]
    NoOutcome,

    /// The engine failed for a reason of its own
    #[error("{0}")]
    Engine(String),
}
impl AnnotationError {
    /// Short code written into the `GM_ERROR` info entry
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingGenotypes => "missing_genotypes",
            Self::MissingSample(_) => "missing_sample",
            Self::MalformedGenotype { .. } => "malformed_genotype",
            Self::NoOutcome => "no_outcome",
            Self::Engine(_) => "engine_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Stage Tests ====================

    #[test]
    fn test_stage_of_input_error() {
        let error: Error = InputError::MissingFile(PathBuf::from("in.vcf")).into();
        assert_eq!(error.stage(), Stage::Input);
        assert!(format!("{error}").contains("in.vcf"));
    }

    #[test]
    fn test_stage_of_sort_errors() {
        let error: Error = SortError::InvalidKey {
            value: "abc".into(),
            ordinal: 3,
        }
        .into();
        assert_eq!(error.stage(), Stage::Collection);

        let error: Error = SortError::CorruptSpool {
            path: PathBuf::from("p.spool"),
            line: 7,
        }
        .into();
        assert_eq!(error.stage(), Stage::Sorting);
        assert!(format!("{error}").contains("p.spool"));
    }

    #[test]
    fn test_resource_error_distinct_from_input() {
        let error: Error = ResourceError::CreateScratch {
            path: PathBuf::from("/nope"),
            source: std::io::Error::other("denied"),
        }
        .into();
        assert_eq!(error.stage(), Stage::Scratch);
        assert!(matches!(error, Error::ResourceError(_)));
    }

    // ==================== IndexError Tests ====================

    #[test]
    fn test_not_built() {
        let error: Error = IndexError::NotBuilt(PathBuf::from("genes.idx")).into();
        assert!(error.is_not_built());
        assert!(format!("{error}").contains("has not been built"));

        let error: Error = IndexError::UnknownAnnotationType("xyz".into()).into();
        assert!(!error.is_not_built());
    }

    // ==================== WorkerFailure Tests ====================

    #[test]
    fn test_worker_failure_display() {
        let failure = WorkerFailure::Stalled {
            waited: Duration::from_millis(250),
            outstanding: 4,
        };
        let msg = format!("{failure}");
        assert!(msg.contains("250ms"));
        assert!(msg.contains('4'));
    }

    // ==================== AnnotationError Tests ====================

    #[test]
    fn test_annotation_error_codes() {
        assert_eq!(AnnotationError::NoOutcome.code(), "no_outcome");
        assert_eq!(
            AnnotationError::MissingSample("child".into()).code(),
            "missing_sample"
        );
        let err = AnnotationError::MalformedGenotype {
            sample: "mother".into(),
            value: "0/x".into(),
        };
        assert!(format!("{err}").contains("0/x"));
    }
}
