//! # genmod
//!
//! Annotate variant files with genetic inheritance models and sort them by
//! rank score, with memory use bounded by the sort chunk size rather than the
//! size of the input.
//!
//! ## Pipeline
//!
//! An `annotate` run reads the variant stream on the calling thread, groups
//! records into batches and feeds a bounded [`TaskQueue`](queue::TaskQueue).
//! A [`WorkerPool`](parallel::WorkerPool) annotates batches through an
//! [`AnnotationEngine`](annotate::AnnotationEngine) and forwards them to a
//! single [`Collector`](collect::Collector), which spools every record into a
//! per-chromosome file. Each partition is then sorted by the
//! [`ExternalSorter`](sort::ExternalSorter) and written after the header.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use genmod::{
//!     annotate::ModelAnnotator,
//!     config::AnnotateConfig,
//!     read::InputSource,
//!     write::OutputTarget,
//! };
//!
//! let config = AnnotateConfig::new(Path::new("family.ped"), InputSource::from_arg("variants.vcf"))
//!     .output(OutputTarget::Path("annotated.vcf".into()))
//!     .workers(4);
//! let summary = genmod::pipeline::annotate(&config, ModelAnnotator)?;
//! println!("{} variants written", summary.written);
//! # Ok::<(), genmod::Error>(())
//! ```
//!
//! Every file a run creates lives in a private scratch directory that is
//! removed whether the run succeeds or fails.

pub mod annotate;
pub mod collect;
pub mod config;
pub mod error;
pub mod header;
pub mod index;
pub mod key;
pub mod logging;
pub mod parallel;
pub mod pedigree;
pub mod pipeline;
pub mod queue;
pub mod read;
pub mod record;
pub mod score;
pub mod scratch;
pub mod sort;
pub mod write;

pub use error::{Error, Result};
pub use key::{SortKey, SortOrder};
pub use pipeline::{PipelineRun, RunState, RunSummary};
pub use record::{Batch, VariantRecord};
