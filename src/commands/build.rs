//! Build a reusable gene/exon index from an annotation file.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use genmod::index::{AnnotationIndex, AnnotationType, DEFAULT_SPLICE_PADDING};
use log::info;

use crate::commands::{command::Command, common::with_stage};

/// Build an annotation index for `genmod annotate --index-db`.
#[derive(Debug, Parser)]
#[command(name = "build")]
pub struct Build {
    /// Annotation file (bed, ccds, gtf or gene_pred, optionally gzipped).
    pub annotation_file: PathBuf,

    /// Type of the annotation file. Guessed from the file name when omitted.
    #[arg(short = 't', long = "annotation-type")]
    pub annotation_type: Option<AnnotationType>,

    /// Where to write the index.
    #[arg(short = 'o', long = "outfile")]
    pub outfile: PathBuf,

    /// Bases added on each side of an exon.
    #[arg(long = "splice-padding", default_value_t = DEFAULT_SPLICE_PADDING)]
    pub splice_padding: u64,
}

impl Command for Build {
    fn execute(&self) -> Result<()> {
        let kind = self
            .annotation_type
            .or_else(|| AnnotationType::from_path(&self.annotation_file))
            .unwrap_or_default();
        info!(
            "Building {kind:?} index from {}",
            self.annotation_file.display()
        );
        let index = with_stage(AnnotationIndex::build(
            &self.annotation_file,
            kind,
            self.splice_padding,
        ))?;
        with_stage(index.write(&self.outfile))?;
        info!("Wrote index to {}", self.outfile.display());
        Ok(())
    }
}
