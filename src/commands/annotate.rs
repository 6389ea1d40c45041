//! Annotate a variant file with inheritance models and sort it by rank score.

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use genmod::{
    annotate::{AnnotationSettings, ModelAnnotator},
    config::{AnnotateConfig, IndexSource, DEFAULT_STALL_TIMEOUT},
    index::{AnnotationType, DEFAULT_SPLICE_PADDING},
    queue::DEFAULT_QUEUE_CAPACITY,
    read::{InputSource, DEFAULT_BATCH_SIZE},
    write::OutputTarget,
};
use log::info;

use crate::commands::{
    command::Command,
    common::{with_stage, SortOptions},
};

/// Annotate inheritance models and sort the result by rank score.
#[derive(Debug, Parser)]
#[command(
    name = "annotate",
    long_about = r#"
Annotate a variant file with the inheritance models that fit a family.

Every variant gets ANN (overlapping genes), Comp (compound partners), GM
(matching models), MS (model score) and RankScore. With --cadd files, the
CADD score of the alternative allele is added as well. Variants that cannot
be annotated are tagged with GM_ERROR and still written.

Output is grouped by chromosome in input order; within a chromosome
variants are sorted by rank score.

EXAMPLES:

  genmod annotate family.ped variants.vcf -a refGene.txt -o annotated.vcf
  genmod annotate family.ped variants.vcf --index-db genes.idx --threads 8
"#
)]
#[allow(clippy::struct_excessive_bools)]
pub struct Annotate {
    /// Pedigree file (PED format).
    pub family_file: PathBuf,

    /// Variant file, or '-' for standard input.
    pub variant_file: String,

    /// Annotation file to build gene and exon intervals from.
    #[arg(short = 'a', long = "annotation-file", conflicts_with = "index_db")]
    pub annotation_file: Option<PathBuf>,

    /// Type of the annotation file: bed, ccds, gtf or gene_pred.
    ///
    /// Guessed from the file name when omitted, falling back to gene_pred.
    #[arg(short = 't', long = "annotation-type")]
    pub annotation_type: Option<AnnotationType>,

    /// Prebuilt index written by `genmod build`.
    #[arg(long = "index-db")]
    pub index_db: Option<PathBuf>,

    /// Variants are annotated with VEP; take genes from the CSQ field.
    #[arg(long = "vep", conflicts_with_all = ["annotation_file", "index_db"])]
    pub vep: bool,

    /// Tabix-style CADD score table (chrom, pos, ref, alt, raw, phred).
    #[arg(long = "cadd")]
    pub cadd_file: Option<PathBuf>,

    /// CADD score table for 1000 Genomes variants, consulted after --cadd.
    #[arg(long = "cadd-1000g")]
    pub cadd_1000g: Option<PathBuf>,

    /// Output file. Defaults to standard output.
    #[arg(short = 'o', long = "outfile")]
    pub outfile: Option<PathBuf>,

    /// Do not print the variants (when no output file is given).
    #[arg(short = 's', long = "silent")]
    pub silent: bool,

    /// Family to annotate. Defaults to the first family of the pedigree.
    #[arg(short = 'f', long = "family")]
    pub family_id: Option<String>,

    /// Use phase information (`|`) when pairing compound heterozygotes.
    #[arg(long = "phased")]
    pub phased: bool,

    /// Search compound pairs in whole genes instead of exons only.
    #[arg(long = "whole-gene")]
    pub whole_gene: bool,

    /// Bases added on each side of an exon.
    #[arg(long = "splice-padding", default_value_t = DEFAULT_SPLICE_PADDING)]
    pub splice_padding: u64,

    /// Strip the 'chr' prefix from chromosome names before gene lookups.
    #[arg(long = "chr-prefix")]
    pub chr_prefix: bool,

    /// Number of annotation workers (0 = one per core).
    #[arg(short = '@', long = "threads", default_value = "0")]
    pub threads: usize,

    /// Maximum number of batches waiting for a worker.
    #[arg(long = "queue-capacity", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Maximum number of gene-less variants grouped into one batch.
    #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Seconds without worker progress before the run is aborted.
    #[arg(
        long = "stall-timeout",
        default_value_t = DEFAULT_STALL_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub stall_timeout: u64,

    #[command(flatten)]
    pub sort: SortOptions,
}

impl Annotate {
    fn index_source(&self) -> IndexSource {
        if self.vep {
            return IndexSource::Vep;
        }
        match (&self.annotation_file, &self.index_db) {
            (Some(path), _) => IndexSource::Annotation {
                path: path.clone(),
                kind: self
                    .annotation_type
                    .or_else(|| AnnotationType::from_path(path))
                    .unwrap_or_default(),
            },
            (None, Some(path)) => IndexSource::Prebuilt(path.clone()),
            (None, None) => IndexSource::Empty,
        }
    }

    fn config(&self) -> AnnotateConfig {
        let mut config = AnnotateConfig::new(
            &self.family_file,
            InputSource::from_arg(&self.variant_file),
        )
        .output(OutputTarget::resolve(self.outfile.as_deref(), self.silent))
        .index(self.index_source())
        .splice_padding(self.splice_padding)
        .family_id(self.family_id.clone())
        .settings(AnnotationSettings {
            phased: self.phased,
            whole_gene: self.whole_gene,
            chr_prefix: self.chr_prefix,
        })
        .workers(self.threads)
        .queue_capacity(self.queue_capacity)
        .batch_size(self.batch_size)
        .stall_timeout(Duration::from_secs(self.stall_timeout))
        .sort(self.sort.settings())
        .tmp_dir(self.sort.tmp_dir.clone());
        for path in [&self.cadd_file, &self.cadd_1000g].into_iter().flatten() {
            config = config.score_file(path);
        }
        config
    }
}

impl Command for Annotate {
    fn execute(&self) -> Result<()> {
        let config = self.config();
        info!("Annotating {} with {}", config.input, self.family_file.display());
        let summary = with_stage(genmod::pipeline::annotate(&config, ModelAnnotator))?;
        info!(
            "Annotated {} variant(s) in {} batch(es) with {} worker(s)",
            summary.records, summary.batches, summary.workers
        );
        Ok(())
    }
}
