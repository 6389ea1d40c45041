//! Annotation engine interface
//!
//! The pipeline treats annotation as a black box behind [`AnnotationEngine`]:
//! a worker hands it a batch of records together with the shared
//! [`AnnotationContext`] and receives one outcome per record. Records whose
//! outcome is an error are tagged with `GM_ERROR` and still forwarded, so a
//! single bad record never removes its neighbours from the output.

mod genotype;
mod models;
mod vep;

use auto_impl::auto_impl;
use log::warn;

pub use genotype::{Call, Genotype};
pub use models::ModelAnnotator;
pub use vep::{VepLayout, CSQ_KEY};

use crate::{
    error::AnnotationError,
    header::Header,
    index::AnnotationIndex,
    key::RANK_SCORE_KEY,
    pedigree::Family,
    record::{Batch, VariantRecord},
    score::ScoreSource,
};

/// Behavioural switches of the annotation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationSettings {
    /// Honour `|` phasing when pairing compound heterozygotes
    pub phased: bool,
    /// Search compound pairs in whole genes instead of exonic regions only
    pub whole_gene: bool,
    /// Strip a `chr` prefix from chromosome labels before index lookups
    pub chr_prefix: bool,
}

/// Read-only state shared by every worker
pub struct AnnotationContext {
    pub family: Family,
    pub index: AnnotationIndex,
    pub scores: Option<Box<dyn ScoreSource>>,
    /// Column of each family member in the variant file, by member order
    pub sample_columns: Vec<Option<usize>>,
    pub settings: AnnotationSettings,
    /// Take features from `CSQ` entries instead of the index
    pub vep: Option<VepLayout>,
}
impl AnnotationContext {
    /// Build the context, resolving each family member to its sample column
    ///
    /// Members missing from the variant file are ignored with a warning.
    #[must_use]
    pub fn new(
        family: Family,
        samples: &[String],
        index: AnnotationIndex,
        scores: Option<Box<dyn ScoreSource>>,
        settings: AnnotationSettings,
    ) -> Self {
        let sample_columns = family
            .members
            .iter()
            .map(|member| {
                let column = samples.iter().position(|s| *s == member.id);
                if column.is_none() {
                    warn!("Individual {} is not present in the variant file", member.id);
                }
                column
            })
            .collect();
        Self {
            family,
            index,
            scores,
            sample_columns,
            settings,
            vep: None,
        }
    }

    /// Read gene features from VEP annotations laid out as `layout`
    #[must_use]
    pub fn with_vep(mut self, layout: VepLayout) -> Self {
        self.vep = Some(layout);
        self
    }

    /// The chromosome label used for index lookups
    #[must_use]
    pub fn index_chrom<'a>(&self, chrom: &'a str) -> &'a str {
        if self.settings.chr_prefix {
            chrom.strip_prefix("chr").unwrap_or(chrom)
        } else {
            chrom
        }
    }

    /// Gene features overlapping a record
    #[must_use]
    pub fn genes<'a>(&'a self, record: &'a VariantRecord) -> Vec<&'a str> {
        if let Some(vep) = &self.vep {
            return vep.genes(record);
        }
        record
            .pos()
            .map(|pos| self.index.genes.query(self.index_chrom(record.chrom()), pos))
            .unwrap_or_default()
    }

    /// Exon (splice padded) features overlapping a record
    #[must_use]
    pub fn exons<'a>(&'a self, record: &'a VariantRecord) -> Vec<&'a str> {
        if let Some(vep) = &self.vep {
            return vep.exons(record);
        }
        record
            .pos()
            .map(|pos| self.index.exons.query(self.index_chrom(record.chrom()), pos))
            .unwrap_or_default()
    }
}

/// Declare the INFO fields written during annotation
///
/// `CADD` is only declared when a score source is in use.
pub fn declare_fields(header: &mut Header, scored: bool) {
    header.add_info(
        "ANN",
        ".",
        "String",
        "Annotates what feature(s) this variant belongs to.",
    );
    header.add_info(
        "Comp",
        ".",
        "String",
        "':'-separated list of compound pairs for this variant.",
    );
    header.add_info(
        "GM",
        ".",
        "String",
        "':'-separated list of genetic models for this variant.",
    );
    header.add_info("MS", "1", "Integer", "PHRED score for genotype models.");
    if scored {
        header.add_info(
            "CADD",
            "1",
            "Float",
            "The CADD relative score for this alternative.",
        );
    }
    header.add_info(
        RANK_SCORE_KEY,
        ".",
        "String",
        "The rank score for this variant in this family. family_id:rank_score.",
    );
    header.add_info(
        "GM_ERROR",
        "1",
        "String",
        "Reason this variant could not be annotated.",
    );
}

/// The capability that tags records with inheritance-model metadata
#[auto_impl(&, Box, Arc)]
pub trait AnnotationEngine: Send + Sync {
    /// Annotate the records of one batch in place
    ///
    /// Returns one outcome per record, in order.
    fn annotate(
        &self,
        records: &mut [VariantRecord],
        ctx: &AnnotationContext,
    ) -> Vec<Result<(), AnnotationError>>;

    /// Whether `next` must join the batch being assembled
    ///
    /// The default keeps records of one chromosome that share a gene together,
    /// so compound pairs are never split across workers.
    fn joins_batch(
        &self,
        batch: &[VariantRecord],
        next: &VariantRecord,
        ctx: &AnnotationContext,
    ) -> bool {
        let Some(last) = batch.last() else {
            return false;
        };
        if last.chrom() != next.chrom() {
            return false;
        }
        let genes = ctx.genes(next);
        if genes.is_empty() {
            return false;
        }
        batch
            .iter()
            .rev()
            .any(|r| ctx.genes(r).iter().any(|g| genes.contains(g)))
    }
}

/// Run the engine over a batch and tag every failed record
///
/// Returns the number of records tagged with an error.
pub fn annotate_batch<E: AnnotationEngine + ?Sized>(
    engine: &E,
    batch: &mut Batch,
    ctx: &AnnotationContext,
) -> usize {
    let mut outcomes = engine.annotate(batch.records_mut(), ctx);
    outcomes.resize_with(batch.len(), || Err(AnnotationError::NoOutcome));

    let mut failed = 0;
    for (record, outcome) in batch.records_mut().iter_mut().zip(outcomes) {
        if let Err(err) = outcome {
            warn!("Variant #{} could not be annotated: {err}", record.ordinal());
            record.tag_error(err.code());
            failed += 1;
        }
    }
    failed
}
