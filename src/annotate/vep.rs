//! Gene features taken from VEP `CSQ` annotations
//!
//! Inputs already run through the Variant Effect Predictor carry one `CSQ`
//! entry per transcript, so no interval index is needed to find the genes a
//! variant belongs to.

use log::warn;

use crate::{header::Header, record::VariantRecord};

pub const CSQ_KEY: &str = "CSQ";

/// Consequence terms that place a variant in an exon or splice site
const EXONIC_CONSEQUENCES: [&str; 19] = [
    "transcript_ablation",
    "splice_acceptor_variant",
    "splice_donor_variant",
    "splice_region_variant",
    "stop_gained",
    "stop_lost",
    "start_lost",
    "frameshift_variant",
    "inframe_insertion",
    "inframe_deletion",
    "missense_variant",
    "protein_altering_variant",
    "incomplete_terminal_codon_variant",
    "start_retained_variant",
    "stop_retained_variant",
    "synonymous_variant",
    "coding_sequence_variant",
    "5_prime_UTR_variant",
    "3_prime_UTR_variant",
];

/// Column positions inside one `CSQ` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VepLayout {
    gene: usize,
    consequence: usize,
}
impl Default for VepLayout {
    /// `Allele|Consequence|IMPACT|SYMBOL|...`
    fn default() -> Self {
        Self {
            gene: 3,
            consequence: 1,
        }
    }
}
impl VepLayout {
    /// Read the layout from the `Format:` part of the `CSQ` declaration
    ///
    /// Falls back to the default VEP column order when the header does not
    /// declare `CSQ` or its format names no gene column.
    #[must_use]
    pub fn from_header(header: &Header) -> Self {
        let format = header
            .info_description(CSQ_KEY)
            .and_then(|desc| desc.split_once("Format:"))
            .map(|(_, format)| format.trim());
        let Some(format) = format else {
            warn!("No CSQ format declared in the header; assuming the default VEP layout");
            return Self::default();
        };
        Self::from_format(format).unwrap_or_else(|| {
            warn!("CSQ format has no SYMBOL or Consequence column: {format}");
            Self::default()
        })
    }

    /// Parse a `|`-separated column list
    #[must_use]
    pub fn from_format(format: &str) -> Option<Self> {
        let columns: Vec<&str> = format.split('|').map(str::trim).collect();
        let position = |name: &str| columns.iter().position(|c| *c == name);
        Some(Self {
            gene: position("SYMBOL").or_else(|| position("Gene"))?,
            consequence: position("Consequence")?,
        })
    }

    /// Genes named by any `CSQ` entry, in first-seen order
    #[must_use]
    pub fn genes<'a>(&self, record: &'a VariantRecord) -> Vec<&'a str> {
        self.collect(record, |_| true)
    }

    /// Genes whose consequence touches an exon or splice site
    #[must_use]
    pub fn exons<'a>(&self, record: &'a VariantRecord) -> Vec<&'a str> {
        self.collect(record, |consequence| {
            consequence
                .split('&')
                .any(|term| EXONIC_CONSEQUENCES.contains(&term))
        })
    }

    fn collect<'a>(&self, record: &'a VariantRecord, keep: impl Fn(&str) -> bool) -> Vec<&'a str> {
        let mut genes = Vec::new();
        let Some(csq) = record.info_value(CSQ_KEY) else {
            return genes;
        };
        for entry in csq.split(',') {
            let fields: Vec<&str> = entry.split('|').collect();
            let Some(gene) = fields.get(self.gene).copied().filter(|g| !g.is_empty()) else {
                continue;
            };
            let consequence = fields.get(self.consequence).copied().unwrap_or_default();
            if keep(consequence) && !genes.contains(&gene) {
                genes.push(gene);
            }
        }
        genes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: &str = "Allele|Consequence|IMPACT|SYMBOL|Gene|Feature";

    fn record(csq: &str) -> VariantRecord {
        VariantRecord::new(0, format!("1\t100\t.\tA\tG\t.\tPASS\tDP=4;CSQ={csq}\tGT\t0/1"))
    }

    // ==================== Layout Tests ====================

    #[test]
    fn test_layout_from_header() {
        let mut header = Header::new();
        header
            .parse_meta_line(
                "##INFO=<ID=CSQ,Number=.,Type=String,Description=\"Consequence annotations \
                 from Ensembl VEP. Format: Gene|Consequence|SYMBOL\">",
            )
            .unwrap();
        assert_eq!(
            VepLayout::from_header(&header),
            VepLayout {
                gene: 2,
                consequence: 1
            }
        );
        assert_eq!(VepLayout::from_header(&Header::new()), VepLayout::default());
        assert_eq!(VepLayout::from_format(FORMAT), Some(VepLayout::default()));
        assert_eq!(
            VepLayout::from_format("Allele|Gene|Consequence"),
            Some(VepLayout {
                gene: 1,
                consequence: 2
            })
        );
        assert_eq!(VepLayout::from_format("Allele|IMPACT"), None);
    }

    // ==================== Feature Tests ====================

    #[test]
    fn test_genes_and_exons() {
        let layout = VepLayout::default();
        let r = record(
            "G|intron_variant|MODIFIER|BRCA1|ENSG1|T1,\
             G|missense_variant&splice_region_variant|MODERATE|BRCA1|ENSG1|T2,\
             G|upstream_gene_variant|MODIFIER|NBR2|ENSG2|T3,\
             G|intergenic_variant|MODIFIER||",
        );
        assert_eq!(layout.genes(&r), vec!["BRCA1", "NBR2"]);
        assert_eq!(layout.exons(&r), vec!["BRCA1"]);
    }

    #[test]
    fn test_record_without_csq() {
        let r = VariantRecord::new(0, "1\t100\t.\tA\tG\t.\tPASS\tDP=4\tGT\t0/1");
        assert!(VepLayout::default().genes(&r).is_empty());
    }
}
