use std::collections::HashMap;

use super::{AnnotationContext, AnnotationEngine, Call, Genotype};
use crate::{
    error::AnnotationError, key::RANK_SCORE_KEY, pedigree::Family, record::VariantRecord,
};

/// Highest model confidence written to `MS`
const MAX_MODEL_SCORE: u32 = 99;
/// Rank score contribution of each satisfied model
const MODEL_WEIGHT: f64 = 3.0;

type FamilyGenotypes = Vec<Option<Genotype>>;

/// Default annotation engine
///
/// Checks a compact set of inheritance patterns for the loaded family:
///
/// * `AD` / `AD_dn`: every affected individual carries the alternative allele
///   and no unaffected individual does (`_dn` when both parents of an
///   affected individual are called homozygous reference)
/// * `AR_hom` / `AR_hom_dn`: every affected individual is homozygous
///   alternative and no unaffected individual is
/// * `AR_comp`: two variants sharing a feature inside one batch for which
///   every affected individual is heterozygous at both, no unaffected
///   individual is heterozygous at both, and (with phasing) the alleles sit
///   on different haplotypes
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelAnnotator;

impl ModelAnnotator {
    fn family_genotypes(
        record: &VariantRecord,
        ctx: &AnnotationContext,
    ) -> Result<FamilyGenotypes, AnnotationError> {
        if ctx.sample_columns.iter().all(Option::is_none) {
            return Ok(vec![None; ctx.sample_columns.len()]);
        }
        let Some(keys) = record.format_keys() else {
            return Err(AnnotationError::MissingGenotypes);
        };
        let columns: Vec<&str> = record.sample_columns().collect();
        ctx.family
            .members
            .iter()
            .zip(&ctx.sample_columns)
            .map(|(member, column)| match column {
                None => Ok(None),
                Some(idx) => {
                    let value = columns
                        .get(*idx)
                        .ok_or_else(|| AnnotationError::MissingSample(member.id.clone()))?;
                    Genotype::parse(&member.id, value, &keys, ctx.settings.phased).map(Some)
                }
            })
            .collect()
    }
}

struct Pedigree<'a> {
    family: &'a Family,
    positions: HashMap<&'a str, usize>,
}
impl<'a> Pedigree<'a> {
    fn new(family: &'a Family) -> Self {
        let positions = family
            .members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.as_str(), i))
            .collect();
        Self { family, positions }
    }

    fn affected(&self) -> impl Iterator<Item = usize> + '_ {
        self.family
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_affected())
            .map(|(i, _)| i)
    }

    fn unaffected(&self) -> impl Iterator<Item = usize> + '_ {
        self.family
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.phenotype == crate::pedigree::Phenotype::Unaffected)
            .map(|(i, _)| i)
    }

    /// Both parents of a member, if both are in the family
    fn parents(&self, member: usize) -> Option<(usize, usize)> {
        let m = &self.family.members[member];
        let father = *self.positions.get(m.father.as_deref()?)?;
        let mother = *self.positions.get(m.mother.as_deref()?)?;
        Some((father, mother))
    }

    /// True when some affected member has both parents called without the allele
    fn de_novo(&self, gts: &FamilyGenotypes) -> bool {
        self.affected().any(|child| {
            self.parents(child).is_some_and(|(f, m)| {
                [f, m]
                    .iter()
                    .all(|p| gts[*p].is_some_and(|g| g.call == Call::HomRef))
            })
        })
    }

    fn calls<'g>(
        &self,
        members: impl Iterator<Item = usize> + 'g,
        gts: &'g FamilyGenotypes,
    ) -> impl Iterator<Item = Call> + 'g {
        members.filter_map(move |i| gts[i].map(|g| g.call))
    }

    fn dominant(&self, gts: &FamilyGenotypes) -> Option<&'static str> {
        let affected: Vec<Call> = self.calls(self.affected(), gts).collect();
        if affected.is_empty() || !affected.iter().all(|c| c.has_alt()) {
            return None;
        }
        if self.calls(self.unaffected(), gts).any(Call::has_alt) {
            return None;
        }
        Some(if self.de_novo(gts) { "AD_dn" } else { "AD" })
    }

    fn recessive_hom(&self, gts: &FamilyGenotypes) -> Option<&'static str> {
        let affected: Vec<Call> = self.calls(self.affected(), gts).collect();
        if affected.is_empty() || !affected.iter().all(|c| *c == Call::HomAlt) {
            return None;
        }
        if self.calls(self.unaffected(), gts).any(|c| c == Call::HomAlt) {
            return None;
        }
        Some(if self.de_novo(gts) { "AR_hom_dn" } else { "AR_hom" })
    }

    /// Whether the record can take part in a compound pair
    fn compound_candidate(&self, gts: &FamilyGenotypes) -> bool {
        let affected: Vec<Call> = self.calls(self.affected(), gts).collect();
        !affected.is_empty() && affected.iter().all(|c| *c == Call::Het)
    }

    fn compound_pair(&self, a: &FamilyGenotypes, b: &FamilyGenotypes) -> bool {
        let het_at_both = |i: usize| {
            matches!(
                (a[i], b[i]),
                (Some(x), Some(y)) if x.call == Call::Het && y.call == Call::Het
            )
        };
        if self.unaffected().any(het_at_both) {
            return false;
        }
        // phased alleles on the same haplotype are in cis
        !self.affected().any(|i| match (a[i], b[i]) {
            (Some(x), Some(y)) => matches!(
                (x.alt_haplotype, y.alt_haplotype),
                (Some(hx), Some(hy)) if hx == hy
            ),
            _ => false,
        })
    }
}

fn variant_id(record: &VariantRecord) -> String {
    format!(
        "{}_{}_{}_{}",
        record.chrom(),
        record.pos().unwrap_or_default(),
        record.reference().unwrap_or("."),
        record.alternative().unwrap_or(".")
    )
}

fn model_score(gts: &FamilyGenotypes) -> u32 {
    gts.iter()
        .filter_map(|g| g.and_then(|g| g.quality))
        .min()
        .unwrap_or(0)
        .min(MAX_MODEL_SCORE)
}

impl AnnotationEngine for ModelAnnotator {
    fn annotate(
        &self,
        records: &mut [VariantRecord],
        ctx: &AnnotationContext,
    ) -> Vec<Result<(), AnnotationError>> {
        let pedigree = Pedigree::new(&ctx.family);
        let parsed: Vec<Result<FamilyGenotypes, AnnotationError>> = records
            .iter()
            .map(|r| Self::family_genotypes(r, ctx))
            .collect();

        let features: Vec<Vec<String>> = records
            .iter()
            .map(|r| {
                let found = if ctx.settings.whole_gene {
                    ctx.genes(r)
                } else {
                    ctx.exons(r)
                };
                found.into_iter().map(str::to_string).collect()
            })
            .collect();
        let candidates: Vec<bool> = parsed
            .iter()
            .map(|p| p.as_ref().is_ok_and(|gts| pedigree.compound_candidate(gts)))
            .collect();

        let mut partners: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
        for i in 0..records.len() {
            for j in (i + 1)..records.len() {
                if !(candidates[i] && candidates[j]) {
                    continue;
                }
                if !features[i].iter().any(|f| features[j].contains(f)) {
                    continue;
                }
                if let (Ok(a), Ok(b)) = (&parsed[i], &parsed[j]) {
                    if pedigree.compound_pair(a, b) {
                        partners[i].push(j);
                        partners[j].push(i);
                    }
                }
            }
        }
        let ids: Vec<String> = records.iter().map(variant_id).collect();

        let mut outcomes = Vec::with_capacity(records.len());
        for (idx, (record, gts)) in records.iter_mut().zip(parsed).enumerate() {
            let gts = match gts {
                Ok(gts) => gts,
                Err(err) => {
                    outcomes.push(Err(err));
                    continue;
                }
            };

            let mut models: Vec<&str> = Vec::new();
            models.extend(pedigree.dominant(&gts));
            models.extend(pedigree.recessive_hom(&gts));
            if !partners[idx].is_empty() {
                models.push("AR_comp");
            }

            let genes: Vec<String> = ctx.genes(record).into_iter().map(str::to_string).collect();
            if !genes.is_empty() {
                record.set_info("ANN", Some(&genes.join(",")));
            }
            if !partners[idx].is_empty() {
                let pairs: Vec<&str> = partners[idx].iter().map(|j| ids[*j].as_str()).collect();
                record.set_info("Comp", Some(&pairs.join(":")));
            }

            let ms = if models.is_empty() { 0 } else { model_score(&gts) };
            if !models.is_empty() {
                record.set_info("GM", Some(&models.join(":")));
                record.set_info("MS", Some(&ms.to_string()));
            }

            let cadd = match (&ctx.scores, record.pos(), record.reference(), record.alternative()) {
                (Some(scores), Some(pos), Some(reference), Some(alt)) => {
                    let chrom = ctx.index_chrom(record.chrom()).to_string();
                    alt.split(',')
                        .filter_map(|a| scores.lookup(&chrom, pos, reference, a))
                        .reduce(f64::max)
                }
                _ => None,
            };
            if let Some(cadd) = cadd {
                record.set_info("CADD", Some(&cadd.to_string()));
            }

            let rank = f64::from(ms) / 10.0
                + MODEL_WEIGHT * models.len() as f64
                + cadd.unwrap_or_default();
            let rank = format!("{}:{}", ctx.family.id, rank.round() as i64);
            record.set_info(RANK_SCORE_KEY, Some(&rank));
            outcomes.push(Ok(()));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, path::Path};

    use super::*;
    use crate::{
        annotate::AnnotationSettings,
        index::{AnnotationIndex, IntervalIndex},
        score::TsvScoreSource,
    };

    const PED: &str = "1\tfather\t0\t0\t1\t1\n1\tmother\t0\t0\t2\t1\n1\tchild\tfather\tmother\t1\t2\n";

    fn context(settings: AnnotationSettings, scores: bool) -> AnnotationContext {
        let family = Family::from_reader(Cursor::new(PED), Path::new("t.ped"), None).unwrap();
        let samples: Vec<String> = ["father", "mother", "child"].map(String::from).to_vec();
        let mut genes = IntervalIndex::new();
        genes.insert("1", 100, 1000, "GENE1");
        genes.finalize();
        let mut exons = IntervalIndex::new();
        exons.insert("1", 100, 300, "GENE1");
        exons.finalize();
        let scores = scores.then(|| {
            Box::new(
                TsvScoreSource::from_reader(Cursor::new("1\t150\tA\tG\t0.5\t20.0\n"), Path::new("c"))
                    .unwrap(),
            ) as Box<dyn crate::score::ScoreSource>
        });
        AnnotationContext::new(family, &samples, AnnotationIndex { genes, exons }, scores, settings)
    }

    fn record(ordinal: u64, pos: u64, father: &str, mother: &str, child: &str) -> VariantRecord {
        VariantRecord::new(
            ordinal,
            format!("1\t{pos}\t.\tA\tG\t50\tPASS\t.\tGT:GQ\t{father}:40\t{mother}:50\t{child}:30"),
        )
    }

    #[test]
    fn test_dominant_de_novo() {
        let ctx = context(AnnotationSettings::default(), true);
        let mut records = vec![record(0, 150, "0/0", "0/0", "0/1")];
        let outcomes = ModelAnnotator.annotate(&mut records, &ctx);
        assert!(outcomes[0].is_ok());
        let rec = &records[0];
        assert_eq!(rec.info_value("GM"), Some("AD_dn"));
        assert_eq!(rec.info_value("MS"), Some("30"));
        assert_eq!(rec.info_value("ANN"), Some("GENE1"));
        assert_eq!(rec.info_value("CADD"), Some("20"));
        // 30/10 + 3 + 20
        assert_eq!(rec.info_value("RankScore"), Some("1:26"));
    }

    #[test]
    fn test_recessive_hom() {
        let ctx = context(AnnotationSettings::default(), false);
        let mut records = vec![record(0, 2000, "0/1", "0/1", "1/1")];
        ModelAnnotator.annotate(&mut records, &ctx);
        assert_eq!(records[0].info_value("GM"), Some("AR_hom"));
        assert_eq!(records[0].info_value("ANN"), None);
        assert_eq!(records[0].info_value("RankScore"), Some("1:6"));
    }

    #[test]
    fn test_no_model() {
        let ctx = context(AnnotationSettings::default(), false);
        let mut records = vec![record(0, 150, "0/1", "0/0", "0/0")];
        ModelAnnotator.annotate(&mut records, &ctx);
        assert_eq!(records[0].info_value("GM"), None);
        assert_eq!(records[0].info_value("MS"), None);
        assert_eq!(records[0].info_value("RankScore"), Some("1:0"));
    }

    #[test]
    fn test_compound_pair_in_exons() {
        let ctx = context(AnnotationSettings::default(), false);
        let mut records = vec![
            record(0, 150, "0/1", "0/0", "0/1"),
            record(1, 250, "0/0", "0/1", "0/1"),
            record(2, 500, "0/0", "0/1", "0/1"),
        ];
        ModelAnnotator.annotate(&mut records, &ctx);
        assert_eq!(records[0].info_value("Comp"), Some("1_250_A_G"));
        assert_eq!(records[1].info_value("Comp"), Some("1_150_A_G"));
        assert!(records[0].info_value("GM").unwrap().contains("AR_comp"));
        // Intronic variant only pairs in whole-gene mode
        assert_eq!(records[2].info_value("Comp"), None);

        let ctx = context(
            AnnotationSettings {
                whole_gene: true,
                ..Default::default()
            },
            false,
        );
        let mut records = vec![
            record(0, 150, "0/1", "0/0", "0/1"),
            record(2, 500, "0/0", "0/1", "0/1"),
        ];
        ModelAnnotator.annotate(&mut records, &ctx);
        assert_eq!(records[1].info_value("Comp"), Some("1_150_A_G"));
    }

    #[test]
    fn test_phased_cis_is_not_compound() {
        let settings = AnnotationSettings {
            phased: true,
            ..Default::default()
        };
        let ctx = context(settings, false);
        let mut records = vec![
            record(0, 150, "0/1", "0/0", "1|0"),
            record(1, 250, "0/0", "0/1", "1|0"),
        ];
        ModelAnnotator.annotate(&mut records, &ctx);
        assert_eq!(records[0].info_value("Comp"), None);

        let mut records = vec![
            record(0, 150, "0/1", "0/0", "1|0"),
            record(1, 250, "0/0", "0/1", "0|1"),
        ];
        ModelAnnotator.annotate(&mut records, &ctx);
        assert_eq!(records[0].info_value("Comp"), Some("1_250_A_G"));
    }

    #[test]
    fn test_per_record_failures() {
        let ctx = context(AnnotationSettings::default(), false);
        let mut records = vec![
            record(0, 150, "0/0", "0/0", "0/1"),
            VariantRecord::new(1, "1\t160\t.\tA\tG\t50\tPASS\t."),
            VariantRecord::new(2, "1\t170\t.\tA\tG\t50\tPASS\t.\tGT\t0/0\t0/0"),
            record(3, 180, "0/0", "0/x", "0/1"),
        ];
        let outcomes = ModelAnnotator.annotate(&mut records, &ctx);
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1], Err(AnnotationError::MissingGenotypes));
        assert_eq!(outcomes[2], Err(AnnotationError::MissingSample("child".into())));
        assert!(matches!(outcomes[3], Err(AnnotationError::MalformedGenotype { .. })));
    }
}
