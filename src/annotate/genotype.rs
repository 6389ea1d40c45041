use crate::error::AnnotationError;

/// A simplified genotype call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    NoCall,
    HomRef,
    Het,
    HomAlt,
}
impl Call {
    #[must_use]
    pub fn has_alt(self) -> bool {
        matches!(self, Self::Het | Self::HomAlt)
    }
}

/// One sample's genotype at one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Genotype {
    pub call: Call,
    /// For phased heterozygous calls, the haplotype (0 or 1) carrying the alt
    pub alt_haplotype: Option<u8>,
    pub quality: Option<u32>,
}
impl Genotype {
    /// Parse a sample column given the record's FORMAT keys
    ///
    /// Phasing is only kept when `phased` is set; otherwise `|` is treated
    /// like `/`.
    pub fn parse(
        sample: &str,
        column: &str,
        keys: &[&str],
        phased: bool,
    ) -> Result<Self, AnnotationError> {
        let malformed = || AnnotationError::MalformedGenotype {
            sample: sample.to_string(),
            value: column.to_string(),
        };
        let values: Vec<&str> = column.split(':').collect();
        let field = |key: &str| keys.iter().position(|k| *k == key).and_then(|i| values.get(i));

        let Some(gt) = field("GT") else {
            return Ok(Self {
                call: Call::NoCall,
                alt_haplotype: None,
                quality: None,
            });
        };
        let quality = match field("GQ") {
            Some(&".") | None => None,
            Some(gq) => Some(
                gq.parse::<f64>()
                    .map_err(|_| malformed())?
                    .round()
                    .max(0.0) as u32,
            ),
        };

        let is_phased = gt.contains('|');
        let mut alleles = Vec::with_capacity(2);
        for allele in gt.split(['/', '|']) {
            if allele == "." {
                alleles.push(None);
            } else {
                alleles.push(Some(allele.parse::<u32>().map_err(|_| malformed())?));
            }
        }
        if alleles.iter().any(Option::is_none) {
            return Ok(Self {
                call: Call::NoCall,
                alt_haplotype: None,
                quality,
            });
        }
        let alleles: Vec<u32> = alleles.into_iter().flatten().collect();
        let alts = alleles.iter().filter(|a| **a > 0).count();
        let call = match alts {
            0 => Call::HomRef,
            n if n == alleles.len() => Call::HomAlt,
            _ => Call::Het,
        };
        let alt_haplotype = (phased && is_phased && call == Call::Het)
            .then(|| alleles.iter().position(|a| *a > 0))
            .flatten()
            .map(|p| p as u8);

        Ok(Self {
            call,
            alt_haplotype,
            quality,
        })
    }
}
