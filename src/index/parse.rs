use std::{
    collections::HashMap,
    io::{BufRead, BufReader},
    path::Path,
    str::FromStr,
};

use super::AnnotationIndex;
use crate::error::{IndexError, InputError, Result};

/// Supported annotation file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnotationType {
    Bed,
    Ccds,
    Gtf,
    /// UCSC genePred / refGene tables
    #[default]
    GenePred,
}
impl AnnotationType {
    /// Guess the type from a file name, looking through a `.gz` suffix
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let name = name.strip_suffix(".gz").unwrap_or(name);
        let ext = name.rsplit_once('.')?.1;
        ext.parse().ok()
    }
}
impl FromStr for AnnotationType {
    type Err = IndexError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bed" => Ok(Self::Bed),
            "ccds" => Ok(Self::Ccds),
            "gtf" => Ok(Self::Gtf),
            "gene_pred" | "ref_gene" => Ok(Self::GenePred),
            _ => Err(IndexError::UnknownAnnotationType(s.to_string())),
        }
    }
}

struct LineContext<'a> {
    path: &'a Path,
    line: u64,
}
impl LineContext<'_> {
    fn malformed(&self, reason: &str) -> IndexError {
        IndexError::Malformed {
            path: self.path.to_path_buf(),
            line: self.line,
            reason: reason.to_string(),
        }
    }

    fn coord(&self, value: &str) -> std::result::Result<u64, IndexError> {
        value
            .trim()
            .parse()
            .map_err(|_| self.malformed(&format!("invalid coordinate '{value}'")))
    }
}

pub(super) fn parse_annotation(
    path: &Path,
    kind: AnnotationType,
    splice_padding: u64,
) -> Result<AnnotationIndex> {
    if !path.is_file() {
        return Err(InputError::MissingFile(path.to_path_buf()).into());
    }
    let (handle, _format) = niffler::from_path(path).map_err(|e| InputError::Unreadable {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    })?;
    parse_reader(BufReader::new(handle), path, kind, splice_padding)
}

pub(super) fn parse_reader<R: BufRead>(
    reader: R,
    path: &Path,
    kind: AnnotationType,
    splice_padding: u64,
) -> Result<AnnotationIndex> {
    let mut index = AnnotationIndex::default();
    // gene name -> (chrom, start, end) for formats that only describe exons
    let mut extents: HashMap<String, (String, u64, u64)> = HashMap::new();

    for (idx, line) in reader.lines().enumerate() {
        let ctx = LineContext {
            path,
            line: idx as u64 + 1,
        };
        let line = line.map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with("track")
            || line.starts_with("browser")
        {
            continue;
        }
        let columns: Vec<&str> = line.split('\t').collect();
        match kind {
            AnnotationType::Bed => parse_bed(&columns, &ctx, splice_padding, &mut index)?,
            AnnotationType::GenePred => {
                parse_gene_pred(&columns, &ctx, splice_padding, &mut index)?;
            }
            AnnotationType::Gtf => parse_gtf(&columns, &ctx, splice_padding, &mut index, &mut extents)?,
            AnnotationType::Ccds => parse_ccds(&columns, &ctx, splice_padding, &mut index)?,
        }
    }

    for (name, (chrom, start, end)) in extents {
        index.genes.insert(&chrom, start, end, &name);
    }
    Ok(index)
}

fn insert_exon(index: &mut AnnotationIndex, chrom: &str, start: u64, end: u64, name: &str, pad: u64) {
    index
        .exons
        .insert(chrom, start.saturating_sub(pad).max(1), end + pad, name);
}

/// `chrom start end [name ...]`, 0-based half-open
fn parse_bed(
    columns: &[&str],
    ctx: &LineContext,
    pad: u64,
    index: &mut AnnotationIndex,
) -> std::result::Result<(), IndexError> {
    if columns.len() < 3 {
        return Err(ctx.malformed("expected at least 3 columns"));
    }
    let start = ctx.coord(columns[1])? + 1;
    let end = ctx.coord(columns[2])?;
    let fallback = format!("{}:{}-{}", columns[0], start, end);
    let name = columns.get(3).copied().unwrap_or(fallback.as_str());
    index.genes.insert(columns[0], start, end, name);
    insert_exon(index, columns[0], start, end, name, pad);
    Ok(())
}

/// genePred, optionally preceded by the refGene `bin` column
fn parse_gene_pred(
    columns: &[&str],
    ctx: &LineContext,
    pad: u64,
    index: &mut AnnotationIndex,
) -> std::result::Result<(), IndexError> {
    let offset = usize::from(columns.len() >= 11 && columns[0].parse::<u64>().is_ok());
    if columns.len() < 10 + offset {
        return Err(ctx.malformed("expected at least 10 genePred columns"));
    }
    let col = |i: usize| columns[i + offset];
    let name = columns
        .get(11 + offset)
        .filter(|n| !n.is_empty())
        .copied()
        .unwrap_or(col(0));
    let chrom = col(1);
    let tx_start = ctx.coord(col(3))? + 1;
    let tx_end = ctx.coord(col(4))?;
    index.genes.insert(chrom, tx_start, tx_end, name);

    let starts = col(8).split(',').filter(|s| !s.is_empty());
    let ends = col(9).split(',').filter(|s| !s.is_empty());
    for (start, end) in starts.zip(ends) {
        insert_exon(index, chrom, ctx.coord(start)? + 1, ctx.coord(end)?, name, pad);
    }
    Ok(())
}

/// GTF, 1-based inclusive; gene extents are derived from exon lines when
/// no explicit gene line is present
fn parse_gtf(
    columns: &[&str],
    ctx: &LineContext,
    pad: u64,
    index: &mut AnnotationIndex,
    extents: &mut HashMap<String, (String, u64, u64)>,
) -> std::result::Result<(), IndexError> {
    if columns.len() < 9 {
        return Err(ctx.malformed("expected 9 GTF columns"));
    }
    let chrom = columns[0];
    let start = ctx.coord(columns[3])?;
    let end = ctx.coord(columns[4])?;
    let attribute = |key: &str| {
        columns[8].split(';').find_map(|attr| {
            let (k, v) = attr.trim().split_once(' ')?;
            (k == key).then(|| v.trim_matches('"'))
        })
    };
    let Some(name) = attribute("gene_name").or_else(|| attribute("gene_id")) else {
        return Err(ctx.malformed("missing gene_id attribute"));
    };

    if columns[2] == "exon" {
        insert_exon(index, chrom, start, end, name, pad);
    }
    if matches!(columns[2], "gene" | "exon" | "transcript") {
        let extent = extents
            .entry(name.to_string())
            .or_insert_with(|| (chrom.to_string(), start, end));
        extent.1 = extent.1.min(start);
        extent.2 = extent.2.max(end);
    }
    Ok(())
}

/// CCDS release tables, 0-based with `[a-b, c-d]` exon locations
fn parse_ccds(
    columns: &[&str],
    ctx: &LineContext,
    pad: u64,
    index: &mut AnnotationIndex,
) -> std::result::Result<(), IndexError> {
    if columns.len() < 10 {
        return Err(ctx.malformed("expected 10 CCDS columns"));
    }
    let chrom = columns[0];
    let name = columns[2];
    if columns[7] == "-" || columns[8] == "-" {
        // withdrawn entries carry no coordinates
        return Ok(());
    }
    let start = ctx.coord(columns[7])? + 1;
    let end = ctx.coord(columns[8])? + 1;
    index.genes.insert(chrom, start, end, name);

    let locations = columns[9].trim_matches(|c| c == '[' || c == ']');
    for location in locations.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        let Some((a, b)) = location.split_once('-') else {
            return Err(ctx.malformed("invalid CCDS exon location"));
        };
        insert_exon(index, chrom, ctx.coord(a)? + 1, ctx.coord(b)? + 1, name, pad);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn parse(text: &str, kind: AnnotationType, pad: u64) -> AnnotationIndex {
        let mut index = parse_reader(Cursor::new(text), Path::new("anno"), kind, pad).unwrap();
        index.genes.finalize();
        index.exons.finalize();
        index
    }

    #[test]
    fn test_annotation_type() {
        assert_eq!("bed".parse::<AnnotationType>().unwrap(), AnnotationType::Bed);
        assert_eq!(
            AnnotationType::from_path(Path::new("refGene.gene_pred.gz")),
            Some(AnnotationType::GenePred)
        );
        assert_eq!(AnnotationType::from_path(Path::new("genes.txt")), None);
        assert!("vep".parse::<AnnotationType>().is_err());
    }

    #[test]
    fn test_bed() {
        let index = parse("track name=x\n1\t99\t200\tGENE1\n", AnnotationType::Bed, 2);
        assert_eq!(index.genes.query("1", 100), vec!["GENE1"]);
        assert!(index.genes.query("1", 99).is_empty());
        assert_eq!(index.exons.query("1", 98), vec!["GENE1"]);
    }

    #[test]
    fn test_ref_gene_with_bin() {
        let line = "585\tNM_1\t1\t+\t1000\t5000\t1100\t4900\t2\t1000,4000,\t1200,5000,\t0\tABC\tcmpl\tcmpl\t0,0,\n";
        let index = parse(line, AnnotationType::GenePred, 2);
        assert_eq!(index.genes.query("1", 3000), vec!["ABC"]);
        assert_eq!(index.exons.query("1", 1202), vec!["ABC"]);
        assert!(index.exons.query("1", 1203).is_empty());
        assert_eq!(index.exons.query("1", 3999), vec!["ABC"]);
    }

    #[test]
    fn test_gtf_derives_gene_extent() {
        let text = "1\thavana\texon\t100\t200\t.\t+\t.\tgene_id \"G1\"; gene_name \"ONE\";\n\
                    1\thavana\texon\t500\t600\t.\t+\t.\tgene_id \"G1\"; gene_name \"ONE\";\n";
        let index = parse(text, AnnotationType::Gtf, 0);
        assert_eq!(index.genes.query("1", 300), vec!["ONE"]);
        assert!(index.exons.query("1", 300).is_empty());
        assert_eq!(index.exons.query("1", 550), vec!["ONE"]);
    }

    #[test]
    fn test_ccds() {
        let text = "#chromosome\tnc_accession\tgene\tgene_id\tccds_id\tccds_status\tcds_strand\tcds_from\tcds_to\tcds_locations\tmatch_type\n\
                    1\tNC_000001.10\tSAMD11\t148398\tCCDS2.2\tPublic\t+\t861321\t879532\t[861321-861392, 865534-865715]\tIdentical\n";
        let index = parse(text, AnnotationType::Ccds, 0);
        assert_eq!(index.genes.query("1", 870_000), vec!["SAMD11"]);
        assert_eq!(index.exons.query("1", 861_322), vec!["SAMD11"]);
        assert!(index.exons.query("1", 870_000).is_empty());
    }

    #[test]
    fn test_malformed() {
        let err = parse_reader(Cursor::new("1\tx\t5\n"), Path::new("a.bed"), AnnotationType::Bed, 0)
            .unwrap_err();
        assert!(format!("{err}").contains("invalid coordinate"));
    }
}
