//! External variant score lookup (CADD-style tables)

use std::{
    collections::HashMap,
    io::{BufRead, BufReader},
    path::Path,
};

use auto_impl::auto_impl;
use log::info;

use crate::error::{InputError, Result};

/// A source of per-allele scores
#[auto_impl(&, Box, Arc)]
pub trait ScoreSource: Send + Sync {
    /// Score for an alternative allele at a position, if known
    fn lookup(&self, chrom: &str, pos: u64, reference: &str, alternative: &str) -> Option<f64>;
}

/// Scores loaded from a tab separated `chrom pos ref alt raw phred` table
///
/// The file may be plain or compressed (gzip/bgzip and the other formats
/// understood by `niffler`). The PHRED column is the score returned.
#[derive(Debug, Default)]
pub struct TsvScoreSource {
    scores: HashMap<(String, u64), Vec<(String, String, f64)>>,
}
impl TsvScoreSource {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(InputError::MissingFile(path.to_path_buf()).into());
        }
        let (handle, _format) = niffler::from_path(path).map_err(|e| InputError::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;
        let source = Self::from_reader(BufReader::new(handle), path)?;
        info!("Loaded {} scored positions from {}", source.scores.len(), path.display());
        Ok(source)
    }

    pub fn from_reader<R: BufRead>(reader: R, path: &Path) -> Result<Self> {
        let mut scores: HashMap<(String, u64), Vec<(String, String, f64)>> = HashMap::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| InputError::Read {
                source_name: path.display().to_string(),
                line: idx as u64 + 1,
                source,
            })?;
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            let columns: Vec<&str> = line.split('\t').collect();
            if columns.len() < 6 {
                continue;
            }
            let (Ok(pos), Ok(phred)) = (columns[1].parse::<u64>(), columns[5].parse::<f64>()) else {
                continue;
            };
            scores
                .entry((columns[0].to_string(), pos))
                .or_default()
                .push((columns[2].to_string(), columns[3].to_string(), phred));
        }
        Ok(Self { scores })
    }
}
impl ScoreSource for TsvScoreSource {
    fn lookup(&self, chrom: &str, pos: u64, reference: &str, alternative: &str) -> Option<f64> {
        let chrom = chrom.strip_prefix("chr").unwrap_or(chrom);
        self.scores
            .get(&(chrom.to_string(), pos))?
            .iter()
            .find(|(r, a, _)| r == reference && a == alternative)
            .map(|(_, _, score)| *score)
    }
}

/// Several sources queried in order; the first hit wins
#[derive(Default)]
pub struct ChainedScores {
    sources: Vec<Box<dyn ScoreSource>>,
}
impl ChainedScores {
    #[must_use]
    pub fn new(sources: Vec<Box<dyn ScoreSource>>) -> Self {
        Self { sources }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
impl ScoreSource for ChainedScores {
    fn lookup(&self, chrom: &str, pos: u64, reference: &str, alternative: &str) -> Option<f64> {
        self.sources
            .iter()
            .find_map(|s| s.lookup(chrom, pos, reference, alternative))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const TABLE: &str = "## CADD v1.0
#Chrom\tPos\tRef\tAlt\tRawScore\tPHRED
1\t10001\tT\tA\t0.10\t3.7
1\t10001\tT\tC\t0.11\t3.9
2\t500\tG\tGA\t1.5\t15.2
";

    #[test]
    fn test_lookup() {
        let source = TsvScoreSource::from_reader(Cursor::new(TABLE), Path::new("cadd.tsv")).unwrap();
        assert_eq!(source.lookup("1", 10001, "T", "C"), Some(3.9));
        assert_eq!(source.lookup("chr1", 10001, "T", "A"), Some(3.7));
        assert_eq!(source.lookup("1", 10001, "T", "G"), None);
        assert_eq!(source.lookup("3", 1, "A", "C"), None);
    }

    #[test]
    fn test_chain_prefers_first_hit() {
        let first = TsvScoreSource::from_reader(Cursor::new("1\t5\tA\tC\t0\t1.0\n"), Path::new("a")).unwrap();
        let second = TsvScoreSource::from_reader(Cursor::new(TABLE), Path::new("b")).unwrap();
        let chain = ChainedScores::new(vec![Box::new(first), Box::new(second)]);
        assert_eq!(chain.lookup("1", 5, "A", "C"), Some(1.0));
        assert_eq!(chain.lookup("2", 500, "G", "GA"), Some(15.2));
        assert!(!chain.is_empty());
    }

    #[test]
    fn test_missing_file() {
        assert!(TsvScoreSource::from_path(Path::new("/no/such/cadd.tsv.gz")).is_err());
    }
}
