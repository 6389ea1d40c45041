//! Rank-score sort keys
//!
//! Records are ordered by a numeric [`SortKey`] taken from the `RankScore`
//! INFO entry, with the record's input ordinal as the tie-break. The primary
//! direction is configurable through [`SortOrder`]; ties are always broken by
//! ascending ordinal so that output is reproducible regardless of the order in
//! which workers finished their batches.

use std::{cmp::Ordering, fmt, str::FromStr};

use crate::{
    error::{Result, SortError},
    record::VariantRecord,
};

/// INFO key holding the rank score
pub const RANK_SCORE_KEY: &str = "RankScore";

/// A non-NaN numeric sort key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortKey(f64);
impl SortKey {
    pub const ZERO: Self = Self(0.0);

    /// Create a key, rejecting NaN
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        (!value.is_nan()).then_some(Self(value))
    }

    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Extract the rank score of a record
    ///
    /// The `RankScore` value is a comma separated list of `family:score` pairs,
    /// or a bare number. With a family id the matching pair is used, otherwise
    /// the first entry. Records without a rank score (or without a pair for
    /// the requested family) sort as zero.
    pub fn from_record(record: &VariantRecord, family: Option<&str>) -> Result<Self> {
        let Some(raw) = record.info_value(RANK_SCORE_KEY) else {
            return Ok(Self::ZERO);
        };
        let entry = match family {
            Some(family) => raw.split(',').find_map(|entry| match entry.split_once(':') {
                Some((fam, score)) if fam == family => Some(score),
                _ => None,
            }),
            None => raw
                .split(',')
                .next()
                .map(|entry| entry.rsplit_once(':').map_or(entry, |(_, score)| score)),
        };
        match entry {
            None => Ok(Self::ZERO),
            Some(score) => score.parse::<Self>().map_err(|_| {
                SortError::InvalidKey {
                    value: raw.to_string(),
                    ordinal: record.ordinal(),
                }
                .into()
            }),
        }
    }
}
impl Eq for SortKey {}
impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}
impl FromStr for SortKey {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim()
            .parse::<f64>()
            .ok()
            .and_then(Self::new)
            .ok_or(())
    }
}
impl fmt::Display for SortKey {
    /// Shortest representation that parses back to the same value
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of the primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Highest rank score first
    #[default]
    Descending,
    Ascending,
}
impl SortOrder {
    /// Compare two `(key, ordinal)` pairs
    ///
    /// Returns `Less` when `a` must be emitted before `b`.
    #[must_use]
    pub fn compare(self, a: (SortKey, u64), b: (SortKey, u64)) -> Ordering {
        let primary = match self {
            Self::Descending => b.0.cmp(&a.0),
            Self::Ascending => a.0.cmp(&b.0),
        };
        primary.then(a.1.cmp(&b.1))
    }

    /// Whether `next` may directly follow `prev` in a sorted stream
    #[must_use]
    pub fn in_order(self, prev: SortKey, next: SortKey) -> bool {
        match self {
            Self::Descending => prev >= next,
            Self::Ascending => prev <= next,
        }
    }
}
