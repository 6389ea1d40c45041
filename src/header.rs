//! Variant file header block
//!
//! Keeps the `##` meta lines in their original order and the `#CHROM`
//! column line, and supports declaring new INFO fields before emission.

use crate::error::{HeaderError, Result};

const INFO_PREFIX: &str = "##INFO=<ID=";
const FIXED_HEADER: [&str; 8] = ["#CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO"];

/// A parsed header block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    meta: Vec<String>,
    columns: Option<String>,
    samples: Vec<String>,
}
impl Header {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `##key=value` line
    pub fn parse_meta_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim_end_matches(['\n', '\r']);
        let Some(body) = line.strip_prefix("##") else {
            return Err(HeaderError::InvalidMetaLine(line.to_string()).into());
        };
        if body.is_empty() {
            return Err(HeaderError::InvalidMetaLine(line.to_string()).into());
        }
        self.meta.push(line.to_string());
        Ok(())
    }

    /// Record the `#CHROM ...` column line and its sample names
    pub fn parse_column_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim_end_matches(['\n', '\r']);
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < FIXED_HEADER.len() || columns[0] != FIXED_HEADER[0] {
            return Err(HeaderError::InvalidColumnLine(line.to_string()).into());
        }
        // FORMAT column sits between the fixed columns and the samples
        self.samples = columns
            .iter()
            .skip(FIXED_HEADER.len() + 1)
            .map(|s| (*s).to_string())
            .collect();
        self.columns = Some(line.to_string());
        Ok(())
    }

    /// Sample names in column order
    #[must_use]
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    #[must_use]
    pub fn has_info(&self, id: &str) -> bool {
        self.meta
            .iter()
            .filter_map(|l| l.strip_prefix(INFO_PREFIX))
            .any(|rest| rest.split([',', '>']).next() == Some(id))
    }

    /// The `Description` of a declared INFO field
    #[must_use]
    pub fn info_description(&self, id: &str) -> Option<&str> {
        self.meta
            .iter()
            .filter_map(|l| l.strip_prefix(INFO_PREFIX))
            .find(|rest| rest.split([',', '>']).next() == Some(id))
            .and_then(|rest| rest.split_once("Description=\""))
            .and_then(|(_, desc)| desc.split_once('"'))
            .map(|(desc, _)| desc)
    }

    /// Declare an INFO field
    ///
    /// Existing declarations with the same id are left untouched. New lines are
    /// placed after the last `##INFO` line, or at the end of the meta block.
    pub fn add_info(&mut self, id: &str, number: &str, kind: &str, description: &str) {
        if self.has_info(id) {
            return;
        }
        let line =
            format!("{INFO_PREFIX}{id},Number={number},Type={kind},Description=\"{description}\">");
        let slot = self
            .meta
            .iter()
            .rposition(|l| l.starts_with(INFO_PREFIX))
            .map_or(self.meta.len(), |idx| idx + 1);
        self.meta.insert(slot, line);
    }

    /// The header lines in output order, without line endings
    ///
    /// Only lines that were actually parsed (or added) are emitted.
    #[must_use]
    pub fn emit(&self) -> Vec<String> {
        let mut lines = self.meta.clone();
        if let Some(columns) = &self.columns {
            lines.push(columns.clone());
        }
        lines
    }
}
