//! Options and helpers shared by several subcommands

use std::path::PathBuf;

use clap::Args;
use genmod::{config::SortSettings, sort::DEFAULT_MAX_FAN_IN, SortOrder};

/// External sort options
#[derive(Debug, Clone, Args)]
pub struct SortOptions {
    /// Sort rank scores from lowest to highest instead of highest first.
    #[arg(long = "ascending")]
    pub ascending: bool,

    /// Maximum memory for one in-memory sort chunk.
    ///
    /// Accepts values like "512M", "1G". Larger partitions are spilled to
    /// sorted chunk files and merged.
    #[arg(short = 'm', long = "max-memory", default_value = "256M", value_parser = parse_memory)]
    pub max_memory: usize,

    /// Additionally cap the number of records held in one chunk.
    #[arg(long = "chunk-records")]
    pub chunk_records: Option<usize>,

    /// Compression level for temporary spool and chunk files (0-9, 0 = none).
    #[arg(long = "temp-compression", default_value = "1", value_parser = clap::value_parser!(i32).range(0..=9))]
    pub temp_compression: i32,

    /// Directory in which the run's scratch directory is created.
    #[arg(short = 'T', long = "tmp-dir")]
    pub tmp_dir: Option<PathBuf>,
}
impl SortOptions {
    pub fn settings(&self) -> SortSettings {
        SortSettings {
            order: if self.ascending {
                SortOrder::Ascending
            } else {
                SortOrder::Descending
            },
            memory_limit: self.max_memory,
            max_records: self.chunk_records,
            max_fan_in: DEFAULT_MAX_FAN_IN,
            compression: self.temp_compression,
        }
    }
}

/// Parse a memory size such as "512M" or "2G"
#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub fn parse_memory(s: &str) -> Result<usize, String> {
    let s = s.trim().to_uppercase();
    if s.is_empty() {
        return Err("Empty memory specification".to_string());
    }
    let (num_str, multiplier) = match s.as_bytes()[s.len() - 1] {
        b'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        b'M' => (&s[..s.len() - 1], 1024 * 1024),
        b'K' => (&s[..s.len() - 1], 1024),
        _ => (s.as_str(), 1),
    };
    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: {num_str}"))?;
    if num <= 0.0 {
        return Err("Memory size must be positive".to_string());
    }
    Ok((num * f64::from(multiplier)) as usize)
}

/// Attach the failing stage to a library error
pub fn with_stage<T>(result: genmod::Result<T>) -> anyhow::Result<T> {
    result.map_err(|e| {
        let stage = e.stage();
        anyhow::Error::new(e).context(format!("genmod failed during the {stage} stage"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("512M"), Ok(512 * 1024 * 1024));
        assert_eq!(parse_memory("1g"), Ok(1024 * 1024 * 1024));
        assert_eq!(parse_memory("4K"), Ok(4096));
        assert_eq!(parse_memory("100"), Ok(100));
        assert!(parse_memory("").is_err());
        assert!(parse_memory("abcM").is_err());
        assert!(parse_memory("0").is_err());
    }
}
