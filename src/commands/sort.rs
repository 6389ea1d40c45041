//! Sort a variant file by rank score.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use genmod::{
    config::SortConfig,
    read::InputSource,
    write::OutputTarget,
};
use log::info;

use crate::commands::{
    command::Command,
    common::{with_stage, SortOptions},
};

/// Sort a variant file by the `RankScore` INFO entry.
#[derive(Debug, Parser)]
#[command(
    name = "sort",
    long_about = r#"
Sort a variant file by rank score using a disk-backed external merge sort.

Meta lines (##) and the column line (#) are written first, unchanged. Data
lines follow, ordered by the RankScore entry of the INFO column, highest
first unless --ascending is given. Records with equal scores keep their
input order. Records without a RankScore sort as 0.

EXAMPLES:

  genmod sort annotated.vcf -o sorted.vcf
  zcat annotated.vcf.gz | genmod sort - --family 1 > sorted.vcf
"#
)]
pub struct Sort {
    /// Variant file, or '-' for standard input.
    pub variant_file: String,

    /// Output file. Defaults to standard output.
    #[arg(short = 'o', long = "outfile")]
    pub outfile: Option<PathBuf>,

    /// Use the rank score of this family.
    #[arg(short = 'f', long = "family")]
    pub family_id: Option<String>,

    #[command(flatten)]
    pub sort: SortOptions,
}

impl Command for Sort {
    fn execute(&self) -> Result<()> {
        let input = InputSource::from_arg(&self.variant_file);
        info!("Sorting {input} by rank score");
        let config = SortConfig::new(input)
            .output(OutputTarget::resolve(self.outfile.as_deref(), false))
            .family_id(self.family_id.clone())
            .sort(self.sort.settings())
            .tmp_dir(self.sort.tmp_dir.clone());
        let summary = with_stage(genmod::pipeline::sort(&config))?;
        info!(
            "Sorted {} variant(s) from {} chromosome(s)",
            summary.written,
            summary.chromosomes.len()
        );
        Ok(())
    }
}
