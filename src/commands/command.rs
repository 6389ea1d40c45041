//! Command trait shared by every subcommand

use anyhow::Result;

pub trait Command {
    fn execute(&self) -> Result<()>;
}
