mod commands;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;

use commands::{annotate::Annotate, build::Build, command::Command, sort::Sort};

#[derive(Parser, Debug)]
#[command(version, about = "Annotate and sort variant files by genetic inheritance models")]
struct Args {
    /// Increase logging (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Subcommand, Debug)]
enum Subcommand {
    #[command(display_order = 1)]
    Annotate(Annotate),
    #[command(display_order = 2)]
    Sort(Sort),
    #[command(display_order = 3)]
    Build(Build),
}
impl Subcommand {
    fn command(&self) -> &dyn Command {
        match self {
            Self::Annotate(cmd) => cmd,
            Self::Sort(cmd) => cmd,
            Self::Build(cmd) => cmd,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();
    args.subcommand.command().execute()
}
