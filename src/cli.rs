use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Archive to ingest (zip, tar, or tar.gz)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Root directory for working directories (overrides config when set)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Device id to record; a UUID is generated when omitted
    #[arg(long)]
    pub device_id: Option<String>,

    /// Only report the detection confidence, do not extract
    #[arg(long)]
    pub detect_only: bool,

    /// Print the result as JSON and log as JSON lines
    #[arg(long)]
    pub json: bool,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
