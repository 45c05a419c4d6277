use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile Wikibase schemas and bulk-load CSV data into items",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create or update the properties and base items a schema declares
    Schema(SchemaArgs),
    /// Map CSV rows to items according to a mapping description
    Mapping(MappingArgs),
    /// Check schema and mapping descriptions without contacting the Wikibase
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Project configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Schema description (YAML)
    #[arg(short, long)]
    pub path: PathBuf,
}

#[derive(Debug, Args)]
pub struct MappingArgs {
    /// Project configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Mapping description (YAML)
    #[arg(short, long)]
    pub path: PathBuf,
    /// Rows processed in parallel (overrides settings.workers)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,
    /// Write the run report as JSON to this file (overrides settings.report)
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// Failures listed in the printed summary
    #[arg(long, default_value_t = 20)]
    pub max_failures: usize,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("descriptions")
        .required(true)
        .multiple(true)
        .args(["schema", "mapping"])
))]
pub struct ValidateArgs {
    /// Schema description to validate
    #[arg(long)]
    pub schema: Option<PathBuf>,
    /// Mapping description to validate; its CSV headers are checked too
    #[arg(long)]
    pub mapping: Option<PathBuf>,
}
