pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod io_utils;
pub mod mapper;
pub mod mapping;
pub mod merge;
pub mod model;
pub mod reconcile;
pub mod report;
pub mod resolve;
pub mod rows;
pub mod schema;
pub mod table;
pub mod template;
pub mod value;
pub mod yaml_provider;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cache::EntityCache,
    cli::{Cli, Commands},
    config::ProjectConfig,
    gateway::{ApiGateway, RetryingGateway},
    mapper::MappingRunner,
    mapping::MappingDescription,
    reconcile::SchemaReconciler,
    rows::CsvRows,
    schema::SchemaDescription,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("wikibase_bulk", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Schema(args) => handle_schema(&args),
        Commands::Mapping(args) => handle_mapping(&args),
        Commands::Validate(args) => handle_validate(&args),
    }
}

fn load_config(path: &std::path::Path) -> Result<ProjectConfig> {
    let config =
        ProjectConfig::load(path).with_context(|| format!("Loading project config {path:?}"))?;
    debug!("Project config: {config:?}");
    Ok(config)
}

fn connect(config: &ProjectConfig) -> Result<RetryingGateway<ApiGateway>> {
    let settings = config.api_settings()?;
    info!("Connecting to {}", settings.api_url);
    let api = ApiGateway::connect(settings).context("Connecting to the Wikibase API")?;
    Ok(RetryingGateway::new(api, config.retry_policy()))
}

fn handle_schema(args: &cli::SchemaArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let schema = SchemaDescription::load(&args.path)
        .with_context(|| format!("Loading schema description {:?}", args.path))?;
    info!(
        "Schema {:?}: {} property(ies), {} item(s)",
        args.path,
        schema.properties.len(),
        schema.items.len()
    );
    let gateway = connect(&config)?;
    let cache = EntityCache::new();
    let report = SchemaReconciler::new(&gateway, &cache)
        .sync(&schema)
        .with_context(|| format!("Synchronizing schema {:?}", args.path))?;
    print!("{}", report.render_summary());
    Ok(())
}

fn handle_mapping(args: &cli::MappingArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let mapping = MappingDescription::load(&args.path)
        .with_context(|| format!("Loading mapping description {:?}", args.path))?;
    let workers = args
        .workers
        .map(usize::from)
        .unwrap_or(config.settings.workers);
    info!(
        "Mapping '{}': {} file(s), {} worker(s)",
        mapping.name,
        mapping.files.len(),
        workers
    );
    let gateway = connect(&config)?;
    let cache = EntityCache::new();
    let runner = MappingRunner::new(&gateway, &cache, workers)?;
    let report = runner
        .run(&mapping)
        .with_context(|| format!("Running mapping {:?}", args.path))?;
    print!("{}", report.render_summary(args.max_failures));

    if let Some(path) = args.report.as_ref().or(config.settings.report.as_ref()) {
        report
            .write_json(path)
            .with_context(|| format!("Writing run report to {path:?}"))?;
        info!("Run report written to {path:?}");
    }
    let totals = report.totals();
    info!(
        "Processed {} row(s): {} created, {} updated, {} unchanged, {} failed",
        totals.rows, totals.created, totals.updated, totals.unchanged, totals.failed
    );
    Ok(())
}

fn handle_validate(args: &cli::ValidateArgs) -> Result<()> {
    if let Some(path) = &args.schema {
        let schema = SchemaDescription::load(path)
            .with_context(|| format!("Validating schema description {path:?}"))?;
        println!(
            "{}: {} property(ies), {} item(s)",
            path.display(),
            schema.properties.len(),
            schema.items.len()
        );
    }
    if let Some(path) = &args.mapping {
        let mapping = MappingDescription::load(path)
            .with_context(|| format!("Validating mapping description {path:?}"))?;
        let mut problems = Vec::new();
        for file in &mapping.files {
            let rows = CsvRows::open(file)
                .with_context(|| format!("Reading header of {:?}", file.path))?;
            if let Err(err) = mapping::check_headers(file, rows.headers()) {
                problems.push(err.to_string());
            }
        }
        if !problems.is_empty() {
            bail!("{}", problems.join("\n"));
        }
        println!(
            "{}: {} file(s), {} rule(s)",
            path.display(),
            mapping.files.len(),
            mapping.files.iter().map(|f| f.rules.len()).sum::<usize>()
        );
    }
    Ok(())
}
