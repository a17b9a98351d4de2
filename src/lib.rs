pub mod cache;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod dialect;
pub mod error;
pub mod gateway;
pub mod io_utils;
pub mod mangle;
pub mod migrations;
pub mod pipeline;
pub mod preview;
pub mod report;
pub mod table;
pub mod validate;

use std::{
    env,
    io::{self, Write},
    sync::OnceLock,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands, MigrateArgs, OutputFormat},
    config::Settings,
    descriptor::MigrationDescriptor,
    gateway::{Gateway, SqlExecutor},
    pipeline::{ActionFilter, Pipeline, RunOptions},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("fast_migration", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Migrate(args) => handle_migrate(&args),
        Commands::List => handle_list(),
        Commands::Preview(args) => preview::execute(&args),
    }
}

fn handle_migrate(args: &MigrateArgs) -> Result<()> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let entry = migrations::find(&args.migration)?;
    let output_dir = args
        .path
        .clone()
        .or_else(|| settings.output_dir.clone())
        .unwrap_or_else(env::temp_dir);
    let url = args
        .database_url
        .as_deref()
        .or(settings.database_url.as_deref())
        .ok_or_else(|| anyhow!("No database URL given; pass --database-url or set database_url in --config"))?;

    let mut executor = connect_database(url)?;
    if entry.needs_system_user {
        migrations::store::resolve_system_user(&mut settings, executor.as_mut())
            .context("Looking up the system user; set system_user_id in --config to skip")?;
    }
    let descriptor = (entry.build)(&settings)
        .with_context(|| format!("Building migration {}", entry.name))?;
    let options = RunOptions::new(&output_dir, args.name.clone())
        .with_actions(ActionFilter::only(&args.actions));
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let reports = run_migration(&descriptor, executor, options, args.format, &mut out)?;
    info!("Migration {} finished with {reports} report(s)", entry.name);
    Ok(())
}

/// Runs `descriptor` to completion, writing one line per stage report.
///
/// Returns the number of reports written. The first failing stage aborts the
/// run; reports written before it stay on `out`.
pub fn run_migration<W: Write>(
    descriptor: &MigrationDescriptor,
    executor: Box<dyn SqlExecutor>,
    options: RunOptions,
    format: OutputFormat,
    out: &mut W,
) -> Result<usize> {
    let mut gateway = Gateway::new(executor);
    info!(
        "Running migration {} with artifacts in {:?} (run {})",
        descriptor.name, options.output_dir, options.run_name
    );
    let pipeline = Pipeline::new(descriptor, &mut gateway, options)?;
    let mut written = 0;
    for report in pipeline {
        let report = report.with_context(|| format!("Migration {} failed", descriptor.name))?;
        match format {
            OutputFormat::Text => writeln!(out, "{report}")?,
            OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&report)?)?,
        }
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

fn handle_list() -> Result<()> {
    let headers = vec!["name".to_string(), "description".to_string()];
    let rows = migrations::registry()
        .iter()
        .map(|entry| vec![entry.name.to_string(), entry.description.to_string()])
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    Ok(())
}

#[cfg(feature = "mysql")]
fn connect_database(url: &str) -> Result<Box<dyn SqlExecutor>> {
    let executor = gateway::mysql::MysqlExecutor::connect(url)
        .with_context(|| format!("Connecting to {}", redact_url(url)))?;
    Ok(Box::new(executor))
}

#[cfg(not(feature = "mysql"))]
fn connect_database(url: &str) -> Result<Box<dyn SqlExecutor>> {
    Err(anyhow!(
        "Cannot connect to {}: this binary was built without a database driver; rebuild with --features mysql",
        redact_url(url)
    ))
}

/// Hides the password of a connection URL for log and error output.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let credentials = &url[scheme_end + 3..at];
            match credentials.split_once(':') {
                Some((user, _)) => format!("{}{user}:***{}", &url[..scheme_end + 3], &url[at..]),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}
