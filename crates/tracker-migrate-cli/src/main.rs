use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracker_migrate_core::{
    redact_locator, DependencyGraph, EntityType, JsonDirSource, Pipeline, RecordDefaults,
    StoreLocator, Timestamp,
};
use tracker_migrate_store_sqlite::{IntegrityReport, SqliteStore};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "tracker-migrate")]
#[command(about = "Migrate tracker JSON collections into a relational store")]
#[command(version)]
struct Cli {
    /// Target store locator
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:///./tracker.db")]
    database_url: String,

    /// Directory holding the JSON collection files
    #[arg(long, env = "MIGRATE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Print the report as JSON instead of the console summary
    #[arg(long, default_value_t = false)]
    output_json: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Log verbosity; RUST_LOG takes precedence when set
    #[arg(long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    verbosity: String,

    /// Print the resolved processing order and exit without touching the store
    #[arg(long, default_value_t = false)]
    plan: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(format: LogFormat, verbosity: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(verbosity))
        .with_context(|| format!("invalid log filter `{verbosity}`"))?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => subscriber.try_init(),
        LogFormat::Json => subscriber.json().try_init(),
    }
    .map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn run_plan(output_json: bool) -> Result<()> {
    let order = DependencyGraph::standard().processing_order()?;
    if output_json {
        return emit_json(json!({ "order": order }));
    }
    for (index, entity) in order.iter().enumerate() {
        println!("{}. {}", index + 1, entity);
    }
    Ok(())
}

/// Integrity check after a finished run. Failures are logged, never propagated: the run
/// already reached `done` and its exit status must stay 0.
fn post_run_integrity(store: &SqliteStore) -> Option<IntegrityReport> {
    match store.integrity_check() {
        Ok(integrity) => {
            if !integrity.clean {
                warn!(
                    quick_check = %integrity.quick_check.join("; "),
                    foreign_key_violations = integrity.foreign_key_violations.len(),
                    "target store failed post-run integrity check"
                );
            }
            Some(integrity)
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "post-run integrity check could not run");
            None
        }
    }
}

fn run_migration(cli: &Cli) -> Result<()> {
    let locator = StoreLocator::parse(&cli.database_url)?;
    info!(database_url = %redact_locator(&cli.database_url), target = %locator, "opening target store");

    let mut store = SqliteStore::open_locator(&locator)
        .context("connection error: failed to open target store")?;
    store.initialize_schema().context("failed to initialize target schema")?;

    let source = JsonDirSource::new(&cli.data_dir);
    let started = Timestamp::now_utc().context("failed to capture run start time")?;
    info!(data_dir = %source.root().display(), started_at = %started, "starting migration");

    let report = Pipeline::new(&source, &mut store, RecordDefaults::new(started)).run()?;

    let integrity = post_run_integrity(&store);
    let aborted = report.aborted_batches();
    if !aborted.is_empty() {
        let names = aborted.iter().map(|entity| entity.as_str()).collect::<Vec<_>>();
        warn!(aborted_batches = %names.join(","), "some entity batches were rolled back");
    }
    info!(
        migrated = report.total.migrated,
        skipped_duplicate = report.total.skipped_duplicate,
        skipped_missing_reference = report.total.skipped_missing_reference,
        malformed = report.total.malformed,
        failed = report.total.failed,
        "migration complete"
    );

    if cli.output_json {
        let order = report.entities.iter().map(|entry| entry.entity).collect::<Vec<EntityType>>();
        return emit_json(json!({
            "status": "done",
            "order": order,
            "report": report,
            "integrity": integrity,
        }));
    }

    print!("{report}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, &cli.verbosity)?;

    if cli.plan {
        return run_plan(cli.output_json);
    }
    run_migration(&cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_check_failure_is_not_fatal() -> Result<()> {
        // No tracker tables, so counting rows fails inside the check.
        let bare = SqliteStore::open_in_memory()?;
        assert!(post_run_integrity(&bare).is_none());

        let mut ready = SqliteStore::open_in_memory()?;
        ready.initialize_schema()?;
        assert!(post_run_integrity(&ready).is_some_and(|integrity| integrity.clean));
        Ok(())
    }

    #[test]
    fn json_payloads_carry_the_contract_version() {
        let wrapped = with_contract_version(json!({"status": "done"}));
        assert_eq!(wrapped["contract_version"], CLI_CONTRACT_VERSION);
        assert_eq!(wrapped["status"], "done");

        let scalar = with_contract_version(json!(3));
        assert_eq!(scalar["payload"], 3);
    }
}
