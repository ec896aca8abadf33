mod logging;

use anyhow::{anyhow, Result};
use civic_core::config::CronConfig;
use civic_core::db::SqliteStore;
use civic_core::store::{read_or_empty, DocumentStore};
use civic_core::taxonomy::Taxonomy;
use civic_core::trigger::{self, Invocation, UNAUTHORIZED_STATUS};
use civic_core::{ActiveOrgsDocument, Orchestrator};
use clap::{Parser, Subcommand};
use feed::DateRange;
use schemars::schema_for;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;

use logging::LogFormat;

#[derive(Parser)]
#[command(name = "civic-calendar")]
#[command(about = "NYC civic meeting calendar aggregator", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured source, reconcile, and persist one batch
    Run {
        #[arg(long, default_value = "config/cron.toml")]
        config: PathBuf,
        /// Scheduled invocation (the default); skips the authorization check
        #[arg(long, conflicts_with = "manual")]
        scheduled: bool,
        /// Manual invocation; requires --authorization to match the configured secret
        #[arg(long)]
        manual: bool,
        /// "Bearer <secret>" or the bare secret
        #[arg(long)]
        authorization: Option<String>,
        /// Also write the run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Write an ICS calendar for the selected organizations
    Feed {
        #[arg(long, default_value = "config/cron.toml")]
        config: PathBuf,
        /// Comma-separated org keys; parents select their children
        #[arg(long, value_delimiter = ',', required = true)]
        orgs: Vec<String>,
        /// First date to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Last date to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value = "NYC Civic Meetings")]
        name: String,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List selectable organizations and whether they are active
    Orgs {
        #[arg(long, default_value = "config/cron.toml")]
        config: PathBuf,
        /// Include organizations with no meetings yet
        #[arg(long)]
        all: bool,
    },
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match cli.command {
        Commands::Run {
            config,
            scheduled: _,
            manual,
            authorization,
            report,
        } => {
            let invocation = invocation(manual);
            let status = run(config, invocation, authorization, report).await?;
            std::process::exit(exit_code(status));
        }
        Commands::Feed {
            config,
            orgs,
            from,
            to,
            name,
            out,
        } => write_feed(config, orgs, DateRange { from, to }, name, out).await,
        Commands::Orgs { config, all } => list_orgs(config, all).await,
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
    }
}

async fn run(
    config_path: PathBuf,
    invocation: Invocation,
    authorization: Option<String>,
    report_path: Option<PathBuf>,
) -> Result<u16> {
    let config = CronConfig::load(&config_path)?;
    let secret = config.trigger_secret();
    if let Err(err) = trigger::authorize(invocation, secret.as_deref(), authorization.as_deref()) {
        tracing::warn!(error = %err, "rejected manual run");
        println!("{}", serde_json::json!({ "error": "Unauthorized", "message": err.to_string() }));
        return Ok(UNAUTHORIZED_STATUS);
    }
    config.log_threshold_review();

    let store = Arc::new(SqliteStore::open(&config.store.path)?);
    let orchestrator = Orchestrator::from_config(&config, store)?;
    let report = orchestrator.run().await;

    for (source, outcome) in report.failed_sources() {
        tracing::warn!(source, error = ?outcome.error, "source needs attention");
    }
    let json = serde_json::to_string_pretty(&report)?;
    if let Some(path) = report_path {
        fs::write(&path, &json)?;
    }
    println!("{json}");
    Ok(report.http_status())
}

/// `--scheduled` is explicit but equivalent to passing neither flag; clap rejects both together.
fn invocation(manual: bool) -> Invocation {
    if manual {
        Invocation::Manual
    } else {
        Invocation::Scheduled
    }
}

fn exit_code(status: u16) -> i32 {
    match status {
        200 => 0,
        207 => 2,
        UNAUTHORIZED_STATUS => 3,
        _ => 1,
    }
}

async fn write_feed(
    config_path: PathBuf,
    orgs: Vec<String>,
    range: DateRange,
    name: String,
    out: Option<PathBuf>,
) -> Result<()> {
    let orgs: Vec<String> = orgs
        .into_iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if orgs.is_empty() {
        return Err(anyhow!("no valid organizations specified"));
    }

    let config = CronConfig::load(&config_path)?;
    let store = SqliteStore::open(&config.store.path)?;
    let documents: Vec<String> = config.sources.iter().map(|s| s.document.clone()).collect();
    let meetings = feed::load_meetings(&store, &documents).await;
    let selected = feed::filter_meetings(meetings, &orgs, &range);
    let ics = feed::generate_ics(&selected, &name, OffsetDateTime::now_utc());

    match out {
        Some(path) => {
            fs::write(&path, ics)?;
            tracing::info!(meetings = selected.len(), path = %path.display(), "wrote calendar");
        }
        None => print!("{ics}"),
    }
    Ok(())
}

async fn list_orgs(config_path: PathBuf, all: bool) -> Result<()> {
    let config = CronConfig::load(&config_path)?;
    let store = SqliteStore::open(&config.store.path)?;
    let active = read_active(&store, &config.active_orgs_document).await;
    let last_updated = active.last_updated.as_deref().unwrap_or("never");

    let Some(taxonomy_path) = &config.taxonomy else {
        for org in &active.active_orgs {
            println!("{org}");
        }
        println!("# {} active, updated {last_updated}", active.active_orgs.len());
        return Ok(());
    };

    let taxonomy = Taxonomy::load(taxonomy_path)?;
    let mut shown = 0;
    for org in taxonomy.selectable_orgs() {
        let is_active = active.active_orgs.binary_search(&org.key).is_ok();
        if is_active || all {
            let marker = if is_active { "*" } else { " " };
            println!("{marker} {:<50} {}", org.key, org.name);
            shown += 1;
        }
    }
    println!("# {shown} shown, {} active, updated {last_updated}", active.active_orgs.len());
    Ok(())
}

async fn read_active(store: &dyn DocumentStore, name: &str) -> ActiveOrgsDocument {
    read_or_empty(store, name).await.unwrap_or_default()
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let meeting_schema = schema_for!(civic_core::schema::MeetingRecord);
    let meeting_json = serde_json::to_string_pretty(&meeting_schema)?;
    fs::write(out_dir.join("MeetingRecord.schema.json"), meeting_json)?;

    let document_schema = schema_for!(civic_core::schema::SourceDocument);
    let document_json = serde_json::to_string_pretty(&document_schema)?;
    fs::write(out_dir.join("SourceDocument.schema.json"), document_json)?;

    let active_schema = schema_for!(civic_core::schema::ActiveOrgsDocument);
    let active_json = serde_json::to_string_pretty(&active_schema)?;
    fs::write(out_dir.join("ActiveOrgsDocument.schema.json"), active_json)?;

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}
