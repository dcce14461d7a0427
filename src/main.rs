use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tool_catalog::{
    AuditTrail, CatalogConfig, HookList, IndexNotifier, MergeOutcome, ReconciliationEngine, SqliteStore,
};

#[derive(Parser)]
#[command(name = "tool-catalog", version, about = "Toolinfo catalog with revision history")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a toolinfo JSON file (one record or an array of records)
    Import {
        file: PathBuf,
        #[arg(long)]
        actor: String,
    },
    /// Show the current state of a tool
    Show { name: String },
    /// List the revisions of a tool, oldest first
    History {
        name: String,
        #[arg(long)]
        include_deleted: bool,
    },
    /// Patch turning revision LEFT into revision RIGHT
    Diff { name: String, left: i64, right: i64 },
    /// Restore the content of a revision as a new revision
    Revert {
        name: String,
        id: i64,
        #[arg(long)]
        actor: String,
    },
    /// Apply diff(LEFT, RIGHT) to the current head
    Undo {
        name: String,
        left: i64,
        right: i64,
        #[arg(long)]
        actor: String,
    },
    /// Soft-delete a tool
    Delete {
        name: String,
        #[arg(long)]
        actor: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CatalogConfig::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .init();

    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .with_context(|| format!("Failed to open database {}", config.database_path.display()))?,
    );

    let (notifier, index_queue) = IndexNotifier::channel();
    let hooks = HookList::new()
        .with(Arc::new(AuditTrail::new(store.clone())))
        .with(Arc::new(notifier));

    let engine = ReconciliationEngine::new(store.clone())
        .with_normalizer(config.normalizer())
        .with_patch_engine(config.patch_engine())
        .with_hooks(hooks);

    match cli.command {
        Command::Import { file, actor } => run_import(&engine, &file, &actor)?,
        Command::Show { name } => print_json(&engine.get(&name)?)?,
        Command::History { name, include_deleted } => {
            print_json(&engine.list_revisions(&name, include_deleted)?)?
        }
        Command::Diff { name, left, right } => print_json(&engine.diff(&name, left, right)?)?,
        Command::Revert { name, id, actor } => print_outcome(engine.revert(&name, id, &actor)?)?,
        Command::Undo {
            name,
            left,
            right,
            actor,
        } => print_outcome(engine.undo(&name, left, right, &actor)?)?,
        Command::Delete { name, actor } => print_json(&engine.soft_delete(&name, &actor)?)?,
    }

    // No indexer runs inside the CLI; report what it would have picked up
    let queued = index_queue.try_iter().count();
    tracing::debug!(queued, "Search index notifications queued");

    Ok(())
}

fn run_import(engine: &ReconciliationEngine, file: &Path, actor: &str) -> Result<()> {
    let contents = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let parsed: Value =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", file.display()))?;

    let records = match parsed {
        Value::Array(records) => records,
        record => vec![record],
    };

    let (mut created, mut updated, mut unchanged, mut failed) = (0, 0, 0, 0);
    for (i, raw) in records.into_iter().enumerate() {
        match engine.normalize_and_merge(raw, actor) {
            Ok(outcome) if outcome.created => created += 1,
            Ok(outcome) if outcome.changed => updated += 1,
            Ok(_) => unchanged += 1,
            Err(e) => {
                tracing::warn!(record = i, "Skipping record: {}", e);
                failed += 1;
            }
        }
    }

    println!("✓ Created: {}", created);
    println!("✓ Updated: {}", updated);
    println!("✓ Unchanged: {}", unchanged);
    if failed > 0 {
        println!("✗ Failed: {}", failed);
    }

    Ok(())
}

fn print_outcome(outcome: MergeOutcome) -> Result<()> {
    print_json(&json!({
        "created": outcome.created,
        "changed": outcome.changed,
        "revision": outcome.revision,
        "tool": outcome.tool,
    }))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
