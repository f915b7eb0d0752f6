//! Tessera CLI - Command Line Interface
//!
//! Command-line tool for checking sharding topologies and exercising them
//! against in-memory repositories.
//!
//! Key Features:
//! - Topology validation from a TOML configuration file
//! - Seeded demo run over the cross-shard query surface
//! - Distributed transaction across every shard of a table
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_common::config::ShardingConfig;
use tessera_common::{Result, Row, TesseraError};
use tessera_query::SortDirection;
use tessera_sharding::{AbstractTable, Pagination, ShardingDatabase, ShardingRegistry};
use tessera_transaction::DistributedTransaction;

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Parser)]
#[command(name = "tessera")]
#[command(author = "AutomataNexus Development Team")]
#[command(version = "0.1.0")]
#[command(about = "Tessera sharding CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a sharding configuration and print the resolved topology
    Validate {
        #[arg(short, long, default_value = "config/sharding.toml")]
        config: PathBuf,
    },
    /// Seed in-memory shards and run queries and a transaction against them
    Demo {
        #[arg(short, long, default_value = "config/sharding.toml")]
        config: PathBuf,
        /// Abstract table to use; defaults to the first configured table
        #[arg(short, long)]
        table: Option<String>,
        #[arg(short, long, default_value_t = 100)]
        rows: usize,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Demo { config, table, rows } => demo(&config, table.as_deref(), rows).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn load_registry(path: &Path) -> Result<Arc<ShardingRegistry>> {
    let config = ShardingConfig::from_file(path)?;
    tracing::info!(path = %path.display(), tables = config.table_count(), "loaded sharding configuration");
    Ok(Arc::new(ShardingRegistry::from_config(&config)?))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| TesseraError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

fn validate(path: &Path) -> Result<()> {
    let registry = load_registry(path)?;
    let tables: Vec<&AbstractTable> = registry.tables().map(|t| t.as_ref()).collect();
    let data_sources: Vec<_> = registry.data_sources().collect();

    print_json(&json!({
        "data_sources": data_sources,
        "tables": tables,
    }))
}

async fn demo(path: &Path, table: Option<&str>, rows: usize) -> Result<()> {
    let registry = load_registry(path)?;
    let table = match table {
        Some(name) => registry.resolve(name)?,
        None => registry
            .tables()
            .next()
            .cloned()
            .ok_or_else(|| TesseraError::Configuration("no tables configured".to_string()))?,
    };
    let key = table.shard_key().to_string();

    let (db, repositories) = ShardingDatabase::in_memory(Arc::clone(&registry), Some(key.as_str()))?;

    // Seed
    let inserted = db.insert(&table.name, seed_rows(&key, 0..rows)).await?;

    let mut databases = BTreeMap::new();
    let bound = registry
        .data_sources()
        .flat_map(|ds| ds.databases.iter().map(move |d| (ds.name.clone(), d.name.clone())));
    for ((data_source, database), repository) in bound.zip(&repositories) {
        databases.insert((data_source, database), Arc::clone(repository));
    }
    let shards: Vec<_> = table
        .physical_tables
        .iter()
        .map(|physical| {
            let rows = databases
                .get(&(table.data_source.clone(), physical.database.clone()))
                .map_or(0, |repo| repo.row_count(&physical.name));
            json!({ "table": physical.name, "database": physical.database, "rows": rows })
        })
        .collect();

    // Query surface
    let query = db.query(&table.name)?;
    let page = query
        .get_pagination(&Pagination::new("Age", SortDirection::Asc, 1, 5))
        .await?;
    let queries = json!({
        "count": query.count().await?,
        "over_50": query.filter_str("Age > 50")?.count().await?,
        "any_age_99": query.filter_str("Age = 99")?.any().await?,
        "max_age": query.max_or_null("Age").await?,
        "min_age": query.min_or_null("Age").await?,
        "sum_age": query.sum("Age").await?,
        "average_age": query.average_or_null("Age").await?,
        "first_page": page,
    });

    // Distributed transaction over every shard
    let extra = rows / 10 + 1;
    let transaction = DistributedTransaction::new(db.participants(&table.name)?)?;
    transaction.begin_transaction().await?;
    db.insert(&table.name, seed_rows(&key, rows..rows + extra)).await?;
    let outcome = transaction.end_transaction().await;
    let transaction_report = json!({
        "id": transaction.id().to_string(),
        "participants": transaction.participant_count(),
        "success": outcome.success,
        "error": outcome.error.as_ref().map(|e| e.to_string()),
        "count_after": db.query(&table.name)?.count().await?,
    });

    print_json(&json!({
        "table": table.name,
        "inserted": inserted,
        "shards": shards,
        "queries": queries,
        "transaction": transaction_report,
    }))
}

/// Demo rows keyed by `key`, with an age between 0 and 99.
fn seed_rows(key: &str, ids: std::ops::Range<usize>) -> Vec<Row> {
    ids.map(|i| {
        let id = i as i64;
        Row::new()
            .with(key, id)
            .with("Name", format!("user-{:04}", i))
            .with("Age", (id * 37) % 100)
    })
    .collect()
}

// =============================================================================
// Tests
// =============================================================================
