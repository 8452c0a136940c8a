//! # sapb1 command line
//!
//! Local sync administration: table creation, sync runs and status reports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sapb1::{
    config::{AppConfig, ConfigLoader},
    db,
    service_layer::HttpServiceLayer,
    sync::{LocalSyncService, SyncMetadata, SyncRegistry, SyncResult},
    telemetry,
};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "sapb1", version, about = "SAP Business One Service Layer local sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations
    Migrate,
    /// List known entities and whether their local table exists
    Entities,
    /// Create the local table(s) for an entity
    MakeTable { entity: String },
    /// Sync one entity
    Sync {
        entity: String,
        /// Ignore the last sync time and fetch everything
        #[arg(long)]
        full: bool,
        /// Soft-delete local rows missing remotely (implies --full)
        #[arg(long)]
        with_deletes: bool,
    },
    /// Sync every entity that has a local table
    SyncAll {
        #[arg(long)]
        full: bool,
    },
    /// Show sync metadata for one or all entities
    Status { entity: Option<String> },
    /// Return an entity to idle, e.g. after an interrupted run
    Reset { entity: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::migrate(&db).await?;

    let registry = Arc::new(SyncRegistry::with_batch_size(
        Arc::new(db.clone()),
        config.sync.default_batch_size,
    ));
    registry
        .auto_register()
        .await
        .context("registering entities with local tables")?;

    match cli.command {
        Command::Migrate => println!("Migrations applied."),
        Command::Entities => {
            let with = registry.entities_with_tables().await?;
            let without = registry.entities_without_tables().await?;
            for entity in &with {
                println!("{:<24} ready", entity);
            }
            for entity in &without {
                println!("{:<24} no table", entity);
            }
        }
        Command::MakeTable { entity } => {
            let service = sync_service(&config, db, registry)?;
            let table = service
                .create_table(&entity)
                .await
                .with_context(|| format!("creating local table for {}", entity))?;
            println!("Created table {} for {}.", table.table(), entity);
        }
        Command::Sync {
            entity,
            full,
            with_deletes,
        } => {
            let service = sync_service(&config, db, registry)?;
            let result = if with_deletes {
                service.full_sync_with_deletes(&entity).await
            } else if full {
                service.full_sync(&entity).await
            } else {
                service.sync(&entity).await
            };
            match result {
                Ok(result) => report(&[result]),
                // Sync failures are reported, never turned into an exit code.
                Err(err) => println!("{}: {}", entity, err),
            }
        }
        Command::SyncAll { full } => {
            let service = sync_service(&config, db, registry)?;
            match service.sync_all(full).await {
                Ok(results) => report(&results),
                Err(err) => println!("sync-all: {}", err),
            }
        }
        Command::Status { entity } => {
            let service = sync_service(&config, db, registry)?;
            let rows = match entity {
                Some(entity) => service.status(&entity).await?.into_iter().collect(),
                None => service.statuses().await?,
            };
            if rows.is_empty() {
                println!("No sync metadata recorded.");
            }
            for row in &rows {
                print_status(row);
            }
        }
        Command::Reset { entity } => {
            let service = sync_service(&config, db, registry)?;
            if service.reset(&entity).await? {
                println!("{} reset to idle.", entity);
            } else {
                println!("{} has never been synced.", entity);
            }
        }
    }

    Ok(())
}

fn sync_service(
    config: &AppConfig,
    db: sea_orm::DatabaseConnection,
    registry: Arc<SyncRegistry>,
) -> Result<LocalSyncService> {
    let client = HttpServiceLayer::new(&config.service_layer)
        .context("building Service Layer client")?;
    Ok(LocalSyncService::new(db, registry, Arc::new(client))
        .with_key_batch_size(config.sync.key_batch_size))
}

fn report(results: &[SyncResult]) {
    let failed = results.iter().filter(|r| !r.success()).count();
    for result in results {
        println!("{}", result);
    }
    if results.len() > 1 {
        println!(
            "{} entities synced, {} failed.",
            results.len() - failed,
            failed
        );
    }
}

fn print_status(row: &SyncMetadata) {
    let last = row
        .last_synced_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    print!(
        "{:<24} {:<10} last synced {:<32} {} records",
        row.entity,
        row.sync_status(),
        last,
        row.synced_count
    );
    if let Some(error) = row.last_error() {
        print!("  error: {}", error);
    }
    println!();
}
