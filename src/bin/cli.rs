//! recordgate CLI
//!
//! Drives a model over the in-memory backends: seed a table and page
//! through it with the list cache, or race writers for the table lock.

use std::sync::{Arc, Barrier};
use std::thread;

use clap::{Parser, Subcommand};
use recordgate::backend::memory::{MemoryCoordinator, MemoryDatabase};
use recordgate::backend::{Coordination, Persistence};
use recordgate::record::record;
use recordgate::{FieldDef, ListRequest, Model, ModelConfig, ModelError, Schema};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

/// recordgate CLI
#[derive(Parser, Debug)]
#[command(name = "recordgate-cli")]
#[command(about = "Exercise a recordgate model against in-memory backends")]
#[command(version)]
struct Args {
    /// Records per large page
    #[arg(long, default_value = "20000")]
    large_limit: usize,

    /// Emit per-field diagnostics
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Seed a table and page through it
    List {
        /// Number of records to seed
        #[arg(short, long, default_value = "100")]
        records: usize,

        /// Page size
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Number of pages to read
        #[arg(short, long, default_value = "3")]
        pages: usize,
    },

    /// Race concurrent writers for the table lock
    Contend {
        /// Number of writer threads
        #[arg(short, long, default_value = "8")]
        writers: usize,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,recordgate=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("recordgate v{}", recordgate::VERSION);

    let config = match ModelConfig::builder()
        .large_limit(args.large_limit)
        .debug(args.debug)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match args.command {
        Commands::List {
            records,
            limit,
            pages,
        } => run_list(config, records, limit, pages),
        Commands::Contend { writers } => run_contend(config, writers),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn schema() -> Schema {
    Schema::new()
        .field("name", FieldDef::new())
        .field("status", FieldDef::new().default_value(json!("active")))
}

fn open_model(
    config: &ModelConfig,
    db: &MemoryDatabase,
    coordinator: &Arc<MemoryCoordinator>,
) -> Result<Model, ModelError> {
    let persistence: Arc<dyn Persistence> = Arc::new(db.collection("items"));
    let coordination: Arc<dyn Coordination> = coordinator.clone();
    Model::new("items", schema(), persistence, coordination, config.clone())
}

fn run_list(config: ModelConfig, records: usize, limit: usize, pages: usize) -> Result<(), ModelError> {
    let db = MemoryDatabase::new();
    let coordinator = Arc::new(MemoryCoordinator::new());

    let mut writer = open_model(&config, &db, &coordinator)?;
    for i in 0..records {
        writer.create(record([("name", json!(format!("item-{}", i)))]))?;
    }
    tracing::info!("Seeded {} records", records);

    let reader = open_model(&config, &db, &coordinator)?;
    for page in 1..=pages {
        let request = ListRequest::new().path("/items").limit(limit).page(page);
        let result = reader.find_list(&request)?;
        let ids: Vec<String> = result
            .list
            .iter()
            .filter_map(|r| r.get("rowid"))
            .map(|v| v.to_string())
            .collect();
        println!("page {} (count {}): [{}]", page, result.count, ids.join(", "));
    }
    Ok(())
}

fn run_contend(config: ModelConfig, writers: usize) -> Result<(), ModelError> {
    let db = MemoryDatabase::new();
    let coordinator = Arc::new(MemoryCoordinator::new());
    let barrier = Arc::new(Barrier::new(writers));

    let mut handles = Vec::with_capacity(writers);
    for i in 0..writers {
        let mut model = open_model(&config, &db, &coordinator)?;
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            model.create(record([("name", json!(format!("writer-{}", i)))]))
        }));
    }

    let mut created = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.join() {
            Ok(Ok(_)) => created += 1,
            Ok(Err(ModelError::Lock(_))) => refused += 1,
            Ok(Err(e)) => return Err(e),
            Err(_) => tracing::error!("Writer thread panicked"),
        }
    }

    println!(
        "{} writers: {} created, {} refused by the table lock",
        writers, created, refused
    );
    Ok(())
}
