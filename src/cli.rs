use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;

use streambox::config::Config;
use streambox::observability::Metrics;
use streambox::retention::RetentionSweeper;
use streambox::stream::StreamStore;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "streambox")]
#[command(about = "Append-only JSONL streams with atomic edit and finalize", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $STREAMBOX_CONFIG or config/streambox.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Finalize one stream while no server is running against the same directories
    Finalize(FinalizeArgs),
    /// Run a single retention sweep over complete documents
    Sweep,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind, overriding server.bind_addr
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct FinalizeArgs {
    /// Stream key
    pub key: String,

    /// JSON object merged into the document metadata
    #[arg(long, value_parser = parse_metadata)]
    pub metadata: Option<Map<String, Value>>,
}

fn parse_metadata(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("metadata must be a JSON object".to_string()),
        Err(err) => Err(format!("invalid JSON: {err}")),
    }
}

impl Cli {
    pub fn load_config(&self) -> Result<Config, AnyError> {
        let config = match &self.config {
            Some(path) => Config::load_from_path(path.clone())?,
            None => Config::load()?,
        };
        Ok(config)
    }
}

pub async fn finalize(config: Config, args: FinalizeArgs) -> Result<(), AnyError> {
    let store = StreamStore::open(&config.storage, Arc::new(Metrics::new())).await?;
    let result = store.finalize(&args.key, args.metadata).await;
    store.shutdown().await;

    let document = result?;
    info!(key = %args.key, messages = document.messages.len(), "Stream finalized");
    println!("{}", store.paths().complete_path(&args.key).display());
    Ok(())
}

pub async fn sweep(config: Config) -> Result<(), AnyError> {
    let store = StreamStore::open(&config.storage, Arc::new(Metrics::new())).await?;
    let stats = RetentionSweeper::from_config(store.clone(), &config.retention)
        .sweep_once()
        .await?;
    store.shutdown().await;

    println!(
        "removed={} missing={} failed={}",
        stats.removed, stats.missing, stats.failed
    );
    Ok(())
}
