use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use marginalia::config::{Cli, Command, Config, default_config_dir, default_config_path};
use marginalia::db::Database;
use marginalia::ledger::SyncedRecordLedger;
use marginalia::model::HighlightSource;
use marginalia::state::{BindingScope, DatabaseBindings};
use marginalia::unpack_error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    // --config puts the ledger database next to the config file
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %unpack_error(&*e), path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %unpack_error(&*e), "failed to setup database");
        std::process::exit(1);
    }));

    if let Err(e) = run(args.command, db).await {
        tracing::error!(error = %unpack_error(&*e), "command failed");
        std::process::exit(1);
    }
}

fn require_source(key: &str) -> Result<&str> {
    match HighlightSource::from_key(key) {
        Some(source) => Ok(source.as_str()),
        None => anyhow::bail!("unknown source '{key}', expected one of appleBooks, goodLinks, weRead, dedao, chats"),
    }
}

async fn run(command: Command, db: Arc<Database>) -> Result<()> {
    let ledger = SyncedRecordLedger::new(db.clone());

    match command {
        Command::Status => {
            let summaries = ledger.summaries().await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Command::Records { source, item } => {
            let source_key = require_source(&source)?;
            let records = ledger.get_records(source_key, &item).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Clear { source, item } => {
            let source_key = require_source(&source)?;
            let removed = match item {
                Some(item_id) => ledger.clear_records(source_key, &item_id).await?,
                None => ledger.clear_source(source_key).await?,
            };
            println!("removed {removed} records");
            db.sync().await?;
        }
        Command::Unbind { source } => {
            let source_key = require_source(&source)?;
            DatabaseBindings::new(db.clone())
                .clear(BindingScope::Source, source_key)
                .await?;
            println!("cleared container binding for {source_key}");
            db.sync().await?;
        }
    }
    Ok(())
}
