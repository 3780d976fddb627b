//! tavern CLI. Config from env (`.env` supported) and optional global flags.

use anyhow::Result;
use clap::Parser;
use tavern_cli::{commands, init_tracing, Cli};
use tavern_storage::StoreConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let log_file = cli.log_file.clone().or_else(|| std::env::var("LOG_FILE").ok());
    init_tracing(log_file.as_deref())?;

    let mut store_config = StoreConfig::from_env();
    if let Some(database) = cli.database {
        store_config.database_url = database;
    }

    commands::run(cli.command, store_config).await
}
