mod commands;
mod config;

use clap::Parser;
use keeplog_logging::SubscriberBuilder;
use keeplog_store::LogStore;
use tracing::debug;

use crate::config::{Cli, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(&cli)?;

    // Held until exit so buffered file logs get flushed
    let _guard = SubscriberBuilder::new()
        .with_config(settings.logging.clone())
        .try_init()?;

    debug!(backend = ?settings.store.backend, namespace = ?settings.store.namespace, "Opening store");
    let store = LogStore::open(&settings.store).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    commands::run(&store, cli.command, &mut out).await
}
