use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use keeplog_logging::LogConfig;
use keeplog_store::{BackendConfig, Order, StoreConfig};
use serde::{Deserialize, Serialize};

/// Contents of a `--config` file: store settings at the top level plus a
/// `[logging]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(flatten)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("Invalid configuration file")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Resolve the file (if any) and apply command line overrides
    pub fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let mut settings = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(path) = &cli.db {
            let cache_size = match settings.store.backend {
                BackendConfig::Redb { cache_size, .. } => cache_size,
                _ => keeplog_store::config::DEFAULT_CACHE_SIZE,
            };
            settings.store.backend = BackendConfig::Redb {
                path: path.clone(),
                cache_size,
            };
        }
        if let Some(url) = &cli.redis {
            settings.store.backend = BackendConfig::Redis { url: url.clone() };
        }
        if cli.memory {
            settings.store.backend = BackendConfig::Memory;
        }
        if let Some(namespace) = &cli.namespace {
            settings.store.namespace = Some(namespace.clone());
        }
        if let Some(level) = &cli.log_level {
            settings.logging.default_level = level.clone();
        }
        Ok(settings)
    }
}

#[derive(Parser, Debug)]
#[command(name = "keeplog", about = "Reference-counted log store", version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Use the redb file at this path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// Use the Redis server at this URL
    #[arg(long, global = true, conflicts_with = "db")]
    pub redis: Option<String>,
    /// Use a throwaway in-memory store
    #[arg(long, global = true, conflicts_with_all = ["db", "redis"])]
    pub memory: bool,
    /// Key namespace
    #[arg(long, global = true)]
    pub namespace: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Admit an entry
    Add {
        /// Action as JSON
        action: String,
        /// Reason keeping the entry alive (repeatable)
        #[arg(long = "reason", short)]
        reasons: Vec<String>,
        /// Producer node id
        #[arg(long, default_value = "cli")]
        node: String,
        /// Producer sequence number
        #[arg(long, default_value_t = 0)]
        seq: u64,
        /// Entry time in milliseconds, defaults to now
        #[arg(long)]
        time: Option<u64>,
    },
    /// Print one entry
    Get {
        /// Entry id as `time,node,seq`
        id: String,
    },
    /// Delete one entry
    Remove {
        /// Entry id as `time,node,seq`
        id: String,
    },
    /// List entries newest first
    List {
        /// Sort by store position or by creation key
        #[arg(long, default_value = "added")]
        order: Order,
        /// Follow continuations to the end instead of printing one page
        #[arg(long)]
        all: bool,
    },
    /// Remove a reason, deleting entries left without any
    Sweep {
        reason: String,
        #[arg(long)]
        min_added: Option<u64>,
        #[arg(long)]
        max_added: Option<u64>,
        /// Only entries older than this entry id
        #[arg(long)]
        older_than: Option<String>,
        /// Only entries younger than this entry id
        #[arg(long)]
        younger_than: Option<String>,
    },
    /// Show or update the sync cursor
    Cursor {
        #[arg(long)]
        sent: Option<u64>,
        #[arg(long)]
        received: Option<u64>,
    },
    /// Show store counters
    Stats,
    /// Delete all store state
    Destroy {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}
