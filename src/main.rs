//! tiercache admin CLI
//!
//! Operator commands against a running deployment's shared store.
//!
//! ```text
//! tiercache status
//! tiercache top hot_posts -k 10
//! tiercache counter post 42 views
//! tiercache clear-prefix posts::page:
//! tiercache clear-all --yes
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::{
    CacheAdmin, CacheSettings, KeyValueStore, RedisStore, TieredCacheRegistry, WarmupCoordinator,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiercache - Tiered cache administration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Redis URL of the shared store
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Settings file (YAML)
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Connection timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "2000")]
    connect_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show presence of well-known keys
    Status,
    /// Show the effective settings
    Config,
    /// Show the top members of a leaderboard
    Top {
        /// Leaderboard name
        ranking: String,
        /// Number of members
        #[arg(short, default_value = "10")]
        k: usize,
    },
    /// Show one counter
    Counter {
        entity: String,
        id: String,
        name: String,
    },
    /// Delete every key starting with a prefix
    ClearPrefix { prefix: String },
    /// Delete every key in the shared store
    ClearAll {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let settings = match &args.config {
        Some(path) => CacheSettings::from_yaml_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => CacheSettings::default(),
    };

    if let Command::Config = args.command {
        print!("{}", serde_yaml::to_string(&settings)?);
        return Ok(());
    }

    let store = RedisStore::connect(
        &args.redis_url,
        Duration::from_millis(args.connect_timeout_ms),
    )
    .await
    .map_err(|e| {
        error!("Failed to connect to {}: {}", args.redis_url, e);
        e
    })?;
    info!("Connected to shared store at {}", args.redis_url);

    let registry = Arc::new(TieredCacheRegistry::new(
        settings,
        Arc::new(store) as Arc<dyn KeyValueStore>,
    ));
    let admin = CacheAdmin::new(Arc::new(WarmupCoordinator::new(registry)));

    match args.command {
        Command::Status => print_json(&admin.status().await?)?,
        Command::Config => {}
        Command::Top { ranking, k } => print_json(&admin.top_k(&ranking, k).await?)?,
        Command::Counter { entity, id, name } => {
            print_json(&admin.counter(&entity, &id, &name).await?)?
        }
        Command::ClearPrefix { prefix } => {
            let removed = admin.clear_by_prefix(&prefix).await?;
            println!("removed {} keys", removed);
        }
        Command::ClearAll { yes } => {
            if !yes {
                bail!("clear-all deletes every key in the shared store; pass --yes to confirm");
            }
            let removed = admin.clear_all().await?;
            println!("removed {} keys", removed);
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "redis=warn".parse() {
        filter = filter.add_directive(directive);
    }

    // stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
