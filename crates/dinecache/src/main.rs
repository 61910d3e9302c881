use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dinecache::cache::{RecorderMetrics, RedisStore};
use dinecache::{CacheOrchestrator, Config};

/// dinecache - Inspect and maintain the restaurant operations cache
#[derive(Parser, Debug)]
#[command(name = "dinecache")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check Redis connectivity
    Ping,
    /// Print a cached value as JSON
    Get { key: String },
    /// Cache a JSON value
    Set {
        key: String,
        /// JSON document to store
        value: String,
        /// TTL in seconds (defaults to CACHE_DEFAULT_TTL_SECONDS)
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Print the remaining TTL of a key in seconds (-1 if unknown)
    Ttl { key: String },
    /// Delete a key from both tiers
    Delete { key: String },
    /// Delete every key matching a `|`-separated pattern expression
    Invalidate { pattern: String },
    /// Increment a counter
    Incr {
        key: String,
        #[arg(long, default_value_t = 1)]
        by: i64,
    },
    /// Decrement a counter
    Decr {
        key: String,
        #[arg(long, default_value_t = 1)]
        by: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dinecache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env();
    if let Some(url) = cli.redis_url {
        config.redis_url = url;
    }

    tracing::info!(redis_url = %config.redis_url, "Connecting to Redis");
    let remote = RedisStore::new(&config.redis_url)
        .await
        .with_context(|| format!("failed to connect to {}", config.redis_url))?;
    let cache = CacheOrchestrator::new(&config, Arc::new(remote), Arc::new(RecorderMetrics));

    let outcome = run(&cache, &config, cli.command).await;
    cache.close().await;
    outcome
}

async fn run(cache: &CacheOrchestrator, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Ping => {
            if !cache.ping().await {
                anyhow::bail!("Redis did not answer PING");
            }
            println!("PONG");
        }
        Command::Get { key } => match cache.get::<serde_json::Value>(&key).await {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => anyhow::bail!("{key}: not cached"),
        },
        Command::Set { key, value, ttl } => {
            let value: serde_json::Value =
                serde_json::from_str(&value).context("value must be a JSON document")?;
            let ttl = ttl.map(Duration::from_secs).unwrap_or(config.default_ttl());
            if !cache.set(&key, &value, ttl).await {
                anyhow::bail!("{key}: value was not cached");
            }
            println!("OK");
        }
        Command::Ttl { key } => match cache.ttl(&key).await {
            Some(ttl) => println!("{}", ttl.as_secs()),
            None => println!("-1"),
        },
        Command::Delete { key } => {
            let removed = cache.delete(&key).await;
            println!("{}", u8::from(removed));
        }
        Command::Invalidate { pattern } => {
            let removed = cache.invalidate(&pattern).await?;
            println!("{removed}");
        }
        Command::Incr { key, by } => println!("{}", cache.increment(&key, by).await),
        Command::Decr { key, by } => println!("{}", cache.decrement(&key, by).await),
    }
    Ok(())
}
