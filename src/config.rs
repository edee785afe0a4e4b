use clap::{Args, Parser, Subcommand};
use tokio::time::Duration;

use crate::database::PoolConfig;
use crate::fetch::{ClientConfig, DEFAULT_API_URL};
use crate::jobs::SinkConfig;
use crate::pipeline::{DEFAULT_CONCURRENCY, DEFAULT_PAGES};
use crate::retry::RetryPolicy;
use crate::transform::DEFAULT_MIN_VOLUME;

/// One-shot ingestion jobs for market listings and exchange rates.
///
/// Every option can also come from the environment or a `.env` file.
#[derive(Debug, Parser)]
#[command(name = "gecko_ingest", version, about)]
pub struct Cli {
    /// Database connection string (postgres:// or sqlite:)
    #[arg(long, env = "SUPABASE_URL", hide_env_values = true, global = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "DB_POOL_SIZE", default_value_t = 5, global = true)]
    pub db_pool_size: u32,

    /// Fetch and report, but do not write to the database
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Snapshot the paginated coin market listing
    Markets(MarketsArgs),
    /// Snapshot the current exchange-rate table
    Rates(RatesArgs),
}

#[derive(Debug, Args)]
pub struct MarketsArgs {
    #[arg(long, env = "GECKO_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    #[arg(long, env = "GECKO_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = DEFAULT_PAGES)]
    pub pages: u32,

    /// Pages in flight at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Rows at or below this 24h volume are dropped
    #[arg(long, default_value_t = DEFAULT_MIN_VOLUME)]
    pub min_volume: f64,

    /// Per-attempt request timeout
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub max_attempts: u32,

    /// Also save the batch to a timestamped CSV file
    #[arg(long)]
    pub csv: bool,

    /// Rows to print after the run
    #[arg(long, default_value_t = 20)]
    pub show: usize,
}

#[derive(Debug, Args)]
pub struct RatesArgs {
    /// Full endpoint URL, including the provider key
    #[arg(long, env = "EXCHANGE_KEY", hide_env_values = true)]
    pub url: String,

    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

impl Cli {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.db_pool_size,
            ..PoolConfig::default()
        }
    }

    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            database_url: self.database_url.clone(),
            pool: self.pool_config(),
            dry_run: self.dry_run,
        }
    }
}

impl MarketsArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            pool_size: self.concurrency.max(1),
            retry: RetryPolicy::default().with_max_attempts(self.max_attempts),
        }
    }
}
