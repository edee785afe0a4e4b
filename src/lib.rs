pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod fetch;
pub mod jobs;
pub mod model;
pub mod pipeline;
pub mod rates;
pub mod retry;
pub mod transform;

pub use database::{Database, PoolConfig};
pub use error::FetchError;
pub use export::{generate_filename, save_to_csv};
pub use fetch::{ClientConfig, MarketsClient};
pub use jobs::{SinkConfig, WriteOutcome};
pub use model::{CoinRow, MarketRow, RatesSnapshot};
pub use pipeline::MarketPipeline;
pub use rates::RatesClient;
pub use retry::RetryPolicy;
