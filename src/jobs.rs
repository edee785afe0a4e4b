use anyhow::{anyhow, Result};
use tracing::{error, info, warn};

use crate::database::{Database, PoolConfig, PRICES_TABLE, RATES_TABLE};
use crate::model::{CoinRow, ExchangeRateRow};
use crate::pipeline::MarketPipeline;

/// Where a run's rows go.
#[derive(Debug, Clone, Default)]
pub struct SinkConfig {
    pub database_url: Option<String>,
    pub pool: PoolConfig,
    pub dry_run: bool,
}

/// What happened to a batch at the end of a run. None of these is an error
/// for the process; a failed write is logged and the run ends.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    NothingToWrite,
    DryRun { rows: usize },
    Written { rows: u64 },
    Failed { reason: String },
}

pub struct MarketsRun {
    pub batch: Vec<CoinRow>,
    pub outcome: WriteOutcome,
}

/// Runs the listing pipeline and appends the batch. An empty batch never
/// opens a database connection.
pub async fn ingest_markets(
    pipeline: &MarketPipeline,
    total_pages: u32,
    max_concurrency: usize,
    sink: &SinkConfig,
) -> MarketsRun {
    let batch = pipeline.run(total_pages, max_concurrency).await;
    info!("Total usable coins: {}", batch.len());

    let outcome = write_prices(&batch, sink).await;
    MarketsRun { batch, outcome }
}

pub async fn write_prices(batch: &[CoinRow], sink: &SinkConfig) -> WriteOutcome {
    if batch.is_empty() {
        warn!("No rows to write, skipping upload");
        return WriteOutcome::NothingToWrite;
    }
    if sink.dry_run {
        info!("Dry run, skipping write of {} rows", batch.len());
        return WriteOutcome::DryRun { rows: batch.len() };
    }

    let written = async {
        let db = open(sink).await?;
        db.append_prices(batch).await
    }
    .await;
    settle(written, PRICES_TABLE)
}

pub async fn write_rates(rows: &[ExchangeRateRow], sink: &SinkConfig) -> WriteOutcome {
    if rows.is_empty() {
        warn!("No exchange rates to write, skipping upload");
        return WriteOutcome::NothingToWrite;
    }
    if sink.dry_run {
        info!("Dry run, skipping write of {} rates", rows.len());
        return WriteOutcome::DryRun { rows: rows.len() };
    }

    let written = async {
        let db = open(sink).await?;
        db.append_rates(rows).await
    }
    .await;
    settle(written, RATES_TABLE)
}

/// Connects and creates missing tables, like an appending `to_sql` would.
async fn open(sink: &SinkConfig) -> Result<Database> {
    let url = sink.database_url.as_deref().ok_or_else(|| {
        anyhow!("no database URL configured (set SUPABASE_URL or --database-url)")
    })?;
    let db = Database::connect(url, &sink.pool).await?;
    db.ensure_schema().await?;
    Ok(db)
}

fn settle(written: Result<u64>, table: &str) -> WriteOutcome {
    match written {
        Ok(rows) => {
            info!("Data successfully uploaded to {}: {} rows", table, rows);
            WriteOutcome::Written { rows }
        }
        Err(e) => {
            error!("Database error: {:#}", e);
            WriteOutcome::Failed {
                reason: format!("{:#}", e),
            }
        }
    }
}
