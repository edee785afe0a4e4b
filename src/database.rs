use anyhow::{bail, Context, Result};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};
use tokio::time::Duration;
use tracing::info;

use crate::model::{CoinRow, ExchangeRateRow};

pub const PRICES_TABLE: &str = "crypto_prices";
pub const RATES_TABLE: &str = "exchange_rates";

const INSERT_CHUNK: usize = 1000;

const PRICE_COLUMNS: [&str; 12] = [
    "id",
    "symbol",
    "name",
    "current_price",
    "market_cap",
    "total_volume",
    "market_cap_rank",
    "price_change_percentage_24h",
    "high_24h",
    "low_24h",
    "last_updated",
    "captured_at",
];

const RATE_COLUMNS: [&str; 5] = [
    "base_code",
    "target_code",
    "rate",
    "time_last_update_utc",
    "captured_at",
];

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    /// Ping a pooled connection before handing it out.
    pub test_before_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            test_before_acquire: true,
        }
    }
}

/// SQL dialect behind the pool, picked from the connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_url(database_url: &str) -> Result<Self> {
        let scheme = database_url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "sqlite" => Ok(Backend::Sqlite),
            other => bail!("unsupported database scheme `{}`", other),
        }
    }

    /// Column type for `captured_at`. SQLite has no timestamp type, so it
    /// keeps RFC 3339 text.
    fn timestamp_type(self) -> &'static str {
        match self {
            Backend::Postgres => "TIMESTAMPTZ",
            Backend::Sqlite => "TEXT",
        }
    }

    /// Placeholder for bind slot `n` of `column`. Timestamps are bound as
    /// RFC 3339 text, which PostgreSQL only accepts through an explicit cast.
    fn placeholder(self, column: &str, n: usize) -> String {
        match self {
            Backend::Postgres if column == "captured_at" => {
                format!("CAST(${} AS TIMESTAMPTZ)", n)
            }
            _ => format!("${}", n),
        }
    }
}

/// Append-only sink for price and exchange-rate snapshots.
///
/// Works against PostgreSQL or SQLite; the driver is chosen from the URL scheme.
pub struct Database {
    pool: AnyPool,
    backend: Backend,
}

impl Database {
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self> {
        let backend = Backend::from_url(database_url)?;
        install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .test_before_acquire(config.test_before_acquire)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;

        Ok(Self { pool, backend })
    }

    /// Creates the snapshot tables when they are missing. Existing tables are
    /// left untouched.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in schema_sql(self.backend) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Appends the batch in multi-row inserts inside one transaction.
    pub async fn append_prices(&self, rows: &[CoinRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in rows.chunks(INSERT_CHUNK) {
            let sql = insert_sql(self.backend, PRICES_TABLE, &PRICE_COLUMNS, chunk.len());
            let mut query = sqlx::query(&sql);
            for row in chunk {
                query = query
                    .bind(row.id.clone())
                    .bind(row.symbol.clone())
                    .bind(row.name.clone())
                    .bind(row.current_price)
                    .bind(row.market_cap)
                    .bind(row.total_volume)
                    .bind(row.market_cap_rank as i64)
                    .bind(row.price_change_percentage_24h)
                    .bind(row.high_24h)
                    .bind(row.low_24h)
                    .bind(row.last_updated.clone())
                    .bind(row.captured_at.to_rfc3339());
            }
            written += query
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to insert into {}", PRICES_TABLE))?
                .rows_affected();
        }

        tx.commit().await?;
        info!("Appended {} rows to {}", written, PRICES_TABLE);
        Ok(written)
    }

    pub async fn append_rates(&self, rows: &[ExchangeRateRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in rows.chunks(INSERT_CHUNK) {
            let sql = insert_sql(self.backend, RATES_TABLE, &RATE_COLUMNS, chunk.len());
            let mut query = sqlx::query(&sql);
            for row in chunk {
                query = query
                    .bind(row.base_code.clone())
                    .bind(row.target_code.clone())
                    .bind(row.rate)
                    .bind(row.time_last_update_utc.clone())
                    .bind(row.captured_at.to_rfc3339());
            }
            written += query
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to insert into {}", RATES_TABLE))?
                .rows_affected();
        }

        tx.commit().await?;
        info!("Appended {} rows to {}", written, RATES_TABLE);
        Ok(written)
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {}", table))
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }
}

fn schema_sql(backend: Backend) -> [String; 4] {
    let ts = backend.timestamp_type();
    [
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS crypto_prices (
                id TEXT,
                symbol TEXT,
                name TEXT,
                current_price DOUBLE PRECISION,
                market_cap DOUBLE PRECISION,
                total_volume DOUBLE PRECISION NOT NULL,
                market_cap_rank BIGINT NOT NULL,
                price_change_percentage_24h DOUBLE PRECISION,
                high_24h DOUBLE PRECISION,
                low_24h DOUBLE PRECISION,
                last_updated TEXT,
                captured_at {ts} NOT NULL
            );
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_rates (
                base_code TEXT NOT NULL,
                target_code TEXT NOT NULL,
                rate DOUBLE PRECISION NOT NULL,
                time_last_update_utc TEXT,
                captured_at {ts} NOT NULL
            );
            "#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_id_captured ON {0}(id, captured_at);",
            PRICES_TABLE
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_captured ON {0}(captured_at);",
            RATES_TABLE
        ),
    ]
}

/// `INSERT INTO t (a, b) VALUES ($1, $2), ($3, $4), ...`
fn insert_sql(backend: Backend, table: &str, columns: &[&str], rows: usize) -> String {
    let width = columns.len();
    let values: Vec<String> = (0..rows)
        .map(|r| {
            let slots: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(c, column)| backend.placeholder(column, r * width + c + 1))
                .collect();
            format!("({})", slots.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        values.join(", ")
    )
}
