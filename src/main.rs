use anyhow::Result;
use clap::Parser;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gecko_ingest::config::{Cli, Command, MarketsArgs, RatesArgs};
use gecko_ingest::database::PRICES_TABLE;
use gecko_ingest::jobs::{ingest_markets, write_rates};
use gecko_ingest::{
    generate_filename, save_to_csv, CoinRow, MarketPipeline, MarketsClient, RatesClient,
    RetryPolicy,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Markets(args) => run_markets(&cli, args).await,
        Command::Rates(args) => run_rates(&cli, args).await,
    }
}

async fn run_markets(cli: &Cli, args: &MarketsArgs) -> Result<()> {
    let client = MarketsClient::new(args.client_config())?;
    let pipeline = MarketPipeline::new(client).with_min_volume(args.min_volume);
    let run = ingest_markets(&pipeline, args.pages, args.concurrency, &cli.sink_config()).await;
    if run.batch.is_empty() {
        return Ok(());
    }

    print_table(&run.batch, args.show);

    if args.csv {
        let filename = generate_filename(PRICES_TABLE);
        match save_to_csv(&run.batch, &filename) {
            Ok(()) => info!("Data saved to: {}", filename),
            Err(e) => error!("CSV export failed: {:#}", e),
        }
    }
    Ok(())
}

async fn run_rates(cli: &Cli, args: &RatesArgs) -> Result<()> {
    let timeout = Duration::from_secs(args.timeout_secs);
    let client = RatesClient::new(&args.url, timeout, RetryPolicy::default())?;
    let snapshot = match client.fetch().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Failed to retrieve data: {:#}", e);
            return Ok(());
        }
    };

    println!("{:<6} {:>16}", "Code", snapshot.base_code.as_str());
    println!("{}", "-".repeat(23));
    for (code, rate) in &snapshot.conversion_rates {
        println!("{:<6} {:>16.6}", code, rate);
    }
    println!(
        "\nLast update: {}",
        snapshot.time_last_update_utc.as_deref().unwrap_or("-")
    );

    write_rates(&snapshot.rows(), &cli.sink_config()).await;
    Ok(())
}

fn print_table(rows: &[CoinRow], limit: usize) {
    let mut ranked: Vec<&CoinRow> = rows.iter().collect();
    ranked.sort_by_key(|r| r.market_cap_rank);

    println!(
        "{:<5} {:<18} {:<8} {:>14} {:>16} {:>10}",
        "Rank", "Name", "Symbol", "Price(USD)", "Volume(USD)", "24h%"
    );
    println!("{}", "-".repeat(80));
    for r in ranked.into_iter().take(limit) {
        println!(
            "{:<5} {:<18} {:<8} {:>14} {:>16.0} {:>10}",
            r.market_cap_rank,
            r.name.as_deref().unwrap_or("-"),
            r.symbol.as_deref().unwrap_or("-"),
            r.current_price
                .map(|x| format!("{:.2}", x))
                .unwrap_or_else(|| "-".into()),
            r.total_volume,
            r.price_change_percentage_24h
                .map(|x| format!("{:+.2}", x))
                .unwrap_or_else(|| "-".into()),
        );
    }
    if rows.len() > limit {
        println!("... {} more", rows.len() - limit);
    }
}
