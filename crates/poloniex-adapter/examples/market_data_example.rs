/*
[INPUT]:  Currency pair identifier (e.g., "BTC_ETH")
[OUTPUT]: Market data (tickers, order book, candles)
[POS]:    Examples - public market data queries
[UPDATE]: When adding new market data endpoints
*/

use chrono::{Duration, Utc};
use poloniex_adapter::*;
use tracing_subscriber::EnvFilter;

/// Example: Query market data (no credentials required)
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Poloniex Market Data Example ===\n");

    let client = match PoloniexClient::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            return;
        }
    };

    let pair = "BTC_ETH";

    println!("Querying tickers...");
    match client.get_tickers().await {
        Ok(tickers) => match tickers.get(pair) {
            Some(ticker) => println!("✓ {} last={} bid={} ask={}", pair, ticker.last, ticker.highest_bid, ticker.lowest_ask),
            None => println!("✓ {} markets, {} not listed", tickers.len(), pair),
        },
        Err(e) => println!("✗ Error: {}", e),
    }

    println!("\nQuerying order book for {}...", pair);
    match client.get_order_book(pair, 5).await {
        Ok(book) => {
            println!("✓ seq={} frozen={}", book.seq, book.is_frozen);
            for level in &book.asks {
                println!("  ask {} x {}", level.0, level.1);
            }
            for level in &book.bids {
                println!("  bid {} x {}", level.0, level.1);
            }
        }
        Err(e) => println!("✗ Error: {}", e),
    }

    println!("\nQuerying 4h candles for the last week...");
    let end = Utc::now();
    let start = end - Duration::days(7);
    match client.chart_data(pair, ChartPeriod::FourHours, start, end).await {
        Ok(candles) => println!("✓ {} candles", candles.len()),
        Err(e) => println!("✗ Error: {}", e),
    }

    println!("\n✓ Market data example complete");
}
