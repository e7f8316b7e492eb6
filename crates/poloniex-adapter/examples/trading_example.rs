/*
[INPUT]:  API key and secret from POLONIEX_API_KEY / POLONIEX_API_SECRET
[OUTPUT]: Balances, open orders and fee tier
[POS]:    Examples - signed account commands
[UPDATE]: When trading or account endpoints change
*/

use poloniex_adapter::*;
use tracing_subscriber::EnvFilter;

/// Example: Signed commands
///
/// Every private call carries a fresh nonce and an HMAC-SHA512 signature of
/// the exact request body. Orders are not placed here.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Poloniex Trading Example ===\n");

    let credentials = match Credentials::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Set POLONIEX_API_KEY and POLONIEX_API_SECRET: {}", e);
            return;
        }
    };

    let client = match PoloniexClient::with_credentials(credentials) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            return;
        }
    };
    client.set_debug(std::env::var_os("POLONIEX_DEBUG").is_some());

    println!("Querying balances...");
    match client.get_balances().await {
        Ok(balances) => {
            for (currency, balance) in balances.iter().filter(|(_, b)| !b.available.is_zero()) {
                println!("  {} available={} on_orders={}", currency, balance.available, balance.on_orders);
            }
        }
        Err(e) => println!("✗ Error ({:?}): {}", e.kind(), e),
    }

    println!("\nQuerying open orders...");
    match client.get_open_orders("all").await {
        Ok(orders) => {
            let open: usize = orders.values().map(Vec::len).sum();
            println!("✓ {} open orders across {} markets", open, orders.len());
        }
        Err(e) => println!("✗ Error ({:?}): {}", e.kind(), e),
    }

    println!("\nQuerying fee tier...");
    match client.get_fees().await {
        Ok(fees) => println!("✓ maker={} taker={}", fees.maker_fee, fees.taker_fee),
        Err(e) => println!("✗ Error ({:?}): {}", e.kind(), e),
    }

    println!("\n✓ Trading example complete");
}
