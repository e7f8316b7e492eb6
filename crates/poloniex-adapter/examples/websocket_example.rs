/*
[INPUT]:  Currency pair and run duration
[OUTPUT]: Streamed order book deltas and ticker ticks
[POS]:    Examples - WebSocket stream handling
[UPDATE]: When WebSocket API changes
*/

use poloniex_adapter::*;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing_subscriber::EnvFilter;

/// Example: Push stream subscriptions
///
/// One connection is shared by every subscription. Each subscription
/// reconnects on its own until stopped.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Poloniex WebSocket Example ===\n");

    let stream = StreamClient::new();

    // Handler-based subscription on its own task
    let book = match stream.spawn("BTC_ETH", |update| {
        if let Update::Market(update) = update {
            println!("book {} seq={} events={}", update.pair, update.seq, update.events.len());
        }
    }) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to subscribe: {}", e);
            return;
        }
    };

    // Channel-based subscription driven by a control channel
    let (ticks_tx, mut ticks) = mpsc::unbounded_channel();
    let (control, signals) = mpsc::channel(1);
    let ticker = tokio::spawn({
        let stream = stream.clone();
        async move { stream.subscribe_ticker(ticks_tx, signals).await }
    });

    let printer = tokio::spawn(async move {
        while let Some(tick) = ticks.recv().await {
            println!("tick {} last={} change={}", tick.pair, tick.last, tick.percent_change);
        }
    });

    sleep(Duration::from_secs(10)).await;
    println!("\nState: {:?}", book.current_state());

    let _ = control.send(Control::Reset).await;
    sleep(Duration::from_secs(5)).await;

    let _ = control.send(Control::Stop).await;
    match ticker.await {
        Ok(result) => println!("ticker stopped: {:?}", result),
        Err(e) => println!("ticker task failed: {}", e),
    }
    println!("book stopped: {:?}", book.stop().await);
    let _ = printer.await;

    println!("dropped frames: {}", stream.dropped_frames());
    stream.close();
    println!("\n✓ WebSocket example complete");
}
