//! Live order book replica - prints top of book for a few symbols
//!
//! Usage:
//!   cargo run --example live_books
//!
//! Optional:
//!   HITBTC_SYMBOLS=ETHBTC,BTCUSD  # Symbols to follow (default: ETHBTC,BTCUSD)
//!   HITBTC_DEPTH=5                # Levels kept per side (default: 10)
//!   HITBTC_API_KEY / HITBTC_SECRET_KEY  # Also subscribe to order reports

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hitbtc_replica::config::Credentials;
use hitbtc_replica::{Config, ReplicaClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hitbtc_replica=info".parse()?),
        )
        .init();

    let symbols: Vec<String> = std::env::var("HITBTC_SYMBOLS")
        .unwrap_or_else(|_| "ETHBTC,BTCUSD".to_string())
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    let depth: usize = std::env::var("HITBTC_DEPTH")
        .ok()
        .and_then(|d| d.parse().ok())
        .unwrap_or(10);

    let mut config = Config::new().with_max_book_depth(depth);
    let credentials = match (
        std::env::var("HITBTC_API_KEY"),
        std::env::var("HITBTC_SECRET_KEY"),
    ) {
        (Ok(key), Ok(secret)) => Some(Credentials::new(key, secret)),
        _ => None,
    };
    if let Some(creds) = credentials.clone() {
        config = config.with_credentials(creds);
    }

    println!("=== HitBTC Live Books ===\n");
    println!("Symbols: {}", symbols.join(", "));
    println!("Depth:   {}\n", depth);

    let diffs = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&diffs);
    let client = ReplicaClient::new(config)?
        .on_snapshot(|symbol, book| {
            println!("Snapshot {} seq {}", symbol, book.sequence());
        })
        .on_diff(move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    client.connect()?;

    for symbol in &symbols {
        client.subscribe_book(symbol).await?;
        client.subscribe_ticker(symbol).await?;
    }
    if credentials.is_some() {
        client.subscribe_reports().await?;
        client.get_balance().await?;
    }
    client.get_symbols().await?;

    let mut interval = tokio::time::interval(Duration::from_secs(2));
    for _ in 0..15 {
        interval.tick().await;
        println!("--- {:?}, {} diffs ---", client.state(), diffs.load(Ordering::Relaxed));
        for (symbol, book) in client.copy_books(1) {
            match book {
                Some(book) => println!(
                    "{:>10} seq {:>12}  bid {:>14.8} x {:<10}  ask {:>14.8} x {:<10}",
                    symbol,
                    book.sequence(),
                    book.bids()[0].price,
                    book.bids()[0].size,
                    book.asks()[0].price,
                    book.asks()[0].size,
                ),
                None => println!("{:>10} (one side empty)", symbol),
            }
        }
        for symbol in &symbols {
            if let (Some(ticker), Some(info)) = (client.ticker(symbol), client.symbol(symbol)) {
                println!(
                    "{:>10} ticker bid {:?} ask {:?} (tick {})",
                    symbol, ticker.bid, ticker.ask, info.tick_size
                );
            }
        }
        let stuck = client.books().symbols_needing_resync();
        if !stuck.is_empty() {
            println!("Resyncing: {}", stuck.join(", "));
        }
    }

    client.shutdown().await;
    println!("\nDone.");
    Ok(())
}
