//! Querying message and batch outcomes through the bounded history ring.
//!
//! Run with: `cargo run --example status_lookup`

use microbatch::{BatchEngine, MessageStatus};
use std::time::Duration;

#[tokio::main]
async fn main() -> microbatch::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "microbatch=debug".into()),
        )
        .init();

    // Tiny history: only the three most recent batches stay queryable.
    let engine = BatchEngine::builder()
        .with_max_batch_size(10)
        .with_max_batch_time(Duration::ZERO)
        .with_cache_lifespan(3)
        .process_with(|messages: Vec<String>| async move {
            println!("processed {} messages", messages.len());
            Ok::<(), std::io::Error>(())
        })
        .build()?;

    for n in 0..50 {
        engine.submit(format!("message {n}"))?;
    }
    engine.stop().await;
    tokio::task::yield_now().await;

    // Batches 0 and 1 were evicted FIFO; batch 2 onward remain.
    for probe in ["message 5", "message 25", "message 45"] {
        let report = engine.status(&probe.to_string())?;
        match report.status {
            MessageStatus::NotFound => println!("{probe}: evicted from history"),
            status => println!("{probe}: {status:?} in batch {:?}", report.batch_id),
        }
    }

    // Duplicate suppression: a key already in history is declined.
    engine.start();
    let receipt = engine.submit("message 45".to_string())?;
    println!("resubmit of message 45: {:?}", receipt.status);
    engine.stop().await;
    Ok(())
}
