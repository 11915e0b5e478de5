//! Basic micro-batching: size- and time-triggered flushes.
//!
//! Run with: `cargo run --example basic_batching`

use microbatch::BatchEngine;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
struct Event {
    user: String,
    action: String,
}

#[tokio::main]
async fn main() -> microbatch::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "microbatch=debug".into()),
        )
        .init();

    let engine = BatchEngine::builder()
        .with_max_batch_size(3)
        .with_max_batch_time(Duration::from_millis(500))
        .process_with(|events: Vec<Event>| async move {
            println!("-- processing batch of {} --", events.len());
            for event in &events {
                println!("   {} {}", event.user, event.action);
            }
            Ok::<(), std::io::Error>(())
        })
        .build()?;

    // Three submissions cross the size threshold: the third submit cuts the
    // batch synchronously.
    for (user, action) in [("ana", "login"), ("bo", "click"), ("cy", "logout")] {
        let receipt = engine.submit(Event {
            user: user.into(),
            action: action.into(),
        })?;
        println!("submitted {user}: {:?}", receipt.status);
    }

    // This one waits for the 500ms timer.
    engine.submit(Event {
        user: "dee".into(),
        action: "login".into(),
    })?;
    tokio::time::sleep(Duration::from_millis(600)).await;

    engine.stop().await;
    Ok(())
}
