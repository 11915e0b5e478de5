//! # microbatch
//!
//! A micro-batching engine: callers submit individual messages, the engine
//! accumulates them into batches and hands each batch to a user-supplied async
//! processing function once either a size threshold or a time threshold is
//! reached, whichever comes first. Completed batches stay queryable, by
//! message or by batch id, through a fixed-capacity FIFO history ring.
//!
//! ## Key Features
//!
//! - **Dual flush triggers**: size-triggered cuts happen synchronously inside
//!   the submit call that crosses the threshold; time-triggered cuts come from
//!   a recurring timer owned by the engine instance
//! - **Duplicate suppression**: messages are identified by a derived string
//!   key; resubmitting a known key is declined (opt-out per engine)
//! - **Bounded status history**: a ring of `cache_lifespan` batches with O(1)
//!   key and id lookups and strict FIFO eviction
//! - **Failure containment**: a failing processing function marks its batch
//!   `Rejected`; the error never propagates to submitters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use microbatch::{BatchEngine, MessageStatus};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> microbatch::Result<()> {
//!     let engine = BatchEngine::builder()
//!         .with_max_batch_size(2)
//!         .with_max_batch_time(Duration::from_millis(250))
//!         .process_with(|messages: Vec<String>| async move {
//!             println!("processing {} messages", messages.len());
//!             Ok::<(), std::io::Error>(())
//!         })
//!         .build()?;
//!
//!     engine.submit("a".to_string())?;
//!     // Second submission crosses the size threshold and cuts a batch.
//!     let receipt = engine.submit("b".to_string())?;
//!     assert_eq!(receipt.status, MessageStatus::Batched);
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`engine`] | [`BatchEngine`] façade and builder |
//! | [`config`] | Engine configuration and validation |
//! | [`history`] | Bounded batch-status history ring and lookups |
//! | [`queue`] | Pending message queue |
//! | [`key`] | Message identity derivation ([`KeyDeriver`]) |
//! | [`error`] | Error types |
//!
//! ## Delivery semantics
//!
//! The engine guarantees every accepted message reaches the processing
//! function in exactly one batch cut, but it does not guarantee exactly-once
//! processing on the consumer side, does not persist batches across restarts,
//! and never retries a rejected batch.

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod key;
pub mod queue;

mod flush;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use engine::{BatchEngine, BatchEngineBuilder, SubmitReceipt};
pub use error::{Error, ErrorContext};
pub use history::{BatchId, BatchStatus, MessageStatus, StatusReport};
pub use key::{KeyDeriver, StructuralKeyDeriver};
pub use queue::{PendingEntry, PendingQueue};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by user processing functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
