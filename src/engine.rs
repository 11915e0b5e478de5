//! Engine façade: submission, lifecycle, and status queries.

use crate::config::EngineConfig;
use crate::error::{Error, ErrorContext};
use crate::flush::{box_process_fn, FlushController, ProcessFn};
use crate::history::{BatchHistory, BatchId, MessageStatus, StatusReport};
use crate::key::{KeyDeriver, StructuralKeyDeriver, NULL_KEY};
use crate::queue::PendingQueue;
use crate::{BoxError, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Interval at which `stop` re-checks the pending queue while draining.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// All mutable engine state, serialized under one mutex. Submission, timer
/// ticks, and stop's drain loop all go through it; processing callbacks run
/// outside it.
pub(crate) struct EngineState<T> {
    pub queue: PendingQueue<T>,
    pub history: BatchHistory<T>,
    pub accepting: bool,
}

/// Outcome of a [`BatchEngine::submit`] call, reflecting engine state
/// immediately after the call returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Derived key of the accepted message; `None` when declined.
    pub key: Option<String>,
    pub status: MessageStatus,
    /// Set when this submission crossed the size threshold and triggered a cut.
    pub batch_id: Option<BatchId>,
}

impl SubmitReceipt {
    fn declined() -> Self {
        Self {
            key: None,
            status: MessageStatus::Declined,
            batch_id: None,
        }
    }

    pub fn is_declined(&self) -> bool {
        self.status == MessageStatus::Declined
    }

    pub fn is_batched(&self) -> bool {
        self.status == MessageStatus::Batched
    }
}

/// Builder for [`BatchEngine`]. A processing function is required; everything
/// else has defaults (see [`EngineConfig`]).
pub struct BatchEngineBuilder<T> {
    config: EngineConfig,
    process: Option<ProcessFn<T>>,
    key_deriver: Arc<dyn KeyDeriver<T>>,
    structural_keys: bool,
}

impl<T: Serialize + Clone + Send + 'static> BatchEngineBuilder<T> {
    /// Builder using the structural-serialization key default. Messages must
    /// be `Serialize`; use [`BatchEngineBuilder::keyed`] otherwise.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            process: None,
            key_deriver: Arc::new(StructuralKeyDeriver::new()),
            structural_keys: true,
        }
    }
}

impl<T: Serialize + Clone + Send + 'static> Default for BatchEngineBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> BatchEngineBuilder<T> {
    /// Builder with a caller-supplied key deriver, for message types that do
    /// not implement `Serialize` or want referential rather than structural
    /// identity.
    pub fn keyed(deriver: impl KeyDeriver<T> + 'static) -> Self {
        Self {
            config: EngineConfig::default(),
            process: None,
            key_deriver: Arc::new(deriver),
            structural_keys: false,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    pub fn with_max_batch_time(mut self, time: Duration) -> Self {
        self.config.max_batch_time = time;
        self
    }

    pub fn with_cache_lifespan(mut self, lifespan: usize) -> Self {
        self.config.cache_lifespan = lifespan;
        self
    }

    pub fn with_allow_duplicates(mut self, allow: bool) -> Self {
        self.config.allow_duplicates = allow;
        self
    }

    pub fn with_accepting_at_start(mut self, accepting: bool) -> Self {
        self.config.accepting_at_start = accepting;
        self
    }

    /// Replace the key deriver.
    pub fn with_key_deriver(mut self, deriver: impl KeyDeriver<T> + 'static) -> Self {
        self.key_deriver = Arc::new(deriver);
        self.structural_keys = false;
        self
    }

    /// Set the required processing function. Any error from the returned
    /// future marks the batch rejected; it never escapes the flush path.
    pub fn process_with<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.process = Some(box_process_fn(f));
        self
    }

    /// Validate the configuration and construct the engine. When
    /// `accepting_at_start` is set and a flush timer is configured, this must
    /// run inside a tokio runtime (the timer task is spawned here).
    pub fn build(self) -> Result<BatchEngine<T>> {
        self.config.validate()?;
        if self.config.flush_disabled() {
            // Legal but almost never intended: nothing drains the queue.
            warn!("size and time flush triggers are both disabled; messages accumulate unboundedly");
        }
        let process = self.process.ok_or_else(|| {
            Error::configuration_with_context(
                "a processing function is required",
                ErrorContext::new()
                    .with_field_path("process")
                    .with_source("config_validation"),
            )
        })?;

        let state = Arc::new(Mutex::new(EngineState {
            queue: PendingQueue::new(),
            history: BatchHistory::new(self.config.cache_lifespan),
            accepting: self.config.accepting_at_start,
        }));
        let flush = Arc::new(FlushController::new(
            Arc::clone(&state),
            process,
            self.config.max_batch_size,
        ));
        let engine = BatchEngine {
            config: self.config,
            key_deriver: self.key_deriver,
            structural_keys: self.structural_keys,
            state,
            flush,
            timer: Mutex::new(None),
        };
        if engine.config.accepting_at_start {
            engine.arm_timer();
        }
        Ok(engine)
    }
}

/// Micro-batching engine.
///
/// Accumulates submitted messages and flushes them to the processing function
/// when a size or time threshold is reached, whichever comes first. Completed
/// batches stay queryable through a fixed-capacity FIFO history ring.
pub struct BatchEngine<T> {
    config: EngineConfig,
    key_deriver: Arc<dyn KeyDeriver<T>>,
    structural_keys: bool,
    state: Arc<Mutex<EngineState<T>>>,
    flush: Arc<FlushController<T>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<T> std::fmt::Debug for BatchEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Serialize + Clone + Send + 'static> BatchEngine<T> {
    pub fn builder() -> BatchEngineBuilder<T> {
        BatchEngineBuilder::new()
    }
}

impl<T: Clone + Send + 'static> BatchEngine<T> {
    /// Submit one message.
    ///
    /// Declined (not an error) when the engine is stopped, the message is
    /// structurally absent, or duplicate suppression finds its key already
    /// present. Otherwise the receipt reports `Queued`, or `Batched` with the
    /// new batch id when this submission crossed the size threshold.
    ///
    /// Key-derivation failure is the one error path: it signals a usage
    /// problem (e.g. a message the default deriver cannot serialize) and is
    /// returned to the caller with the original cause attached.
    pub fn submit(&self, message: T) -> Result<SubmitReceipt> {
        let key = self.key_deriver.derive(&message)?;
        if self.structural_keys && key == NULL_KEY {
            return Ok(SubmitReceipt::declined());
        }

        let cut = {
            let mut state = self.state.lock().unwrap();
            if !state.accepting {
                return Ok(SubmitReceipt::declined());
            }
            if !self.config.allow_duplicates
                && state.history.status_by_key(&key).status != MessageStatus::NotFound
            {
                return Ok(SubmitReceipt::declined());
            }
            state.queue.append(key.clone(), message);
            state.history.register_pending(key.clone());
            self.flush.maybe_flush_on_submit(&mut state)
        };

        match cut {
            Some(cut) => {
                let batch_id = cut.id;
                self.flush.spawn_process(cut);
                Ok(SubmitReceipt {
                    key: Some(key),
                    status: MessageStatus::Batched,
                    batch_id: Some(batch_id),
                })
            }
            None => Ok(SubmitReceipt {
                key: Some(key),
                status: MessageStatus::Queued,
                batch_id: None,
            }),
        }
    }

    /// Begin (or resume) accepting submissions and (re)arm the flush timer.
    /// Idempotent: repeated calls replace the timer, they never duplicate it.
    pub fn start(&self) {
        self.state.lock().unwrap().accepting = true;
        self.arm_timer();
    }

    /// Stop accepting submissions immediately, then wait until the pending
    /// queue has fully drained before disarming the timer. Messages already
    /// queued are never abandoned; batches already handed to the processing
    /// function run to completion.
    pub async fn stop(&self) {
        self.state.lock().unwrap().accepting = false;

        if self.config.max_batch_time.is_zero() {
            // No timer to drain the queue; flush the remainder directly.
            loop {
                let cut = {
                    let mut state = self.state.lock().unwrap();
                    self.flush.flush_pending(&mut state)
                };
                match cut {
                    Some(cut) => self.flush.spawn_process(cut),
                    None => break,
                }
            }
        }

        loop {
            if self.state.lock().unwrap().queue.is_empty() {
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        let handle = self.timer.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Replace the processing function. Batches already handed to the
    /// previous function run to completion under it; subsequent cuts use the
    /// new one.
    pub fn set_process_fn<F, Fut, E>(&self, f: F)
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.flush.swap_process(box_process_fn(f));
    }

    /// Status of the message's derived key.
    pub fn status(&self, message: &T) -> Result<StatusReport> {
        let key = self.key_deriver.derive(message)?;
        Ok(self.status_by_key(&key))
    }

    /// Status lookup for callers who kept the key from a submit receipt.
    pub fn status_by_key(&self, key: &str) -> StatusReport {
        self.state.lock().unwrap().history.status_by_key(key)
    }

    /// Status of a batch by id. `NotFound` once evicted.
    pub fn status_of(&self, batch_id: BatchId) -> StatusReport {
        self.state.lock().unwrap().history.status_by_id(&batch_id)
    }

    /// Messages of a batch still held in the history ring. `None` once
    /// evicted.
    pub fn batch_messages(&self, batch_id: BatchId) -> Option<Vec<T>> {
        self.state
            .lock()
            .unwrap()
            .history
            .messages_of(&batch_id)
            .map(<[T]>::to_vec)
    }

    /// Number of messages currently awaiting a flush.
    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Total number of batches cut so far.
    pub fn cuts(&self) -> u64 {
        self.state.lock().unwrap().history.cuts()
    }

    pub fn is_accepting(&self) -> bool {
        self.state.lock().unwrap().accepting
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn arm_timer(&self) {
        let mut timer = self.timer.lock().unwrap();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        if !self.config.max_batch_time.is_zero() {
            *timer = Some(Arc::clone(&self.flush).run_timer(self.config.max_batch_time));
        }
    }
}

impl<T> Drop for BatchEngine<T> {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}
