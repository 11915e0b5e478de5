//! Flush control: decides when a batch is cut and drives its processing.

use crate::engine::EngineState;
use crate::history::BatchId;
use crate::BoxError;
use arc_swap::ArcSwapAny;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The stored processing callback: an opaque async operation the engine only
/// awaits and observes success or failure of.
pub(crate) type ProcessFn<T> =
    Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Erase a user closure into the stored callback shape.
pub(crate) fn box_process_fn<T, F, Fut, E>(f: F) -> ProcessFn<T>
where
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move |messages| {
        let fut = f(messages);
        Box::pin(async move { fut.await.map_err(Into::into) })
    })
}

/// A batch freshly cut from the pending queue, carrying the message copies
/// handed to the processing function. The history ring keeps its own copy.
pub(crate) struct CutBatch<T> {
    pub id: BatchId,
    pub messages: Vec<T>,
}

pub(crate) struct FlushController<T> {
    state: Arc<Mutex<EngineState<T>>>,
    /// Hot-swappable: `BatchEngine::set_process_fn` replaces it while batches
    /// already handed to the previous function run to completion under it.
    process: ArcSwapAny<Arc<ProcessFn<T>>>,
    max_batch_size: usize,
}

impl<T: Clone + Send + 'static> FlushController<T> {
    pub fn new(
        state: Arc<Mutex<EngineState<T>>>,
        process: ProcessFn<T>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            state,
            process: ArcSwapAny::new(Arc::new(process)),
            max_batch_size,
        }
    }

    pub fn swap_process(&self, process: ProcessFn<T>) {
        self.process.store(Arc::new(process));
    }

    /// Size trigger, invoked synchronously after a submission. Cuts exactly one
    /// batch per submission that crosses the threshold; surplus messages stay
    /// queued for the next trigger. Never fires when the size trigger is
    /// disabled.
    ///
    /// Takes the already-locked state so the cut is atomic with the append
    /// that crossed the line.
    pub fn maybe_flush_on_submit(&self, state: &mut EngineState<T>) -> Option<CutBatch<T>> {
        if self.max_batch_size > 0 && state.queue.len() >= self.max_batch_size {
            Some(self.cut(state))
        } else {
            None
        }
    }

    /// Timer trigger: cut one batch if anything is pending.
    pub fn flush_pending(&self, state: &mut EngineState<T>) -> Option<CutBatch<T>> {
        if state.queue.is_empty() {
            None
        } else {
            Some(self.cut(state))
        }
    }

    fn cut(&self, state: &mut EngineState<T>) -> CutBatch<T> {
        // With the size trigger disabled the timer flushes the whole queue.
        let count = if self.max_batch_size == 0 {
            state.queue.len()
        } else {
            self.max_batch_size
        };
        let entries = state.queue.drain(count);
        let messages: Vec<T> = entries.iter().map(|e| e.message.clone()).collect();
        let id = state.history.cut_batch(entries);
        debug!(batch_id = %id, size = messages.len(), "cut batch");
        CutBatch { id, messages }
    }

    /// Hand a cut batch to the processing function on its own task. The batch
    /// is already registered as `Batched`, so status queries are correct while
    /// processing is in flight. A processing error marks the batch `Rejected`
    /// and never propagates further.
    pub fn spawn_process(&self, cut: CutBatch<T>) {
        let state = Arc::clone(&self.state);
        let process = ProcessFn::clone(&self.process.load_full());
        tokio::spawn(async move {
            let CutBatch { id, messages } = cut;
            let succeeded = match (process)(messages).await {
                Ok(()) => true,
                Err(error) => {
                    warn!(batch_id = %id, %error, "batch processing failed");
                    false
                }
            };
            let settled = state.lock().unwrap().history.settle(id, succeeded);
            if !settled {
                // Evicted before processing finished; benign under a very
                // small cache lifespan.
                debug!(batch_id = %id, "batch evicted before settling");
            }
        });
    }

    /// Recurring timer driving time-triggered flushes. The returned handle is
    /// owned by the engine; `start` replaces it and `stop` aborts it after the
    /// queue drains.
    pub fn run_timer(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            // The first tick completes immediately; flushing belongs at
            // `period` after arming.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let cut = {
                    let mut state = self.state.lock().unwrap();
                    self.flush_pending(&mut state)
                };
                if let Some(cut) = cut {
                    self.spawn_process(cut);
                }
            }
        })
    }
}
