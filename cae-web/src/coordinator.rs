//! Request coordinator
//!
//! Bridges HTTP requests and the asynchronous pipeline. A submission stores
//! the upload, registers a waiter under a fresh correlation id and then
//! publishes `new-work`. The completion listener consumes `work-done` in its
//! own task and hands each result to the waiter with the matching id, so
//! concurrent requests never see each other's results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cae_common::events::{CaeEvent, EventBus};
use cae_common::queue::Delivery;
use cae_common::{
    AckMode, ColorResult, Error, NewWork, Result, ResultStore, WorkDone, WorkQueue,
    NEW_WORK_QUEUE, WORK_DONE_QUEUE,
};
use chrono::Utc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Waiters = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ColorResult>>>>;

/// A stored upload whose analysis has been requested
#[derive(Debug)]
pub struct Submission {
    pub image_id: String,
    pub correlation_id: Uuid,
    receiver: oneshot::Receiver<ColorResult>,
    registration: Registration,
}

/// Removes a waiter from the pending map when dropped
///
/// Covers every way a request can end, including the handler future being
/// dropped when the client disconnects.
#[derive(Debug)]
struct Registration {
    correlation_id: Uuid,
    pending: Waiters,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.remove(&self.correlation_id);
            return;
        }

        // Map is busy; finish the removal on the runtime
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pending = Arc::clone(&self.pending);
            let correlation_id = self.correlation_id;
            handle.spawn(async move {
                pending.lock().await.remove(&correlation_id);
            });
        }
    }
}

/// Front-end side of the pipeline; cheap to clone
#[derive(Clone)]
pub struct RequestCoordinator {
    store: ResultStore,
    queue: WorkQueue,
    event_bus: EventBus,
    /// Waiters by correlation id
    pending: Waiters,
    /// Most recent completion seen by the listener
    latest: Arc<RwLock<Option<ColorResult>>>,
}

impl RequestCoordinator {
    pub fn new(store: ResultStore, queue: WorkQueue, event_bus: EventBus) -> Self {
        Self {
            store,
            queue,
            event_bus,
            pending: Arc::new(Mutex::new(HashMap::new())),
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Store `bytes` and request their analysis
    ///
    /// The waiter is registered before `new-work` is published, so a reply
    /// that arrives before [`wait_for`](Self::wait_for) is called is kept.
    pub async fn submit(&self, bytes: &[u8]) -> Result<Submission> {
        let image_id = self.store.put_image(bytes).await?;
        let correlation_id = Uuid::new_v4();

        let (tx, receiver) = oneshot::channel();
        self.pending.lock().await.insert(correlation_id, tx);
        let registration = Registration {
            correlation_id,
            pending: Arc::clone(&self.pending),
        };

        let body = NewWork::new(correlation_id, &image_id).encode()?;
        self.queue.publish(NEW_WORK_QUEUE, &body).await?;

        info!(%image_id, %correlation_id, "Image submitted for analysis");
        self.event_bus.emit_lossy(CaeEvent::ImageSubmitted {
            correlation_id,
            image_id: image_id.clone(),
            timestamp: Utc::now(),
        });

        Ok(Submission {
            image_id,
            correlation_id,
            receiver,
            registration,
        })
    }

    /// Wait for the result of `submission`, at most `timeout`
    ///
    /// Fails with `ProcessingFailed` when the timeout elapses; the worker may
    /// still finish later, in which case only the latest slot is updated.
    /// The waiter is unregistered however this returns, or if it is dropped.
    pub async fn wait_for(&self, submission: Submission, timeout: Duration) -> Result<ColorResult> {
        let Submission {
            image_id,
            correlation_id,
            receiver,
            registration,
        } = submission;

        let outcome = tokio::time::timeout(timeout, receiver).await;
        drop(registration);

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => {
                // Sender dropped without a value
                Err(Error::ProcessingFailed(format!(
                    "analysis of image {} was abandoned",
                    image_id
                )))
            }
            Err(_) => {
                warn!(%image_id, %correlation_id, ?timeout, "Timed out waiting for analysis");
                self.event_bus.emit_lossy(CaeEvent::AnalysisTimedOut {
                    correlation_id,
                    image_id: image_id.clone(),
                    timestamp: Utc::now(),
                });
                Err(Error::ProcessingFailed(format!(
                    "no result for image {} within {}s",
                    image_id,
                    timeout.as_secs_f32()
                )))
            }
        }
    }

    /// [`submit`](Self::submit) then [`wait_for`](Self::wait_for)
    pub async fn submit_and_wait(&self, bytes: &[u8], timeout: Duration) -> Result<ColorResult> {
        let submission = self.submit(bytes).await?;
        self.wait_for(submission, timeout).await
    }

    /// Consume `work-done` until `shutdown` fires
    pub async fn run_completion_listener(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Completion listener waiting for messages on {}", WORK_DONE_QUEUE);
        self.queue
            .consume(WORK_DONE_QUEUE, AckMode::AfterHandler, shutdown, |delivery| {
                self.complete(delivery)
            })
            .await
    }

    /// Resolve one `work-done` notice
    async fn complete(&self, delivery: Delivery) -> Result<()> {
        let done = match WorkDone::decode(&delivery.payload) {
            Ok(done) => done,
            Err(e) => {
                warn!(seq = delivery.seq, error = %e, "Discarding malformed work-done message");
                return Ok(());
            }
        };

        let result = match self.store.get_result(&done.result_id).await {
            Ok(result) => result,
            Err(Error::NotFound(_)) => {
                warn!(result_id = %done.result_id, "work-done refers to unknown result");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        *self.latest.write().await = Some(result.clone());

        match done.correlation_id {
            Some(correlation_id) => {
                let waiter = self.pending.lock().await.remove(&correlation_id);
                match waiter {
                    Some(tx) => {
                        if tx.send(result.clone()).is_err() {
                            debug!(%correlation_id, "Waiter went away before the result arrived");
                        }
                    }
                    None => {
                        debug!(%correlation_id, "No waiter for result, latest slot updated only")
                    }
                }
            }
            None => debug!(result_id = %result.id, "Uncorrelated result, latest slot updated only"),
        }

        info!(result_id = %result.id, image_id = %result.image_id, hex = %result.hex, "Analysis result received");
        self.event_bus.emit_lossy(CaeEvent::AnalysisCompleted {
            correlation_id: done.correlation_id,
            result,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    /// Most recent completion, `None` until the first one
    pub async fn fetch_latest(&self) -> Option<ColorResult> {
        self.latest.read().await.clone()
    }

    /// Seed the latest slot from the store, for use after a restart
    pub async fn restore_latest(&self) -> Result<()> {
        if let Some(result) = self.store.latest_result().await? {
            debug!(result_id = %result.id, "Restored latest result");
            let mut latest = self.latest.write().await;
            if latest.is_none() {
                *latest = Some(result);
            }
        }
        Ok(())
    }

    /// Newest result for an image
    pub async fn fetch_for_image(&self, image_id: &str) -> Result<Option<ColorResult>> {
        self.store.find_result_for_image(image_id).await
    }

    pub async fn fetch_result(&self, result_id: &str) -> Result<ColorResult> {
        self.store.get_result(result_id).await
    }

    /// Requests still waiting for a result
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
