//! Analysis worker
//!
//! Consumes `new-work`, loads the referenced image, extracts its dominant
//! color and persists the result. The `work-done` notice is published only
//! after the result is committed, so every published result id is readable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cae_common::queue::Delivery;
use cae_common::{
    AckMode, ColorAnalysis, ColorExtractor, Error, NewWork, Result, ResultStore, WorkDone,
    WorkQueue, NEW_WORK_QUEUE, WORK_DONE_QUEUE,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the worker is within one message cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    Idle,
    Fetching,
    Extracting,
    Persisting,
    Publishing,
}

/// Observable worker state, shared with the health endpoint
#[derive(Debug)]
pub struct WorkerStatus {
    phase: RwLock<WorkerPhase>,
    processed: AtomicU64,
    dropped: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            phase: RwLock::new(WorkerPhase::Idle),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }
}

impl WorkerStatus {
    pub async fn phase(&self) -> WorkerPhase {
        *self.phase.read().await
    }

    /// Messages that produced a `work-done` notice
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages discarded without a notice (unknown image, undecodable bytes, bad body)
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    async fn enter(&self, phase: WorkerPhase) {
        *self.phase.write().await = phase;
    }

    async fn record_error(&self, error: &Error) {
        *self.last_error.write().await = Some(error.to_string());
    }
}

/// Consumer of `new-work`
pub struct AnalysisWorker {
    store: ResultStore,
    queue: WorkQueue,
    extractor: ColorExtractor,
    status: Arc<WorkerStatus>,
}

impl AnalysisWorker {
    pub fn new(store: ResultStore, queue: WorkQueue) -> Self {
        Self {
            store,
            queue,
            extractor: ColorExtractor::default(),
            status: Arc::new(WorkerStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    /// Consume `new-work` until `shutdown` fires
    ///
    /// Messages are handled one at a time and acknowledged after handling, so a
    /// transient store or broker failure redelivers the message.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Analysis worker waiting for messages on {}", NEW_WORK_QUEUE);
        self.queue
            .consume(NEW_WORK_QUEUE, AckMode::AfterHandler, shutdown, |delivery| {
                self.handle(delivery)
            })
            .await
    }

    /// Handle one delivery
    ///
    /// Unknown images, undecodable bytes and malformed bodies are logged and
    /// dropped (`Ok`). Transient failures are returned so the queue retries.
    pub async fn handle(&self, delivery: Delivery) -> Result<()> {
        let work = match NewWork::decode(&delivery.payload) {
            Ok(work) => work,
            Err(e) => {
                warn!(seq = delivery.seq, error = %e, "Discarding malformed new-work message");
                self.drop_message(&e).await;
                return Ok(());
            }
        };

        debug!(
            image_id = %work.image_id,
            correlation_id = ?work.correlation_id,
            attempt = delivery.attempts,
            "Received new work"
        );

        let outcome = self.process(&work).await;
        self.status.enter(WorkerPhase::Idle).await;

        match outcome {
            Ok(done) => {
                self.status.processed.fetch_add(1, Ordering::Relaxed);
                info!(
                    image_id = %work.image_id,
                    result_id = %done.result_id,
                    "Analysis complete"
                );
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!(image_id = %work.image_id, error = %e, "Transient failure, message will be retried");
                self.status.record_error(&e).await;
                Err(e)
            }
            Err(e) => {
                match &e {
                    Error::NotFound(_) => {
                        warn!(image_id = %work.image_id, "Image not found, dropping message")
                    }
                    Error::Decode(reason) => {
                        warn!(image_id = %work.image_id, %reason, "Image could not be decoded, dropping message")
                    }
                    other => warn!(image_id = %work.image_id, error = %other, "Analysis failed, dropping message"),
                }
                self.drop_message(&e).await;
                Ok(())
            }
        }
    }

    /// Fetch, extract, persist, publish
    async fn process(&self, work: &NewWork) -> Result<WorkDone> {
        self.status.enter(WorkerPhase::Fetching).await;
        let image = self.store.get_image(&work.image_id).await?;

        self.status.enter(WorkerPhase::Extracting).await;
        let analysis = self.extract(image.bytes).await?;

        self.status.enter(WorkerPhase::Persisting).await;
        let result_id = self.store.put_result(&work.image_id, &analysis).await?;

        self.status.enter(WorkerPhase::Publishing).await;
        let done = WorkDone {
            correlation_id: work.correlation_id,
            image_id: Some(work.image_id.clone()),
            result_id,
        };
        self.queue.publish(WORK_DONE_QUEUE, &done.encode()?).await?;

        Ok(done)
    }

    /// Decoding and clustering are CPU-bound; keep them off the async workers
    async fn extract(&self, bytes: Vec<u8>) -> Result<ColorAnalysis> {
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || extractor.extract_from_bytes(&bytes))
            .await
            .map_err(|e| Error::Internal(format!("Extraction task failed: {}", e)))?
    }

    async fn drop_message(&self, error: &Error) {
        self.status.dropped.fetch_add(1, Ordering::Relaxed);
        self.status.record_error(error).await;
    }
}
