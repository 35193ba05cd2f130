//! Integration tests for the analysis worker
//!
//! Store and broker live in temporary SQLite files, as in a deployment.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use cae_common::queue::QueueSettings;
use cae_common::{NewWork, ResultStore, WorkDone, WorkQueue, NEW_WORK_QUEUE, WORK_DONE_QUEUE};
use cae_ml::worker::{AnalysisWorker, WorkerPhase};
use cae_ml::{build_router, AppState};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt; // for `oneshot` method
use uuid::Uuid;

struct Harness {
    _dir: TempDir,
    store: ResultStore,
    queue: WorkQueue,
    worker: Arc<AnalysisWorker>,
}

async fn setup() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = ResultStore::open(&dir.path().join("cae.db")).await.unwrap();
    let settings = QueueSettings {
        poll_interval: Duration::from_millis(20),
        retry_delay: Duration::from_millis(20),
        ..QueueSettings::default()
    };
    let queue = WorkQueue::try_connect(&dir.path().join("broker.db"), settings)
        .await
        .unwrap();
    let worker = Arc::new(AnalysisWorker::new(store.clone(), queue.clone()));

    Harness {
        _dir: dir,
        store,
        queue,
        worker,
    }
}

fn png(rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(100, 100, Rgb(rgb));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn spawn_worker(worker: &Arc<AnalysisWorker>) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let worker = Arc::clone(worker);
        let shutdown = shutdown.clone();
        async move {
            worker.run(shutdown).await.unwrap();
        }
    });
    (shutdown, handle)
}

/// Poll until `condition` holds or five seconds pass
async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_red_image_produces_work_done() {
    let h = setup().await;
    let image_id = h.store.put_image(&png([255, 0, 0])).await.unwrap();
    let correlation_id = Uuid::new_v4();
    h.queue
        .publish(NEW_WORK_QUEUE, &NewWork::new(correlation_id, &image_id).encode().unwrap())
        .await
        .unwrap();

    let (shutdown, handle) = spawn_worker(&h.worker);
    let status = h.worker.status();
    wait_until(|| status.processed() == 1).await;
    shutdown.cancel();
    handle.await.unwrap();

    let delivery = h
        .queue
        .next_delivery(WORK_DONE_QUEUE, cae_common::AckMode::OnDelivery)
        .await
        .unwrap()
        .expect("work-done message");
    let done = WorkDone::decode(&delivery.payload).unwrap();
    assert_eq!(done.correlation_id, Some(correlation_id));
    assert_eq!(done.image_id.as_deref(), Some(image_id.as_str()));

    // Published only after the result was committed
    let result = h.store.get_result(&done.result_id).await.unwrap();
    assert_eq!(result.image_id, image_id);
    assert_eq!(result.rgb, [255, 0, 0]);
    assert_eq!(result.hex, "#ff0000");
    assert_eq!(result.name, "red");

    assert_eq!(h.queue.depth(NEW_WORK_QUEUE).await.unwrap(), 0);
    assert_eq!(status.phase().await, WorkerPhase::Idle);
}

#[tokio::test]
async fn test_legacy_bare_id_body() {
    let h = setup().await;
    let image_id = h.store.put_image(&png([0, 0, 255])).await.unwrap();
    h.queue.publish(NEW_WORK_QUEUE, &image_id).await.unwrap();

    let (shutdown, handle) = spawn_worker(&h.worker);
    let status = h.worker.status();
    wait_until(|| status.processed() == 1).await;
    shutdown.cancel();
    handle.await.unwrap();

    let result = h.store.find_result_for_image(&image_id).await.unwrap().unwrap();
    assert_eq!(result.name, "blue");
    assert_eq!(h.queue.depth(WORK_DONE_QUEUE).await.unwrap(), 1);
}

#[tokio::test]
async fn test_missing_image_publishes_nothing() {
    let h = setup().await;
    h.queue
        .publish(
            NEW_WORK_QUEUE,
            &NewWork::new(Uuid::new_v4(), "605a698c80b5eaf424b1bb78").encode().unwrap(),
        )
        .await
        .unwrap();

    let (shutdown, handle) = spawn_worker(&h.worker);
    let status = h.worker.status();
    wait_until(|| status.dropped() == 1).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(status.processed(), 0);
    assert_eq!(h.queue.depth(NEW_WORK_QUEUE).await.unwrap(), 0);
    assert_eq!(h.queue.depth(WORK_DONE_QUEUE).await.unwrap(), 0);
    assert_eq!(h.queue.dead_letter_count().await.unwrap(), 0);
    assert!(status.last_error().await.unwrap().contains("605a698c80b5eaf424b1bb78"));
}

#[tokio::test]
async fn test_messages_handled_in_order() {
    let h = setup().await;
    let first = h.store.put_image(&png([255, 255, 0])).await.unwrap();
    let second = h.store.put_image(&png([0, 128, 0])).await.unwrap();
    for image_id in [&first, &second] {
        h.queue
            .publish(NEW_WORK_QUEUE, &NewWork::new(Uuid::new_v4(), image_id).encode().unwrap())
            .await
            .unwrap();
    }

    let (shutdown, handle) = spawn_worker(&h.worker);
    let status = h.worker.status();
    wait_until(|| status.processed() == 2).await;
    shutdown.cancel();
    handle.await.unwrap();

    let mut order = Vec::new();
    while let Some(delivery) = h
        .queue
        .next_delivery(WORK_DONE_QUEUE, cae_common::AckMode::OnDelivery)
        .await
        .unwrap()
    {
        order.push(WorkDone::decode(&delivery.payload).unwrap().image_id.unwrap());
    }
    assert_eq!(order, vec![first, second]);
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = setup().await;
    let app = build_router(AppState::new(h.worker.status(), h.queue.clone()));

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "cae-ml");
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["processed"], 0);
    assert_eq!(body["pending"], 0);
    assert_eq!(body["dead_letters"], 0);
    assert!(body.get("last_error").is_none());
}
