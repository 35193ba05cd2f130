//! Work queue
//!
//! A durable broker kept in its own SQLite file. cae-web and cae-ml open the
//! same file; every statement is atomic, so a message is handed to exactly one
//! consumer per delivery.
//!
//! Two named queues carry the pipeline:
//! - `new-work`: web → worker, body is a [`NewWork`](crate::NewWork)
//! - `work-done`: worker → web, body is a [`WorkDone`](crate::WorkDone)
//!
//! Delivery is FIFO per queue. Publishing is fire-and-forget. Consumers choose
//! when a message is acknowledged, see [`AckMode`].

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::db;
use crate::retry::retry_forever;
use crate::{Error, Result};

/// Front end → worker
pub const NEW_WORK_QUEUE: &str = "new-work";
/// Worker → front end
pub const WORK_DONE_QUEUE: &str = "work-done";

/// When a delivered message is removed from its queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Removed as soon as it is handed to the consumer. A handler failure or a
    /// crash mid-handler loses the message.
    OnDelivery,
    /// Leased while the handler runs and removed only when it returns `Ok`.
    /// Transient errors put the message back; after `max_attempts` deliveries
    /// it is moved to `dead_letters`. Permanent errors are logged and dropped.
    AfterHandler,
}

/// One message handed to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: i64,
    pub queue: String,
    pub payload: String,
    /// Number of times this message has been delivered, including this one
    pub attempts: u32,
}

/// Broker tuning
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Fixed delay between connection attempts
    pub retry_delay: Duration,
    /// How often an idle consumer re-checks for messages published by other processes
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// How long an `AfterHandler` delivery stays invisible to other consumers
    pub lease: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_millis(200),
            max_attempts: 3,
            lease: Duration::from_secs(60),
        }
    }
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_attempts,
            lease: Duration::from_secs(config.lease_secs),
        }
    }
}

/// Handle to the broker; clones share the connection pool and wakeups
#[derive(Clone)]
pub struct WorkQueue {
    pool: SqlitePool,
    settings: QueueSettings,
    wakeups: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl WorkQueue {
    /// Connect to the broker, retrying with a fixed delay until it is reachable.
    ///
    /// Both pipeline queues are declared once connected.
    pub async fn connect(db_path: &Path, settings: QueueSettings) -> Self {
        let delay = settings.retry_delay;
        retry_forever("broker connect", delay, || {
            Self::try_connect(db_path, settings.clone())
        })
        .await
    }

    /// Single connection attempt
    pub async fn try_connect(db_path: &Path, settings: QueueSettings) -> Result<Self> {
        let pool = db::open_pool(db_path).await.map_err(|e| match e {
            Error::Database(err) => Error::BrokerUnavailable(err.to_string()),
            Error::Io(err) => Error::BrokerUnavailable(err.to_string()),
            other => other,
        })?;
        let queue = Self::from_pool(pool, settings).await?;
        info!("Connected to broker at {}", db_path.display());
        Ok(queue)
    }

    /// Wrap an existing pool; creates broker tables and declares both pipeline queues
    pub async fn from_pool(pool: SqlitePool, settings: QueueSettings) -> Result<Self> {
        db::init_broker_schema(&pool)
            .await
            .map_err(|e| match e {
                Error::Database(err) => Error::from_broker(err),
                other => other,
            })?;

        let queue = Self {
            pool,
            settings,
            wakeups: Arc::new(Mutex::new(HashMap::new())),
        };
        queue.declare(NEW_WORK_QUEUE).await?;
        queue.declare(WORK_DONE_QUEUE).await?;
        Ok(queue)
    }

    /// Declare a queue; declaring an existing queue is a no-op
    pub async fn declare(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO queues (name, declared_at) VALUES (?, ?)")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(Error::from_broker)?;
        Ok(())
    }

    pub async fn declared_queues(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT name FROM queues ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::from_broker)?;
        Ok(names)
    }

    /// Append a message to `queue`.
    ///
    /// There is no delivery confirmation. A message published to an undeclared
    /// queue is dropped with a warning.
    pub async fn publish(&self, queue: &str, payload: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO queue_messages (queue, payload, attempts, visible_at_ms, enqueued_at)
            SELECT ?, ?, 0, ?, ?
            WHERE EXISTS (SELECT 1 FROM queues WHERE name = ?)
            "#,
        )
        .bind(queue)
        .bind(payload)
        .bind(now_ms())
        .bind(Utc::now().to_rfc3339())
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(Error::from_broker)?;

        if result.rows_affected() == 0 {
            warn!(queue, "Publish to undeclared queue, message dropped");
            return Ok(());
        }

        debug!(queue, "Message published");
        self.wakeup(queue).notify_one();
        Ok(())
    }

    /// Pending (not yet acknowledged) messages in `queue`
    pub async fn depth(&self, queue: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::from_broker)?;
        Ok(count)
    }

    pub async fn dead_letter_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::from_broker)?;
        Ok(count)
    }

    /// Claim the oldest visible message of `queue`, if any
    pub async fn next_delivery(&self, queue: &str, mode: AckMode) -> Result<Option<Delivery>> {
        let now = now_ms();
        let row = match mode {
            AckMode::OnDelivery => {
                sqlx::query(
                    r#"
                    DELETE FROM queue_messages
                    WHERE seq = (
                        SELECT seq FROM queue_messages
                        WHERE queue = ? AND visible_at_ms <= ?
                        ORDER BY seq LIMIT 1
                    )
                    RETURNING seq, payload, attempts + 1 AS attempts
                    "#,
                )
                .bind(queue)
                .bind(now)
                .fetch_optional(&self.pool)
                .await
            }
            AckMode::AfterHandler => {
                let lease_until = now + self.settings.lease.as_millis() as i64;
                sqlx::query(
                    r#"
                    UPDATE queue_messages
                    SET attempts = attempts + 1, visible_at_ms = ?
                    WHERE seq = (
                        SELECT seq FROM queue_messages
                        WHERE queue = ? AND visible_at_ms <= ?
                        ORDER BY seq LIMIT 1
                    )
                    RETURNING seq, payload, attempts
                    "#,
                )
                .bind(lease_until)
                .bind(queue)
                .bind(now)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(Error::from_broker)?;

        Ok(row.map(|row| Delivery {
            seq: row.get("seq"),
            queue: queue.to_string(),
            payload: row.get("payload"),
            attempts: row.get::<i64, _>("attempts") as u32,
        }))
    }

    /// Consume `queue` until `shutdown` fires, calling `handler` once per
    /// delivered message in FIFO order.
    ///
    /// Broker outages are waited out with the fixed retry delay, both when
    /// claiming and when settling a message; only non-transient broker errors
    /// end the loop early.
    pub async fn consume<F, Fut>(
        &self,
        queue: &str,
        mode: AckMode,
        shutdown: CancellationToken,
        mut handler: F,
    ) -> Result<()>
    where
        F: FnMut(Delivery) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        info!(queue, ?mode, "Consumer started");
        let wakeup = self.wakeup(queue);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let delivery = match self.next_delivery(queue, mode).await {
                Ok(delivery) => delivery,
                Err(e) if e.is_transient() => {
                    warn!(queue, error = %e, "Broker unavailable, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry_delay) => {}
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(delivery) = delivery else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = wakeup.notified() => {}
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
                continue;
            };

            // An unsettled lease expires on its own and the message comes back
            if let Err(e) = self.dispatch(delivery, mode, &mut handler).await {
                if !e.is_transient() {
                    return Err(e);
                }
                warn!(queue, error = %e, "Could not settle message, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.retry_delay) => {}
                }
            }
        }

        info!(queue, "Consumer stopped");
        Ok(())
    }

    async fn dispatch<F, Fut>(&self, delivery: Delivery, mode: AckMode, handler: &mut F) -> Result<()>
    where
        F: FnMut(Delivery) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let seq = delivery.seq;
        let attempts = delivery.attempts;
        let queue = delivery.queue.clone();

        // A redelivery after a crash can already be past the limit
        if mode == AckMode::AfterHandler && attempts > self.settings.max_attempts {
            return self
                .dead_letter(seq, "delivery attempts exhausted")
                .await;
        }

        debug!(queue = %queue, seq, attempts, "Delivering message");
        let outcome = handler(delivery).await;

        match (mode, outcome) {
            (AckMode::OnDelivery, Ok(())) => Ok(()),
            (AckMode::OnDelivery, Err(e)) => {
                error!(queue = %queue, seq, error = %e, "Handler failed, message lost");
                Ok(())
            }
            (AckMode::AfterHandler, Ok(())) => self.ack(seq).await,
            (AckMode::AfterHandler, Err(e)) if e.is_transient() => {
                if attempts >= self.settings.max_attempts {
                    error!(queue = %queue, seq, attempts, error = %e, "Handler failed, dead-lettering");
                    self.dead_letter(seq, &e.to_string()).await
                } else {
                    warn!(queue = %queue, seq, attempts, error = %e, "Handler failed, requeueing");
                    self.requeue(seq).await
                }
            }
            (AckMode::AfterHandler, Err(e)) => {
                error!(queue = %queue, seq, error = %e, "Handler failed permanently, dropping message");
                self.ack(seq).await
            }
        }
    }

    async fn ack(&self, seq: i64) -> Result<()> {
        sqlx::query("DELETE FROM queue_messages WHERE seq = ?")
            .bind(seq)
            .execute(&self.pool)
            .await
            .map_err(Error::from_broker)?;
        Ok(())
    }

    async fn requeue(&self, seq: i64) -> Result<()> {
        sqlx::query("UPDATE queue_messages SET visible_at_ms = ? WHERE seq = ?")
            .bind(now_ms())
            .bind(seq)
            .execute(&self.pool)
            .await
            .map_err(Error::from_broker)?;
        Ok(())
    }

    async fn dead_letter(&self, seq: i64, reason: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::from_broker)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO dead_letters (seq, queue, payload, attempts, last_error, dead_at)
            SELECT seq, queue, payload, attempts, ?, ? FROM queue_messages WHERE seq = ?
            "#,
        )
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(seq)
        .execute(&mut *tx)
        .await
        .map_err(Error::from_broker)?;

        sqlx::query("DELETE FROM queue_messages WHERE seq = ?")
            .bind(seq)
            .execute(&mut *tx)
            .await
            .map_err(Error::from_broker)?;

        tx.commit().await.map_err(Error::from_broker)?;
        Ok(())
    }

    fn wakeup(&self, queue: &str) -> Arc<Notify> {
        let mut wakeups = self
            .wakeups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        wakeups
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
