//! Durable dispatch through Redis.
//!
//! Messages live in a sorted set scored by the time they become ready
//! (epoch milliseconds). Consumers claim a message by removing it with
//! `ZREM`; only the consumer whose `ZREM` succeeds performs it. Delivery is
//! at least once: a consumer that dies after claiming loses nothing that the
//! execution row does not already record, and the engine tolerates the same
//! execution id arriving twice.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::models::JobDefinition;

type RedisPool = Pool<Client>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub execution_id: Uuid,
    pub job_definition_id: Uuid,
    pub job_name: String,
    /// Lower runs first among messages ready at the same poll
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    pub delay: Duration,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Ready now
    pub waiting: u64,
    /// Ready in the future (backoff retries)
    pub delayed: u64,
    pub total: u64,
    pub enqueued: u64,
    pub processed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An at-least-once broker the engine may hand executions to
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Fails with `QueueUnavailable` when the broker cannot accept the message
    async fn enqueue(
        &self,
        job: &JobDefinition,
        execution_id: Uuid,
        options: EnqueueOptions,
    ) -> JobResult<()>;

    /// Claims up to `limit` messages ready at `now`, ordered by priority
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> JobResult<Vec<QueueMessage>>;

    /// Puts a claimed message back, ready after `delay`
    async fn requeue(&self, message: &QueueMessage, delay: Duration) -> JobResult<()>;

    async fn stats(&self) -> JobResult<QueueStats>;

    async fn health(&self) -> QueueHealth;
}

pub struct RedisQueue {
    pool: RedisPool,
    key_prefix: String,
}

fn unavailable(e: impl ToString) -> JobError {
    JobError::QueueUnavailable(e.to_string())
}

fn ready_score(now: DateTime<Utc>, delay: Duration) -> i64 {
    now.timestamp_millis() + delay.as_millis() as i64
}

/// Stable order for a claimed batch: priority, then age
pub(crate) fn order_batch(messages: &mut [QueueMessage]) {
    messages.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.enqueued_at.cmp(&b.enqueued_at))
    });
}

impl RedisQueue {
    pub async fn connect(config: &QueueConfig) -> JobResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(unavailable)?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_secs(config.connection_timeout))
            .build(client)
            .await
            .map_err(unavailable)?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}:queue:{}", self.key_prefix, name)
    }

    async fn get_conn(&self) -> JobResult<PooledConnection<'_, Client>> {
        self.pool.get().await.map_err(unavailable)
    }

    async fn push(&self, message: &QueueMessage, delay: Duration) -> JobResult<()> {
        let payload = serde_json::to_string(message).map_err(unavailable)?;
        let score = ready_score(Utc::now(), delay);

        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        conn_ref
            .zadd::<_, _, _, ()>(self.key("jobs"), payload, score)
            .await
            .map_err(|e: RedisError| unavailable(e))
    }
}

#[async_trait]
impl QueueAdapter for RedisQueue {
    async fn enqueue(
        &self,
        job: &JobDefinition,
        execution_id: Uuid,
        options: EnqueueOptions,
    ) -> JobResult<()> {
        let message = QueueMessage {
            execution_id,
            job_definition_id: job.id,
            job_name: job.name.clone(),
            priority: options.priority,
            enqueued_at: Utc::now(),
        };
        self.push(&message, options.delay).await?;

        let mut conn = self.get_conn().await?;
        let conn_ref: &mut MultiplexedConnection = &mut conn;
        conn_ref
            .incr::<_, _, ()>(self.key("enqueued"), 1)
            .await
            .map_err(|e: RedisError| unavailable(e))
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> JobResult<Vec<QueueMessage>> {
        let mut conn = self.get_conn().await?;
        let key = self.key("jobs");

        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let candidates: Vec<String> = conn_ref
            .zrangebyscore_limit(&key, "-inf", now.timestamp_millis(), 0, limit as isize)
            .await
            .map_err(|e: RedisError| unavailable(e))?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for payload in candidates {
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            let removed: i64 = conn_ref
                .zrem(&key, &payload)
                .await
                .map_err(|e: RedisError| unavailable(e))?;
            if removed == 0 {
                // Another consumer won it
                continue;
            }

            match serde_json::from_str::<QueueMessage>(&payload) {
                Ok(message) => claimed.push(message),
                Err(e) => tracing::warn!(error = %e, payload = %payload, "Dropping malformed queue message"),
            }
        }

        if !claimed.is_empty() {
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            conn_ref
                .incr::<_, _, ()>(self.key("processed"), claimed.len() as u64)
                .await
                .map_err(|e: RedisError| unavailable(e))?;
        }

        order_batch(&mut claimed);
        Ok(claimed)
    }

    async fn requeue(&self, message: &QueueMessage, delay: Duration) -> JobResult<()> {
        self.push(message, delay).await
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        let mut conn = self.get_conn().await?;
        let key = self.key("jobs");
        let now = Utc::now().timestamp_millis();

        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let waiting: u64 = conn_ref
            .zcount(&key, "-inf", now)
            .await
            .map_err(|e: RedisError| unavailable(e))?;
        let total: u64 = conn_ref
            .zcard(&key)
            .await
            .map_err(|e: RedisError| unavailable(e))?;
        let enqueued: Option<u64> = conn_ref
            .get(self.key("enqueued"))
            .await
            .map_err(|e: RedisError| unavailable(e))?;
        let processed: Option<u64> = conn_ref
            .get(self.key("processed"))
            .await
            .map_err(|e: RedisError| unavailable(e))?;

        Ok(QueueStats {
            waiting,
            delayed: total.saturating_sub(waiting),
            total,
            enqueued: enqueued.unwrap_or(0),
            processed: processed.unwrap_or(0),
        })
    }

    async fn health(&self) -> QueueHealth {
        let start = Instant::now();
        let result = async {
            let mut conn = self.get_conn().await?;
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            redis::cmd("PING")
                .query_async::<String>(conn_ref)
                .await
                .map_err(unavailable)
        }
        .await;

        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(_) => QueueHealth {
                healthy: true,
                latency_ms,
                error: None,
            },
            Err(e) => QueueHealth {
                healthy: false,
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }
}
