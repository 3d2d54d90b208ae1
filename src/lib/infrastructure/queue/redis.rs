//! Redis-backed job queue
//!
//! Each topic is a Redis list. Producers push on the left and workers pop
//! from the right, so jobs are claimed in the order they were queued.

use std::fmt;

use anyhow::anyhow;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::debug;

use crate::domain::notifications::{JobQueue, QueueError};

/// [`JobQueue`] storing jobs in Redis lists
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
}

impl RedisJobQueue {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = Client::open(url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;

        Ok(Self { conn })
    }

    /// Waits up to `timeout_secs` for a job on `topic` and removes it from the queue.
    ///
    /// # Returns
    /// The raw job payload, or [`None`] when the wait timed out.
    pub async fn claim(&self, topic: &str, timeout_secs: f64) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();

        let claimed: Option<(String, String)> =
            conn.brpop(topic, timeout_secs).await.map_err(unavailable)?;

        Ok(claimed.map(|(_, payload)| payload))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, topic: &str, payload: String) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        let depth: usize = conn.lpush(topic, payload).await.map_err(unavailable)?;

        debug!(topic, depth, "job pushed to redis");

        Ok(())
    }
}

impl fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("conn", &"ConnectionManager")
            .finish()
    }
}

fn unavailable(err: redis::RedisError) -> QueueError {
    QueueError::Unavailable(anyhow!(err))
}
