//! Asynchronous dispatch

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::mock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{errors::QueueError, request::NotificationRequest, transport::ProviderKind};

/// Queue topic jobs are published to unless configured otherwise
pub const DEFAULT_TOPIC: &str = "notifications_queue";

/// A notification waiting to be delivered by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id
    pub id: Uuid,

    /// Provider to deliver through
    pub provider: ProviderKind,

    /// The request as the caller submitted it
    pub request: NotificationRequest,

    /// When the job was handed to the queue
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job for `provider` and `request`
    pub fn new(provider: ProviderKind, request: NotificationRequest) -> Self {
        Self {
            id: Uuid::now_v7(),
            provider,
            request,
            enqueued_at: Utc::now(),
        }
    }

    /// Encodes the job for the queue
    pub fn to_json(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a job claimed from the queue
    pub fn from_json(payload: &str) -> Result<Self, QueueError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// External job queue
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Publish `payload` on `topic`
    async fn enqueue(&self, topic: &str, payload: String) -> Result<(), QueueError>;
}

#[cfg(test)]
mock! {
    pub JobQueue {}

    #[async_trait]
    impl JobQueue for JobQueue {
        async fn enqueue(&self, topic: &str, payload: String) -> Result<(), QueueError>;
    }
}

/// Turns requests into jobs and hands them to a [`JobQueue`]
#[derive(Clone)]
pub struct AsyncDispatcher {
    queue: Arc<dyn JobQueue>,
    topic: String,
}

impl AsyncDispatcher {
    /// Creates a dispatcher publishing to `topic`
    pub fn new(queue: Arc<dyn JobQueue>, topic: &str) -> Self {
        Self {
            queue,
            topic: topic.to_string(),
        }
    }

    /// The topic jobs are published to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Enqueues `request` for delivery through `provider`.
    ///
    /// Returns once the queue accepted the job; the delivery outcome is only
    /// visible to the worker that claims it.
    pub async fn enqueue(
        &self,
        provider: ProviderKind,
        request: &NotificationRequest,
    ) -> Result<Job, QueueError> {
        let job = Job::new(provider, request.clone());

        debug!(job_id = %job.id, provider = %provider, topic = %self.topic, "enqueueing notification");

        self.queue.enqueue(&self.topic, job.to_json()?).await?;

        info!(job_id = %job.id, provider = %provider, "notification queued");

        Ok(job)
    }
}

impl fmt::Debug for AsyncDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDispatcher")
            .field("queue", &"JobQueue")
            .field("topic", &self.topic)
            .finish()
    }
}
