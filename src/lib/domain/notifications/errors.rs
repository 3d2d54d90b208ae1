//! Notification errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors resolving providers or their profiles
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No transport is registered under that name
    #[error("unknown notification provider \"{0}\"")]
    UnknownProvider(String),

    /// The provider has no profile with that name
    #[error("no {provider} profile named \"{profile}\"")]
    MissingProfile {
        /// Provider the profile was looked up for
        provider: &'static str,

        /// Requested profile name
        profile: String,
    },

    /// The profile could not be loaded or is incomplete
    #[error("invalid provider profile: {0}")]
    InvalidProfile(String),
}

/// Errors caused by a structurally invalid request
#[derive(Debug, Error)]
pub enum ValidationError {
    /// An address could not be parsed
    #[error("invalid {field} address \"{address}\"")]
    InvalidAddress {
        /// Which field held the address
        field: &'static str,

        /// The rejected value
        address: String,
    },

    /// Neither an html nor a text body could be resolved
    #[error("notification has no html or text body")]
    MissingBody,

    /// A file attachment could not be read
    #[error("could not read attachment {}", path.display())]
    UnreadableAttachment {
        /// Path of the attachment
        path: PathBuf,
    },

    /// The attachment's MIME type is not valid
    #[error("invalid attachment type \"{0}\"")]
    InvalidAttachmentType(String),

    /// The provider message could not be assembled
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// A delivery failure as seen by the caller.
///
/// Only the correlation token crosses this boundary; the failure detail is
/// logged against the same token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to send notification, token {token}")]
pub struct DeliveryError {
    token: String,
}

impl DeliveryError {
    /// Creates a delivery error for `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The correlation token
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Errors handing a job to the queue
#[derive(Debug, Error)]
pub enum QueueError {
    /// The job could not be encoded
    #[error("could not serialize job: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The queue rejected the job or could not be reached
    #[error("queue unavailable: {0}")]
    Unavailable(anyhow::Error),
}

/// Any error surfaced by a transport operation
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Configuration error
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Validation error
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Delivery error
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The template renderer failed
    #[error(transparent)]
    Template(anyhow::Error),
}
