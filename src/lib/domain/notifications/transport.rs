//! Transport contract

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    errors::{ConfigurationError, NotificationError},
    request::NotificationRequest,
};

/// The closed set of delivery providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Direct delivery through an SMTP relay
    #[serde(rename = "email")]
    DirectEmail,

    /// Delivery through the Mandrill transactional email API
    #[serde(rename = "mandrill")]
    ProviderApiEmail,
}

impl ProviderKind {
    /// Every provider
    pub const ALL: [ProviderKind; 2] = [ProviderKind::DirectEmail, ProviderKind::ProviderApiEmail];

    /// The identifier used by callers and stored in jobs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectEmail => "email",
            Self::ProviderApiEmail => "mandrill",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ConfigurationError::UnknownProvider(s.to_string()))
    }
}

/// A provider specific delivery implementation.
///
/// Transports keep no per-request state: the request is passed to every
/// operation, so one value can serve concurrent sends.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug + 'static {
    /// The provider this transport delivers through
    fn provider(&self) -> ProviderKind;

    /// Delivers `request` now.
    ///
    /// # Arguments
    /// * `request` - The [`NotificationRequest`] to deliver.
    ///
    /// # Returns
    /// [`Ok`] once the provider accepted the message. Provider failures are
    /// reported as [`NotificationError::Delivery`] carrying only a correlation
    /// token; configuration, validation and template errors pass through.
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotificationError>;

    /// Queues `request` for delivery by a worker.
    ///
    /// Never talks to the provider and never reports the delivery outcome.
    /// A failure to enqueue is returned as [`NotificationError::Queue`].
    async fn send_async(&self, request: &NotificationRequest) -> Result<(), NotificationError>;
}
