//! Mandrill API transport implementation

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
#[cfg(test)]
use mockall::mock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::domain::notifications::{
    build_payload, correlate, AsyncDispatcher, ConfigStore, EmailPayload, MandrillProfile,
    NotificationError, NotificationRequest, PayloadRules, ProviderDefaults, ProviderFailure,
    ProviderKind, TemplateRenderer, Transport,
};

/// Failure calling the Mandrill API
#[derive(Debug, Error)]
pub enum MandrillError {
    /// The request did not complete
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an error document
    #[error("Mandrill API error {name}: {message}")]
    Api {
        /// HTTP status
        status: u16,

        /// Mandrill error code
        code: Option<i64>,

        /// Mandrill error name, e.g. `Invalid_Key`
        name: String,

        /// Error message
        message: String,
    },

    /// The API accepted the call but no recipient was accepted
    #[error("Mandrill rejected every recipient")]
    Rejected {
        /// Per-recipient results
        statuses: Vec<MandrillSendStatus>,
    },
}

impl ProviderFailure for MandrillError {
    fn code(&self) -> Option<String> {
        match self {
            MandrillError::Http(err) => err.status().map(|status| status.as_u16().to_string()),
            MandrillError::Api {
                status, code, name, ..
            } => Some(match code {
                Some(code) => format!("{status} {name} ({code})"),
                None => format!("{status} {name}"),
            }),
            MandrillError::Rejected { statuses } => statuses
                .iter()
                .find_map(|status| status.reject_reason.clone())
                .or_else(|| statuses.first().map(|status| status.status.clone())),
        }
    }

    fn origin(&self) -> &'static str {
        "mandrill-api"
    }
}

/// Body of a `messages/send` call
#[derive(Clone, Serialize)]
pub struct MandrillRequest {
    key: String,
    message: Map<String, Value>,
}

impl MandrillRequest {
    /// The message document
    pub fn message(&self) -> &Map<String, Value> {
        &self.message
    }

    /// The request as logged, with the API key removed
    pub fn redacted(&self) -> String {
        let redacted = json!({ "key": "[redacted]", "message": self.message });

        serde_json::to_string_pretty(&redacted).unwrap_or_default()
    }
}

impl fmt::Debug for MandrillRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MandrillRequest")
            .field("key", &"[redacted]")
            .field("message", &self.message)
            .finish()
    }
}

/// Per-recipient result of a `messages/send` call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MandrillSendStatus {
    /// Recipient address
    pub email: String,

    /// `sent`, `queued`, `scheduled`, `rejected` or `invalid`
    pub status: String,

    /// Why the recipient was rejected
    #[serde(default)]
    pub reject_reason: Option<String>,

    /// Mandrill message id
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
}

impl MandrillSendStatus {
    /// Whether Mandrill took the message for this recipient
    pub fn is_accepted(&self) -> bool {
        matches!(self.status.as_str(), "sent" | "queued" | "scheduled")
    }
}

#[derive(Debug, Deserialize)]
struct MandrillErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

/// Builds the `messages/send` request for `payload`.
///
/// Starts from the profile's `default_message` and overlays the payload.
/// Recipients are emitted as plain `to` entries in payload order.
pub fn build_request(payload: &EmailPayload, profile: &MandrillProfile) -> MandrillRequest {
    let mut message = profile.default_message.clone();

    if let Some(from) = &payload.from {
        message.insert("from_email".to_string(), json!(from.email));
        message.insert("from_name".to_string(), json!(from.name));
    }

    if let Some(reply_to) = payload.reply_to.last() {
        let value = if reply_to.email.is_empty() {
            &reply_to.name
        } else {
            &reply_to.email
        };

        let headers = message
            .entry("headers")
            .or_insert_with(|| Value::Object(Map::new()));

        if let Value::Object(headers) = headers {
            headers.insert("Reply-To".to_string(), json!(value));
        }
    }

    let mut to = match message.remove("to") {
        Some(Value::Array(existing)) => existing,
        _ => Vec::new(),
    };

    to.extend(
        payload
            .to
            .iter()
            .map(|contact| json!({ "email": contact.email, "name": contact.name })),
    );

    message.insert("to".to_string(), Value::Array(to));
    message.insert("subject".to_string(), json!(payload.subject));

    if let Some(html) = &payload.html {
        message.insert("html".to_string(), json!(html));
    }

    if let Some(text) = &payload.text {
        message.insert("text".to_string(), json!(text));
    }

    if let Some(metadata) = &payload.metadata {
        message.insert("metadata".to_string(), Value::Object(metadata.clone()));
    }

    if !payload.attachments.is_empty() {
        let attachments = payload
            .attachments
            .iter()
            .map(|attachment| {
                json!({
                    "type": attachment.mime_type,
                    "name": attachment.filename,
                    "content": STANDARD.encode(&attachment.content),
                })
            })
            .collect();

        message.insert("attachments".to_string(), Value::Array(attachments));
    }

    MandrillRequest {
        key: profile.api_key.clone(),
        message,
    }
}

/// The Mandrill `messages/send` call
#[async_trait]
pub trait MandrillApi: Send + Sync + 'static {
    /// Send `request` to the API described by `profile`
    async fn send_message(
        &self,
        profile: &MandrillProfile,
        request: &MandrillRequest,
    ) -> Result<Vec<MandrillSendStatus>, MandrillError>;
}

#[cfg(test)]
mock! {
    pub MandrillApi {}

    #[async_trait]
    impl MandrillApi for MandrillApi {
        async fn send_message(
            &self,
            profile: &MandrillProfile,
            request: &MandrillRequest,
        ) -> Result<Vec<MandrillSendStatus>, MandrillError>;
    }
}

/// [`MandrillApi`] over HTTPS
#[derive(Debug, Clone, Default)]
pub struct MandrillClient {
    client: Client,
}

impl MandrillClient {
    /// Create a client with its own connection pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client sharing an existing `reqwest` pool
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MandrillApi for MandrillClient {
    async fn send_message(
        &self,
        profile: &MandrillProfile,
        request: &MandrillRequest,
    ) -> Result<Vec<MandrillSendStatus>, MandrillError> {
        let url = format!("{}/messages/send.json", profile.api_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(profile.timeout_secs))
            .json(request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            let error = serde_json::from_str::<MandrillErrorBody>(&body).unwrap_or(MandrillErrorBody {
                code: None,
                name: status.canonical_reason().unwrap_or("Unknown").to_string(),
                message: body,
            });

            return Err(MandrillError::Api {
                status: status.as_u16(),
                code: error.code,
                name: error.name,
                message: error.message,
            });
        }

        Ok(response.json().await?)
    }
}

/// Delivers notifications through the Mandrill API
#[derive(Clone)]
pub struct ProviderApiTransport {
    config: Arc<dyn ConfigStore>,
    renderer: Arc<dyn TemplateRenderer>,
    api: Arc<dyn MandrillApi>,
    dispatcher: AsyncDispatcher,
}

impl ProviderApiTransport {
    /// Create a new Mandrill transport
    pub fn new(
        config: Arc<dyn ConfigStore>,
        renderer: Arc<dyn TemplateRenderer>,
        api: Arc<dyn MandrillApi>,
        dispatcher: AsyncDispatcher,
    ) -> Self {
        Self {
            config,
            renderer,
            api,
            dispatcher,
        }
    }
}

impl fmt::Debug for ProviderApiTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderApiTransport")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ProviderApiTransport {
    fn provider(&self) -> ProviderKind {
        ProviderKind::ProviderApiEmail
    }

    #[instrument(skip_all, fields(provider = "mandrill", profile = %request.options.config_name))]
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        let profile = self.config.mandrill_profile(&request.options.config_name)?;

        let defaults = ProviderDefaults {
            from: profile.default_from(),
            return_path: None,
        };

        let payload = build_payload(
            request,
            PayloadRules::for_provider(self.provider()),
            &defaults,
            self.renderer.as_ref(),
        )?;

        let api_request = build_request(&payload, &profile);

        debug!(recipients = payload.to.len(), "sending email via Mandrill");

        let statuses = match self.api.send_message(&profile, &api_request).await {
            Ok(statuses) => statuses,
            Err(failure) => {
                return Err(correlate(self.provider(), &failure, &api_request.redacted()).into())
            }
        };

        if !statuses.iter().any(MandrillSendStatus::is_accepted) {
            let failure = MandrillError::Rejected { statuses };

            return Err(correlate(self.provider(), &failure, &api_request.redacted()).into());
        }

        for status in statuses.iter().filter(|s| !s.is_accepted()) {
            warn!(
                email = %status.email,
                status = %status.status,
                reject_reason = status.reject_reason.as_deref().unwrap_or("none"),
                "Mandrill did not accept recipient"
            );
        }

        info!(subject = %payload.subject, results = ?statuses, "email sent via Mandrill");

        Ok(())
    }

    async fn send_async(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        self.dispatcher.enqueue(self.provider(), request).await?;

        Ok(())
    }
}
