//! Notification request

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Email address mapped to a display name
pub type Contacts = BTreeMap<String, String>;

/// A notification to be delivered by a transport.
///
/// Field names follow the wire schema used by producers and by queued jobs,
/// e.g. `body-content.html`, `recipients.to` or `provider.config-name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// The subject line
    #[serde(default)]
    pub subject: String,

    /// Literal, already rendered bodies
    #[serde(rename = "body-content", default)]
    pub body_content: BodyFormats,

    /// Template references per body format
    #[serde(rename = "body", default)]
    pub body_templates: BodyFormats,

    /// Context handed to the template renderer
    #[serde(default)]
    pub body_args: Map<String, Value>,

    /// Sender; falls back to the provider profile when empty
    #[serde(default)]
    pub from: Contacts,

    /// Recipients
    #[serde(default)]
    pub recipients: Recipients,

    /// Provider specific options
    #[serde(rename = "provider", alias = "email", default)]
    pub options: ProviderOptions,

    /// Free-form metadata forwarded to providers that support it
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// One optional value per body format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyFormats {
    /// HTML variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    /// Plain text variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Body format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// `text/html`
    Html,

    /// `text/plain`
    Text,
}

impl BodyFormat {
    /// Formats in the order they are resolved
    pub const ALL: [BodyFormat; 2] = [BodyFormat::Html, BodyFormat::Text];
}

impl BodyFormats {
    /// Returns the non-empty value for `format`, if any.
    pub fn get(&self, format: BodyFormat) -> Option<&str> {
        let value = match format {
            BodyFormat::Html => self.html.as_deref(),
            BodyFormat::Text => self.text.as_deref(),
        };

        value.filter(|v| !v.is_empty())
    }
}

/// Recipient sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    /// Primary recipients
    #[serde(default)]
    pub to: Contacts,

    /// Carbon copy recipients
    #[serde(default)]
    pub cc: Contacts,

    /// Blind carbon copy recipients
    #[serde(default)]
    pub bcc: Contacts,
}

/// Options interpreted by the selected provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Name of the provider profile to use
    #[serde(rename = "config-name", alias = "smtp", default = "default_profile")]
    pub config_name: String,

    /// Reply-to addresses
    #[serde(rename = "reply-to", default)]
    pub reply_to: Contacts,

    /// Overrides the profile's return path
    #[serde(rename = "return-path", default, skip_serializing_if = "Option::is_none")]
    pub return_path: Option<String>,

    /// Signature made available to templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Attachments
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            config_name: default_profile(),
            reply_to: Contacts::new(),
            return_path: None,
            signature: None,
            attachments: Vec::new(),
        }
    }
}

fn default_profile() -> String {
    "default".to_string()
}

/// A file attached to a notification.
///
/// Literal `content` takes precedence over `content_base64`, which takes
/// precedence over `src_filename`. An attachment with none of them is skipped
/// when the payload is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Path read when the payload is built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_filename: Option<PathBuf>,

    /// Inline content, used verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Inline binary content, base64 encoded on the wire
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_content"
    )]
    pub content_base64: Option<Vec<u8>>,

    /// MIME type
    #[serde(rename = "type", default)]
    pub mime_type: String,

    /// Name the recipient sees
    #[serde(alias = "dst_filename", default)]
    pub filename: String,
}

impl Attachment {
    /// Creates an attachment with inline text content
    pub fn inline(content: impl Into<String>, mime_type: &str, filename: &str) -> Self {
        Self {
            content: Some(content.into()),
            mime_type: mime_type.to_string(),
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    /// Creates an attachment with inline binary content
    pub fn binary(content: impl Into<Vec<u8>>, mime_type: &str, filename: &str) -> Self {
        Self {
            content_base64: Some(content.into()),
            mime_type: mime_type.to_string(),
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    /// Creates an attachment read from `path` when the payload is built
    pub fn from_file(path: impl Into<PathBuf>, mime_type: &str, filename: &str) -> Self {
        Self {
            src_filename: Some(path.into()),
            mime_type: mime_type.to_string(),
            filename: filename.to_string(),
            ..Default::default()
        }
    }
}

mod base64_content {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;

        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
