//! Provider profiles

use std::fmt;

#[cfg(test)]
use mockall::mock;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{errors::ConfigurationError, request::Contacts};

/// Default Mandrill API endpoint
pub const MANDRILL_API_URL: &str = "https://mandrillapp.com/api/1.0";

/// Connection details and defaults for an SMTP relay
#[derive(Clone, Deserialize)]
pub struct SmtpProfile {
    /// The SMTP host
    pub host: String,

    /// The SMTP port, 587 when absent
    #[serde(default)]
    pub port: Option<u16>,

    /// The SMTP username
    #[serde(default)]
    pub username: Option<String>,

    /// The SMTP password
    #[serde(default)]
    pub password: Option<String>,

    /// Default sender
    #[serde(default)]
    pub from: Contacts,

    /// Default return path
    #[serde(rename = "return-path", default)]
    pub return_path: Option<String>,

    /// Verify the TLS certificate
    #[serde(default = "enabled")]
    pub verify_tls: bool,

    /// Require STARTTLS; when disabled the upgrade is only attempted if offered
    #[serde(default = "enabled")]
    pub starttls: bool,
}

impl SmtpProfile {
    /// Creates a profile for `host` with default settings
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: None,
            username: None,
            password: None,
            from: Contacts::new(),
            return_path: None,
            verify_tls: true,
            starttls: true,
        }
    }
}

impl fmt::Debug for SmtpProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("from", &self.from)
            .field("return_path", &self.return_path)
            .field("verify_tls", &self.verify_tls)
            .field("starttls", &self.starttls)
            .finish()
    }
}

/// Credentials and message defaults for the Mandrill API
#[derive(Clone, Deserialize)]
pub struct MandrillProfile {
    /// The API key
    pub api_key: String,

    /// Base URL of the API
    #[serde(default = "mandrill_api_url")]
    pub api_url: String,

    /// HTTP timeout in seconds
    #[serde(default = "mandrill_timeout")]
    pub timeout_secs: u64,

    /// Message fields every request starts from, e.g. `from_email`,
    /// `from_name` or tracking flags
    #[serde(default)]
    pub default_message: Map<String, Value>,
}

impl MandrillProfile {
    /// Creates a profile with the given API key and no message defaults
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_url: mandrill_api_url(),
            timeout_secs: mandrill_timeout(),
            default_message: Map::new(),
        }
    }

    /// The default sender taken from `default_message`
    pub fn default_from(&self) -> Contacts {
        let email = self.default_message.get("from_email").and_then(Value::as_str);
        let name = self.default_message.get("from_name").and_then(Value::as_str);

        email
            .map(|email| Contacts::from([(email.to_string(), name.unwrap_or_default().to_string())]))
            .unwrap_or_default()
    }
}

impl fmt::Debug for MandrillProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MandrillProfile")
            .field("api_key", &"[redacted]")
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("default_message", &self.default_message)
            .finish()
    }
}

fn enabled() -> bool {
    true
}

fn mandrill_api_url() -> String {
    MANDRILL_API_URL.to_string()
}

fn mandrill_timeout() -> u64 {
    30
}

/// Resolves named provider profiles
pub trait ConfigStore: Send + Sync + 'static {
    /// Returns the SMTP profile called `name`
    fn smtp_profile(&self, name: &str) -> Result<SmtpProfile, ConfigurationError>;

    /// Returns the Mandrill profile called `name`
    fn mandrill_profile(&self, name: &str) -> Result<MandrillProfile, ConfigurationError>;
}

#[cfg(test)]
mock! {
    pub ConfigStore {}

    impl ConfigStore for ConfigStore {
        fn smtp_profile(&self, name: &str) -> Result<SmtpProfile, ConfigurationError>;
        fn mandrill_profile(&self, name: &str) -> Result<MandrillProfile, ConfigurationError>;
    }
}
