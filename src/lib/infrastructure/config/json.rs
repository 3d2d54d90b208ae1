//! JSON profile store

use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;
use tracing::debug;

use crate::domain::notifications::{
    ConfigStore, ConfigurationError, MandrillProfile, SmtpProfile,
};

/// Provider profiles loaded from a JSON document
///
/// ```json
/// {
///   "smtp": { "default": { "host": "smtp.example.com", "from": { "noreply@example.com": "Example" } } },
///   "mandrill": { "default": { "api_key": "...", "default_message": { "from_email": "noreply@example.com" } } }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonConfigStore {
    #[serde(default)]
    smtp: HashMap<String, SmtpProfile>,

    #[serde(default)]
    mandrill: HashMap<String, MandrillProfile>,
}

impl JsonConfigStore {
    /// Load profiles from `path`
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ConfigurationError::InvalidProfile(format!("could not read {}: {e}", path.display()))
        })?;

        let store = Self::from_json(&raw)?;

        debug!(
            path = %path.display(),
            smtp = store.smtp.len(),
            mandrill = store.mandrill.len(),
            "loaded provider profiles"
        );

        Ok(store)
    }

    /// Parse profiles from a JSON string
    pub fn from_json(raw: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(raw).map_err(|e| ConfigurationError::InvalidProfile(e.to_string()))
    }
}

impl ConfigStore for JsonConfigStore {
    fn smtp_profile(&self, name: &str) -> Result<SmtpProfile, ConfigurationError> {
        self.smtp
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::MissingProfile {
                provider: "smtp",
                profile: name.to_string(),
            })
    }

    fn mandrill_profile(&self, name: &str) -> Result<MandrillProfile, ConfigurationError> {
        self.mandrill
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::MissingProfile {
                provider: "mandrill",
                profile: name.to_string(),
            })
    }
}
