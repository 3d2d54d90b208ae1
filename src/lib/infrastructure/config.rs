//! Configuration

pub mod json;

use std::path::PathBuf;

use clap::Parser;

pub use json::JsonConfigStore;

/// Notification runtime configuration
#[derive(Clone, Debug, Parser)]
pub struct NotificationConfig {
    /// Path to the JSON file holding the provider profiles
    #[clap(long, env = "NOTIFICATION_PROFILES")]
    pub profiles_path: PathBuf,

    /// Directory templates are loaded from
    #[clap(long, env = "NOTIFICATION_TEMPLATES", default_value = "templates")]
    pub templates_path: PathBuf,

    /// The Redis connection URL
    #[clap(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// The queue topic jobs are published to and claimed from
    #[clap(long, env = "NOTIFICATION_QUEUE", default_value = "notifications_queue")]
    pub queue_topic: String,

    /// Seconds a worker waits for a job before polling again
    #[clap(long, env = "NOTIFICATION_POLL_TIMEOUT", default_value = "5")]
    pub poll_timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn test_defaults() -> TestResult {
        let config = NotificationConfig::try_parse_from([
            "worker",
            "--profiles-path",
            "/etc/notifications/profiles.json",
        ])?;

        assert_eq!(config.queue_topic, "notifications_queue");
        assert_eq!(config.templates_path, PathBuf::from("templates"));
        assert_eq!(config.poll_timeout_secs, 5);

        Ok(())
    }
}
