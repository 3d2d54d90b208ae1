//! Transport registry

use std::{fmt, sync::Arc};

use tracing::{debug, instrument};

use crate::{
    domain::notifications::{
        AsyncDispatcher, ConfigStore, ConfigurationError, Job, NotificationError, ProviderKind,
        TemplateRenderer, Transport,
    },
    infrastructure::email::{
        DirectEmailTransport, MailRelay, MandrillApi, ProviderApiTransport,
    },
};

/// Builds transports for a closed set of provider identifiers
#[derive(Clone)]
pub struct TransportRegistry {
    config: Arc<dyn ConfigStore>,
    renderer: Arc<dyn TemplateRenderer>,
    relay: Arc<dyn MailRelay>,
    mandrill: Arc<dyn MandrillApi>,
    dispatcher: AsyncDispatcher,
}

impl TransportRegistry {
    /// Create a new registry sharing the given collaborators with every transport
    pub fn new(
        config: Arc<dyn ConfigStore>,
        renderer: Arc<dyn TemplateRenderer>,
        relay: Arc<dyn MailRelay>,
        mandrill: Arc<dyn MandrillApi>,
        dispatcher: AsyncDispatcher,
    ) -> Self {
        Self {
            config,
            renderer,
            relay,
            mandrill,
            dispatcher,
        }
    }

    /// Returns the transport registered as `name`.
    ///
    /// # Returns
    /// [`ConfigurationError::UnknownProvider`] when no provider has that name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Transport>, ConfigurationError> {
        let provider = name.parse::<ProviderKind>()?;

        Ok(self.resolve_kind(provider))
    }

    /// Returns a new transport for `provider`
    pub fn resolve_kind(&self, provider: ProviderKind) -> Arc<dyn Transport> {
        match provider {
            ProviderKind::DirectEmail => Arc::new(DirectEmailTransport::new(
                self.config.clone(),
                self.renderer.clone(),
                self.relay.clone(),
                self.dispatcher.clone(),
            )),
            ProviderKind::ProviderApiEmail => Arc::new(ProviderApiTransport::new(
                self.config.clone(),
                self.renderer.clone(),
                self.mandrill.clone(),
                self.dispatcher.clone(),
            )),
        }
    }

    /// Delivers a claimed job.
    ///
    /// Resolves a fresh transport for the job's provider and sends the stored
    /// request. Nothing from the process that queued the job is used.
    #[instrument(skip_all, fields(job_id = %job.id, provider = %job.provider))]
    pub async fn perform(&self, job: Job) -> Result<(), NotificationError> {
        debug!(enqueued_at = %job.enqueued_at, "performing notification job");

        self.resolve_kind(job.provider).send(&job.request).await
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("providers", &ProviderKind::ALL)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use testresult::TestResult;

    use crate::{
        domain::notifications::{
            request::{BodyFormats, Contacts, Recipients},
            tests::{MockJobQueue, MockTemplateRenderer},
            Job, NotificationRequest, DEFAULT_TOPIC,
        },
        infrastructure::{
            config::JsonConfigStore,
            email::{mandrill::MockMandrillApi, smtp::MockMailRelay},
        },
    };

    use super::*;

    const PROFILES: &str = r#"{
        "smtp": { "default": { "host": "smtp.example.com", "from": { "noreply@x.com": "X" } } },
        "mandrill": { "default": { "api_key": "key" } }
    }"#;

    fn registry(relay: MockMailRelay, mandrill: MockMandrillApi, queue: MockJobQueue) -> TestResult<TransportRegistry> {
        Ok(TransportRegistry::new(
            Arc::new(JsonConfigStore::from_json(PROFILES)?),
            Arc::new(MockTemplateRenderer::new()),
            Arc::new(relay),
            Arc::new(mandrill),
            AsyncDispatcher::new(Arc::new(queue), DEFAULT_TOPIC),
        ))
    }

    fn welcome() -> NotificationRequest {
        NotificationRequest {
            subject: "Welcome".to_string(),
            body_content: BodyFormats {
                html: Some("<b>Hi</b>".to_string()),
                text: None,
            },
            recipients: Recipients {
                to: Contacts::from([("a@x.com".to_string(), "A".to_string())]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_resolves_known_providers() -> TestResult {
        let registry = registry(MockMailRelay::new(), MockMandrillApi::new(), MockJobQueue::new())?;

        assert_eq!(registry.resolve("email")?.provider(), ProviderKind::DirectEmail);
        assert_eq!(registry.resolve("mandrill")?.provider(), ProviderKind::ProviderApiEmail);

        Ok(())
    }

    #[test]
    fn test_unknown_provider_has_no_side_effects() -> TestResult {
        let mut relay = MockMailRelay::new();
        relay.expect_relay().times(0);

        let mut mandrill = MockMandrillApi::new();
        mandrill.expect_send_message().times(0);

        let mut queue = MockJobQueue::new();
        queue.expect_enqueue().times(0);

        let registry = registry(relay, mandrill, queue)?;

        assert!(matches!(
            registry.resolve("sms"),
            Err(ConfigurationError::UnknownProvider(name)) if name == "sms"
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_queued_job_is_performed_by_a_fresh_transport() -> TestResult {
        let queued = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = queued.clone();

        let mut queue = MockJobQueue::new();
        queue.expect_enqueue().times(1).returning(move |_, payload| {
            sink.lock().unwrap().push(payload);
            Ok(())
        });

        let mut relay = MockMailRelay::new();
        relay.expect_relay().times(1).returning(|profile, message| {
            assert_eq!(profile.host, "smtp.example.com");
            assert_eq!(message.envelope().to().len(), 1);
            Ok(())
        });

        let registry = registry(relay, MockMandrillApi::new(), queue)?;

        registry.resolve("email")?.send_async(&welcome()).await?;

        let payload = queued.lock().unwrap().pop().unwrap_or_default();
        let job = Job::from_json(&payload)?;

        assert_eq!(job.request, welcome());

        registry.perform(job).await?;

        Ok(())
    }
}
