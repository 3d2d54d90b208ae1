//! SMTP transport implementation

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    address::Envelope,
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        self,
        authentication::Credentials,
        client::{Tls, TlsParameters},
        SUBMISSION_PORT,
    },
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
#[cfg(test)]
use mockall::mock;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::domain::notifications::{
    build_payload, correlate, AsyncDispatcher, ConfigStore, Contact, EmailPayload,
    NotificationError, NotificationRequest, PayloadRules, ProviderDefaults, ProviderFailure,
    ProviderKind, SmtpProfile, TemplateRenderer, Transport, ValidationError,
};

/// Failure talking to an SMTP relay
#[derive(Debug, Error)]
pub enum SmtpFailure {
    /// The relay could not be reached or rejected the message
    #[error("SMTP transport error: {0}")]
    Transport(#[from] smtp::Error),
}

impl ProviderFailure for SmtpFailure {
    fn code(&self) -> Option<String> {
        match self {
            SmtpFailure::Transport(err) => err.status().map(|code| code.to_string()),
        }
    }

    fn origin(&self) -> &'static str {
        "smtp"
    }
}

/// Hands a built message to an SMTP relay
#[async_trait]
pub trait MailRelay: Send + Sync + 'static {
    /// Deliver `message` through the relay described by `profile`
    async fn relay(&self, profile: &SmtpProfile, message: &Message) -> Result<(), SmtpFailure>;
}

#[cfg(test)]
mock! {
    pub MailRelay {}

    #[async_trait]
    impl MailRelay for MailRelay {
        async fn relay(&self, profile: &SmtpProfile, message: &Message) -> Result<(), SmtpFailure>;
    }
}

/// [`MailRelay`] backed by lettre's async SMTP transport
#[derive(Debug, Default, Clone)]
pub struct LettreRelay;

impl LettreRelay {
    /// Create an SMTP transport for `profile`
    pub fn mailer(profile: &SmtpProfile) -> Result<AsyncSmtpTransport<Tokio1Executor>, smtp::Error> {
        let parameters = TlsParameters::builder(profile.host.to_string())
            .dangerous_accept_invalid_certs(!profile.verify_tls)
            .build()?;

        let tls = if profile.starttls {
            Tls::Required(parameters)
        } else {
            Tls::Opportunistic(parameters)
        };

        let mut relay = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&profile.host)
            .port(profile.port.unwrap_or(SUBMISSION_PORT))
            .tls(tls);

        if let Some(username) = &profile.username {
            relay = relay.credentials(Credentials::new(
                username.clone(),
                profile.password.clone().unwrap_or_default(),
            ));
        }

        Ok(relay.build())
    }
}

#[async_trait]
impl MailRelay for LettreRelay {
    async fn relay(&self, profile: &SmtpProfile, message: &Message) -> Result<(), SmtpFailure> {
        Self::mailer(profile)?.send(message.clone()).await?;

        Ok(())
    }
}

/// Delivers notifications straight to an SMTP relay
#[derive(Clone)]
pub struct DirectEmailTransport {
    config: Arc<dyn ConfigStore>,
    renderer: Arc<dyn TemplateRenderer>,
    relay: Arc<dyn MailRelay>,
    dispatcher: AsyncDispatcher,
}

impl DirectEmailTransport {
    /// Create a new SMTP transport
    pub fn new(
        config: Arc<dyn ConfigStore>,
        renderer: Arc<dyn TemplateRenderer>,
        relay: Arc<dyn MailRelay>,
        dispatcher: AsyncDispatcher,
    ) -> Self {
        Self {
            config,
            renderer,
            relay,
            dispatcher,
        }
    }
}

impl std::fmt::Debug for DirectEmailTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectEmailTransport")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for DirectEmailTransport {
    fn provider(&self) -> ProviderKind {
        ProviderKind::DirectEmail
    }

    #[instrument(skip_all, fields(provider = "email", profile = %request.options.config_name))]
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        let profile = self.config.smtp_profile(&request.options.config_name)?;

        let defaults = ProviderDefaults {
            from: profile.from.clone(),
            return_path: profile.return_path.clone(),
        };

        let payload = build_payload(
            request,
            PayloadRules::for_provider(self.provider()),
            &defaults,
            self.renderer.as_ref(),
        )?;

        let message = build_message(&payload)?;

        debug!(host = %profile.host, recipients = message.envelope().to().len(), "sending email via SMTP");

        if let Err(failure) = self.relay.relay(&profile, &message).await {
            let dump = String::from_utf8_lossy(&message.formatted()).into_owned();

            return Err(correlate(self.provider(), &failure, &dump).into());
        }

        info!(subject = %payload.subject, "email sent via SMTP");

        Ok(())
    }

    async fn send_async(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        self.dispatcher.enqueue(self.provider(), request).await?;

        Ok(())
    }
}

/// Converts a payload into a lettre [`Message`].
///
/// The return path, when present, becomes the envelope sender.
pub fn build_message(payload: &EmailPayload) -> Result<Message, ValidationError> {
    let mut builder = Message::builder().subject(payload.subject.clone());

    if let Some(from) = &payload.from {
        builder = builder.from(mailbox("from", from)?);
    }

    for contact in &payload.reply_to {
        builder = builder.reply_to(mailbox("reply-to", contact)?);
    }

    for contact in &payload.to {
        builder = builder.to(mailbox("to", contact)?);
    }

    for contact in &payload.cc {
        builder = builder.cc(mailbox("cc", contact)?);
    }

    for contact in &payload.bcc {
        builder = builder.bcc(mailbox("bcc", contact)?);
    }

    if let Some(return_path) = &payload.return_path {
        let sender = address("return-path", return_path)?;
        let recipients = payload
            .to
            .iter()
            .chain(&payload.cc)
            .chain(&payload.bcc)
            .map(|contact| address("to", &contact.email))
            .collect::<Result<Vec<_>, _>>()?;

        let envelope = Envelope::new(Some(sender), recipients)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;

        builder = builder.envelope(envelope);
    }

    let body = match (&payload.html, &payload.text) {
        (Some(html), Some(text)) => Body::Multi(MultiPart::alternative_plain_html(
            text.clone(),
            html.clone(),
        )),
        (Some(html), None) => Body::Single(SinglePart::html(html.clone())),
        (None, Some(text)) => Body::Single(SinglePart::plain(text.clone())),
        (None, None) => return Err(ValidationError::MissingBody),
    };

    let body = if payload.attachments.is_empty() {
        body
    } else {
        let mut mixed = match body {
            Body::Single(part) => MultiPart::mixed().singlepart(part),
            Body::Multi(part) => MultiPart::mixed().multipart(part),
        };

        for attachment in &payload.attachments {
            let mime_type = if attachment.mime_type.is_empty() {
                "application/octet-stream"
            } else {
                attachment.mime_type.as_str()
            };

            let content_type = ContentType::parse(mime_type)
                .map_err(|_| ValidationError::InvalidAttachmentType(mime_type.to_string()))?;

            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type),
            );
        }

        Body::Multi(mixed)
    };

    match body {
        Body::Single(part) => builder.singlepart(part),
        Body::Multi(part) => builder.multipart(part),
    }
    .map_err(|e| ValidationError::Malformed(e.to_string()))
}

enum Body {
    Single(SinglePart),
    Multi(MultiPart),
}

fn address(field: &'static str, email: &str) -> Result<Address, ValidationError> {
    email.parse().map_err(|_| ValidationError::InvalidAddress {
        field,
        address: email.to_string(),
    })
}

fn mailbox(field: &'static str, contact: &Contact) -> Result<Mailbox, ValidationError> {
    let name = (!contact.name.is_empty()).then(|| contact.name.clone());

    Ok(Mailbox::new(name, address(field, &contact.email)?))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use lettre::message::{header, Mailboxes};
    use mockall::predicate::eq;
    use serde_json::json;
    use testresult::TestResult;
    use tokio::{io::AsyncWriteExt, net::TcpListener};

    use crate::domain::notifications::{
        payload::ResolvedAttachment,
        request::{BodyFormats, Contacts, Recipients},
        tests::{MockConfigStore, MockJobQueue, MockTemplateRenderer},
        testing::capture_logs,
        ConfigurationError, QueueError, DEFAULT_TOPIC,
    };

    use super::*;

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

    fn profile() -> SmtpProfile {
        let mut profile = SmtpProfile::new("smtp.example.com");
        profile.from = Contacts::from([("noreply@x.com".to_string(), "X".to_string())]);
        profile
    }

    fn config_with(profile: SmtpProfile) -> MockConfigStore {
        let mut config = MockConfigStore::new();
        config
            .expect_smtp_profile()
            .with(eq("default"))
            .returning(move |_| Ok(profile.clone()));
        config
    }

    fn transport(config: MockConfigStore, relay: impl MailRelay, queue: MockJobQueue) -> DirectEmailTransport {
        DirectEmailTransport::new(
            Arc::new(config),
            Arc::new(MockTemplateRenderer::new()),
            Arc::new(relay),
            AsyncDispatcher::new(Arc::new(queue), DEFAULT_TOPIC),
        )
    }

    fn mailboxes<H: Into<Mailboxes>>(header: Option<H>) -> Vec<Mailbox> {
        header
            .map(|h| {
                let mailboxes: Mailboxes = h.into();
                mailboxes.into_iter().collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_send_delivers_exactly_one_message() -> TestResult {
        let sent = Arc::new(Mutex::new(Vec::<Message>::new()));
        let captured = sent.clone();

        let mut relay = MockMailRelay::new();
        relay.expect_relay().times(1).returning(move |_, message| {
            captured.lock().unwrap().push(message.clone());
            Ok(())
        });

        transport(config_with(profile()), relay, MockJobQueue::new())
            .send(&welcome())
            .await?;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);

        let message = &sent[0];
        let to = mailboxes(message.headers().get::<header::To>());

        assert_eq!(to.len(), 1);
        assert_eq!(to[0].email.to_string(), "a@x.com");
        assert_eq!(to[0].name.as_deref(), Some("A"));
        assert!(message.headers().get::<header::Cc>().is_none());
        assert!(message.headers().get::<header::Bcc>().is_none());
        assert_eq!(message.envelope().to().len(), 1);

        let formatted = String::from_utf8(message.formatted())?;
        assert!(formatted.contains("Subject: Welcome"));
        assert!(formatted.contains("<b>Hi</b>"));

        Ok(())
    }

    #[tokio::test]
    async fn test_send_async_only_enqueues() -> TestResult {
        let mut relay = MockMailRelay::new();
        relay.expect_relay().times(0);

        let mut config = MockConfigStore::new();
        config.expect_smtp_profile().times(0);

        let mut queue = MockJobQueue::new();
        queue.expect_enqueue().times(1).returning(|topic, payload| {
            assert_eq!(topic, DEFAULT_TOPIC);
            assert!(payload.contains("\"provider\":\"email\""));
            Ok(())
        });

        transport(config, relay, queue).send_async(&welcome()).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_send_async_reports_queue_failure() {
        let mut relay = MockMailRelay::new();
        relay.expect_relay().times(0);

        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue()
            .times(1)
            .returning(|_, _| Err(QueueError::Unavailable(anyhow!("connection refused"))));

        let result = transport(MockConfigStore::new(), relay, queue)
            .send_async(&welcome())
            .await;

        assert!(matches!(
            result,
            Err(NotificationError::Queue(QueueError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_sends_keep_their_own_recipients() -> TestResult {
        let sent = Arc::new(Mutex::new(Vec::<Message>::new()));
        let captured = sent.clone();

        let mut relay = MockMailRelay::new();
        relay.expect_relay().times(2).returning(move |_, message| {
            captured.lock().unwrap().push(message.clone());
            Ok(())
        });

        let transport = transport(config_with(profile()), relay, MockJobQueue::new());

        let first = welcome();
        let mut second = welcome();
        second.subject = "Hello B".to_string();
        second.recipients.to = Contacts::from([("b@x.com".to_string(), "B".to_string())]);

        let (a, b) = tokio::join!(transport.send(&first), transport.send(&second));
        a?;
        b?;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);

        for message in sent.iter() {
            let to = mailboxes(message.headers().get::<header::To>());
            let subject = message
                .headers()
                .get::<header::Subject>()
                .map(|subject| subject.as_ref().to_string())
                .unwrap_or_default();

            assert_eq!(to.len(), 1);

            match to[0].email.to_string().as_str() {
                "a@x.com" => assert_eq!(subject, "Welcome"),
                "b@x.com" => assert_eq!(subject, "Hello B"),
                other => panic!("unexpected recipient {other}"),
            }
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_text_attachment_content_is_sent_verbatim() -> TestResult {
        let sent = Arc::new(Mutex::new(Vec::<Message>::new()));
        let captured = sent.clone();

        let mut relay = MockMailRelay::new();
        relay.expect_relay().times(1).returning(move |_, message| {
            captured.lock().unwrap().push(message.clone());
            Ok(())
        });

        let request: NotificationRequest = serde_json::from_value(json!({
            "subject": "Notes",
            "body-content": { "text": "See attached" },
            "recipients": { "to": { "a@x.com": "A" } },
            "provider": {
                "attachments": [{ "content": "hello world", "type": "text/plain", "filename": "hello.txt" }]
            }
        }))?;

        transport(config_with(profile()), relay, MockJobQueue::new())
            .send(&request)
            .await?;

        let formatted = String::from_utf8(sent.lock().unwrap()[0].formatted())?;

        assert!(formatted.contains("hello.txt"));
        assert!(formatted.contains("hello world"));

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_correlated() {
        let mut config = MockConfigStore::new();
        config.expect_smtp_profile().returning(|name| {
            Err(ConfigurationError::MissingProfile {
                provider: "smtp",
                profile: name.to_string(),
            })
        });

        let mut relay = MockMailRelay::new();
        relay.expect_relay().times(0);

        let result = transport(config, relay, MockJobQueue::new())
            .send(&welcome())
            .await;

        assert!(matches!(
            result,
            Err(NotificationError::Configuration(ConfigurationError::MissingProfile { .. }))
        ));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_a_validation_error() {
        let mut request = welcome();
        request.recipients.to = Contacts::from([("not an address".to_string(), String::new())]);

        let mut relay = MockMailRelay::new();
        relay.expect_relay().times(0);

        let result = transport(config_with(profile()), relay, MockJobQueue::new())
            .send(&request)
            .await;

        assert!(matches!(
            result,
            Err(NotificationError::Validation(ValidationError::InvalidAddress { field: "to", .. }))
        ));
    }

    #[tokio::test]
    async fn test_relay_rejection_is_correlated() -> TestResult {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let server = tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"554 5.7.1 Relay access denied\r\n").await;
                let _ = stream.shutdown().await;
            }
        });

        let mut profile = profile();
        profile.host = "127.0.0.1".to_string();
        profile.port = Some(port);
        profile.starttls = false;
        profile.verify_tls = false;

        let logs = capture_logs();

        let result = transport(config_with(profile), LettreRelay, MockJobQueue::new())
            .send(&welcome())
            .await;

        server.await?;

        let Err(NotificationError::Delivery(error)) = result else {
            panic!("expected a delivery error");
        };

        assert!(!error.to_string().contains("Relay access denied"));

        let lines = logs.lines_with(error.token());
        assert!(lines
            .iter()
            .any(|line| line.contains("notification delivery failed") && line.contains("554")));
        assert!(lines.iter().any(|line| line.contains("Subject: Welcome")));

        Ok(())
    }

    #[test]
    fn test_return_path_becomes_envelope_sender() -> TestResult {
        let payload = EmailPayload {
            subject: "Receipt".to_string(),
            from: Some(Contact::new("shop@x.com", "Shop")),
            return_path: Some("bounces@x.com".to_string()),
            to: vec![Contact::new("a@x.com", "A")],
            bcc: vec![Contact::new("audit@x.com", "")],
            text: Some("Thanks".to_string()),
            ..Default::default()
        };

        let message = build_message(&payload)?;

        assert_eq!(
            message.envelope().from().map(ToString::to_string).as_deref(),
            Some("bounces@x.com")
        );
        assert_eq!(message.envelope().to().len(), 2);

        Ok(())
    }

    #[test]
    fn test_attachments_are_added_as_parts() -> TestResult {
        let payload = EmailPayload {
            subject: "Invoice".to_string(),
            from: Some(Contact::new("shop@x.com", "Shop")),
            to: vec![Contact::new("a@x.com", "A")],
            html: Some("<p>Invoice attached</p>".to_string()),
            text: Some("Invoice attached".to_string()),
            attachments: vec![ResolvedAttachment {
                mime_type: "text/csv".to_string(),
                filename: "invoice.csv".to_string(),
                content: b"id,total\n1,10\n".to_vec(),
            }],
            ..Default::default()
        };

        let formatted = String::from_utf8(build_message(&payload)?.formatted())?;

        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("invoice.csv"));
        assert!(formatted.contains("text/csv"));

        Ok(())
    }

    #[test]
    fn test_invalid_attachment_type() {
        let payload = EmailPayload {
            from: Some(Contact::new("shop@x.com", "Shop")),
            to: vec![Contact::new("a@x.com", "A")],
            text: Some("hi".to_string()),
            attachments: vec![ResolvedAttachment {
                mime_type: "not a mime type".to_string(),
                filename: "x".to_string(),
                content: vec![1],
            }],
            ..Default::default()
        };

        assert!(matches!(
            build_message(&payload),
            Err(ValidationError::InvalidAttachmentType(_))
        ));
    }
}
