//! Notification transport module

pub mod correlator;
pub mod dispatch;
pub mod errors;
pub mod payload;
pub mod profiles;
pub mod request;
pub mod templates;
pub mod transport;

pub use correlator::{correlate, ProviderFailure};
pub use dispatch::{AsyncDispatcher, Job, JobQueue, DEFAULT_TOPIC};
pub use errors::{
    ConfigurationError, DeliveryError, NotificationError, QueueError, ValidationError,
};
pub use payload::{build_payload, Contact, EmailPayload, PayloadRules, ProviderDefaults};
pub use profiles::{ConfigStore, MandrillProfile, SmtpProfile};
pub use request::{Attachment, NotificationRequest};
pub use templates::TemplateRenderer;
pub use transport::{ProviderKind, Transport};
