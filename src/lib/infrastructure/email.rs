//! Email transports

pub mod mandrill;
pub mod smtp;

pub use mandrill::{MandrillApi, MandrillClient, ProviderApiTransport};
pub use smtp::{DirectEmailTransport, LettreRelay, MailRelay};
