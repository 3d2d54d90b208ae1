//! Error correlation
//!
//! Provider failures never reach the caller. Each one is logged under a fresh
//! token and the caller receives a [`DeliveryError`] holding only that token.

use std::{error::Error, panic::Location};

use tracing::{debug, error};
use uuid::Uuid;

use super::{errors::DeliveryError, transport::ProviderKind};

/// A failure raised while talking to a provider
pub trait ProviderFailure: Error + Send + Sync + 'static {
    /// Provider or protocol status code, when one was returned
    fn code(&self) -> Option<String>;

    /// The component that failed, e.g. `smtp` or `mandrill-api`
    fn origin(&self) -> &'static str;
}

/// Logs `failure` and the attempted `payload` under a new token.
///
/// # Arguments
/// * `provider` - The provider the delivery was attempted through.
/// * `failure` - The provider failure.
/// * `payload` - A dump of the message as it was handed to the provider.
///
/// # Returns
/// The [`DeliveryError`] to surface to the caller.
#[track_caller]
pub fn correlate<F>(provider: ProviderKind, failure: &F, payload: &str) -> DeliveryError
where
    F: ProviderFailure + ?Sized,
{
    let token = Uuid::now_v7().simple().to_string();
    let location = Location::caller();

    error!(
        token = %token,
        provider = %provider,
        origin = failure.origin(),
        code = failure.code().as_deref().unwrap_or("none"),
        location = %location,
        error = %failure,
        chain = %source_chain(failure),
        "notification delivery failed"
    );

    debug!(token = %token, provider = %provider, payload, "attempted notification payload");

    DeliveryError::new(token)
}

fn source_chain<F: Error + ?Sized>(failure: &F) -> String {
    let mut chain = Vec::new();
    let mut source = failure.source();

    while let Some(err) = source {
        chain.push(err.to_string());
        source = err.source();
    }

    chain.join(": ")
}
