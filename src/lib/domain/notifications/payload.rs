//! Message builder
//!
//! Maps a [`NotificationRequest`] onto a provider-neutral [`EmailPayload`].
//! The mapping is the same for every provider except where [`PayloadRules`]
//! say otherwise:
//!
//! | Rule        | `email` (SMTP)               | `mandrill` (HTTP API)               |
//! |-------------|------------------------------|-------------------------------------|
//! | recipients  | `to`, `cc`, `bcc` kept apart | `cc` and `bcc` folded into `to`     |
//! | return path | request, then profile        | not supported                       |
//! | metadata    | dropped                      | forwarded verbatim                  |
//!
//! Folding `bcc` into the primary list makes those addresses visible to every
//! recipient. The Mandrill mapping has always behaved this way and is kept
//! as is.

use std::fs;

use serde_json::{Map, Value};
use tracing::debug;

use super::{
    errors::{NotificationError, ValidationError},
    request::{Attachment, BodyFormat, Contacts, NotificationRequest},
    templates::TemplateRenderer,
    transport::ProviderKind,
};

/// Where a provider puts `cc` and `bcc` recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientFields {
    /// `to`, `cc` and `bcc` map to their own fields
    Separate,

    /// Everything lands in the primary recipient list
    FoldIntoPrimary,
}

/// Provider specific mapping rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRules {
    /// Recipient mapping
    pub recipients: RecipientFields,

    /// Whether the provider honours a return path
    pub return_path: bool,

    /// Whether the provider forwards metadata
    pub metadata: bool,
}

impl PayloadRules {
    /// The mapping rules for `provider`
    pub fn for_provider(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::DirectEmail => Self {
                recipients: RecipientFields::Separate,
                return_path: true,
                metadata: false,
            },
            ProviderKind::ProviderApiEmail => Self {
                recipients: RecipientFields::FoldIntoPrimary,
                return_path: false,
                metadata: true,
            },
        }
    }
}

/// Values taken from the provider profile when the request has none
#[derive(Debug, Clone, Default)]
pub struct ProviderDefaults {
    /// Default sender
    pub from: Contacts,

    /// Default return path
    pub return_path: Option<String>,
}

/// An address with its display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Email address
    pub email: String,

    /// Display name, may be empty
    pub name: String,
}

impl Contact {
    /// Creates a contact
    pub fn new(email: &str, name: &str) -> Self {
        Self {
            email: email.to_string(),
            name: name.to_string(),
        }
    }
}

/// An attachment with its content loaded
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    /// MIME type
    pub mime_type: String,

    /// Destination file name
    pub filename: String,

    /// Raw bytes
    pub content: Vec<u8>,
}

impl std::fmt::Debug for ResolvedAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAttachment")
            .field("mime_type", &self.mime_type)
            .field("filename", &self.filename)
            .field("content", &format_args!("<{} bytes>", self.content.len()))
            .finish()
    }
}

/// Provider-neutral email ready to be converted into a provider message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailPayload {
    /// Subject line
    pub subject: String,

    /// Sender
    pub from: Option<Contact>,

    /// Reply-to addresses
    pub reply_to: Vec<Contact>,

    /// Envelope sender
    pub return_path: Option<String>,

    /// Primary recipients
    pub to: Vec<Contact>,

    /// Carbon copy recipients
    pub cc: Vec<Contact>,

    /// Blind carbon copy recipients
    pub bcc: Vec<Contact>,

    /// HTML body
    pub html: Option<String>,

    /// Plain text body
    pub text: Option<String>,

    /// Attachments
    pub attachments: Vec<ResolvedAttachment>,

    /// Metadata, when the provider forwards it
    pub metadata: Option<Map<String, Value>>,
}

/// Builds the payload for `request`.
///
/// # Arguments
/// * `request` - The notification to map.
/// * `rules` - The provider's [`PayloadRules`].
/// * `defaults` - Sender and return path from the provider profile.
/// * `renderer` - Used for body formats that have a template but no literal content.
///
/// # Returns
/// The built [`EmailPayload`], a [`ValidationError`] when the request cannot
/// produce a message, or the renderer's error unchanged.
pub fn build_payload<R>(
    request: &NotificationRequest,
    rules: PayloadRules,
    defaults: &ProviderDefaults,
    renderer: &R,
) -> Result<EmailPayload, NotificationError>
where
    R: TemplateRenderer + ?Sized,
{
    let from = last_contact(&request.from).or_else(|| last_contact(&defaults.from));

    let return_path = if rules.return_path {
        non_empty(request.options.return_path.as_deref())
            .or_else(|| non_empty(defaults.return_path.as_deref()))
            .map(str::to_string)
    } else {
        None
    };

    let mut to = contacts(&request.recipients.to);
    let mut cc = contacts(&request.recipients.cc);
    let mut bcc = contacts(&request.recipients.bcc);

    if rules.recipients == RecipientFields::FoldIntoPrimary {
        to.append(&mut cc);
        to.append(&mut bcc);
    }

    let html = resolve_body(request, BodyFormat::Html, renderer)?;
    let text = resolve_body(request, BodyFormat::Text, renderer)?;

    if html.is_none() && text.is_none() {
        return Err(ValidationError::MissingBody.into());
    }

    Ok(EmailPayload {
        subject: request.subject.clone(),
        from,
        reply_to: contacts(&request.options.reply_to),
        return_path,
        to,
        cc,
        bcc,
        html,
        text,
        attachments: resolve_attachments(&request.options.attachments)?,
        metadata: rules.metadata.then(|| request.metadata.clone()),
    })
}

/// Literal content wins over the template; neither means the format is omitted.
fn resolve_body<R>(
    request: &NotificationRequest,
    format: BodyFormat,
    renderer: &R,
) -> Result<Option<String>, NotificationError>
where
    R: TemplateRenderer + ?Sized,
{
    if let Some(content) = request.body_content.get(format) {
        return Ok(Some(content.to_string()));
    }

    match request.body_templates.get(format) {
        Some(template) => {
            debug!(template, ?format, "rendering notification body");

            renderer
                .render(template, &template_context(request))
                .map(Some)
                .map_err(NotificationError::Template)
        }
        None => Ok(None),
    }
}

fn template_context(request: &NotificationRequest) -> Map<String, Value> {
    let mut context = request.body_args.clone();

    if let Some(signature) = &request.options.signature {
        context
            .entry("signature")
            .or_insert_with(|| Value::String(signature.clone()));
    }

    context
}

/// Loads attachment content, skipping attachments without a source.
pub fn resolve_attachments(
    attachments: &[Attachment],
) -> Result<Vec<ResolvedAttachment>, ValidationError> {
    let mut resolved = Vec::with_capacity(attachments.len());

    for attachment in attachments {
        let text = attachment.content.as_deref().filter(|c| !c.is_empty());
        let binary = attachment.content_base64.as_deref().filter(|c| !c.is_empty());

        let content = match (text, binary, &attachment.src_filename) {
            (Some(content), _, _) => content.as_bytes().to_vec(),
            (None, Some(content), _) => content.to_vec(),
            (None, None, Some(path)) if !path.as_os_str().is_empty() => {
                fs::read(path).map_err(|err| {
                    debug!(path = %path.display(), error = %err, "attachment read failed");

                    ValidationError::UnreadableAttachment { path: path.clone() }
                })?
            }
            _ => {
                debug!(filename = %attachment.filename, "skipping attachment without content");
                continue;
            }
        };

        resolved.push(ResolvedAttachment {
            mime_type: attachment.mime_type.clone(),
            filename: attachment.filename.clone(),
            content,
        });
    }

    Ok(resolved)
}

fn contacts(map: &Contacts) -> Vec<Contact> {
    map.iter().map(|(email, name)| Contact::new(email, name)).collect()
}

fn last_contact(map: &Contacts) -> Option<Contact> {
    map.iter().next_back().map(|(email, name)| Contact::new(email, name))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
