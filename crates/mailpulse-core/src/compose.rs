//! Message Composer - builds the raw RFC 2822 message handed to the provider
//!
//! Single-part `text/html` when there are no attachments, otherwise
//! `multipart/mixed` with the HTML part first and one base64 part per
//! attachment. The result is base64url without padding, as the provider's
//! raw-message transport expects. No I/O happens here.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use mailpulse_storage::models::AttachmentData;
use std::time::SystemTime;
use thiserror::Error;
use tracing::warn;

/// Compose errors
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("failed to encode {0}")]
    Encoding(String),
}

/// Build a mailbox from an optional display name and an address
pub fn mailbox(name: Option<&str>, email: &str) -> Result<Mailbox, ComposeError> {
    let address: Address = email.parse().map_err(|e: lettre::address::AddressError| {
        ComposeError::InvalidAddress {
            address: email.to_string(),
            reason: e.to_string(),
        }
    })?;
    let name = name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
    Ok(Mailbox::new(name, address))
}

/// Message composer
///
/// Boundary, date and Message-ID are generated per message unless fixed,
/// which makes the output byte-for-byte reproducible in tests.
#[derive(Debug, Clone, Default)]
pub struct MessageComposer {
    boundary: Option<String>,
    date: Option<SystemTime>,
    message_id: Option<String>,
}

impl MessageComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed multipart boundary
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Use a fixed Date header
    pub fn with_date(mut self, date: SystemTime) -> Self {
        self.date = Some(date);
        self
    }

    /// Use a fixed Message-ID header
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Build the message
    pub fn build(
        &self,
        from: &Mailbox,
        to: &Mailbox,
        subject: &str,
        html_body: &str,
        attachments: &[AttachmentData],
    ) -> Result<Message, ComposeError> {
        let mut builder = Message::builder()
            .from(from.clone())
            .to(to.clone())
            .subject(subject);

        if let Some(date) = self.date {
            builder = builder.date(date);
        }
        if let Some(message_id) = &self.message_id {
            builder = builder.message_id(Some(message_id.clone()));
        }

        let html_part = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(
                Body::new_with_encoding(html_body.to_string(), ContentTransferEncoding::QuotedPrintable)
                    .map_err(|_| ComposeError::Encoding("html body".to_string()))?,
            );

        if attachments.is_empty() {
            return Ok(builder.singlepart(html_part)?);
        }

        let mut mixed = MultiPart::mixed();
        if let Some(boundary) = &self.boundary {
            mixed = mixed.boundary(boundary.clone());
        }
        let mut multipart = mixed.singlepart(html_part);

        for attachment in attachments {
            let body = Body::new_with_encoding(attachment.content.clone(), ContentTransferEncoding::Base64)
                .map_err(|_| ComposeError::Encoding(attachment.filename.clone()))?;
            multipart = multipart.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(body, content_type_or_default(&attachment.content_type)),
            );
        }

        Ok(builder.multipart(multipart)?)
    }

    /// Build the message and encode it for the provider's raw transport
    pub fn compose(
        &self,
        from: &Mailbox,
        to: &Mailbox,
        subject: &str,
        html_body: &str,
        attachments: &[AttachmentData],
    ) -> Result<String, ComposeError> {
        let message = self.build(from, to, subject, html_body, attachments)?;
        Ok(URL_SAFE_NO_PAD.encode(message.formatted()))
    }
}

fn content_type_or_default(declared: &str) -> ContentType {
    ContentType::parse(declared).unwrap_or_else(|_| {
        warn!("Unparseable attachment content type {:?}, using octet-stream", declared);
        ContentType::parse("application/octet-stream")
            .unwrap_or(ContentType::TEXT_PLAIN)
    })
}
