//! The outbound mail capability.

use async_trait::async_trait;
use thiserror::Error;

/// Errors a [`Mailer`] can report for one message.
#[derive(Debug, Error)]
pub enum MailError {
    /// Recipient or sender is not a valid address
    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    /// The message could not be assembled
    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    /// Connection, TLS, authentication or SMTP-level rejection
    #[error("Mail transport error: {0}")]
    Transport(String),
}

/// A plain-text message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// What the transport reported for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients the server accepted. Empty means nothing was delivered
    /// even though the call itself succeeded.
    pub accepted: Vec<String>,
    /// Server response line, for logs.
    pub response: String,
}

impl Delivery {
    pub fn is_accepted(&self) -> bool {
        !self.accepted.is_empty()
    }
}

/// Trait for sending one notification mail.
///
/// The pipeline depends only on this trait; [`super::SmtpMailer`] is the
/// production implementation and tests substitute recording fakes.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a single message.
    ///
    /// # Returns
    ///
    /// The transport's acceptance info, or the reason delivery failed.
    async fn send(&self, mail: &OutgoingMail) -> Result<Delivery, MailError>;
}
