use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::response::Response;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

use super::mailer::{Delivery, MailError, Mailer, OutgoingMail};
use crate::config::EmailerConfig;

/// [`Mailer`] backed by an SMTP relay.
///
/// `secure = true` connects with implicit TLS (SMTPS, usually port 465);
/// otherwise the connection is upgraded with STARTTLS when the server
/// offers it. The connection pool is shared across concurrent sends.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailerConfig) -> Result<Self, MailError> {
        let builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailError::Transport(e.to_string()))?
        } else {
            let tls = TlsParameters::new(config.host.clone())
                .map_err(|e| MailError::Transport(e.to_string()))?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .tls(Tls::Opportunistic(tls))
        };

        let mut builder = builder.port(config.port);
        if let Some(auth) = &config.auth {
            builder = builder.credentials(Credentials::new(
                auth.user.clone(),
                auth.password.expose_secret().to_string(),
            ));
        }

        let from: Mailbox = config.from.parse()?;
        tracing::debug!(
            host = %config.host,
            port = config.port,
            secure = config.secure,
            "Configured SMTP transport"
        );

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<Delivery, MailError> {
        let to: Mailbox = mail.to.parse()?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.text.clone())?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        Ok(delivery_from_response(&mail.to, &response))
    }
}

/// lettre turns a rejected recipient into `Err`; the final reply to DATA
/// decides whether the message was accepted.
fn delivery_from_response(to: &str, response: &Response) -> Delivery {
    let accepted = if response.is_positive() {
        vec![to.to_string()]
    } else {
        Vec::new()
    };
    Delivery {
        accepted,
        response: format!(
            "{} {}",
            response.code(),
            response.first_line().unwrap_or_default()
        ),
    }
}
