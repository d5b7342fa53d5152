use async_trait::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{error, info, warn};

use crate::config::SmtpConfig;

/// Outbound email capability. Sending is best-effort: implementations report
/// success as a bool and must never panic a caller.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> bool;
}

pub fn reset_email_body(full_name: &str, reset_url: &str) -> String {
    format!(
        "Hello {full_name},\n\
         \n\
         You requested a password reset. Click the link below to reset your password:\n\
         {reset_url}\n\
         \n\
         This link will expire in 1 hour.\n\
         \n\
         If you didn't request this, please ignore this email."
    )
}

/// SMTP transport over lettre with STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> bool {
        let message = Message::builder()
            .from(match self.from.parse() {
                Ok(m) => m,
                Err(e) => {
                    error!(error = %e, "invalid from address");
                    return false;
                }
            })
            .to(match to.parse() {
                Ok(m) => m,
                Err(e) => {
                    error!(error = %e, "invalid recipient address");
                    return false;
                }
            })
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string());
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "failed to build email");
                return false;
            }
        };
        match self.transport.send(message).await {
            Ok(_) => {
                info!(to = %to, "email sent");
                true
            }
            Err(e) => {
                error!(error = %e, to = %to, "email send failed");
                false
            }
        }
    }
}

/// Stand-in when no SMTP credentials are configured: logs and drops.
pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> bool {
        warn!(to = %to, subject = %subject, "SMTP not configured, dropping email");
        false
    }
}

/// Test double that records every message (see `AppState::fake`).
#[cfg(test)]
#[derive(Default)]
pub struct RecordingMailer {
    sent: std::sync::Mutex<Vec<SentEmail>>,
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[cfg(test)]
impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> bool {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        true
    }
}
