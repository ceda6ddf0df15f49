//! SMTP delivery through lettre

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{SendError, SendParams, Sender};

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
}

fn default_smtp_port() -> u16 {
    465
}

pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailSender {
    pub fn new(settings: &SmtpSettings) -> Result<Self, SendError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            .map_err(|e| SendError::Email(e.to_string()))?
            .port(settings.port);

        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: settings.from.clone(),
        })
    }

    fn subject(params: &SendParams) -> String {
        if !params.email.subject.is_empty() {
            return params.email.subject.clone();
        }

        let status = if params.is_recovered {
            "RECOVERED"
        } else {
            "FIRING"
        };
        format!("[{}][{}] {}", params.severity, status, params.rule_name)
    }

    fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
        address
            .parse()
            .map_err(|e| SendError::Email(format!("invalid address '{address}': {e}")))
    }

    async fn deliver(&self, params: &SendParams, subject: &str, body: String) -> Result<(), SendError> {
        if params.email.to.is_empty() {
            return Err(SendError::MissingField("email recipients"));
        }

        let mut builder = Message::builder()
            .from(Self::parse_mailbox(&self.from)?)
            .subject(subject)
            .header(ContentType::TEXT_HTML);

        for to in &params.email.to {
            builder = builder.to(Self::parse_mailbox(to)?);
        }
        for cc in &params.email.cc {
            builder = builder.cc(Self::parse_mailbox(cc)?);
        }

        let message = builder
            .body(body)
            .map_err(|e| SendError::Email(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| SendError::Email(e.to_string()))?;

        debug!("email delivered to {} recipient(s)", params.email.to.len());
        Ok(())
    }
}

#[async_trait]
impl Sender for EmailSender {
    #[instrument(skip_all, fields(event_id = %params.event_id))]
    async fn send(&self, params: &SendParams) -> Result<(), SendError> {
        self.deliver(params, &Self::subject(params), params.content.clone())
            .await
    }

    async fn test(&self, params: &SendParams) -> Result<(), SendError> {
        self.deliver(
            params,
            "alerting engine test message",
            format!("<p>test message for {}</p>", params.notice_name),
        )
        .await
    }
}
