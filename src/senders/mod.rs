//! Channel senders
//!
//! One [`Sender`] per [`NoticeKind`], looked up through the
//! [`SenderRegistry`]. Senders receive fully rendered content; they only
//! know how to deliver it.

pub mod dingding;
pub mod email;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::{EmailFields, NoticeKind, Severity};

pub use dingding::DingDingSender;
pub use email::{EmailSender, SmtpSettings};
pub use webhook::{CustomHookSender, FeiShuSender, SlackSender, WeChatSender};

/// Timeout applied to every outgoing webhook request
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("channel responded with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The channel accepted the request but reported an error in its body
    #[error("channel rejected the message: {0}")]
    Rejected(String),

    #[error("rendered content is not valid JSON: {0}")]
    InvalidContent(#[from] serde_json::Error),

    #[error("email delivery failed: {0}")]
    Email(String),

    #[error("no sender registered for {0}")]
    Unsupported(NoticeKind),

    #[error("missing {0}")]
    MissingField(&'static str),
}

/// Everything a channel needs to deliver one notification
#[derive(Debug, Clone, PartialEq)]
pub struct SendParams {
    pub tenant_id: String,
    pub event_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub notice_kind: NoticeKind,
    pub notice_id: String,
    pub notice_name: String,
    pub is_recovered: bool,
    pub hook: String,
    pub email: EmailFields,
    pub content: String,
    pub phone_numbers: Vec<String>,
    pub sign: String,
}

#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, params: &SendParams) -> Result<(), SendError>;

    /// Deliver a fixed probe message to check the channel configuration
    async fn test(&self, params: &SendParams) -> Result<(), SendError>;
}

/// Maps each channel kind to its sender
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<NoticeKind, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in webhook sender, plus email when SMTP is
    /// configured
    ///
    /// `PhoneCall` has no built-in provider.
    pub fn with_defaults(smtp: Option<&SmtpSettings>) -> Result<Self, SendError> {
        let client = http_client()?;

        let mut registry = Self::new()
            .with(NoticeKind::FeiShu, Arc::new(FeiShuSender::new(client.clone())))
            .with(NoticeKind::DingDing, Arc::new(DingDingSender::new(client.clone())))
            .with(NoticeKind::WeChat, Arc::new(WeChatSender::new(client.clone())))
            .with(NoticeKind::Slack, Arc::new(SlackSender::new(client.clone())))
            .with(NoticeKind::CustomHook, Arc::new(CustomHookSender::new(client)));

        if let Some(smtp) = smtp {
            registry.register(NoticeKind::Email, Arc::new(EmailSender::new(smtp)?));
        }

        Ok(registry)
    }

    pub fn with(mut self, kind: NoticeKind, sender: Arc<dyn Sender>) -> Self {
        self.register(kind, sender);
        self
    }

    pub fn register(&mut self, kind: NoticeKind, sender: Arc<dyn Sender>) {
        self.senders.insert(kind, sender);
    }

    pub fn get(&self, kind: NoticeKind) -> Option<Arc<dyn Sender>> {
        self.senders.get(&kind).cloned()
    }

    /// Send through the sender registered for the params' kind
    pub async fn send(&self, params: &SendParams) -> Result<(), SendError> {
        match self.get(params.notice_kind) {
            Some(sender) => sender.send(params).await,
            None => Err(SendError::Unsupported(params.notice_kind)),
        }
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, SendError> {
    Ok(reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?)
}
