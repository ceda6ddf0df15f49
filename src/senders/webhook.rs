//! Robot webhooks: FeiShu, WeChat, Slack and plain custom hooks
//!
//! The rendered content is the request body. FeiShu and WeChat answer with
//! HTTP 200 even on failure, so their response bodies are checked as well.

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, instrument};

use super::{SendError, SendParams, Sender};

type HmacSha256 = Hmac<Sha256>;

/// POST a JSON body and return the parsed response (`Null` if not JSON)
async fn post_json(client: &Client, url: &str, body: &Value) -> Result<Value, SendError> {
    if url.is_empty() {
        return Err(SendError::MissingField("hook url"));
    }

    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(SendError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    debug!("webhook accepted with status {}", status);
    Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
}

/// Check an `{errcode, errmsg}` style response
fn check_errcode(response: &Value) -> Result<(), SendError> {
    match response.get("errcode").and_then(Value::as_i64) {
        None | Some(0) => Ok(()),
        Some(code) => {
            let message = response
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            Err(SendError::Rejected(format!("errcode {code}: {message}")))
        }
    }
}

/// Posts the rendered content verbatim
pub struct CustomHookSender {
    client: Client,
}

impl CustomHookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sender for CustomHookSender {
    #[instrument(skip_all, fields(event_id = %params.event_id))]
    async fn send(&self, params: &SendParams) -> Result<(), SendError> {
        let body: Value = serde_json::from_str(&params.content)?;
        post_json(&self.client, &params.hook, &body).await?;
        Ok(())
    }

    async fn test(&self, params: &SendParams) -> Result<(), SendError> {
        let body = json!({ "test": true, "notice": params.notice_name });
        post_json(&self.client, &params.hook, &body).await?;
        Ok(())
    }
}

pub struct SlackSender {
    client: Client,
}

impl SlackSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sender for SlackSender {
    #[instrument(skip_all, fields(event_id = %params.event_id))]
    async fn send(&self, params: &SendParams) -> Result<(), SendError> {
        let body: Value = serde_json::from_str(&params.content)?;
        post_json(&self.client, &params.hook, &body).await?;
        Ok(())
    }

    async fn test(&self, params: &SendParams) -> Result<(), SendError> {
        let body = json!({ "text": format!("test message for {}", params.notice_name) });
        post_json(&self.client, &params.hook, &body).await?;
        Ok(())
    }
}

pub struct WeChatSender {
    client: Client,
}

impl WeChatSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sender for WeChatSender {
    #[instrument(skip_all, fields(event_id = %params.event_id))]
    async fn send(&self, params: &SendParams) -> Result<(), SendError> {
        let body: Value = serde_json::from_str(&params.content)?;
        let response = post_json(&self.client, &params.hook, &body).await?;
        check_errcode(&response)
    }

    async fn test(&self, params: &SendParams) -> Result<(), SendError> {
        let body = json!({
            "msgtype": "text",
            "text": { "content": format!("test message for {}", params.notice_name) },
        });
        let response = post_json(&self.client, &params.hook, &body).await?;
        check_errcode(&response)
    }
}

pub struct FeiShuSender {
    client: Client,
}

impl FeiShuSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Signature of a signed FeiShu robot
    ///
    /// The key is `"{timestamp}\n{secret}"` and the signed message is empty.
    pub fn signature(secret: &str, timestamp: i64) -> Result<String, SendError> {
        let key = format!("{}\n{}", timestamp, secret);
        let mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| SendError::Rejected(format!("invalid signing key: {e}")))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn signed(mut body: Value, secret: &str) -> Result<Value, SendError> {
        if secret.is_empty() {
            return Ok(body);
        }

        let timestamp = Utc::now().timestamp();
        let sign = Self::signature(secret, timestamp)?;
        if let Some(object) = body.as_object_mut() {
            object.insert("timestamp".to_string(), json!(timestamp.to_string()));
            object.insert("sign".to_string(), json!(sign));
        }
        Ok(body)
    }

    fn check_code(response: &Value) -> Result<(), SendError> {
        match response.get("code").and_then(Value::as_i64) {
            None | Some(0) => Ok(()),
            Some(code) => {
                let message = response
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                Err(SendError::Rejected(format!("code {code}: {message}")))
            }
        }
    }
}

#[async_trait]
impl Sender for FeiShuSender {
    #[instrument(skip_all, fields(event_id = %params.event_id))]
    async fn send(&self, params: &SendParams) -> Result<(), SendError> {
        let body = Self::signed(serde_json::from_str(&params.content)?, &params.sign)?;
        let response = post_json(&self.client, &params.hook, &body).await?;
        Self::check_code(&response)
    }

    async fn test(&self, params: &SendParams) -> Result<(), SendError> {
        let body = json!({
            "msg_type": "text",
            "content": { "text": format!("test message for {}", params.notice_name) },
        });
        let body = Self::signed(body, &params.sign)?;
        let response = post_json(&self.client, &params.hook, &body).await?;
        Self::check_code(&response)
    }
}
