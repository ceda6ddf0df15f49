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

/// DingDing robot, optionally signed
pub struct DingDingSender {
    client: Client,
}

impl DingDingSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Append `timestamp` and `sign` query parameters for a signed robot
    ///
    /// `timestamp` is in milliseconds.
    pub fn sign_url(base_url: &str, secret: &str, timestamp: i64) -> Result<String, SendError> {
        if secret.is_empty() {
            return Ok(base_url.to_string());
        }

        let string_to_sign = format!("{}\n{}", timestamp, secret);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| SendError::Rejected(format!("invalid signing key: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        let sign = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        let separator = if base_url.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{}timestamp={}&sign={}",
            base_url,
            separator,
            timestamp,
            urlencoding::encode(&sign)
        ))
    }

    async fn post(&self, params: &SendParams, body: &Value) -> Result<(), SendError> {
        if params.hook.is_empty() {
            return Err(SendError::MissingField("hook url"));
        }

        let url = Self::sign_url(&params.hook, &params.sign, Utc::now().timestamp_millis())?;
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(SendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let response: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        match response.get("errcode").and_then(Value::as_i64) {
            None | Some(0) => {
                debug!("DingDing accepted the message");
                Ok(())
            }
            Some(code) => {
                let message = response
                    .get("errmsg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                Err(SendError::Rejected(format!("errcode {code}: {message}")))
            }
        }
    }
}

#[async_trait]
impl Sender for DingDingSender {
    #[instrument(skip_all, fields(event_id = %params.event_id))]
    async fn send(&self, params: &SendParams) -> Result<(), SendError> {
        let body: Value = serde_json::from_str(&params.content)?;
        self.post(params, &body).await
    }

    async fn test(&self, params: &SendParams) -> Result<(), SendError> {
        let body = json!({
            "msgtype": "text",
            "text": { "content": format!("test message for {}", params.notice_name) },
        });
        self.post(params, &body).await
    }
}
