use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Method;
use tracing::{instrument, trace, warn};

use crate::models::ProbingRule;

use super::prober::{ProbeError, ProbeOutcome, Prober, probe_timeout};

/// HTTP(S) endpoint probe
///
/// Reports `StatusCode` and `Latency` (ms). A request that never gets a
/// response reports status code 0.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for HttpProber {
    #[instrument(skip_all, fields(rule_id = %rule.rule_id, target = %rule.endpoint.target))]
    async fn pilot(&self, rule: &ProbingRule) -> Result<ProbeOutcome, ProbeError> {
        let http = &rule.endpoint.http;
        let method = Method::from_bytes(http.method.to_uppercase().as_bytes())
            .map_err(|_| ProbeError::InvalidTarget(format!("method {}", http.method)))?;

        let mut request = self
            .client
            .request(method, &rule.endpoint.target)
            .timeout(probe_timeout(rule));
        for (name, value) in &http.headers {
            request = request.header(name, value);
        }
        if !http.body.is_empty() {
            request = request.body(http.body.clone());
        }

        let start = Instant::now();
        let status = match request.send().await {
            Ok(response) => response.status().as_u16(),
            Err(e) => {
                warn!("http probe failed: {}", e);
                0
            }
        };
        let latency = start.elapsed().as_millis() as f64;
        trace!("status {} in {}ms", status, latency);

        Ok(ProbeOutcome::new(
            rule,
            BTreeMap::from([
                ("StatusCode".to_string(), f64::from(status)),
                ("Latency".to_string(), latency),
            ]),
        ))
    }
}
