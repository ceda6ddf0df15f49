//! Protocol probers and the identity of their results

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::models::{LabelValue, Labels, ProbeProtocol, ProbingRule};

use super::{http::HttpProber, icmp::IcmpProber, ssl::SslProber, tcp::TcpProber};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {0}s")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("probe command failed: {0}")]
    Command(String),

    #[error("unexpected probe output: {0}")]
    Parse(String),

    #[error("invalid target '{0}'")]
    InvalidTarget(String),

    #[error("no prober registered for {0}")]
    Unsupported(ProbeProtocol),
}

/// Values of one probe run plus the identity of the probed endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub values: BTreeMap<String, f64>,
    pub labels: Labels,
    pub fingerprint: String,
}

impl ProbeOutcome {
    pub fn new(rule: &ProbingRule, values: BTreeMap<String, f64>) -> Self {
        let labels = probe_labels(rule);
        let fingerprint = fingerprint(&labels);
        Self {
            values,
            labels,
            fingerprint,
        }
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn pilot(&self, rule: &ProbingRule) -> Result<ProbeOutcome, ProbeError>;
}

/// Labels identifying a probed endpoint
pub fn probe_labels(rule: &ProbingRule) -> Labels {
    Labels::from([
        ("rule_id".to_string(), LabelValue::from(rule.rule_id.as_str())),
        ("rule_name".to_string(), LabelValue::from(rule.rule_name.as_str())),
        ("protocol".to_string(), LabelValue::from(rule.protocol.to_string())),
        ("target".to_string(), LabelValue::from(rule.endpoint.target.as_str())),
    ])
}

/// Hex SHA-256 over the label set in key order
pub fn fingerprint(labels: &Labels) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in labels {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b",");
    }

    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub(crate) fn probe_timeout(rule: &ProbingRule) -> Duration {
    Duration::from_secs(rule.strategy.timeout.max(1))
}

/// Maps each protocol to its prober
#[derive(Clone, Default)]
pub struct ProberRegistry {
    probers: HashMap<ProbeProtocol, Arc<dyn Prober>>,
}

impl ProberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        Self::new()
            .with(ProbeProtocol::Http, Arc::new(HttpProber::new()))
            .with(ProbeProtocol::Tcp, Arc::new(TcpProber))
            .with(ProbeProtocol::Icmp, Arc::new(IcmpProber))
            .with(ProbeProtocol::Ssl, Arc::new(SslProber::new()))
    }

    pub fn with(mut self, protocol: ProbeProtocol, prober: Arc<dyn Prober>) -> Self {
        self.probers.insert(protocol, prober);
        self
    }

    pub async fn pilot(&self, rule: &ProbingRule) -> Result<ProbeOutcome, ProbeError> {
        match self.probers.get(&rule.protocol) {
            Some(prober) => prober.pilot(rule).await,
            None => Err(ProbeError::Unsupported(rule.protocol)),
        }
    }
}
