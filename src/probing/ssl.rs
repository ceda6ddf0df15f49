use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{instrument, trace};

use crate::models::ProbingRule;

use super::prober::{ProbeError, ProbeOutcome, Prober, probe_timeout};

/// TLS certificate probe
///
/// Reports `ExpireTime` (days until the leaf certificate expires, negative
/// once expired) and `ResponseTime` (ms for connect plus handshake).
pub struct SslProber {
    connector: TlsConnector,
}

impl SslProber {
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|anchor| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                anchor.subject,
                anchor.spki,
                anchor.name_constraints,
            )
        }));

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }
}

impl Default for SslProber {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a target into host and port, defaulting to 443
pub fn split_target(target: &str) -> Result<(String, u16), ProbeError> {
    let target = target
        .trim()
        .trim_start_matches("https://")
        .trim_end_matches('/');

    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| ProbeError::InvalidTarget(target.to_string()))?;
            Ok((host.to_string(), port))
        }
        None if !target.is_empty() => Ok((target.to_string(), 443)),
        None => Err(ProbeError::InvalidTarget(target.to_string())),
    }
}

#[async_trait]
impl Prober for SslProber {
    #[instrument(skip_all, fields(rule_id = %rule.rule_id, target = %rule.endpoint.target))]
    async fn pilot(&self, rule: &ProbingRule) -> Result<ProbeOutcome, ProbeError> {
        let (host, port) = split_target(&rule.endpoint.target)?;
        let server_name = ServerName::try_from(host.as_str())
            .map_err(|_| ProbeError::InvalidTarget(host.clone()))?;
        let limit = probe_timeout(rule);

        let start = Instant::now();
        let stream = timeout(limit, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| ProbeError::Timeout(limit.as_secs()))?
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        let tls = timeout(limit, self.connector.connect(server_name, stream))
            .await
            .map_err(|_| ProbeError::Timeout(limit.as_secs()))?
            .map_err(|e| ProbeError::Tls(e.to_string()))?;
        let response_time = start.elapsed().as_millis() as f64;

        let (_, session) = tls.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| ProbeError::Tls("no peer certificate".to_string()))?;

        let (_, certificate) = x509_parser::parse_x509_certificate(&leaf.0)
            .map_err(|e| ProbeError::Parse(e.to_string()))?;
        let not_after = certificate.validity().not_after.timestamp();
        let days_left = (not_after - Utc::now().timestamp()) / 86_400;
        trace!("certificate expires in {} days", days_left);

        Ok(ProbeOutcome::new(
            rule,
            BTreeMap::from([
                ("ExpireTime".to_string(), days_left as f64),
                ("ResponseTime".to_string(), response_time),
            ]),
        ))
    }
}
