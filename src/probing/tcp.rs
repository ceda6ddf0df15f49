use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{instrument, trace};

use crate::models::ProbingRule;

use super::prober::{ProbeError, ProbeOutcome, Prober, probe_timeout};

/// TCP connect probe: `IsSuccessful` is 1 when the port accepts a
/// connection in time, 0 otherwise
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    #[instrument(skip_all, fields(rule_id = %rule.rule_id, target = %rule.endpoint.target))]
    async fn pilot(&self, rule: &ProbingRule) -> Result<ProbeOutcome, ProbeError> {
        let target = rule.endpoint.target.as_str();
        if !target.contains(':') {
            return Err(ProbeError::InvalidTarget(target.to_string()));
        }

        let start = Instant::now();
        let connected = matches!(
            timeout(probe_timeout(rule), TcpStream::connect(target)).await,
            Ok(Ok(_))
        );
        let elapsed = start.elapsed().as_millis() as f64;
        trace!("connected: {}", connected);

        Ok(ProbeOutcome::new(
            rule,
            BTreeMap::from([
                ("IsSuccessful".to_string(), if connected { 1.0 } else { 0.0 }),
                ("ResponseTime".to_string(), elapsed),
            ]),
        ))
    }
}
