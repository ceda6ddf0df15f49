use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{instrument, trace};

use crate::models::ProbingRule;

use super::prober::{ProbeError, ProbeOutcome, Prober, probe_timeout};

static PACKET_LOSS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)% packet loss").expect("static pattern"));

static RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"= ([\d.]+)/([\d.]+)/([\d.]+)(?:/[\d.]+)? ms").expect("static pattern")
});

/// ICMP echo through the system `ping`
///
/// Reports `PacketLoss` (percent) and `MinRtt`, `AvgRtt`, `MaxRtt` (ms).
/// When every packet is lost the round trip times are 0.
pub struct IcmpProber;

/// Extract loss and round trip times from `ping` output
pub fn parse_ping_output(output: &str) -> Result<BTreeMap<String, f64>, ProbeError> {
    let loss = PACKET_LOSS
        .captures(output)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .ok_or_else(|| ProbeError::Parse("no packet loss summary".to_string()))?;

    let mut values = BTreeMap::from([
        ("PacketLoss".to_string(), loss),
        ("MinRtt".to_string(), 0.0),
        ("AvgRtt".to_string(), 0.0),
        ("MaxRtt".to_string(), 0.0),
    ]);

    if let Some(caps) = RTT.captures(output) {
        for (index, name) in ["MinRtt", "AvgRtt", "MaxRtt"].iter().enumerate() {
            let value = caps[index + 1]
                .parse::<f64>()
                .map_err(|e| ProbeError::Parse(format!("{name}: {e}")))?;
            values.insert(name.to_string(), value);
        }
    }

    Ok(values)
}

#[async_trait]
impl Prober for IcmpProber {
    #[instrument(skip_all, fields(rule_id = %rule.rule_id, target = %rule.endpoint.target))]
    async fn pilot(&self, rule: &ProbingRule) -> Result<ProbeOutcome, ProbeError> {
        let target = rule.endpoint.target.trim();
        if target.is_empty() || target.starts_with('-') {
            return Err(ProbeError::InvalidTarget(target.to_string()));
        }

        let count = rule.endpoint.icmp.count.max(1);
        let per_packet = rule.strategy.timeout.max(1);
        let overall = probe_timeout(rule) * (count + 1);

        let output = timeout(
            overall,
            Command::new("ping")
                .arg("-c")
                .arg(count.to_string())
                .arg("-W")
                .arg(per_packet.to_string())
                .arg(target)
                .output(),
        )
        .await
        .map_err(|_| ProbeError::Timeout(overall.as_secs()))?
        .map_err(|e| ProbeError::Command(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!("ping output: {}", stdout);

        Ok(ProbeOutcome::new(rule, parse_ping_output(&stdout)?))
    }
}
