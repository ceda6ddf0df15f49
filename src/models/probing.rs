//! Synthetic probing rules and the events they produce

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::event::{AlertEvent, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeProtocol {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "SSL")]
    Ssl,
}

impl fmt::Display for ProbeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeProtocol::Http => "HTTP",
            ProbeProtocol::Icmp => "ICMP",
            ProbeProtocol::Tcp => "TCP",
            ProbeProtocol::Ssl => "SSL",
        };
        f.write_str(name)
    }
}

/// Comparison used to turn a probed value into a failure condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOperator {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl CompareOperator {
    pub fn compare(self, value: f64, expected: f64) -> bool {
        match self {
            CompareOperator::Greater => value > expected,
            CompareOperator::GreaterOrEqual => value >= expected,
            CompareOperator::Less => value < expected,
            CompareOperator::LessOrEqual => value <= expected,
            CompareOperator::Equal => value == expected,
            CompareOperator::NotEqual => value != expected,
        }
    }
}

impl fmt::Display for CompareOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOperator::Greater => ">",
            CompareOperator::GreaterOrEqual => ">=",
            CompareOperator::Less => "<",
            CompareOperator::LessOrEqual => "<=",
            CompareOperator::Equal => "==",
            CompareOperator::NotEqual => "!=",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpEndpoint {
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl Default for HttpEndpoint {
    fn default() -> Self {
        Self {
            method: default_http_method(),
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }
}

fn default_http_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpEndpoint {
    #[serde(default = "default_icmp_count")]
    pub count: u32,
}

impl Default for IcmpEndpoint {
    fn default() -> Self {
        Self {
            count: default_icmp_count(),
        }
    }
}

fn default_icmp_count() -> u32 {
    3
}

/// What to probe
///
/// `target` is a URL for HTTP, `host:port` for TCP and SSL (SSL defaults to
/// port 443), a host for ICMP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEndpoint {
    pub target: String,
    #[serde(default)]
    pub http: HttpEndpoint,
    #[serde(default)]
    pub icmp: IcmpEndpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbingStrategy {
    /// Seconds before a single probe gives up
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds between two probes
    #[serde(default = "default_eval_interval")]
    pub eval_interval: u64,

    pub operator: CompareOperator,
    pub expected_value: f64,

    /// Name of the probed value compared against `expected_value`
    pub field: String,

    /// Consecutive failing probes before the rule fires
    #[serde(default = "default_failure")]
    pub failure: u32,
}

fn default_timeout() -> u64 {
    10
}

fn default_eval_interval() -> u64 {
    10
}

fn default_failure() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbingRule {
    pub tenant_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub protocol: ProbeProtocol,
    pub endpoint: ProbeEndpoint,
    pub strategy: ProbingStrategy,
    #[serde(default)]
    pub notice_id: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,

    /// Minutes between two notifications of a still failing probe
    #[serde(default)]
    pub repeat_notice_interval: i64,

    #[serde(default = "default_recover_notify")]
    pub recover_notify: bool,

    #[serde(default)]
    pub annotations: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_severity() -> Severity {
    Severity::P1
}

fn default_recover_notify() -> bool {
    true
}

fn default_enabled() -> bool {
    true
}

/// Cached state of a failing (or just recovered) probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbingEvent {
    #[serde(flatten)]
    pub event: AlertEvent,

    /// Raw values of the probe that last touched this event
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}
