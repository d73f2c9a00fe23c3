use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel frame sent once per request after every result has been accounted for.
pub const DONE_MARKER: &[u8] = br#"{"status":"done"}"#;

/// Which probe strategy a request runs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Latency,
    Throughput,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Latency => f.pad("latency"),
            ProbeKind::Throughput => f.pad("throughput"),
        }
    }
}

/// Fields shared by every request kind.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    /// Raw target lines: bare IPs or CIDR blocks, possibly multi-line.
    #[serde(alias = "ips")]
    pub targets: Vec<String>,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LatencyRequest {
    #[serde(flatten)]
    pub spec: TargetSpec,
    /// Results slower than this are dropped. `None` or any value `<= 0` disables the filter.
    #[serde(default, alias = "max_latency")]
    pub max_latency_ms: Option<i64>,
}

impl LatencyRequest {
    pub fn latency_filter(&self) -> Option<u64> {
        self.max_latency_ms
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|&ms| ms > 0)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ThroughputRequest {
    #[serde(flatten)]
    pub spec: TargetSpec,
    pub download_url: String,
}

/// One scan request as received from a consumer.
///
/// The `type` field selects the variant; fields belonging to the other
/// variant are ignored.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScanRequest {
    #[serde(alias = "ping")]
    Latency(LatencyRequest),
    #[serde(alias = "speed")]
    Throughput(ThroughputRequest),
}

impl ScanRequest {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ScanRequest::Latency(_) => ProbeKind::Latency,
            ScanRequest::Throughput(_) => ProbeKind::Throughput,
        }
    }

    pub fn spec(&self) -> &TargetSpec {
        match self {
            ScanRequest::Latency(r) => &r.spec,
            ScanRequest::Throughput(r) => &r.spec,
        }
    }
}

/// A single expanded probe target. `order` is its index in the expanded sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub order: usize,
    pub ip: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    /// Part of the wire schema; probes currently report timeouts as `Error`.
    Timeout,
    Error,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Ok => f.pad("ok"),
            ProbeStatus::Timeout => f.pad("timeout"),
            ProbeStatus::Error => f.pad("error"),
        }
    }
}

/// One probe outcome for an IP:port, correlated to its target by `order`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub order: usize,
    pub ip: String,
    pub port: u16,
    pub ping_time_ms: i64,
    pub download_mbps: f64,
    pub status: ProbeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl ScanResult {
    fn blank(ip: &str, port: u16, status: ProbeStatus) -> Self {
        Self {
            order: 0,
            ip: ip.to_string(),
            port,
            ping_time_ms: 0,
            download_mbps: 0.0,
            status,
            error_msg: None,
        }
    }

    pub fn latency_ok(ip: &str, port: u16, ping_time_ms: i64) -> Self {
        Self {
            ping_time_ms,
            ..Self::blank(ip, port, ProbeStatus::Ok)
        }
    }

    pub fn throughput_ok(ip: &str, port: u16, download_mbps: f64) -> Self {
        Self {
            download_mbps,
            ..Self::blank(ip, port, ProbeStatus::Ok)
        }
    }

    pub fn failed(ip: &str, port: u16, error_msg: impl Into<String>) -> Self {
        Self {
            error_msg: Some(error_msg.into()),
            ..Self::blank(ip, port, ProbeStatus::Error)
        }
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ProbeStatus::Ok
    }
}

/// Per-request delivery counters, reported once the join barrier has passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub expanded: usize,
    pub delivered: usize,
    pub suppressed: usize,
    pub delivery_failures: usize,
    pub lost: usize,
}

/// Report written by the one-shot CLI mode.
#[derive(Serialize, Debug, Clone)]
pub struct ScanReport {
    pub started_at: String,
    pub finished_at: String,
    pub kind: ProbeKind,
    pub expanded: usize,
    pub delivered: usize,
    pub results: Vec<ScanResult>,
}
