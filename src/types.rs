use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Three-state outcome of a single TCP probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatus::Open => write!(f, "open"),
            PortStatus::Closed => write!(f, "closed"),
            PortStatus::Filtered => write!(f, "filtered"),
        }
    }
}

/// One probed port on a host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortResult {
    pub port: u16,
    pub status: PortStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(rename = "responseTime", skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

/// Counts over a finished scan. Always derived from a result slice.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub total_ports: usize,
    pub open_ports: usize,
    pub closed_ports: usize,
    pub filtered_ports: usize,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl ScanSummary {
    pub fn from_results(results: &[PortResult], duration_ms: u64) -> Self {
        let mut summary = ScanSummary {
            total_ports: results.len(),
            duration_ms,
            ..Default::default()
        };
        for r in results {
            match r.status {
                PortStatus::Open => summary.open_ports += 1,
                PortStatus::Closed => summary.closed_ports += 1,
                PortStatus::Filtered => summary.filtered_ports += 1,
            }
        }
        summary
    }
}

/// Ports of a completed scan together with their summary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub ports: Vec<PortResult>,
    #[serde(flatten)]
    pub summary: ScanSummary,
}

/// Scan outcome wrapped with the identity assigned by the calling layer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanReport {
    pub id: String,
    pub ip: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub outcome: ScanOutcome,
}

/// Parsed output of one ping invocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PingResult {
    pub host: String,
    pub alive: bool,
    /// Last round-trip sample, if any reply arrived.
    pub time: Option<f64>,
    pub packet_loss: f64,
    pub avg_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub times: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PingResult {
    /// Result used whenever the ping utility could not produce usable output.
    pub fn failed(host: &str, error: impl Into<String>) -> Self {
        PingResult {
            host: host.to_string(),
            alive: false,
            time: None,
            packet_loss: 100.0,
            avg_time: 0.0,
            min_time: 0.0,
            max_time: 0.0,
            times: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Protocol specific fields of a connectivity test. Each test kind fills its own subset.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestDetails {
    // http
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,

    // dns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_addresses: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nameserver: Option<String>,

    // tcp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,

    // ping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets_sent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets_received: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_latency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_latency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency: Option<f64>,
}

/// Normalized outcome of any connectivity test.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub success: bool,
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TestDetails>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(port: u16, status: PortStatus) -> PortResult {
        PortResult {
            port,
            status,
            service: None,
            response_time_ms: None,
            banner: None,
        }
    }

    #[test]
    fn summary_counts_add_up() {
        let results = vec![
            entry(22, PortStatus::Open),
            entry(23, PortStatus::Closed),
            entry(24, PortStatus::Filtered),
            entry(80, PortStatus::Open),
        ];
        let s = ScanSummary::from_results(&results, 42);
        assert_eq!(s.total_ports, 4);
        assert_eq!(s.open_ports, 2);
        assert_eq!(s.closed_ports, 1);
        assert_eq!(s.filtered_ports, 1);
        assert_eq!(s.open_ports + s.closed_ports + s.filtered_ports, s.total_ports);
        assert_eq!(s.duration_ms, 42);
    }

    #[test]
    fn empty_summary_is_all_zero() {
        let s = ScanSummary::from_results(&[], 0);
        assert_eq!(s, ScanSummary::default());
    }

    #[test]
    fn port_result_uses_wire_names() {
        let mut r = entry(443, PortStatus::Open);
        r.response_time_ms = Some(12);
        r.service = Some("HTTPS".into());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "open");
        assert_eq!(v["responseTime"], 12);
        assert!(v.get("banner").is_none());
    }

    #[test]
    fn outcome_flattens_summary() {
        let ports = vec![entry(1, PortStatus::Closed)];
        let outcome = ScanOutcome {
            summary: ScanSummary::from_results(&ports, 5),
            ports,
        };
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["totalPorts"], 1);
        assert_eq!(v["closedPorts"], 1);
        assert_eq!(v["duration"], 5);
    }

    #[test]
    fn failed_ping_is_not_alive() {
        let p = PingResult::failed("10.0.0.1", "boom");
        assert!(!p.alive);
        assert_eq!(p.packet_loss, 100.0);
        assert!(p.times.is_empty());
        assert_eq!(p.error.as_deref(), Some("boom"));
    }
}
