//! Request shapes shared by the CLI and the HTTP API, and the checks that turn
//! them into ready-to-run operations. Nothing here touches the network.

use crate::config::Config;
use crate::connectivity::{HttpMethod, RecordType, TestKind, TestSpec};
use crate::errors::ValidationError;
use crate::ping::PingOptions;
use crate::ports::{port_range, ScanPreset};
use crate::scanner::ScanOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Upper bound for the single-shot TCP/HTTP/DNS test timeouts.
pub const MAX_TEST_TIMEOUT_MS: u64 = 60_000;

/// RFC 1123 hostname check. Underscores are tolerated so service names such
/// as `_dmarc.example.com` can be resolved.
pub fn is_valid_hostname(s: &str) -> bool {
    let s = s.strip_suffix('.').unwrap_or(s);
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = s.split('.').collect();
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    // An all-numeric last label is a mistyped address, not a name.
    let tld_ok = labels
        .last()
        .map_or(false, |tld| !tld.chars().all(|c| c.is_ascii_digit()));
    labels_ok && tld_ok
}

pub fn is_valid_target(s: &str) -> bool {
    s.parse::<IpAddr>().is_ok() || is_valid_hostname(s)
}

/// Trim and check a scan/ping/TCP target.
pub fn validate_target(s: &str) -> Result<String, ValidationError> {
    let t = s.trim();
    if is_valid_target(t) {
        Ok(t.to_string())
    } else {
        Err(ValidationError::InvalidTarget(t.to_string()))
    }
}

pub fn validate_port(port: i64) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(ValidationError::InvalidPort(port)),
    }
}

fn check_range(field: &'static str, got: u64, min: u64, max: u64) -> Result<u64, ValidationError> {
    if (min..=max).contains(&got) {
        Ok(got)
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            got,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(default)]
    pub ip: String,
    pub ports: Option<Vec<i64>>,
    pub start_port: Option<i64>,
    pub end_port: Option<i64>,
    pub scan_type: Option<ScanPreset>,
    pub timeout: Option<u64>,
}

/// A validated scan, ready for the scanner.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub host: String,
    pub ports: Vec<u16>,
    pub options: ScanOptions,
}

impl ScanRequest {
    /// Pick the port list: explicit ports win, then `startPort..endPort`,
    /// then the preset (quick when absent). Duplicates are dropped.
    pub fn resolve_ports(&self, max_ports: usize) -> Result<Vec<u16>, ValidationError> {
        let ports = if let Some(list) = &self.ports {
            let mut seen = HashSet::new();
            let mut out = Vec::with_capacity(list.len());
            for &p in list {
                let port = validate_port(p)?;
                if seen.insert(port) {
                    out.push(port);
                }
            }
            out
        } else if let (Some(start), Some(end)) = (self.start_port, self.end_port) {
            let (s, e) = match (validate_port(start), validate_port(end)) {
                (Ok(s), Ok(e)) if s <= e => (s, e),
                _ => return Err(ValidationError::InvalidPortRange { start, end }),
            };
            let count = usize::from(e - s) + 1;
            if count > max_ports {
                return Err(ValidationError::TooManyPorts {
                    got: count,
                    max: max_ports,
                });
            }
            port_range(s, e)
        } else {
            self.scan_type.unwrap_or_default().ports()
        };

        if ports.is_empty() {
            return Err(ValidationError::Missing("At least one port is required"));
        }
        if ports.len() > max_ports && self.ports.is_some() {
            return Err(ValidationError::TooManyPorts {
                got: ports.len(),
                max: max_ports,
            });
        }
        Ok(ports)
    }

    pub fn validate(&self, config: &Config) -> Result<ScanPlan, ValidationError> {
        let host = validate_target(&self.ip)?;
        let sc = &config.scan;
        let timeout = check_range(
            "timeout",
            self.timeout.unwrap_or(sc.default_timeout_ms),
            sc.min_timeout_ms,
            sc.max_timeout_ms,
        )?;
        let ports = self.resolve_ports(sc.max_ports)?;
        Ok(ScanPlan {
            host,
            ports,
            options: ScanOptions {
                timeout: Duration::from_millis(timeout),
                concurrency: sc.concurrency,
                grab_banners: sc.grab_banners,
            },
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PingRequest {
    #[serde(default)]
    pub ip: String,
    pub count: Option<u32>,
    pub timeout: Option<u64>,
}

impl PingRequest {
    pub fn validate(&self, config: &Config) -> Result<(String, PingOptions), ValidationError> {
        let host = validate_target(&self.ip)?;
        let options = ping_options(config, self.count, self.timeout)?;
        Ok((host, options))
    }
}

fn ping_options(
    config: &Config,
    count: Option<u32>,
    timeout: Option<u64>,
) -> Result<PingOptions, ValidationError> {
    let pc = &config.ping;
    let count = check_range(
        "count",
        u64::from(count.unwrap_or(pc.default_count)),
        1,
        u64::from(pc.max_count),
    )?;
    let timeout = check_range(
        "timeout",
        timeout.unwrap_or(pc.default_timeout_ms),
        pc.min_timeout_ms,
        pc.max_timeout_ms,
    )?;
    Ok(PingOptions {
        count: count as u32,
        timeout: Duration::from_millis(timeout),
    })
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestOptions {
    pub count: Option<u32>,
    pub timeout: Option<u64>,
    pub method: Option<String>,
    pub follow_redirects: Option<bool>,
    pub record_type: Option<String>,
    pub nameserver: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TestRequest {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub target: String,
    pub port: Option<i64>,
    #[serde(default)]
    pub options: TestOptions,
}

impl TestRequest {
    pub fn validate(&self, config: &Config) -> Result<TestSpec, ValidationError> {
        let kind: TestKind = self.kind.parse()?;
        let target = self.target.trim();
        if target.is_empty() {
            return Err(ValidationError::Missing("Target is required"));
        }
        let opts = &self.options;
        let tc = &config.tests;
        let test_timeout = |default: u64| -> Result<Duration, ValidationError> {
            let ms = check_range(
                "timeout",
                opts.timeout.unwrap_or(default),
                1,
                MAX_TEST_TIMEOUT_MS,
            )?;
            Ok(Duration::from_millis(ms))
        };

        let spec = match kind {
            TestKind::Ping => TestSpec::Ping {
                host: validate_target(target)?,
                options: ping_options(config, opts.count, opts.timeout)?,
            },
            TestKind::Tcp => {
                let host = validate_target(target)?;
                let port = self
                    .port
                    .ok_or(ValidationError::Missing(
                        "Valid port (1-65535) is required for TCP test",
                    ))
                    .and_then(validate_port)?;
                TestSpec::Tcp {
                    host,
                    port,
                    timeout: test_timeout(tc.tcp_timeout_ms)?,
                }
            }
            TestKind::Http => TestSpec::Http {
                url: validate_http_url(target)?,
                method: opts
                    .method
                    .as_deref()
                    .map(str::parse::<HttpMethod>)
                    .transpose()?
                    .unwrap_or_default(),
                timeout: test_timeout(tc.http_timeout_ms)?,
                follow_redirects: opts.follow_redirects.unwrap_or(true),
            },
            TestKind::Dns => {
                if !is_valid_hostname(target) {
                    return Err(ValidationError::InvalidTarget(target.to_string()));
                }
                TestSpec::Dns {
                    hostname: target.to_string(),
                    record_type: opts
                        .record_type
                        .as_deref()
                        .map(str::parse::<RecordType>)
                        .transpose()?
                        .unwrap_or_default(),
                    nameserver: opts
                        .nameserver
                        .as_deref()
                        .map(parse_nameserver)
                        .transpose()?,
                    timeout: test_timeout(tc.dns_timeout_ms)?,
                }
            }
        };
        Ok(spec)
    }
}

/// Absolute `http`/`https` URL with a host.
pub fn validate_http_url(s: &str) -> Result<String, ValidationError> {
    let url = reqwest::Url::parse(s.trim()).map_err(|_| ValidationError::InvalidUrl(s.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url.to_string()),
        _ => Err(ValidationError::InvalidUrl(s.to_string())),
    }
}

/// `1.1.1.1`, `1.1.1.1:5353` or `[2606:4700::1111]:53`. Port defaults to 53.
pub fn parse_nameserver(s: &str) -> Result<SocketAddr, ValidationError> {
    let s = s.trim();
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| ValidationError::InvalidNameserver(s.to_string()))
}
