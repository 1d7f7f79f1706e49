use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// Runtime defaults and validation bounds, optionally loaded from a JSON file.
///
/// Every section falls back to its defaults, so a file only needs to name the
/// values it changes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub ping: PingConfig,
    pub tests: TestConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub default_timeout_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub concurrency: usize,
    pub max_ports: usize,
    pub grab_banners: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 1000,
            min_timeout_ms: 100,
            max_timeout_ms: 5000,
            concurrency: 50,
            max_ports: 1000,
            grab_banners: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PingConfig {
    pub default_count: u32,
    pub max_count: u32,
    pub default_timeout_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            default_count: 4,
            max_count: 10,
            default_timeout_ms: 2000,
            min_timeout_ms: 500,
            max_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TestConfig {
    pub tcp_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub dns_timeout_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            tcp_timeout_ms: 5000,
            http_timeout_ms: 10_000,
            dns_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl Config {
    /// Read and check a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Reject bounds that contradict each other.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scan;
        if s.min_timeout_ms == 0 || s.min_timeout_ms > s.max_timeout_ms {
            bail!(
                "scan timeout bounds are inconsistent: {}..{}",
                s.min_timeout_ms,
                s.max_timeout_ms
            );
        }
        if !(s.min_timeout_ms..=s.max_timeout_ms).contains(&s.default_timeout_ms) {
            bail!(
                "scan.default_timeout_ms {} is outside {}..{}",
                s.default_timeout_ms,
                s.min_timeout_ms,
                s.max_timeout_ms
            );
        }
        if s.concurrency == 0 {
            bail!("scan.concurrency must be at least 1");
        }
        if s.max_ports == 0 || s.max_ports > usize::from(u16::MAX) {
            bail!("scan.max_ports must be between 1 and 65535");
        }

        let p = &self.ping;
        if p.max_count == 0 || !(1..=p.max_count).contains(&p.default_count) {
            bail!("ping.default_count {} is outside 1..{}", p.default_count, p.max_count);
        }
        if p.min_timeout_ms == 0
            || !(p.min_timeout_ms..=p.max_timeout_ms).contains(&p.default_timeout_ms)
        {
            bail!(
                "ping.default_timeout_ms {} is outside {}..{}",
                p.default_timeout_ms,
                p.min_timeout_ms,
                p.max_timeout_ms
            );
        }

        let t = &self.tests;
        if t.tcp_timeout_ms == 0 || t.http_timeout_ms == 0 || t.dns_timeout_ms == 0 {
            bail!("test timeouts must be non-zero");
        }
        Ok(())
    }
}
