//! Single-shot connectivity tests (TCP, HTTP, DNS, ping) behind one dispatch
//! entry point, [`run_test`]. Every test returns a [`TestResult`]; network
//! failures are reported in the result, never as an `Err`.

use crate::errors::ValidationError;
use crate::ping::{ping_host, PingOptions};
use crate::prober::{connect, read_banner, Connect, BANNER_WAIT};
use crate::types::{TestDetails, TestResult};
use futures::future::join_all;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::rdata::{MX, TXT};
use hickory_resolver::proto::rr::{Name, RData, RecordType as WireRecordType};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info};

pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_millis(5000);

/// Reported nameserver when the system configuration names none.
const SYSTEM_NAMESERVER: &str = "system";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Ping,
    Tcp,
    Http,
    Dns,
}

impl FromStr for TestKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ping" => Ok(TestKind::Ping),
            "tcp" => Ok(TestKind::Tcp),
            "http" => Ok(TestKind::Http),
            "dns" => Ok(TestKind::Dns),
            _ => Err(ValidationError::InvalidTestType(s.to_string())),
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestKind::Ping => "ping",
            TestKind::Tcp => "tcp",
            TestKind::Http => "http",
            TestKind::Dns => "dns",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Head,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "HEAD" => Ok(HttpMethod::Head),
            _ => Err(ValidationError::InvalidMethod(s.to_string())),
        }
    }
}

/// DNS record kinds a test may ask for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    #[default]
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
}

impl FromStr for RecordType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "CNAME" => Ok(RecordType::Cname),
            "MX" => Ok(RecordType::Mx),
            "TXT" => Ok(RecordType::Txt),
            _ => Err(ValidationError::InvalidRecordType(s.to_string())),
        }
    }
}

/// One connectivity test, with the parameters its protocol needs.
#[derive(Debug, Clone)]
pub enum TestSpec {
    Tcp {
        host: String,
        port: u16,
        timeout: Duration,
    },
    Http {
        url: String,
        method: HttpMethod,
        timeout: Duration,
        follow_redirects: bool,
    },
    Dns {
        hostname: String,
        record_type: RecordType,
        nameserver: Option<SocketAddr>,
        timeout: Duration,
    },
    Ping {
        host: String,
        options: PingOptions,
    },
}

impl TestSpec {
    pub fn kind(&self) -> TestKind {
        match self {
            TestSpec::Tcp { .. } => TestKind::Tcp,
            TestSpec::Http { .. } => TestKind::Http,
            TestSpec::Dns { .. } => TestKind::Dns,
            TestSpec::Ping { .. } => TestKind::Ping,
        }
    }
}

/// Run one test and return its normalized result.
pub async fn run_test(spec: &TestSpec) -> TestResult {
    let result = match spec {
        TestSpec::Tcp {
            host,
            port,
            timeout,
        } => tcp_test(host, *port, *timeout).await,
        TestSpec::Http {
            url,
            method,
            timeout,
            follow_redirects,
        } => http_test(url, *method, *timeout, *follow_redirects).await,
        TestSpec::Dns {
            hostname,
            record_type,
            nameserver,
            timeout,
        } => dns_test(hostname, *record_type, *nameserver, *timeout).await,
        TestSpec::Ping { host, options } => ping_test(host, *options).await,
    };
    info!(
        kind = %spec.kind(),
        success = result.success,
        response_time_ms = result.response_time_ms,
        "connectivity test finished"
    );
    result
}

/// Can a TCP connection to `host:port` be established within `timeout`?
///
/// Refused and silently dropped connections both count as failures.
pub async fn tcp_test(host: &str, port: u16, timeout: Duration) -> TestResult {
    let (outcome, elapsed) = connect((host, port), timeout).await;
    tcp_result(outcome, elapsed, timeout).await
}

async fn tcp_result(outcome: Connect, elapsed: Duration, timeout: Duration) -> TestResult {
    match outcome {
        Connect::Connected(mut stream) => {
            let wait = timeout.saturating_sub(elapsed).min(BANNER_WAIT);
            let banner = read_banner(&mut stream, wait).await;
            TestResult {
                success: true,
                response_time_ms: millis(elapsed),
                error: None,
                details: Some(TestDetails {
                    connected: Some(true),
                    banner,
                    ..Default::default()
                }),
            }
        }
        Connect::Refused(e) | Connect::Failed(e) => {
            tcp_failure(millis(elapsed), e.to_string())
        }
        Connect::TimedOut => tcp_failure(millis(timeout), "Connection timed out".into()),
    }
}

fn tcp_failure(response_time_ms: u64, error: String) -> TestResult {
    TestResult {
        success: false,
        response_time_ms,
        error: Some(error),
        details: Some(TestDetails {
            connected: Some(false),
            ..Default::default()
        }),
    }
}

/// Issue one HTTP request. Success means a 2xx status.
pub async fn http_test(
    url: &str,
    method: HttpMethod,
    timeout: Duration,
    follow_redirects: bool,
) -> TestResult {
    let start = Instant::now();
    let policy = if follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .redirect(policy)
        .build()
    {
        Ok(c) => c,
        Err(e) => return plain_failure(millis(start.elapsed()), error_chain(&e)),
    };

    match client.request(method.as_reqwest(), url).send().await {
        Ok(response) => {
            let response_time_ms = millis(start.elapsed());
            let status = response.status();

            let mut headers: BTreeMap<String, String> = BTreeMap::new();
            for (name, value) in response.headers() {
                let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|v| {
                        v.push_str(", ");
                        v.push_str(&value);
                    })
                    .or_insert(value);
            }
            let content_length = headers
                .get("content-length")
                .and_then(|v| v.trim().parse::<u64>().ok());

            debug!(url, status = status.as_u16(), "http response");
            TestResult {
                success: status.is_success(),
                response_time_ms,
                error: None,
                details: Some(TestDetails {
                    status_code: Some(status.as_u16()),
                    content_length,
                    headers: Some(headers),
                    ..Default::default()
                }),
            }
        }
        Err(e) => plain_failure(millis(start.elapsed()), error_chain(&e)),
    }
}

fn plain_failure(response_time_ms: u64, error: String) -> TestResult {
    TestResult {
        success: false,
        response_time_ms,
        error: Some(error),
        details: None,
    }
}

/// A resolver bound to one nameserver configuration.
///
/// Each DNS test builds its own instance, so concurrent tests against
/// different nameservers never share resolver state.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
    nameserver: String,
}

impl DnsResolver {
    /// Resolver using the host's system configuration.
    pub fn system(timeout: Duration) -> Result<Self, String> {
        let (config, mut opts) =
            hickory_resolver::system_conf::read_system_conf().map_err(|e| e.to_string())?;
        opts.timeout = timeout;
        opts.attempts = 1;
        let nameserver = config
            .name_servers()
            .first()
            .map(|ns| ns.socket_addr.ip().to_string())
            .unwrap_or_else(|| SYSTEM_NAMESERVER.to_string());
        Ok(Self {
            inner: TokioAsyncResolver::tokio(config, opts),
            nameserver,
        })
    }

    /// Resolver that only asks `addr` (plain UDP/TCP).
    pub fn with_nameserver(addr: SocketAddr, timeout: Duration) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        Self {
            inner: TokioAsyncResolver::tokio(config, opts),
            nameserver: addr.ip().to_string(),
        }
    }

    pub fn nameserver(&self) -> &str {
        &self.nameserver
    }

    /// Look up `hostname`, rendering each record as a string.
    pub async fn lookup(&self, hostname: &str, record_type: RecordType) -> Result<Vec<String>, String> {
        let err = |e: hickory_resolver::error::ResolveError| e.to_string();
        let records = match record_type {
            RecordType::A => self
                .inner
                .ipv4_lookup(hostname)
                .await
                .map_err(err)?
                .iter()
                .map(|a| a.to_string())
                .collect(),
            RecordType::Aaaa => self
                .inner
                .ipv6_lookup(hostname)
                .await
                .map_err(err)?
                .iter()
                .map(|a| a.to_string())
                .collect(),
            RecordType::Cname => self
                .inner
                .lookup(hostname, WireRecordType::CNAME)
                .await
                .map_err(err)?
                .iter()
                .filter_map(|rdata| match rdata {
                    RData::CNAME(cname) => Some(render_name(&cname.0)),
                    _ => None,
                })
                .collect(),
            RecordType::Mx => self
                .inner
                .mx_lookup(hostname)
                .await
                .map_err(err)?
                .iter()
                .map(render_mx)
                .collect(),
            RecordType::Txt => self
                .inner
                .txt_lookup(hostname)
                .await
                .map_err(err)?
                .iter()
                .map(render_txt)
                .collect(),
        };
        Ok(records)
    }
}

fn strip_root(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_string()
}

/// Domain name without the trailing root dot.
fn render_name(name: &Name) -> String {
    strip_root(&name.to_utf8())
}

/// `mail.example.com (priority: 10)`
fn render_mx(mx: &MX) -> String {
    format!("{} (priority: {})", render_name(mx.exchange()), mx.preference())
}

/// All character-strings of one TXT record joined without separators.
fn render_txt(txt: &TXT) -> String {
    txt.txt_data()
        .iter()
        .map(|chunk| String::from_utf8_lossy(chunk))
        .collect()
}

/// Resolve `hostname` against the system resolver or the given nameserver.
pub async fn dns_test(
    hostname: &str,
    record_type: RecordType,
    nameserver: Option<SocketAddr>,
    timeout: Duration,
) -> TestResult {
    let start = Instant::now();
    let resolver = match nameserver {
        Some(addr) => DnsResolver::with_nameserver(addr, timeout),
        None => match DnsResolver::system(timeout) {
            Ok(r) => r,
            Err(e) => return system_resolver_failure(millis(start.elapsed()), e),
        },
    };
    dns_test_with(&resolver, hostname, record_type, timeout).await
}

/// Resolve `hostname` with a caller-supplied resolver.
pub async fn dns_test_with(
    resolver: &DnsResolver,
    hostname: &str,
    record_type: RecordType,
    timeout: Duration,
) -> TestResult {
    let start = Instant::now();
    let outcome = time::timeout(timeout, resolver.lookup(hostname, record_type)).await;
    let response_time_ms = millis(start.elapsed());
    let nameserver = Some(resolver.nameserver().to_string());

    match outcome {
        Ok(Ok(records)) if records.is_empty() => dns_failure(
            response_time_ms,
            format!("no {record_type:?} records found for {hostname}"),
            nameserver,
        ),
        Ok(Ok(records)) => TestResult {
            success: true,
            response_time_ms,
            error: None,
            details: Some(TestDetails {
                resolved_addresses: Some(records),
                nameserver,
                ..Default::default()
            }),
        },
        Ok(Err(e)) => dns_failure(response_time_ms, e, nameserver),
        Err(_) => dns_failure(response_time_ms, "DNS query timed out".into(), nameserver),
    }
}

/// The system configuration could not be read; no query was sent.
fn system_resolver_failure(response_time_ms: u64, error: String) -> TestResult {
    dns_failure(response_time_ms, error, Some(SYSTEM_NAMESERVER.into()))
}

fn dns_failure(response_time_ms: u64, error: String, nameserver: Option<String>) -> TestResult {
    TestResult {
        success: false,
        response_time_ms,
        error: Some(error),
        details: Some(TestDetails {
            nameserver,
            ..Default::default()
        }),
    }
}

/// Ping mapped onto the test envelope.
pub async fn ping_test(host: &str, options: PingOptions) -> TestResult {
    let ping = ping_host(host, options).await;
    TestResult {
        success: ping.alive,
        response_time_ms: ping.time.map(|t| t.round() as u64).unwrap_or(0),
        error: ping.error.clone(),
        details: Some(TestDetails {
            packets_sent: Some(options.count),
            packets_received: Some(ping.times.len() as u32),
            packet_loss: Some(ping.packet_loss),
            min_latency: Some(ping.min_time),
            max_latency: Some(ping.max_time),
            avg_latency: Some(ping.avg_time),
            ..Default::default()
        }),
    }
}

pub async fn is_host_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    tcp_test(host, port, timeout).await.success
}

/// TCP-test several endpoints concurrently, keyed by `host:port`.
pub async fn test_endpoints(endpoints: &[(String, u16)]) -> BTreeMap<String, TestResult> {
    let runs = endpoints.iter().map(|(host, port)| async move {
        let result = tcp_test(host, *port, DEFAULT_TCP_TIMEOUT).await;
        (format!("{host}:{port}"), result)
    });
    join_all(runs).await.into_iter().collect()
}

#[derive(Debug, Clone)]
pub struct SuiteOptions {
    pub tcp_port: u16,
    pub http_url: Option<String>,
    pub dns_hostname: Option<String>,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            tcp_port: 80,
            http_url: None,
            dns_hostname: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
    pub tcp: TestResult,
    pub http: Option<TestResult>,
    pub dns: Option<TestResult>,
    pub overall_success: bool,
    #[serde(rename = "totalTime")]
    pub total_time_ms: u64,
}

/// Run a TCP test plus the optional HTTP and DNS tests concurrently.
pub async fn run_connectivity_suite(host: &str, opts: &SuiteOptions) -> SuiteResult {
    let start = Instant::now();
    let tcp = tcp_test(host, opts.tcp_port, DEFAULT_TCP_TIMEOUT);
    let http = async {
        match &opts.http_url {
            Some(url) => Some(http_test(url, HttpMethod::Get, DEFAULT_HTTP_TIMEOUT, true).await),
            None => None,
        }
    };
    let dns = async {
        match &opts.dns_hostname {
            Some(name) => Some(dns_test(name, RecordType::A, None, DEFAULT_DNS_TIMEOUT).await),
            None => None,
        }
    };
    let (tcp, http, dns) = tokio::join!(tcp, http, dns);

    let overall_success = tcp.success
        && http.as_ref().map_or(true, |r| r.success)
        && dns.as_ref().map_or(true, |r| r.success);
    SuiteResult {
        tcp,
        http,
        dns,
        overall_success,
        total_time_ms: millis(start.elapsed()),
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Render an error with its sources, e.g. `error sending request: connection refused`.
fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        let text = s.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = s.source();
    }
    out
}
