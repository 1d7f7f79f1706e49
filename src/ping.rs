//! Reachability checks through the operating system's `ping` utility.
//!
//! The utility's text output is parsed into a [`PingResult`]. Parsing relies on
//! English phrases (plus the Spanish Windows loss marker), so localized
//! builds of `ping` may yield a 100% loss result even when replies arrive.

use crate::errors::ExecError;
use crate::types::PingResult;
use futures::future::join_all;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, info, warn};

/// Extra time granted per echo request on top of its own timeout.
const PER_PROBE_MARGIN: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy)]
pub struct PingOptions {
    pub count: u32,
    /// Time to wait for each reply.
    pub timeout: Duration,
}

impl Default for PingOptions {
    fn default() -> Self {
        Self {
            count: 4,
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Argument and output conventions of the local `ping` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// `-n count -w timeout_ms`
    Windows,
    /// `-c count -W timeout_ms`
    MacOs,
    /// `-c count -W timeout_secs`
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Unix
        }
    }

    pub fn args(self, host: &str, opts: &PingOptions) -> Vec<String> {
        let count = opts.count.to_string();
        let timeout_ms = opts.timeout.as_millis() as u64;
        match self {
            Platform::Windows => vec![
                "-n".into(),
                count,
                "-w".into(),
                timeout_ms.to_string(),
                host.into(),
            ],
            Platform::MacOs => vec![
                "-c".into(),
                count,
                "-W".into(),
                timeout_ms.to_string(),
                host.into(),
            ],
            Platform::Unix => {
                let secs = timeout_ms.div_ceil(1000).max(1);
                vec![
                    "-c".into(),
                    count,
                    "-W".into(),
                    secs.to_string(),
                    host.into(),
                ]
            }
        }
    }

    pub fn parse(self, output: &str) -> PingStats {
        match self {
            Platform::Windows => parse_windows_output(output),
            Platform::MacOs | Platform::Unix => parse_unix_output(output),
        }
    }
}

/// Numbers extracted from one run of `ping`.
#[derive(Debug, Clone, PartialEq)]
pub struct PingStats {
    pub times: Vec<f64>,
    pub packet_loss: f64,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

lazy_static! {
    static ref UNIX_TIME: Regex = Regex::new(r"(?i)time=(\d+\.?\d*)\s*ms").unwrap();
    static ref UNIX_LOSS: Regex = Regex::new(r"(?i)(\d+(?:\.\d+)?)%\s*packet\s*loss").unwrap();
    static ref UNIX_STATS: Regex =
        Regex::new(r"=\s*([\d.]+)/([\d.]+)/([\d.]+)/([\d.]+)\s*ms").unwrap();
    static ref WIN_TIME: Regex = Regex::new(r"(?i)time[<=](\d+)ms").unwrap();
    static ref WIN_LOSS: Regex = Regex::new(r"(?i)\((\d+)%\s*(?:loss|perdidos?)\)").unwrap();
    static ref WIN_STATS: Regex = Regex::new(
        r"(?is)Minimum\s*=\s*(\d+)ms.*Maximum\s*=\s*(\d+)ms.*Average\s*=\s*(\d+)ms"
    )
    .unwrap();
}

/// Parse Linux/BSD/macOS `ping` output.
pub fn parse_unix_output(output: &str) -> PingStats {
    let times: Vec<f64> = UNIX_TIME
        .captures_iter(output)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    let packet_loss = first_number(&UNIX_LOSS, output).unwrap_or(100.0);

    // min/avg/max/mdev
    let summary = UNIX_STATS.captures(output).and_then(|c| {
        Some((
            c[1].parse::<f64>().ok()?,
            c[2].parse::<f64>().ok()?,
            c[3].parse::<f64>().ok()?,
        ))
    });

    with_summary(times, packet_loss, summary)
}

/// Parse Windows `ping` output.
pub fn parse_windows_output(output: &str) -> PingStats {
    let times: Vec<f64> = WIN_TIME
        .captures_iter(output)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    let packet_loss = first_number(&WIN_LOSS, output).unwrap_or(100.0);

    // Windows prints Minimum, Maximum, Average in that order.
    let summary = WIN_STATS.captures(output).and_then(|c| {
        let min = c[1].parse::<f64>().ok()?;
        let max = c[2].parse::<f64>().ok()?;
        let avg = c[3].parse::<f64>().ok()?;
        Some((min, avg, max))
    });

    with_summary(times, packet_loss, summary)
}

fn first_number(re: &Regex, output: &str) -> Option<f64> {
    re.captures(output).and_then(|c| c[1].parse().ok())
}

/// Prefer the utility's own min/avg/max, otherwise compute them from the samples.
fn with_summary(times: Vec<f64>, packet_loss: f64, summary: Option<(f64, f64, f64)>) -> PingStats {
    let (min, avg, max) = match summary {
        Some(s) => s,
        None if !times.is_empty() => {
            let min = times.iter().copied().fold(f64::INFINITY, f64::min);
            let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let avg = times.iter().sum::<f64>() / times.len() as f64;
            (min, avg, max)
        }
        None => (0.0, 0.0, 0.0),
    };
    PingStats {
        times,
        packet_loss,
        min,
        avg,
        max,
    }
}

/// Build the result for `host` from parsed statistics.
pub fn result_from_stats(host: &str, stats: PingStats) -> PingResult {
    PingResult {
        host: host.to_string(),
        alive: stats.packet_loss < 100.0,
        time: stats.times.last().copied(),
        packet_loss: stats.packet_loss,
        avg_time: stats.avg,
        min_time: stats.min,
        max_time: stats.max,
        times: stats.times,
        error: None,
    }
}

/// Wall-clock budget for the whole `ping` process. Saturates at
/// `Duration::MAX` instead of overflowing.
pub fn process_budget(opts: &PingOptions) -> Duration {
    opts.timeout
        .saturating_add(PER_PROBE_MARGIN)
        .checked_mul(opts.count.max(1))
        .unwrap_or(Duration::MAX)
}

/// Ping `host` with the platform utility. Never fails: problems end up in `error`.
pub async fn ping_host(host: &str, opts: PingOptions) -> PingResult {
    let platform = Platform::current();
    let args = platform.args(host, &opts);

    match run_ping(&args, process_budget(&opts)).await {
        Ok(stdout) => {
            let result = result_from_stats(host, platform.parse(&stdout));
            info!(
                host,
                alive = result.alive,
                loss = result.packet_loss,
                avg_ms = result.avg_time,
                "ping finished"
            );
            result
        }
        Err(e) => {
            warn!(host, error = %e, "ping failed");
            PingResult::failed(host, e.to_string())
        }
    }
}

/// Single echo request for quick status checks.
pub async fn ping_once(host: &str, timeout: Duration) -> (bool, Option<f64>) {
    let result = ping_host(host, PingOptions { count: 1, timeout }).await;
    (result.alive, result.time)
}

/// Ping several hosts concurrently, keyed by host.
pub async fn ping_hosts(hosts: &[String], opts: PingOptions) -> BTreeMap<String, PingResult> {
    join_all(hosts.iter().map(|h| ping_host(h, opts)))
        .await
        .into_iter()
        .map(|r| (r.host.clone(), r))
        .collect()
}

async fn run_ping(args: &[String], budget: Duration) -> Result<String, ExecError> {
    const TOOL: &str = "ping";
    debug!(?args, budget_ms = budget.as_millis() as u64, "spawning ping");

    let child = Command::new(TOOL)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            tool: TOOL.into(),
            source,
        })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match time::timeout(budget, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ExecError::Io {
                tool: TOOL.into(),
                source,
            })
        }
        Err(_) => {
            return Err(ExecError::Timeout {
                tool: TOOL.into(),
                timeout_ms: budget.as_millis() as u64,
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = if stderr.trim().is_empty() {
            stdout.lines().last().unwrap_or("").trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(ExecError::Failed {
            tool: TOOL.into(),
            status: output.status.to_string(),
            stderr_tail: tail,
        });
    }
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OK: &str = "\
PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.
64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.045 ms
64 bytes from 10.0.0.1: icmp_seq=2 ttl=64 time=0.061 ms
64 bytes from 10.0.0.1: icmp_seq=3 ttl=64 time=0.052 ms
64 bytes from 10.0.0.1: icmp_seq=4 ttl=64 time=0.070 ms

--- 10.0.0.1 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3063ms
rtt min/avg/max/mdev = 0.045/0.057/0.070/0.009 ms
";

    const LINUX_DEAD: &str = "\
PING 10.255.255.1 (10.255.255.1) 56(84) bytes of data.

--- 10.255.255.1 ping statistics ---
4 packets transmitted, 0 received, 100% packet loss, time 3071ms
";

    const MACOS_PARTIAL: &str = "\
PING example.com (93.184.216.34): 56 data bytes
64 bytes from 93.184.216.34: icmp_seq=0 ttl=56 time=12.5 ms
Request timeout for icmp_seq 1
64 bytes from 93.184.216.34: icmp_seq=2 ttl=56 time=14.5 ms

--- example.com ping statistics ---
3 packets transmitted, 2 packets received, 33.3% packet loss
";

    const WINDOWS_OK: &str = "\
Pinging 192.168.1.1 with 32 bytes of data:
Reply from 192.168.1.1: bytes=32 time=3ms TTL=64
Reply from 192.168.1.1: bytes=32 time<1ms TTL=64
Reply from 192.168.1.1: bytes=32 time=2ms TTL=64
Reply from 192.168.1.1: bytes=32 time=5ms TTL=64

Ping statistics for 192.168.1.1:
    Packets: Sent = 4, Received = 4, Lost = 0 (0% loss),
Approximate round trip times in milli-seconds:
    Minimum = 1ms, Maximum = 5ms, Average = 2ms
";

    const WINDOWS_ES: &str = "\
Haciendo ping a 10.0.0.9 con 32 bytes de datos:
Tiempo de espera agotado para esta solicitud.

Estadísticas de ping para 10.0.0.9:
    Paquetes: enviados = 1, recibidos = 0, perdidos = 1
    (100% perdidos),
";

    #[test]
    fn linux_success_prefers_summary_line() {
        let r = result_from_stats("10.0.0.1", parse_unix_output(LINUX_OK));
        assert!(r.alive);
        assert_eq!(r.packet_loss, 0.0);
        assert_eq!(r.times.len(), 4);
        assert_eq!(r.min_time, 0.045);
        assert_eq!(r.avg_time, 0.057);
        assert_eq!(r.max_time, 0.070);
        assert_eq!(r.time, Some(0.070));
        let lo = r.times.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = r.times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!(r.avg_time >= lo && r.avg_time <= hi);
    }

    #[test]
    fn linux_no_replies_is_dead() {
        let r = result_from_stats("10.255.255.1", parse_unix_output(LINUX_DEAD));
        assert!(!r.alive);
        assert_eq!(r.packet_loss, 100.0);
        assert!(r.times.is_empty());
        assert_eq!(r.time, None);
        assert_eq!((r.min_time, r.avg_time, r.max_time), (0.0, 0.0, 0.0));
    }

    #[test]
    fn missing_summary_falls_back_to_samples() {
        let s = parse_unix_output(MACOS_PARTIAL);
        assert_eq!(s.times, vec![12.5, 14.5]);
        assert_eq!(s.packet_loss, 33.3);
        assert_eq!(s.min, 12.5);
        assert_eq!(s.max, 14.5);
        assert_eq!(s.avg, 13.5);
    }

    #[test]
    fn missing_loss_line_means_total_loss() {
        let s = parse_unix_output("ping: unknown host\n");
        assert_eq!(s.packet_loss, 100.0);
        assert!(s.times.is_empty());
    }

    #[test]
    fn windows_output() {
        let s = parse_windows_output(WINDOWS_OK);
        assert_eq!(s.times, vec![3.0, 1.0, 2.0, 5.0]);
        assert_eq!(s.packet_loss, 0.0);
        assert_eq!((s.min, s.avg, s.max), (1.0, 2.0, 5.0));
    }

    #[test]
    fn windows_spanish_loss_marker() {
        let s = parse_windows_output(WINDOWS_ES);
        assert_eq!(s.packet_loss, 100.0);
        assert!(s.times.is_empty());
    }

    #[test]
    fn platform_argument_conventions() {
        let opts = PingOptions {
            count: 3,
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(
            Platform::Windows.args("h", &opts),
            vec!["-n", "3", "-w", "1500", "h"]
        );
        assert_eq!(Platform::Unix.args("h", &opts), vec!["-c", "3", "-W", "2", "h"]);
        assert_eq!(
            Platform::MacOs.args("h", &opts),
            vec!["-c", "3", "-W", "1500", "h"]
        );
    }

    #[test]
    fn budget_exceeds_count_times_timeout() {
        let opts = PingOptions {
            count: 4,
            timeout: Duration::from_millis(2000),
        };
        assert!(process_budget(&opts) > opts.timeout * opts.count);
        assert_eq!(process_budget(&opts), Duration::from_millis(12_000));
    }

    #[test]
    fn huge_budget_saturates() {
        let opts = PingOptions {
            count: u32::MAX,
            timeout: Duration::from_secs(u64::MAX / 2),
        };
        assert_eq!(process_budget(&opts), Duration::MAX);

        let opts = PingOptions {
            count: 1,
            timeout: Duration::MAX,
        };
        assert_eq!(process_budget(&opts), Duration::MAX);
    }

    #[tokio::test]
    async fn unresolvable_host_degrades_to_result() {
        let r = ping_host(
            "no-such-host.invalid",
            PingOptions {
                count: 1,
                timeout: Duration::from_millis(500),
            },
        )
        .await;
        assert!(!r.alive);
        assert_eq!(r.packet_loss, 100.0);
        assert!(r.times.is_empty());
        assert!(r.error.is_some());
    }
}
