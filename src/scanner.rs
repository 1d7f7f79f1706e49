use crate::ports::service_label;
use crate::prober::probe_addr;
use crate::types::{PortResult, PortStatus, ScanOutcome, ScanSummary};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on the batch size regardless of what the caller asks for.
pub const MAX_CONCURRENCY: usize = 5_000;

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Per-connection connect timeout.
    pub timeout: Duration,
    /// Batch size, i.e. the maximum number of sockets in flight.
    pub concurrency: usize,
    /// Read a short passive banner from open ports.
    pub grab_banners: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            concurrency: 50,
            grab_banners: false,
        }
    }
}

/// Scan `ports` on `host` using asynchronous TCP connects, `concurrency` ports at a time.
///
/// - Ports are split into consecutive batches of `concurrency`; a batch must
///   finish completely before the next one starts.
/// - Each probe is bounded by `tokio::time::timeout`.
/// - The returned list is sorted ascending by port and has one entry per
///   requested port.
pub async fn scan_ports(host: &str, ports: &[u16], opts: ScanOptions) -> Vec<PortResult> {
    scan_ports_internal(host, ports, opts, None, None).await
}

/// Variant that accepts a `CancellationToken` to allow external cancellation.
///
/// Cancellation is checked between batches: in-flight probes run to their own
/// timeout and ports of batches that never started are left out of the result.
pub async fn scan_ports_with_cancel(
    host: &str,
    ports: &[u16],
    opts: ScanOptions,
    cancel: CancellationToken,
) -> Vec<PortResult> {
    scan_ports_internal(host, ports, opts, Some(cancel), None).await
}

/// Live counters for a running scan, readable from other tasks.
#[derive(Clone, Debug)]
pub struct SharedProgress {
    pub total: Arc<AtomicU64>,
    pub scanned_done: Arc<AtomicU64>,
    pub open_count: Arc<AtomicU64>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self {
            total: Arc::new(AtomicU64::new(0)),
            scanned_done: Arc::new(AtomicU64::new(0)),
            open_count: Arc::new(AtomicU64::new(0)),
        }
    }

    fn record(&self, result: &PortResult) {
        self.scanned_done.fetch_add(1, Ordering::Relaxed);
        if result.status == PortStatus::Open {
            self.open_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for SharedProgress {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn scan_ports_with_progress(
    host: &str,
    ports: &[u16],
    opts: ScanOptions,
    cancel: CancellationToken,
    shared: SharedProgress,
) -> Vec<PortResult> {
    scan_ports_internal(host, ports, opts, Some(cancel), Some(shared)).await
}

/// Scan and summarise, measuring wall-clock duration.
pub async fn scan_host(host: &str, ports: &[u16], opts: ScanOptions) -> ScanOutcome {
    let start = Instant::now();
    let ports = scan_ports(host, ports, opts).await;
    let summary = ScanSummary::from_results(&ports, start.elapsed().as_millis() as u64);
    info!(
        host,
        total = summary.total_ports,
        open = summary.open_ports,
        closed = summary.closed_ports,
        filtered = summary.filtered_ports,
        duration_ms = summary.duration_ms,
        "scan finished"
    );
    ScanOutcome { ports, summary }
}

async fn scan_ports_internal(
    host: &str,
    ports: &[u16],
    opts: ScanOptions,
    cancel_opt: Option<CancellationToken>,
    shared_opt: Option<SharedProgress>,
) -> Vec<PortResult> {
    if let Some(s) = &shared_opt {
        s.total.store(ports.len() as u64, Ordering::Relaxed);
    }
    if ports.is_empty() {
        return Vec::new();
    }

    let ip = match resolve_target(host, opts.timeout).await {
        Ok(ip) => ip,
        Err(e) => {
            warn!(host, error = %e, "target did not resolve, reporting every port as filtered");
            let mut results: Vec<PortResult> = ports.iter().map(|&p| unreachable_result(p)).collect();
            if let Some(s) = &shared_opt {
                results.iter().for_each(|r| s.record(r));
            }
            results.sort_by_key(|r| r.port);
            return results;
        }
    };

    let cancel = cancel_opt.unwrap_or_default();
    let timeout = opts.timeout;
    let grab = opts.grab_banners;
    debug!(host, %ip, ports = ports.len(), concurrency = opts.concurrency, "scan starting");

    run_batches(ports, opts.concurrency, &cancel, shared_opt.as_ref(), move |port| {
        probe_addr(SocketAddr::new(ip, port), timeout, grab)
    })
    .await
}

/// Drive `probe` over `ports` in strict batches of `concurrency`.
pub(crate) async fn run_batches<F, Fut>(
    ports: &[u16],
    concurrency: usize,
    cancel: &CancellationToken,
    progress: Option<&SharedProgress>,
    probe: F,
) -> Vec<PortResult>
where
    F: Fn(u16) -> Fut,
    Fut: Future<Output = PortResult> + Send + 'static,
{
    let batch_size = concurrency.clamp(1, MAX_CONCURRENCY);
    let mut results = Vec::with_capacity(ports.len());

    for batch in ports.chunks(batch_size) {
        if cancel.is_cancelled() {
            debug!(remaining = ports.len() - results.len(), "scan cancelled");
            break;
        }

        let mut set = JoinSet::new();
        for &port in batch {
            set.spawn(probe(port));
        }

        let mut pending: Vec<u16> = batch.to_vec();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => {
                    if let Some(i) = pending.iter().position(|&p| p == result.port) {
                        pending.swap_remove(i);
                    }
                    if let Some(p) = progress {
                        p.record(&result);
                    }
                    results.push(result);
                }
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }

        // A panicked probe still owes the caller one entry for its port.
        for port in pending {
            let result = unreachable_result(port);
            if let Some(p) = progress {
                p.record(&result);
            }
            results.push(result);
        }
    }

    results.sort_by_key(|r| r.port);
    results
}

/// Resolve the scan target once. IP literals are returned without a lookup.
async fn resolve_target(host: &str, timeout: Duration) -> io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let budget = timeout.max(Duration::from_secs(2));
    let mut addrs = time::timeout(budget, tokio::net::lookup_host((host, 0)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "name resolution timed out"))??;
    addrs
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses for host"))
}

fn unreachable_result(port: u16) -> PortResult {
    PortResult {
        port,
        status: PortStatus::Filtered,
        service: Some(service_label(port)),
        response_time_ms: Some(0),
        banner: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fake(port: u16) -> PortResult {
        PortResult {
            port,
            status: if port % 2 == 0 { PortStatus::Open } else { PortStatus::Closed },
            service: None,
            response_time_ms: None,
            banner: None,
        }
    }

    #[tokio::test]
    async fn concurrency_cap_is_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let ports: Vec<u16> = (1..=23).collect();

        let results = run_batches(&ports, 5, &CancellationToken::new(), None, |port| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(15)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                fake(port)
            }
        })
        .await;

        assert_eq!(results.len(), ports.len());
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn next_batch_waits_for_slow_probe() {
        // Port 1 is slow; ports of the second batch must not start before it finishes.
        let finished_first = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));
        let ports: Vec<u16> = vec![1, 2, 3, 4];

        run_batches(&ports, 2, &CancellationToken::new(), None, |port| {
            let finished_first = finished_first.clone();
            let violations = violations.clone();
            async move {
                if port <= 2 {
                    let delay = if port == 1 { 60 } else { 1 };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    finished_first.fetch_add(1, Ordering::SeqCst);
                } else if finished_first.load(Ordering::SeqCst) < 2 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                fake(port)
            }
        })
        .await;

        assert_eq!(violations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn output_is_sorted_whatever_the_completion_order() {
        let ports: Vec<u16> = vec![9, 3, 7, 1, 5];
        let results = run_batches(&ports, 10, &CancellationToken::new(), None, |port| async move {
            tokio::time::sleep(Duration::from_millis(u64::from(10 - port))).await;
            fake(port)
        })
        .await;
        let got: Vec<u16> = results.iter().map(|r| r.port).collect();
        assert_eq!(got, vec![1, 3, 5, 7, 9]);
    }

    #[tokio::test]
    async fn cancelled_token_skips_remaining_batches() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = run_batches(&[1, 2, 3], 1, &cancel, None, |port| async move { fake(port) }).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn progress_counts_every_probe() {
        let progress = SharedProgress::new();
        let ports: Vec<u16> = (1..=10).collect();
        run_batches(&ports, 3, &CancellationToken::new(), Some(&progress), |port| async move {
            fake(port)
        })
        .await;
        assert_eq!(progress.scanned_done.load(Ordering::Relaxed), 10);
        assert_eq!(progress.open_count.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn panicking_probe_still_yields_an_entry() {
        let results = run_batches(&[1, 2, 3], 3, &CancellationToken::new(), None, |port| async move {
            if port == 2 {
                panic!("probe blew up");
            }
            fake(port)
        })
        .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].port, 2);
        assert_eq!(results[1].status, PortStatus::Filtered);
    }

    #[tokio::test]
    async fn unresolvable_target_reports_filtered() {
        let results = scan_ports("no-such-host.invalid", &[443, 80], ScanOptions::default()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].port, 80);
        assert!(results.iter().all(|r| r.status == PortStatus::Filtered));
    }
}
