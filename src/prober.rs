use crate::ports::service_label;
use crate::types::{PortResult, PortStatus};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::{self, Instant};
use tracing::debug;

/// Raw outcome of one timeout-bounded TCP connect.
#[derive(Debug)]
pub(crate) enum Connect {
    Connected(TcpStream),
    Refused(io::Error),
    Failed(io::Error),
    TimedOut,
}

/// Connect once, bounded by `timeout`. Returns the outcome and the time it took.
pub(crate) async fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> (Connect, Duration) {
    let start = Instant::now();
    let outcome = match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Connect::Connected(stream),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => Connect::Refused(e),
        Ok(Err(e)) => Connect::Failed(e),
        Err(_) => Connect::TimedOut,
    };
    (outcome, start.elapsed())
}

/// Map a connect error onto the port status contract.
///
/// Only an active refusal means the host answered without a listener; every
/// other failure (unreachable, reset, resolution failure, ...) is reported as
/// filtered.
pub fn status_for_error(err: &io::Error) -> PortStatus {
    if err.kind() == io::ErrorKind::ConnectionRefused {
        PortStatus::Closed
    } else {
        PortStatus::Filtered
    }
}

/// Probe `host:port` once. Never fails: every outcome becomes a [`PortResult`].
pub async fn probe_port(host: &str, port: u16, timeout: Duration) -> PortResult {
    let (outcome, elapsed) = connect((host, port), timeout).await;
    into_result(port, outcome, elapsed, timeout, false).await
}

/// Probe an already resolved address, optionally reading a short banner from open ports.
pub async fn probe_addr(addr: SocketAddr, timeout: Duration, grab_banner: bool) -> PortResult {
    let (outcome, elapsed) = connect(addr, timeout).await;
    into_result(addr.port(), outcome, elapsed, timeout, grab_banner).await
}

async fn into_result(
    port: u16,
    outcome: Connect,
    elapsed: Duration,
    timeout: Duration,
    grab_banner: bool,
) -> PortResult {
    let (status, response_time, banner) = match outcome {
        Connect::Connected(mut stream) => {
            let banner = if grab_banner {
                read_banner(&mut stream, BANNER_WAIT).await
            } else {
                None
            };
            (PortStatus::Open, elapsed, banner)
        }
        Connect::Refused(e) | Connect::Failed(e) => {
            debug!(port, error = %e, "connect failed");
            (status_for_error(&e), elapsed, None)
        }
        Connect::TimedOut => (PortStatus::Filtered, timeout, None),
    };

    PortResult {
        port,
        status,
        service: Some(service_label(port)),
        response_time_ms: Some(response_time.as_millis() as u64),
        banner,
    }
}

/// Default wait for a service greeting on an open port.
pub(crate) const BANNER_WAIT: Duration = Duration::from_millis(200);

/// Try to read up to 256 bytes within `wait` and convert to a lossy UTF-8 string with CR/LF escaped.
pub(crate) async fn read_banner(stream: &mut TcpStream, wait: Duration) -> Option<String> {
    if wait.is_zero() {
        return None;
    }
    let mut buf = vec![0u8; 256];
    match time::timeout(wait, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            let s = String::from_utf8_lossy(&buf).to_string();
            let s = s.replace('\n', "\\n").replace('\r', "\\r");
            Some(s)
        }
        _ => None,
    }
}
