use netwatch::scanner::{scan_host, scan_ports, scan_ports_with_progress, ScanOptions, SharedProgress};
use netwatch::types::PortStatus;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn free_port() -> u16 {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    l.local_addr().unwrap().port()
}

#[tokio::test]
async fn open_and_closed_ports_on_localhost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();
    let closed = free_port().await;

    let opts = ScanOptions {
        timeout: Duration::from_millis(500),
        concurrency: 2,
        grab_banners: false,
    };
    let results = scan_ports("127.0.0.1", &[open, closed], opts).await;

    assert_eq!(results.len(), 2);
    let by_port = |p: u16| results.iter().find(|r| r.port == p).unwrap();
    assert_eq!(by_port(open).status, PortStatus::Open);
    assert_eq!(by_port(closed).status, PortStatus::Closed);
    assert!(results.windows(2).all(|w| w[0].port < w[1].port));
}

#[tokio::test]
async fn summary_counts_match_results() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();
    let closed = free_port().await;

    let outcome = scan_host("127.0.0.1", &[closed, open], ScanOptions::default()).await;
    let s = outcome.summary;
    assert_eq!(s.total_ports, 2);
    assert_eq!(s.open_ports + s.closed_ports + s.filtered_ports, 2);
    assert_eq!(s.open_ports, 1);

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["totalPorts"], 2);
    assert_eq!(json["openPorts"], 1);
    assert!(json["ports"].is_array());
}

#[tokio::test]
async fn progress_reaches_total() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();
    let progress = SharedProgress::new();

    let results = scan_ports_with_progress(
        "127.0.0.1",
        &[open],
        ScanOptions::default(),
        CancellationToken::new(),
        progress.clone(),
    )
    .await;

    assert_eq!(results.len(), 1);
    assert_eq!(progress.total.load(Ordering::Relaxed), 1);
    assert_eq!(progress.scanned_done.load(Ordering::Relaxed), 1);
    assert_eq!(progress.open_count.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn empty_port_list_is_empty_result() {
    let results = scan_ports("127.0.0.1", &[], ScanOptions::default()).await;
    assert!(results.is_empty());
}
