use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use netwatch::config::Config;
use netwatch::server::{router, AppState};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

async fn post(app: axum::Router, uri: &str, body: String) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn scan_endpoint_returns_report() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();

    let state = AppState::new(Config::default());
    let app = router(state.clone());
    let body = format!(r#"{{"ip":"127.0.0.1","ports":[{open}],"timeout":500}}"#);
    let (status, json) = post(app, "/api/scan", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let data = &json["data"];
    assert_eq!(data["ip"], "127.0.0.1");
    assert_eq!(data["totalPorts"], 1);
    assert_eq!(data["openPorts"], 1);
    assert_eq!(data["ports"][0]["status"], "open");
    assert!(data["id"].as_str().unwrap().len() >= 32);
    assert!(data["timestamp"].as_str().unwrap().contains('T'));

    let req = Request::get("/api/scan/status").body(Body::empty()).unwrap();
    let resp = router(state).oneshot(req).await.unwrap();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let status: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status["state"], "done");
    assert_eq!(status["scanned"], 1);
    assert_eq!(status["open"], 1);
}

#[tokio::test]
async fn oversized_range_is_rejected() {
    let app = router(AppState::new(Config::default()));
    let body = r#"{"ip":"127.0.0.1","startPort":1,"endPort":2000}"#.to_string();
    let (status, json) = post(app, "/api/scan", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("1000"));
}

#[tokio::test]
async fn tcp_test_record_shape() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let app = router(AppState::new(Config::default()));
    let body = format!(r#"{{"type":"tcp","target":"127.0.0.1","port":{port},"options":{{"timeout":1000}}}}"#);
    let (status, json) = post(app, "/api/tests", body).await;

    assert_eq!(status, StatusCode::OK);
    let data = &json["data"];
    assert_eq!(data["type"], "tcp");
    assert_eq!(data["port"], port);
    assert_eq!(data["status"], "success");
    assert_eq!(data["details"]["connected"], true);
    assert!(data["responseTime"].is_u64());
}

#[tokio::test]
async fn tcp_test_without_port_is_400() {
    let app = router(AppState::new(Config::default()));
    let body = r#"{"type":"tcp","target":"127.0.0.1"}"#.to_string();
    let (status, json) = post(app, "/api/tests", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("port"));
}
