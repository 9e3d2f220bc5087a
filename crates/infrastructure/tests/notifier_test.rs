use std::sync::{Arc, Mutex};

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    routing::put,
    Json, Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use transfer_core::CallbackConfig;
use transfer_domain::{CallbackTarget, CompletionNotifier, JobSummary, UrlStatus};
use transfer_infrastructure::HttpCompletionNotifier;

type Received = Arc<Mutex<Vec<(Option<String>, Value)>>>;

async fn record(
    State(received): State<Received>,
    RawQuery(query): RawQuery,
    Json(body): Json<Value>,
) -> StatusCode {
    received.lock().unwrap().push((query, body));
    StatusCode::OK
}

async fn reject() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// 启动本地回调服务，返回基础地址与收到的请求
async fn start_callback_server() -> (String, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/done", put(record))
        .route("/broken", put(reject))
        .with_state(received.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), received)
}

fn summary() -> JobSummary {
    let mut summary = JobSummary::new("job-1".to_string());
    summary.record("http://origin/a".to_string(), UrlStatus::Finished);
    summary.record("http://origin/b".to_string(), UrlStatus::Failed);
    summary
}

fn notifier() -> HttpCompletionNotifier {
    HttpCompletionNotifier::new(&CallbackConfig { timeout_seconds: 2 }).unwrap()
}

#[tokio::test]
async fn test_summary_delivered_with_token() {
    let (base, received) = start_callback_server().await;
    let target = CallbackTarget {
        url: format!("{}/done", base),
        token: Some("token=abc".to_string()),
    };

    assert!(notifier().deliver(&target, &summary()).await);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (query, body) = &received[0];
    assert_eq!(query.as_deref(), Some("token=abc"));
    assert_eq!(body["jobid"], "job-1");
    assert_eq!(body["success-files"][0], "http://origin/a");
    assert_eq!(body["failed-files"][0], "http://origin/b");
    assert!(body["queued-files"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_error_status_reported_as_failure() {
    let (base, _received) = start_callback_server().await;
    let target = CallbackTarget {
        url: format!("{}/broken", base),
        token: None,
    };

    assert!(!notifier().deliver(&target, &summary()).await);
}

#[tokio::test]
async fn test_unreachable_endpoint_reported_as_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let target = CallbackTarget {
        url: format!("http://{}/done", addr),
        token: None,
    };
    assert!(!notifier().deliver(&target, &summary()).await);
}
