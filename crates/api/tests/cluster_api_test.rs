use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use transfer_api::create_app;
use transfer_dispatcher::SchedulerService;
use transfer_domain::{Span, TaskStatus, TaskStore, UrlStatus};
use transfer_testing_utils::{
    new_tasks, test_config, JobBuilder, MockNotifier, MockProgressStore, MockTaskStore,
    OfferBuilder,
};

struct TestApp {
    store: MockTaskStore,
    service: Arc<SchedulerService>,
    app: Router,
}

fn test_app() -> TestApp {
    let config = test_config();
    let store = MockTaskStore::new();
    let service = Arc::new(SchedulerService::new(
        &config,
        Arc::new(store.clone()),
        Arc::new(MockProgressStore::new()),
        Arc::new(MockNotifier::new()),
    ));
    let app = create_app(service.clone(), &config.api);
    TestApp {
        store,
        service,
        app,
    }
}

impl TestApp {
    async fn seed(&self, customer: &str, job_id: &str, tasks: usize) -> Vec<i64> {
        self.store.add_customer(customer, 0).await;
        let ids = self
            .store
            .seed_job(
                JobBuilder::new(job_id, customer).build(),
                new_tasks(job_id, customer, tasks, 2),
            )
            .await;
        let store: Arc<dyn TaskStore> = Arc::new(self.store.clone());
        self.service
            .selector()
            .ensure_registered(&store, customer)
            .await
            .unwrap();
        ids
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// 通过offer接口分发，返回 (task_id, executor_id)
    async fn dispatch(&self, executors: usize, tasks: usize) -> Vec<(i64, String)> {
        let offer = OfferBuilder::new("s-1").sized_for(executors, tasks).build();
        let (status, body) = self
            .send("POST", "/cluster/offers", Some(serde_json::to_value(&offer).unwrap()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decision"], "launch");

        body["directives"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| {
                (
                    d["task_id"].as_i64().unwrap(),
                    d["executor"]["executor_id"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = test_app();
    let (status, body) = t.send("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["roster_customers"], 0);

    t.seed("acme", "job-1", 1).await;
    let (_, body) = t.send("GET", "/health", None).await;
    assert_eq!(body["roster_customers"], 1);
}

#[tokio::test]
async fn test_offer_without_work_is_declined() {
    let t = test_app();
    let offer = OfferBuilder::new("s-1").sized_for(1, 2).build();
    let (status, body) = t
        .send("POST", "/cluster/offers", Some(serde_json::to_value(&offer).unwrap()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"], "decline");
    assert!(body["reason"].is_string());
}

#[tokio::test]
async fn test_offer_launches_pending_tasks() {
    let t = test_app();
    t.seed("acme", "job-1", 5).await;

    let launched = t.dispatch(2, 4).await;
    assert_eq!(launched.len(), 2);
    assert_eq!(t.store.tasks_with_status(TaskStatus::Scheduled).await.len(), 2);
    assert_eq!(t.store.tasks_with_status(TaskStatus::Pending).await.len(), 3);
}

#[tokio::test]
async fn test_status_events_drive_lifecycle() {
    let t = test_app();
    let ids = t.seed("acme", "job-1", 1).await;
    let launched = t.dispatch(1, 1).await;
    assert_eq!(launched[0].0, ids[0]);

    let (status, body) = t
        .send(
            "POST",
            "/cluster/status",
            Some(json!({"task_id": ids[0], "executor_id": launched[0].1, "state": "TASK_RUNNING"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(t.store.task(ids[0]).await.unwrap().status, TaskStatus::Running);

    let (status, _) = t
        .send(
            "POST",
            "/cluster/status",
            Some(json!({"task_id": ids[0], "state": "TASK_FINISHED"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.store.task(ids[0]).await.unwrap().status, TaskStatus::Finished);
}

#[tokio::test]
async fn test_unknown_task_state_rejected() {
    let t = test_app();
    let (status, _) = t
        .send(
            "POST",
            "/cluster/status",
            Some(json!({"task_id": 1, "state": "TASK_BOGUS"})),
        )
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_framework_message_records_url_result() {
    let t = test_app();
    let ids = t.seed("acme", "job-1", 1).await;
    let origin = t.store.task(ids[0]).await.unwrap().source_urls[0].clone();

    let (status, _) = t
        .send(
            "POST",
            "/cluster/messages",
            Some(json!({
                "taskId": ids[0],
                "originUrl": origin,
                "targetUrl": "s3://bucket/a",
                "status": "Finished",
                "size": 1024
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let urls = t.store.urls_of_job("job-1").await;
    let record = urls.iter().find(|url| url.origin_url == origin).unwrap();
    assert_eq!(record.status, UrlStatus::Finished);
    assert_eq!(record.size, 1024);
}

#[tokio::test]
async fn test_executor_and_slave_loss_report_affected_tasks() {
    let t = test_app();
    let ids = t.seed("acme", "job-1", 2).await;
    let launched = t.dispatch(2, 2).await;
    for (task_id, executor_id) in &launched {
        t.send(
            "POST",
            "/cluster/status",
            Some(json!({"task_id": task_id, "executor_id": executor_id, "state": "TASK_RUNNING"})),
        )
        .await;
    }

    let (status, body) = t
        .send(
            "POST",
            &format!("/cluster/executors/{}/lost", launched[0].1),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["affected_tasks"], 1);

    let (status, body) = t.send("POST", "/cluster/slaves/s-1/lost", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["affected_tasks"], 1);

    for id in ids {
        assert_eq!(t.store.task(id).await.unwrap().status, TaskStatus::Pending);
    }
}

#[tokio::test]
async fn test_store_failure_maps_to_service_unavailable() {
    let t = test_app();
    t.store.fail_on("mark_slave_lost");

    let (status, body) = t.send("POST", "/cluster/slaves/s-1/lost", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["type"], "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn test_replace_customer_spans() {
    let t = test_app();
    t.seed("acme", "job-1", 1).await;

    let (status, body) = t
        .send(
            "PUT",
            "/customers/acme/spans",
            Some(json!([{"start": 0, "end": 6}, {"start": 22, "end": 24}])),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let expected = vec![Span::new(0, 6), Span::new(22, 24)];
    assert_eq!(t.store.query_customer_spans("acme").await.unwrap(), expected);
    assert_eq!(
        t.service.selector().entry("acme").await.unwrap().spans,
        expected
    );
}

#[tokio::test]
async fn test_invalid_spans_rejected() {
    let t = test_app();

    let (status, body) = t
        .send(
            "PUT",
            "/customers/acme/spans",
            Some(json!([{"start": 0, "end": 6}, {"start": 5, "end": 8}])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "INVALID_SPAN");

    let (status, _) = t
        .send(
            "PUT",
            "/customers/acme/spans",
            Some(json!([{"start": 20, "end": 25}])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(t.store.query_customer_spans("acme").await.unwrap().is_empty());
}
