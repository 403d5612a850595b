use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use webhook_api::{create_app, create_routes, AppState};
use webhook_application::{EndpointRegistry, EventEmitter};
use webhook_config::ApiConfig;
use webhook_dispatcher::{BatchDispatcher, DispatchSettings};
use webhook_domain::entities::DeliveryStatus;
use webhook_testing_utils::{
    DeliveryRecordBuilder, EndpointBuilder, FixedClock, LeadEventBuilder,
    MockDeliveryRecordRepository, MockEndpointRepository, MockWebhookSender,
};

struct TestApp {
    router: Router,
    deliveries: MockDeliveryRecordRepository,
    sender: MockWebhookSender,
}

fn test_app(endpoints: MockEndpointRepository) -> TestApp {
    let (state, deliveries, sender) = test_state(endpoints);
    TestApp {
        router: create_routes(state),
        deliveries,
        sender,
    }
}

fn test_state(
    endpoints: MockEndpointRepository,
) -> (AppState, MockDeliveryRecordRepository, MockWebhookSender) {
    let deliveries = MockDeliveryRecordRepository::linked(&endpoints);
    let sender = MockWebhookSender::default();
    let endpoint_repo = Arc::new(endpoints);
    let delivery_repo = Arc::new(deliveries.clone());

    let state = AppState {
        registry: Arc::new(EndpointRegistry::new(endpoint_repo.clone())),
        emitter: Arc::new(EventEmitter::new(endpoint_repo.clone(), delivery_repo.clone())),
        dispatcher: Arc::new(BatchDispatcher::new(
            endpoint_repo,
            delivery_repo.clone(),
            Arc::new(sender.clone()),
            Arc::new(FixedClock::new(Utc::now())),
            DispatchSettings::default(),
        )),
        delivery_repo,
        metrics_handle: None,
    };

    (state, deliveries, sender)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(MockEndpointRepository::new());
    let (status, json) = send(&app.router, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "webhook-relay");
}

#[tokio::test]
async fn test_register_and_manage_endpoint() {
    let app = test_app(MockEndpointRepository::new());

    let (status, json) = send(
        &app.router,
        "POST",
        "/api/endpoints",
        Some(json!({"url": " https://crm.example.com/hooks ", "unit_id": 4})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(json["success"].as_bool().unwrap());
    assert_eq!(json["data"]["url"], "https://crm.example.com/hooks");
    assert_eq!(json["data"]["scope"], json!({"kind": "unit", "unit_id": 4}));
    assert_eq!(json["data"]["active"], true);
    let id = json["data"]["id"].as_i64().unwrap();

    let (status, json) = send(
        &app.router,
        "PUT",
        &format!("/api/endpoints/{id}"),
        Some(json!({"url": "https://crm.example.com/v2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["scope"], json!({"kind": "global"}));

    let (status, json) = send(&app.router, "POST", &format!("/api/endpoints/{id}/deactivate"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["active"], false);

    let (_, json) = send(&app.router, "GET", "/api/endpoints?active=true", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 0);

    let (status, json) = send(&app.router, "POST", &format!("/api/endpoints/{id}/activate"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["active"], true);

    let (status, json) = send(&app.router, "GET", &format!("/api/endpoints/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["url"], "https://crm.example.com/v2");
}

#[tokio::test]
async fn test_invalid_registration_is_rejected() {
    let app = test_app(MockEndpointRepository::new());

    for url in ["", "ftp://files.example.com", "not a url"] {
        let (status, json) = send(&app.router, "POST", "/api/endpoints", Some(json!({"url": url}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "url {url:?}");
        assert_eq!(json["error"]["type"], "VALIDATION_ERROR");
    }

    let (_, json) = send(&app.router, "GET", "/api/endpoints", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_unknown_endpoint_is_not_found() {
    let app = test_app(MockEndpointRepository::new());

    let (status, json) = send(&app.router, "GET", "/api/endpoints/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["type"], "ENDPOINT_NOT_FOUND");

    let (status, _) = send(&app.router, "POST", "/api/endpoints/42/activate", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_event_creates_delivery_records() {
    let app = test_app(MockEndpointRepository::with_endpoints(vec![
        EndpointBuilder::new().with_id(1).build(),
        EndpointBuilder::new().with_id(2).with_unit(7).build(),
        EndpointBuilder::new().with_id(3).with_unit(8).build(),
    ]));

    let event = serde_json::to_value(LeadEventBuilder::new("L-5").with_unit(7).build()).unwrap();
    let (status, json) = send(&app.router, "POST", "/api/events", Some(event)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["event"], "lead.registered");
    assert_eq!(json["data"]["record_ids"].as_array().unwrap().len(), 2);

    for record in app.deliveries.all_records() {
        assert_eq!(record.status, DeliveryStatus::Pending);
        assert_eq!(record.attempt_count, 0);
    }
}

#[tokio::test]
async fn test_event_without_matching_endpoints() {
    let app = test_app(MockEndpointRepository::new());

    let event = serde_json::to_value(LeadEventBuilder::new("L-6").build()).unwrap();
    let (status, json) = send(&app.router, "POST", "/api/events", Some(event)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["record_ids"], json!([]));
    assert_eq!(app.deliveries.count(), 0);
}

#[tokio::test]
async fn test_delivery_queries() {
    let app = test_app(MockEndpointRepository::with_endpoints(vec![
        EndpointBuilder::new().with_id(1).build(),
    ]));
    app.deliveries.insert(DeliveryRecordBuilder::new().with_id(1).build());
    app.deliveries.insert(
        DeliveryRecordBuilder::new()
            .with_id(2)
            .with_status(DeliveryStatus::DeadLettered)
            .with_attempt_count(3)
            .build(),
    );

    let (status, json) = send(&app.router, "GET", "/api/deliveries?status=DEAD_LETTERED", None).await;
    assert_eq!(status, StatusCode::OK);
    let records = json["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], 2);
    assert_eq!(records[0]["status"], "DEAD_LETTERED");

    let (status, json) = send(&app.router, "GET", "/api/deliveries/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["subject_type"], "lead");

    let (status, json) = send(&app.router, "GET", "/api/deliveries/99", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["type"], "DELIVERY_NOT_FOUND");

    let (status, json) = send(&app.router, "GET", "/api/deliveries/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["pending"], 1);
    assert_eq!(json["data"]["dead_lettered"], 1);

    let (status, json) = send(&app.router, "GET", "/api/deliveries?status=LOST", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["type"], "BAD_REQUEST");

    let (status, json) = send(&app.router, "GET", "/api/deliveries?offset=-5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_dispatch_returns_summary() {
    let app = test_app(MockEndpointRepository::with_endpoints(vec![
        EndpointBuilder::new().with_id(1).build(),
    ]));
    app.deliveries
        .insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());

    let (status, json) = send(&app.router, "POST", "/api/dispatch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["processedCount"], 1);
    assert_eq!(json["successCount"], 1);
    assert_eq!(json["failureCount"], 0);
    assert_eq!(app.sender.call_count(), 1);

    let (_, json) = send(&app.router, "POST", "/api/dispatch", None).await;
    assert_eq!(json["processedCount"], 0);
}

#[tokio::test]
async fn test_dispatch_timeout_still_records_outcome() {
    let (state, deliveries, sender) = test_state(MockEndpointRepository::with_endpoints(vec![
        EndpointBuilder::new().with_id(1).build(),
    ]));
    sender.with_delay(Duration::from_secs(3));
    deliveries.insert(DeliveryRecordBuilder::new().with_id(1).with_endpoint(1).build());

    let api_config = ApiConfig {
        request_timeout_seconds: 1,
        ..ApiConfig::default()
    };
    let router = create_app(state, &api_config);

    let (status, _) = send(&router, "POST", "/api/dispatch", None).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

    // 响应已超时，批次仍在后台完成投递并写入结果
    let mut record = deliveries.snapshot(1).unwrap();
    for _ in 0..50 {
        if record.status != DeliveryStatus::InFlight {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        record = deliveries.snapshot(1).unwrap();
    }
    assert_eq!(record.status, DeliveryStatus::Succeeded);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(sender.call_count(), 1);
}

#[tokio::test]
async fn test_dispatch_claim_failure_is_server_error() {
    let app = test_app(MockEndpointRepository::new());
    app.deliveries.fail_claims(true);

    let (status, json) = send(&app.router, "POST", "/api/dispatch", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["type"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = test_app(MockEndpointRepository::new());
    let (status, _) = send(&app.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let endpoints = Arc::new(MockEndpointRepository::new());
    let deliveries = Arc::new(MockDeliveryRecordRepository::new());
    let state = AppState {
        registry: Arc::new(EndpointRegistry::new(endpoints.clone())),
        emitter: Arc::new(EventEmitter::new(endpoints.clone(), deliveries.clone())),
        dispatcher: Arc::new(BatchDispatcher::new(
            endpoints,
            deliveries.clone(),
            Arc::new(MockWebhookSender::default()),
            Arc::new(FixedClock::default()),
            DispatchSettings::default(),
        )),
        delivery_repo: deliveries,
        metrics_handle: Some(PrometheusBuilder::new().build_recorder().handle()),
    };
    let router = create_app(state, &ApiConfig::default());

    let response = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}
