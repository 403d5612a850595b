use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::{Duration, Utc};

use webhook_application::{EndpointRegistry, EventEmitter};
use webhook_config::DatabaseConfig;
use webhook_dispatcher::{BatchDispatcher, DispatchSettings};
use webhook_domain::entities::{DeliveryFilter, DeliveryStatus, EndpointScope};
use webhook_domain::repositories::DeliveryRecordRepository;
use webhook_infrastructure::{DatabaseManager, HttpWebhookSender};
use webhook_testing_utils::{FixedClock, LeadEventBuilder, SaleEventBuilder};

#[derive(Clone, Default)]
struct Subscriber {
    received: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
}

async fn accept(State(subscriber): State<Subscriber>, headers: HeaderMap, body: Bytes) -> StatusCode {
    subscriber.received.lock().unwrap().push((headers, body));
    StatusCode::OK
}

async fn spawn_subscriber(subscriber: Subscriber) -> String {
    let router = Router::new()
        .route("/ok", post(accept))
        .route("/broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .with_state(subscriber);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn memory_database() -> DatabaseManager {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();
    manager
}

#[tokio::test]
async fn test_event_is_delivered_end_to_end() {
    let subscriber = Subscriber::default();
    let base = spawn_subscriber(subscriber.clone()).await;
    let database = memory_database().await;

    let registry = EndpointRegistry::new(database.endpoint_repository());
    let emitter = EventEmitter::new(database.endpoint_repository(), database.delivery_repository());

    let ok = registry
        .register(&format!("{base}/ok"), EndpointScope::Global)
        .await
        .unwrap();
    let broken = registry
        .register(&format!("{base}/broken"), EndpointScope::Unit { unit_id: 4 })
        .await
        .unwrap();
    // 其他单位的Endpoint不会收到该事件
    registry
        .register(&format!("{base}/ok"), EndpointScope::Unit { unit_id: 5 })
        .await
        .unwrap();

    let event = LeadEventBuilder::new("L-77").with_unit(4).with_name("Ana").build();
    let created = emitter.emit_event(&event).await.unwrap();
    assert_eq!(created.len(), 2);

    let clock = FixedClock::new(Utc::now());
    let dispatcher = BatchDispatcher::new(
        database.endpoint_repository(),
        database.delivery_repository(),
        Arc::new(HttpWebhookSender::new(std::time::Duration::from_secs(5), "webhook-relay-test").unwrap()),
        Arc::new(clock.clone()),
        DispatchSettings::default(),
    );

    let summary = dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);

    let deliveries = database.delivery_repository();
    let delivered = created.iter().find(|r| r.endpoint_id == ok.id).unwrap();
    let failed = created.iter().find(|r| r.endpoint_id == broken.id).unwrap();

    {
        let received = subscriber.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (headers, body) = &received[0];
        assert_eq!(headers["x-webhook-delivery-id"], delivered.id.to_string().as_str());
        assert_eq!(headers["x-webhook-attempt"], "1");
        let payload: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(payload["event"], "lead.registered");
        assert_eq!(payload["data"]["id"], "L-77");
        assert_eq!(payload["data"]["name"], "Ana");
    }

    let stored = deliveries.get_by_id(delivered.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Succeeded);

    let stored = deliveries.get_by_id(failed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Retrying);
    assert_eq!(stored.attempt_count, 1);
    assert!(stored.error_message.unwrap().contains("500"));

    // 一小时后重试，仍然失败则进入下一档
    clock.advance(Duration::hours(1));
    let summary = dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 1);
    let stored = deliveries.get_by_id(failed.id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 2);

    let stats = deliveries.status_counts().await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.retrying, 1);
    assert_eq!(stats.total(), 2);
}

#[tokio::test]
async fn test_deactivated_endpoint_is_not_dispatched() {
    let subscriber = Subscriber::default();
    let base = spawn_subscriber(subscriber.clone()).await;
    let database = memory_database().await;

    let registry = EndpointRegistry::new(database.endpoint_repository());
    let emitter = EventEmitter::new(database.endpoint_repository(), database.delivery_repository());

    let endpoint = registry
        .register(&format!("{base}/ok"), EndpointScope::Global)
        .await
        .unwrap();
    emitter
        .emit_event(&SaleEventBuilder::new("S-1").with_amount(120.5).build())
        .await
        .unwrap();
    registry.deactivate(endpoint.id).await.unwrap();

    let dispatcher = BatchDispatcher::new(
        database.endpoint_repository(),
        database.delivery_repository(),
        Arc::new(HttpWebhookSender::new(std::time::Duration::from_secs(5), "webhook-relay-test").unwrap()),
        Arc::new(FixedClock::new(Utc::now())),
        DispatchSettings::default(),
    );

    let summary = dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.processed_count, 0);
    assert!(subscriber.received.lock().unwrap().is_empty());

    let pending = database
        .delivery_repository()
        .list(&DeliveryFilter {
            status: Some(DeliveryStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempt_count, 0);
}
