//! PubSubPublisher against a local HTTP server speaking the Pub/Sub REST shape

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use uuid::Uuid;

use courier_outbox::{EventPublisher, NewOutboxEvent, OutboxRecord, PublishError};
use courier_relay::{PubSubConfig, PubSubPublisher};

#[derive(Debug, Clone)]
struct CapturedRequest {
    project: String,
    topic_action: String,
    authorization: Option<String>,
    body: Value,
}

type Captured = Arc<Mutex<Vec<CapturedRequest>>>;

async fn publish_handler(
    State(captured): State<Captured>,
    Path((project, topic_action)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    captured.lock().unwrap().push(CapturedRequest {
        project,
        topic_action,
        authorization,
        body,
    });
    Json(json!({"messageIds": ["1"]}))
}

/// Serve `router` on an ephemeral port and return its base URL
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn capturing_server() -> (String, Captured) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/v1/projects/:project/topics/:topic_action", post(publish_handler))
        .with_state(captured.clone());
    (serve(router).await, captured)
}

async fn status_server(status: StatusCode, body: &'static str) -> String {
    let router = Router::new().route("/*path", post(move || async move { (status, body) }));
    serve(router).await
}

fn record() -> OutboxRecord {
    let entity_id = Uuid::now_v7();
    NewOutboxEvent::new(
        "Todo",
        entity_id,
        "todos",
        "TODO_DELETED",
        &json!({"id": entity_id.to_string(), "title": "done"}),
    )
    .unwrap()
    .into_record()
}

fn publisher(endpoint: &str) -> PubSubPublisher {
    PubSubPublisher::new(
        PubSubConfig::new("demo-project")
            .with_endpoint(endpoint)
            .with_request_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_publish_sends_payload_and_attributes() {
    let (endpoint, captured) = capturing_server().await;
    let record = record();

    publisher(&endpoint).publish_event(&record).await.unwrap();

    let requests = captured.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.project, "demo-project");
    assert_eq!(request.topic_action, "todos:publish");
    assert!(request.authorization.is_none());

    let message = &request.body["messages"][0];
    let data = STANDARD
        .decode(message["data"].as_str().unwrap())
        .unwrap();
    let payload: Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(payload, record.payload);

    let attributes = &message["attributes"];
    assert_eq!(attributes["event_type"], "TODO_DELETED");
    assert_eq!(attributes["entity_id"], record.entity_id.to_string());
    assert_eq!(attributes["entity_type"], "Todo");
    assert_eq!(attributes["outbox_id"], record.id.to_string());
}

#[tokio::test]
async fn test_access_token_is_sent_as_bearer() {
    let (endpoint, captured) = capturing_server().await;
    let publisher = PubSubPublisher::new(
        PubSubConfig::new("demo-project")
            .with_endpoint(&endpoint)
            .with_access_token("test-token"),
    )
    .unwrap();

    publisher.publish_event(&record()).await.unwrap();

    let requests = captured.lock().unwrap().clone();
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-token"));
}

#[tokio::test]
async fn test_missing_topic() {
    let endpoint = status_server(StatusCode::NOT_FOUND, "Resource not found").await;

    let err = publisher(&endpoint).publish_event(&record()).await.unwrap_err();

    assert_eq!(err, PublishError::TopicNotFound("todos".into()));
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let endpoint = status_server(StatusCode::SERVICE_UNAVAILABLE, "try later").await;

    let err = publisher(&endpoint).publish_event(&record()).await.unwrap_err();

    match err {
        PublishError::Unavailable(message) => assert!(message.contains("try later")),
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_error_is_rejected() {
    let endpoint = status_server(StatusCode::BAD_REQUEST, "bad attributes").await;

    let err = publisher(&endpoint).publish_event(&record()).await.unwrap_err();

    assert_eq!(
        err,
        PublishError::Rejected {
            status: 400,
            body: "bad attributes".into()
        }
    );
}

#[tokio::test]
async fn test_slow_broker_times_out() {
    let router = Router::new().route(
        "/*path",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            StatusCode::OK
        }),
    );
    let endpoint = serve(router).await;
    let publisher = PubSubPublisher::new(
        PubSubConfig::new("demo-project")
            .with_endpoint(&endpoint)
            .with_request_timeout(Duration::from_millis(100)),
    )
    .unwrap();

    let err = publisher.publish_event(&record()).await.unwrap_err();

    assert_eq!(err, PublishError::Timeout(Duration::from_millis(100)));
}

#[tokio::test]
async fn test_unreachable_broker_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = publisher(&format!("http://{addr}"))
        .publish_event(&record())
        .await
        .unwrap_err();

    assert!(matches!(err, PublishError::Transport(_)));
}
