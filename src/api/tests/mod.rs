use super::*;
use crate::artifact::{Artifact, ArtifactFetcher};
use crate::error::UpstreamError;
use crate::transport::{MemoryBroker, QueueClient, QueueSender};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use bytes::Bytes;
use std::time::Duration;
use tower::ServiceExt;


const JOBS: &str = "jobs";
const RESULTS: &str = "results";

/// Serves a single known artifact; everything else is a 404 upstream
struct OneArtifact;

#[async_trait]
impl ArtifactFetcher for OneArtifact {
    async fn fetch_artifact(&self, artifact_id: &str) -> crate::Result<Artifact> {
        if artifact_id == "artifact-1" {
            Ok(Artifact {
                content_type: "image/png".to_string(),
                bytes: Bytes::from_static(b"\x89PNG"),
            })
        } else {
            Err(UpstreamError::Status {
                artifact_id: artifact_id.to_string(),
                status: 404,
            }
            .into())
        }
    }
}

struct TestApp {
    broker: MemoryBroker,
    gateway: Arc<Gateway>,
    config: Arc<Config>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(Config::default())
    }

    fn with_config(config: Config) -> Self {
        let broker = MemoryBroker::new(Duration::from_secs(30));
        let client = QueueClient::new(
            Arc::new(broker.sender(JOBS)),
            Arc::new(broker.receiver(RESULTS)),
            Duration::from_secs(5),
        );
        let gateway = Gateway::from_parts(client, Arc::new(OneArtifact), &config);
        Self {
            broker,
            gateway: Arc::new(gateway),
            config: Arc::new(config),
        }
    }

    fn router(&self) -> Router {
        create_router(self.gateway.clone(), self.config.clone())
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        self.router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn worker_publishes(&self, body: String) {
        self.broker
            .sender(RESULTS)
            .send(Bytes::from(body))
            .await
            .unwrap();
    }
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn server_serves_until_cancelled() {
    let app = TestApp::new();
    let mut config = (*app.config).clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(start_api_server(
        app.gateway.clone(),
        Arc::new(config),
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn cors_headers_are_added_when_enabled() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("Origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn cors_can_be_disabled() {
    let mut config = Config::default();
    config.api.cors_enabled = false;
    let app = TestApp::with_config(config);

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("Origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[test]
fn cors_layer_accepts_specific_origins() {
    let _layer = build_cors_layer(&["http://localhost:3000".to_string()]);
    let _any = build_cors_layer(&[]);
}
