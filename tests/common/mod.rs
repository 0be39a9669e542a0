//! Common test utilities for job-gateway integration tests

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use bytes::Bytes;
use job_gateway::config::{
    ENV_ARTIFACT_API_KEY, ENV_ARTIFACT_URL, ENV_CONNECTION_STRING, ENV_PUBLISH_QUEUE,
    ENV_RECEIVE_QUEUE,
};
use job_gateway::{Config, Gateway};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{MockServer, ResponseTemplate};

pub const PUBLISH_QUEUE: &str = "jobs";
pub const RECEIVE_QUEUE: &str = "results";
pub const ARTIFACT_API_KEY: &str = "artifact-key";

/// Gateway configuration pointing at a mock namespace and a mock artifact service
pub fn gateway_config(namespace: &MockServer, artifacts: &MockServer) -> Config {
    let env = HashMap::from([
        (
            ENV_CONNECTION_STRING,
            format!(
                "Endpoint={}/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=c2VjcmV0",
                namespace.uri()
            ),
        ),
        (ENV_PUBLISH_QUEUE, PUBLISH_QUEUE.to_string()),
        (ENV_RECEIVE_QUEUE, RECEIVE_QUEUE.to_string()),
        (ENV_ARTIFACT_URL, artifacts.uri()),
        (ENV_ARTIFACT_API_KEY, ARTIFACT_API_KEY.to_string()),
    ]);

    let mut config =
        Config::from_lookup(|key| env.get(key).cloned()).expect("test config should be valid");
    config.queue.receive_wait = Duration::ZERO;
    config.queue.operation_timeout = Duration::from_secs(5);
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.jitter = false;
    config
}

/// Connect a gateway and build its router
pub async fn connect(config: Config) -> (Arc<Gateway>, Router) {
    let config = Arc::new(config);
    let gateway = Arc::new(
        Gateway::connect(&config)
            .await
            .expect("gateway should connect"),
    );
    let router = job_gateway::api::create_router(gateway.clone(), config);
    (gateway, router)
}

pub async fn get(router: &Router, uri: &str) -> Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("Authorization", "Bearer caller-token")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router is infallible")
}

pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable")
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("body should be JSON")
}

/// A peek-locked delivery as the namespace returns it
pub fn locked_delivery(broker_id: &str, lock_token: &str, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(201)
        .insert_header(
            "BrokerProperties",
            format!(
                r#"{{"MessageId":"{broker_id}","LockToken":"{lock_token}","DeliveryCount":1,"SequenceNumber":1}}"#
            )
            .as_str(),
        )
        .insert_header("Content-Type", "application/json")
        .set_body_string(body)
}
