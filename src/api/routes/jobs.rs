//! Job handlers: submit and poll.

use super::{GetImageQuery, SendMessageQuery, SendMessageResponse};
use crate::api::AppState;
use crate::error::Result;
use crate::gateway::Retrieval;
use crate::message::JobRequest;
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Body returned while a job's result has not arrived
pub const NOT_READY: &str = "Message not ready yet";

/// GET /api/send_message - Submit a job
#[utoipa::path(
    get,
    path = "/api/send_message",
    tag = "jobs",
    params(SendMessageQuery),
    responses(
        (status = 200, description = "Job published", body = SendMessageResponse),
        (status = 400, description = "Missing or invalid parameter", body = crate::error::ApiError),
        (status = 503, description = "Broker unavailable or shutting down", body = crate::error::ApiError)
    )
)]
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SendMessageQuery>,
) -> Result<Json<SendMessageResponse>> {
    // The caller's credential travels with the job untouched.
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let request = JobRequest {
        prompt: query.prompt,
        prompt_guidance: query.prompt_guidance,
        strength: query.strength,
        uuid: query.uuid,
        model_type: query.model_type,
        token,
    };

    let message_id = state.gateway.submit(&request).await?;
    Ok(Json(SendMessageResponse { message_id }))
}

/// GET /api/get_image - Poll for a job's artifact
#[utoipa::path(
    get,
    path = "/api/get_image",
    tag = "jobs",
    params(GetImageQuery),
    responses(
        (status = 200, description = "Artifact bytes with the upstream content type", content_type = "application/octet-stream"),
        (status = 202, description = "Result not available yet", body = String),
        (status = 400, description = "Missing message_id", body = crate::error::ApiError),
        (status = 502, description = "Malformed result or artifact service failure", body = crate::error::ApiError),
        (status = 503, description = "Broker unavailable", body = crate::error::ApiError)
    )
)]
pub async fn get_image(
    State(state): State<AppState>,
    Query(query): Query<GetImageQuery>,
) -> Result<Response> {
    let message_id = query.message_id.unwrap_or_default();

    match state.gateway.retrieve(&message_id).await? {
        Retrieval::Ready(artifact) => {
            let content_type = HeaderValue::from_str(&artifact.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                artifact.bytes,
            )
                .into_response())
        }
        Retrieval::Pending => Ok((StatusCode::ACCEPTED, NOT_READY).into_response()),
    }
}
