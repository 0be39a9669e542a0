//! Route handlers for the HTTP API
//!
//! - [`jobs`] - Job submission and result polling
//! - [`system`] - Health and OpenAPI

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

mod jobs;
mod system;

pub use jobs::*;
pub use system::*;

/// Query parameters for `GET /api/send_message`
///
/// Numbers arrive as text and are validated when the job is built.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SendMessageQuery {
    /// Free-form job prompt
    pub prompt: Option<String>,
    /// Prompt guidance, a finite number
    pub prompt_guidance: Option<String>,
    /// Strength, a finite number
    pub strength: Option<String>,
    /// Identifier of the calling client or session
    pub uuid: Option<String>,
    /// Optional routing hint for the worker
    pub model_type: Option<String>,
}

/// Response of `GET /api/send_message`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendMessageResponse {
    /// Correlation key to poll `GET /api/get_image` with
    #[serde(rename = "messageId")]
    pub message_id: String,
}

/// Query parameters for `GET /api/get_image`
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct GetImageQuery {
    /// Correlation key returned by `send_message`
    pub message_id: Option<String>,
}

/// Response of `GET /api/health`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"OK"` while the process serves requests
    pub status: String,
    /// Crate version
    pub version: String,
}
