//! Wire schema correlating a job submission to its eventual result.
//!
//! Outbound jobs are [`Message`] values, built once from a textual
//! [`JobRequest`] and never mutated afterwards. Inbound results are decoded
//! into [`ResultMessage`], which only looks at the two fields correlation
//! needs and ignores the rest.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unvalidated submission parameters, exactly as received from the caller
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobRequest {
    /// Free-form job prompt
    pub prompt: Option<String>,
    /// Prompt guidance, as text
    pub prompt_guidance: Option<String>,
    /// Strength, as text
    pub strength: Option<String>,
    /// Identifier of the originating client/session
    pub uuid: Option<String>,
    /// Optional job routing hint
    pub model_type: Option<String>,
    /// Opaque credential forwarded to the worker
    pub token: Option<String>,
}

/// Outbound job message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation key, `<unix-seconds>-<uuid>`
    pub message_id: String,
    /// Identifier of the originating client/session
    pub uuid: String,
    /// Free-form job prompt
    pub prompt: String,
    /// Prompt guidance
    pub prompt_guidance: f64,
    /// Strength
    pub strength: f64,
    /// Job routing hint, empty when not supplied
    #[serde(default)]
    pub model_type: String,
    /// Opaque credential, empty when not supplied
    #[serde(default)]
    pub token: String,
}

impl Message {
    /// Validate a [`JobRequest`] and build the message submitted at `now`
    ///
    /// Two builds for the same uuid within the same second yield the same
    /// `message_id`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] naming the first offending field when `prompt`
    /// or `uuid` is empty, or when `prompt_guidance`/`strength` is missing or
    /// not a finite number.
    pub fn build(request: &JobRequest, now: DateTime<Utc>) -> Result<Self> {
        let prompt = required_text("prompt", request.prompt.as_deref())?;
        let prompt_guidance =
            required_number("prompt_guidance", request.prompt_guidance.as_deref())?;
        let strength = required_number("strength", request.strength.as_deref())?;
        let uuid = required_text("uuid", request.uuid.as_deref())?;

        Ok(Self {
            message_id: Self::correlation_key(now, uuid),
            uuid: uuid.to_string(),
            prompt: prompt.to_string(),
            prompt_guidance,
            strength,
            model_type: request.model_type.clone().unwrap_or_default(),
            token: request.token.clone().unwrap_or_default(),
        })
    }

    /// Correlation key for a job submitted by `uuid` at `now`
    pub fn correlation_key(now: DateTime<Utc>, uuid: &str) -> String {
        format!("{}-{}", now.timestamp(), uuid)
    }

    /// Encode the message as its JSON wire form
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a job message from its JSON wire form
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::malformed(None, e.to_string()))
    }
}

fn required_text<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::invalid_input(field, "missing required parameter")),
    }
}

fn required_number(field: &str, value: Option<&str>) -> Result<f64> {
    let text = required_text(field, value)?.trim();
    let parsed: f64 = text
        .parse()
        .map_err(|_| Error::invalid_input(field, format!("'{text}' is not a number")))?;
    // JSON has no encoding for NaN or infinity.
    if !parsed.is_finite() {
        return Err(Error::invalid_input(
            field,
            format!("'{text}' is not a finite number"),
        ));
    }
    Ok(parsed)
}

/// Inbound result message written by the worker
///
/// Only the correlation key and the artifact identifier are read; every other
/// field of the worker's payload is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    /// Correlation key copied from the job message; `None` when the worker omitted it
    #[serde(default)]
    pub message_id: Option<String>,

    /// Artifact identifier, kept untyped until a match asks for it
    #[serde(default)]
    uuid_processed: Option<serde_json::Value>,
}

impl ResultMessage {
    /// Decode a result body
    ///
    /// # Errors
    ///
    /// [`Error::MalformedMessage`] when the body is not a JSON object or its
    /// `message_id` is not a string. A missing `uuid_processed` is not an
    /// error here; see [`ResultMessage::artifact_id`].
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::malformed(None, e.to_string()))
    }

    /// Whether this result answers the job with correlation key `target`
    pub fn matches(&self, target: &str) -> bool {
        self.message_id.as_deref() == Some(target)
    }

    /// The artifact identifier produced by the worker
    ///
    /// # Errors
    ///
    /// [`Error::MalformedMessage`] when `uuid_processed` is missing or is not
    /// a string.
    pub fn artifact_id(&self) -> Result<&str> {
        match &self.uuid_processed {
            Some(serde_json::Value::String(id)) => Ok(id),
            Some(other) => Err(Error::malformed(
                self.message_id.as_deref(),
                format!("uuid_processed is not a string: {other}"),
            )),
            None => Err(Error::malformed(
                self.message_id.as_deref(),
                "uuid_processed is missing",
            )),
        }
    }
}
