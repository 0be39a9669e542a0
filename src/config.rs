//! Configuration types for job-gateway
//!
//! Configuration is an explicit value built once at startup and handed to the
//! transport and artifact constructors. Nothing in the library reads the
//! process environment after [`Config::from_env`] returns.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

/// Environment variable holding the Service Bus connection string
pub const ENV_CONNECTION_STRING: &str = "AZURE_SERVICEBUS_CONNECTION_STRING";
/// Environment variable naming the queue jobs are published to
pub const ENV_PUBLISH_QUEUE: &str = "AZURE_PUBLISH_QUEUE_NAME";
/// Environment variable naming the queue results are read from
pub const ENV_RECEIVE_QUEUE: &str = "AZURE_RECEIVE_QUEUE_NAME";
/// Environment variable holding the artifact service base URL
pub const ENV_ARTIFACT_URL: &str = "IMAGE_SERVICE_URL";
/// Environment variable holding the artifact service API key
pub const ENV_ARTIFACT_API_KEY: &str = "IMAGE_SERVICE_API_KEY";

const ENV_BIND_ADDRESS: &str = "GATEWAY_BIND_ADDRESS";
const ENV_RECEIVE_BATCH_SIZE: &str = "GATEWAY_RECEIVE_BATCH_SIZE";
const ENV_RECEIVE_WAIT_SECS: &str = "GATEWAY_RECEIVE_WAIT_SECS";
const ENV_OPERATION_TIMEOUT_SECS: &str = "GATEWAY_OPERATION_TIMEOUT_SECS";
const ENV_ARTIFACT_TIMEOUT_SECS: &str = "GATEWAY_ARTIFACT_TIMEOUT_SECS";

/// Message queue configuration
///
/// Groups the broker connection settings and the knobs of the
/// receive-and-correlate loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Broker connection string (`Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...`)
    #[serde(default)]
    pub connection_string: String,

    /// Queue that job messages are published to
    #[serde(default)]
    pub publish_queue: String,

    /// Queue that result messages are received from
    #[serde(default)]
    pub receive_queue: String,

    /// Maximum number of messages fetched per poll (default: 100)
    #[serde(default = "default_receive_batch_size")]
    pub receive_batch_size: usize,

    /// Server-side wait for the first message of a batch (default: 1 second)
    #[serde(default = "default_receive_wait", with = "duration_serde")]
    pub receive_wait: Duration,

    /// Deadline applied to every send, receive, and acknowledge call (default: 10 seconds)
    #[serde(default = "default_operation_timeout", with = "duration_serde")]
    pub operation_timeout: Duration,

    /// Maximum in-flight broker calls per connection (default: 4)
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Release the lock on non-matching messages right after a scan (default: true)
    ///
    /// When disabled, a non-matching message stays invisible until the broker
    /// lock expires.
    #[serde(default = "default_true")]
    pub release_unmatched: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            publish_queue: String::new(),
            receive_queue: String::new(),
            receive_batch_size: default_receive_batch_size(),
            receive_wait: default_receive_wait(),
            operation_timeout: default_operation_timeout(),
            max_concurrent_calls: default_max_concurrent_calls(),
            release_unmatched: true,
        }
    }
}

/// Artifact service configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Base URL of the artifact service; artifacts live at `{base_url}/download/{id}`
    #[serde(default)]
    pub base_url: String,

    /// Static API key sent in the `Authorization` header
    #[serde(default)]
    pub api_key: String,

    /// Request timeout (default: 10 seconds)
    #[serde(default = "default_artifact_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            timeout: default_artifact_timeout(),
        }
    }
}

/// Retry configuration for transient upstream failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 200 milliseconds)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 2 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 0.0.0.0:8090)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Top-level gateway configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker and correlation settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Artifact service settings
    #[serde(default)]
    pub artifact: ArtifactConfig,

    /// Retry settings for artifact fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// HTTP API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Build the configuration from the process environment
    ///
    /// The five connection settings are required; everything else falls back
    /// to its default. The result is validated before it is returned.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| Error::Config {
                    message: format!("missing environment variable {key}"),
                    key: Some(key.to_string()),
                })
        };

        let mut config = Config {
            queue: QueueConfig {
                connection_string: required(ENV_CONNECTION_STRING)?,
                publish_queue: required(ENV_PUBLISH_QUEUE)?,
                receive_queue: required(ENV_RECEIVE_QUEUE)?,
                ..Default::default()
            },
            artifact: ArtifactConfig {
                base_url: required(ENV_ARTIFACT_URL)?,
                api_key: required(ENV_ARTIFACT_API_KEY)?,
                ..Default::default()
            },
            ..Default::default()
        };

        if let Some(addr) = optional_parsed::<SocketAddr>(&lookup, ENV_BIND_ADDRESS)? {
            config.api.bind_address = addr;
        }
        if let Some(size) = optional_parsed::<usize>(&lookup, ENV_RECEIVE_BATCH_SIZE)? {
            config.queue.receive_batch_size = size;
        }
        if let Some(secs) = optional_parsed::<u64>(&lookup, ENV_RECEIVE_WAIT_SECS)? {
            config.queue.receive_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = optional_parsed::<u64>(&lookup, ENV_OPERATION_TIMEOUT_SECS)? {
            config.queue.operation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = optional_parsed::<u64>(&lookup, ENV_ARTIFACT_TIMEOUT_SECS)? {
            config.artifact.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.queue.receive_batch_size == 0 {
            return Err(config_error(
                "receive_batch_size must be at least 1",
                "queue.receive_batch_size",
            ));
        }
        if self.queue.max_concurrent_calls == 0 {
            return Err(config_error(
                "max_concurrent_calls must be at least 1",
                "queue.max_concurrent_calls",
            ));
        }
        if self.queue.operation_timeout.is_zero() {
            return Err(config_error(
                "operation_timeout must be greater than zero",
                "queue.operation_timeout",
            ));
        }
        // The broker must answer a long-poll receive before the client gives up on it.
        if self.queue.receive_wait >= self.queue.operation_timeout {
            return Err(config_error(
                "receive_wait must be shorter than operation_timeout",
                "queue.receive_wait",
            ));
        }
        if self.queue.publish_queue.is_empty() || self.queue.receive_queue.is_empty() {
            return Err(config_error("queue names must not be empty", "queue"));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be a finite number of at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(config_error(
                "initial_delay must not exceed max_delay",
                "retry.initial_delay",
            ));
        }
        if let Err(e) = url::Url::parse(&self.artifact.base_url) {
            return Err(config_error(
                &format!("artifact base_url is not a valid URL: {e}"),
                "artifact.base_url",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn optional_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => v.parse::<T>().map(Some).map_err(|e| Error::Config {
            message: format!("cannot parse {key}={v}: {e}"),
            key: Some(key.to_string()),
        }),
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_receive_batch_size() -> usize {
    100
}

fn default_receive_wait() -> Duration {
    Duration::from_secs(1)
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_concurrent_calls() -> usize {
    4
}

fn default_artifact_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
