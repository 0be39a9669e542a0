//! Service Bus connection strings and shared access signatures.

use crate::error::TransportError;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Lifetime of a minted SAS token.
const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Clone)]
enum Credential {
    /// Key name and key, tokens are minted per request
    SharedKey { name: String, key: String },
    /// A pre-issued `SharedAccessSignature ...` token used as-is
    Signature(String),
}

/// Parsed `Endpoint=...;SharedAccessKeyName=...;SharedAccessKey=...` string
#[derive(Clone)]
pub struct ConnectionString {
    endpoint: String,
    credential: Credential,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key_name = match &self.credential {
            Credential::SharedKey { name, .. } => name.as_str(),
            Credential::Signature(_) => "<signature>",
        };
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .field("key_name", &key_name)
            .finish_non_exhaustive()
    }
}

impl ConnectionString {
    /// Parse a connection string
    ///
    /// `sb://` endpoints are rewritten to `https://`; `http://` and
    /// `https://` endpoints are kept as given.
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut signature = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((name, value)) = part.split_once('=') else {
                return Err(TransportError::InvalidConnectionString(format!(
                    "segment '{part}' has no value"
                )));
            };
            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim().to_string()),
                "sharedaccesskeyname" => key_name = Some(value.trim().to_string()),
                "sharedaccesskey" => key = Some(value.trim().to_string()),
                "sharedaccesssignature" => signature = Some(value.trim().to_string()),
                other => tracing::debug!(segment = other, "Ignoring connection string segment"),
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            TransportError::InvalidConnectionString("missing Endpoint".to_string())
        })?;
        let endpoint = normalize_endpoint(&endpoint)?;

        let credential = match (key_name, key, signature) {
            (_, _, Some(signature)) => Credential::Signature(signature),
            (Some(name), Some(key), None) => Credential::SharedKey { name, key },
            _ => {
                return Err(TransportError::InvalidConnectionString(
                    "expected SharedAccessKeyName and SharedAccessKey, or SharedAccessSignature"
                        .to_string(),
                ));
            }
        };

        Ok(Self {
            endpoint,
            credential,
        })
    }

    /// Endpoint base URL without a trailing slash
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// URL of a queue entity under this namespace
    pub fn entity_url(&self, queue: &str) -> String {
        format!("{}/{}", self.endpoint, queue.trim_matches('/'))
    }

    /// `Authorization` header value for requests against `resource`
    pub fn authorization(
        &self,
        resource: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TransportError> {
        match &self.credential {
            Credential::Signature(signature) => Ok(signature.clone()),
            Credential::SharedKey { name, key } => {
                let encoded = urlencoding::encode(resource);
                let expiry = now.timestamp() + TOKEN_TTL_SECS;

                let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                    .map_err(|e| TransportError::InvalidConnectionString(e.to_string()))?;
                mac.update(format!("{encoded}\n{expiry}").as_bytes());
                let signature = STANDARD.encode(mac.finalize().into_bytes());

                Ok(format!(
                    "SharedAccessSignature sr={encoded}&sig={}&se={expiry}&skn={name}",
                    urlencoding::encode(&signature)
                ))
            }
        }
    }
}

fn normalize_endpoint(raw: &str) -> Result<String, TransportError> {
    let rewritten = match raw.strip_prefix("sb://") {
        Some(rest) => format!("https://{rest}"),
        None => raw.to_string(),
    };
    let url = url::Url::parse(&rewritten)
        .map_err(|e| TransportError::InvalidConnectionString(format!("bad Endpoint: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TransportError::InvalidConnectionString(format!(
            "unsupported Endpoint scheme {}",
            url.scheme()
        )));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}
