//! HTTP transport shared by the REST and RPC backend variants.
//!
//! One `reqwest::Client` per backend instance. Every call carries the bearer
//! token and is bounded by the configured per-call timeout; a call that runs
//! out of time surfaces as `BackendError::Timeout`, never as a transport
//! error.

use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult, MigrateError, Result};

/// Error body shapes returned by backends.
///
/// REST gateways send `{"error": "...", "code": 5, "message": "..."}` with a
/// numeric status code; the RPC protocol sends `{"code": "not_found",
/// "message": "..."}`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Error class carried inside an error body, independent of HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorCode {
    NotFound,
    AlreadyExists,
    Unimplemented,
    DeadlineExceeded,
    Other,
}

impl ErrorCode {
    fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => match s.as_str() {
                "not_found" => ErrorCode::NotFound,
                "already_exists" => ErrorCode::AlreadyExists,
                "unimplemented" => ErrorCode::Unimplemented,
                "deadline_exceeded" => ErrorCode::DeadlineExceeded,
                _ => ErrorCode::Other,
            },
            serde_json::Value::Number(n) => match n.as_u64() {
                Some(4) => ErrorCode::DeadlineExceeded,
                Some(5) => ErrorCode::NotFound,
                Some(6) => ErrorCode::AlreadyExists,
                Some(12) => ErrorCode::Unimplemented,
                _ => ErrorCode::Other,
            },
            _ => ErrorCode::Other,
        }
    }
}

/// Map a non-success response onto the backend error taxonomy.
///
/// A code in the body wins over the HTTP status, since some gateways answer
/// every failure with 400 or 500.
pub(crate) fn classify(status: u16, body: &str, timeout_secs: u64) -> BackendError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .filter(|m| !m.is_empty())
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().chars().take(200).collect());

    let code = parsed
        .code
        .as_ref()
        .map(ErrorCode::from_value)
        .unwrap_or(ErrorCode::Other);

    match (code, status) {
        (ErrorCode::NotFound, _) | (_, 404) => BackendError::NotFound(message),
        (ErrorCode::AlreadyExists, _) | (_, 409) => BackendError::Conflict(message),
        (ErrorCode::Unimplemented, _) | (_, 405) | (_, 501) => BackendError::Unsupported(message),
        (ErrorCode::DeadlineExceeded, _) | (_, 408) | (_, 504) => {
            BackendError::Timeout(timeout_secs)
        }
        _ => BackendError::protocol(status, message),
    }
}

/// Authenticated, timeout-bounded JSON transport for one backend.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build the transport from a backend config.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        if config.accept_invalid_certs {
            warn!(
                "SECURITY WARNING: backend '{}' accepts invalid TLS certificates \
                 (accept_invalid_certs=true). Only use this for self-signed test servers.",
                config.name
            );
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| {
                MigrateError::Config(format!(
                    "Failed to build HTTP client for backend '{}': {}",
                    config.name, e
                ))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            token: config.api_token.clone(),
            timeout: config.timeout(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Start a request with the bearer token and JSON accept header set.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
    }

    /// Send a request, mapping non-2xx responses onto `BackendError`.
    pub async fn execute(&self, builder: RequestBuilder) -> BackendResult<Response> {
        let timeout_secs = self.timeout.as_secs();
        let response = match tokio::time::timeout(self.timeout, builder.send()).await {
            Err(_) => return Err(BackendError::Timeout(timeout_secs)),
            Ok(Err(e)) if e.is_timeout() => return Err(BackendError::Timeout(timeout_secs)),
            Ok(Err(e)) => return Err(BackendError::Transport(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        debug!("{} -> {}", response.url(), status);
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!("failed to read {} error body: {}", status, e);
                String::new()
            }
        };
        Err(classify(status.as_u16(), &body, timeout_secs))
    }

    /// Send a request and decode its JSON body.
    pub async fn execute_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> BackendResult<T> {
        let response = self.execute(builder).await?;
        let status = response.status().as_u16();
        let bytes = match tokio::time::timeout(self.timeout, response.bytes()).await {
            Err(_) => return Err(BackendError::Timeout(self.timeout.as_secs())),
            Ok(Err(e)) => return Err(BackendError::Transport(e.to_string())),
            Ok(Ok(bytes)) => bytes,
        };
        decode_body(status, &bytes)
    }
}

/// Decode a JSON response body; an empty body decodes as `{}`.
pub(crate) fn decode_body<T: DeserializeOwned>(status: u16, bytes: &[u8]) -> BackendResult<T> {
    let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        bytes
    };
    serde_json::from_slice(bytes)
        .map_err(|e| BackendError::protocol(status, format!("invalid response body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub_server::{Reply, StubServer};
    use crate::config::BackendVariant;

    #[test]
    fn test_classify_by_status() {
        assert!(matches!(classify(404, "", 10), BackendError::NotFound(_)));
        assert!(matches!(classify(409, "", 10), BackendError::Conflict(_)));
        assert!(matches!(classify(501, "", 10), BackendError::Unsupported(_)));
        assert!(matches!(classify(405, "", 10), BackendError::Unsupported(_)));
        assert_eq!(classify(504, "", 10), BackendError::Timeout(10));
        assert!(matches!(
            classify(500, "boom", 10),
            BackendError::Protocol { status: 500, .. }
        ));
    }

    #[test]
    fn test_classify_numeric_code_overrides_status() {
        let body = r#"{"error":"object does not exist","code":5,"message":"object does not exist"}"#;
        assert_eq!(
            classify(500, body, 10),
            BackendError::NotFound("object does not exist".into())
        );
        let body = r#"{"error":"object already exists","code":6}"#;
        assert_eq!(
            classify(400, body, 10),
            BackendError::Conflict("object already exists".into())
        );
    }

    #[test]
    fn test_classify_string_code() {
        let body = r#"{"code":"unimplemented","message":"activation disabled"}"#;
        assert_eq!(
            classify(400, body, 10),
            BackendError::Unsupported("activation disabled".into())
        );
        let body = r#"{"code":"deadline_exceeded","message":"slow"}"#;
        assert_eq!(classify(400, body, 7), BackendError::Timeout(7));
    }

    #[test]
    fn test_classify_plain_text_body() {
        match classify(502, "  bad gateway  ", 10) {
            BackendError::Protocol { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_body_as_object() {
        #[derive(Deserialize)]
        struct Empty {}
        assert!(decode_body::<Empty>(200, b"").is_ok());
        assert!(decode_body::<Empty>(200, b"  \n").is_ok());
        assert!(matches!(
            decode_body::<Empty>(200, b"not json"),
            Err(BackendError::Protocol { status: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_reply_is_timeout_not_transport() {
        let server =
            StubServer::start(|_, _| Reply::ok().delayed(Duration::from_secs(3))).await;
        let transport = HttpTransport::new(&server.config(BackendVariant::Rest, 1)).unwrap();

        let result = transport
            .execute(transport.request(Method::GET, "/api/applications"))
            .await;
        assert!(matches!(result, Err(BackendError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport() {
        let server = StubServer::start(|_, _| Reply::ok()).await;
        let mut config = server.config(BackendVariant::Rest, 5);
        config.url = "http://127.0.0.1:9".into();
        let transport = HttpTransport::new(&config).unwrap();

        let result = transport
            .execute(transport.request(Method::GET, "/api/applications"))
            .await;
        assert!(matches!(result, Err(BackendError::Transport(_))));
    }

    #[tokio::test]
    async fn test_error_body_is_classified() {
        let server = StubServer::start(|_, _| {
            Reply::json(400, r#"{"error":"object does not exist","code":5}"#)
        })
        .await;
        let transport = HttpTransport::new(&server.config(BackendVariant::Rest, 5)).unwrap();

        let result: BackendResult<serde_json::Value> = transport
            .execute_json(transport.request(Method::GET, "/api/devices/0102030405060708"))
            .await;
        assert_eq!(
            result.unwrap_err(),
            BackendError::NotFound("object does not exist".into())
        );
        assert_eq!(
            server.requests(),
            vec!["GET /api/devices/0102030405060708".to_string()]
        );
    }
}
