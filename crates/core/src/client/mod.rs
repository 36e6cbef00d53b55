//! Shared plumbing for the HTTP clients.
//!
//! Every remote service (catalog, providers, download automation) reports
//! failures through [`ClientError`], so callers can apply one policy:
//! `Unavailable` is retried with backoff, `Unauthorized` aborts the run,
//! everything else is isolated to the entity being processed. An entity
//! that is absent upstream is not an error; fetch operations return
//! `Ok(None)` for it.

mod graphql;
mod retry;

pub(crate) use graphql::GraphqlClient;
pub use retry::RetryPolicy;

use reqwest::{Response, StatusCode};
use thiserror::Error;

/// Errors returned by the service clients.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Network failure, timeout, 5xx or rate limit. Retryable.
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    /// Credentials were refused. Fatal for the current run.
    #[error("{service} rejected credentials: {message}")]
    Unauthorized { service: String, message: String },

    /// The service answered with a non-retryable error.
    #[error("{service} returned HTTP {status}: {message}")]
    Rejected {
        service: String,
        status: u16,
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("invalid response from {service}: {message}")]
    InvalidResponse { service: String, message: String },

    /// Client built without the settings it needs.
    #[error("client not configured: {0}")]
    NotConfigured(String),
}

impl ClientError {
    pub fn unavailable(service: &str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn unauthorized(service: &str, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_response(service: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Whether the retry policy should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Whether the error must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Map a transport error from reqwest.
    pub fn from_transport(service: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::unavailable(service, "request timed out")
        } else if error.is_connect() {
            Self::unavailable(service, format!("connection failed: {}", error))
        } else if error.is_decode() {
            Self::invalid_response(service, error.to_string())
        } else {
            Self::unavailable(service, error.to_string())
        }
    }
}

/// Classify a non-success status into the shared taxonomy.
///
/// Returns `None` for 404, which callers report as "absent upstream".
pub(crate) fn classify_failure(service: &str, status: StatusCode, body: &str) -> Option<ClientError> {
    if status == StatusCode::NOT_FOUND {
        return None;
    }
    let message = body.chars().take(200).collect::<String>();
    let error = if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ClientError::unauthorized(service, format!("HTTP {}", status.as_u16()))
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ClientError::unavailable(service, format!("HTTP {}: {}", status.as_u16(), message))
    } else {
        ClientError::Rejected {
            service: service.to_string(),
            status: status.as_u16(),
            message,
        }
    };
    Some(error)
}

/// Check a response and turn failures into errors.
///
/// Returns `Ok(None)` for 404.
pub(crate) async fn check_response(
    service: &str,
    response: Response,
) -> Result<Option<Response>, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(Some(response));
    }
    let body = response.text().await.unwrap_or_default();
    match classify_failure(service, status, &body) {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

/// Parse GraphQL `errors` into the taxonomy.
pub(crate) fn graphql_error(service: &str, messages: &[String]) -> ClientError {
    let joined = messages.join("; ");
    let lowered = joined.to_lowercase();
    if lowered.contains("unauthorized")
        || lowered.contains("not authorized")
        || lowered.contains("forbidden")
    {
        ClientError::unauthorized(service, joined)
    } else {
        ClientError::Rejected {
            service: service.to_string(),
            status: 200,
            message: joined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(status: u16) -> ClientError {
        classify_failure("svc", StatusCode::from_u16(status).unwrap(), "body")
            .unwrap_or_else(|| panic!("expected failure for {}", status))
    }

    #[test]
    fn test_not_found_is_not_an_error() {
        assert!(classify_failure("svc", StatusCode::NOT_FOUND, "").is_none());
    }

    #[test]
    fn test_classify_auth_failures_are_fatal() {
        assert!(failure(401).is_fatal());
        assert!(failure(403).is_fatal());
        assert!(!failure(401).is_retryable());
    }

    #[test]
    fn test_classify_transient_failures_are_retryable() {
        assert!(failure(429).is_retryable());
        assert!(failure(502).is_retryable());
        assert!(failure(503).is_retryable());
    }

    #[test]
    fn test_classify_client_errors_are_rejected() {
        let err = failure(422);
        assert!(matches!(err, ClientError::Rejected { status: 422, .. }));
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_graphql_authorization_error() {
        let err = graphql_error("stash", &["Not authorized".to_string()]);
        assert!(err.is_fatal());

        let err = graphql_error("stash", &["scene not found".to_string()]);
        assert!(matches!(err, ClientError::Rejected { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::unavailable("stashdb", "request timed out");
        assert_eq!(err.to_string(), "stashdb unavailable: request timed out");
    }
}
