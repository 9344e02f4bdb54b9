use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing ebay app credentials")]
    MissingCredentials,
    #[error("credential exchange rejected: HTTP {status}")]
    Rejected { status: u16 },
    #[error("oauth request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream rate limited the request")]
    RateLimited {
        retry_after_secs: Option<u64>,
        body: String,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("unexpected upstream payload: {0}")]
    InvalidShape(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_decode() {
            UpstreamError::InvalidShape(err.to_string())
        } else {
            UpstreamError::Network(err.to_string())
        }
    }
}

impl UpstreamError {
    /// Classifies a non-success response. 429 and provider throttling
    /// markers become `RateLimited`.
    pub fn from_status(status: u16, retry_after_secs: Option<u64>, body: String) -> Self {
        if status == 429 || (matches!(status, 403 | 503) && has_throttle_marker(&body)) {
            return UpstreamError::RateLimited {
                retry_after_secs,
                body,
            };
        }
        UpstreamError::Status { status, body }
    }
}

fn has_throttle_marker(body: &str) -> bool {
    let lowered = body.to_lowercase();
    ["rate limit", "too many requests", "throttl"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid `{field}`: {message}")]
pub struct ValidationError {
    field: &'static str,
    message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }
}

/// Failure surfaced by a market-value lookup. Cloned to every waiter that
/// joined the same in-flight request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("valuation request was abandoned before it settled")]
    Abandoned,
}

impl From<AuthError> for LookupError {
    fn from(err: AuthError) -> Self {
        LookupError::Upstream(UpstreamError::Auth(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Temporarily throttled; retry later.
    RateLimited,
    /// Service unavailable; manual retry.
    Unavailable,
    /// Fix the input and resubmit.
    InvalidInput,
}

impl LookupError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LookupError::Validation(_) => ErrorClass::InvalidInput,
            LookupError::Upstream(UpstreamError::RateLimited { .. }) => ErrorClass::RateLimited,
            LookupError::Upstream(_) | LookupError::Abandoned => ErrorClass::Unavailable,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LookupError::Upstream(UpstreamError::RateLimited {
                retry_after_secs, ..
            }) => *retry_after_secs,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limited() {
        let err = UpstreamError::from_status(429, Some(30), String::new());
        assert!(matches!(
            err,
            UpstreamError::RateLimited {
                retry_after_secs: Some(30),
                ..
            }
        ));
    }

    #[test]
    fn throttle_marker_on_503_is_rate_limited() {
        let err = UpstreamError::from_status(503, None, "Rate limit exceeded".into());
        assert!(matches!(err, UpstreamError::RateLimited { .. }));
        let err = UpstreamError::from_status(503, None, "maintenance".into());
        assert_eq!(
            err,
            UpstreamError::Status {
                status: 503,
                body: "maintenance".into()
            }
        );
    }

    #[test]
    fn lookup_error_classes() {
        let invalid: LookupError = ValidationError::new("year", "not numeric").into();
        assert_eq!(invalid.class(), ErrorClass::InvalidInput);

        let limited: LookupError = UpstreamError::from_status(429, Some(5), String::new()).into();
        assert_eq!(limited.class(), ErrorClass::RateLimited);
        assert_eq!(limited.retry_after_secs(), Some(5));

        let auth: LookupError = AuthError::MissingCredentials.into();
        assert_eq!(auth.class(), ErrorClass::Unavailable);
        assert_eq!(LookupError::Abandoned.class(), ErrorClass::Unavailable);
    }
}
