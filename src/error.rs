use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CompletionError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// HTTP statuses the gateway may answer with that are worth retrying.
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Failure taxonomy for one gateway round trip.
///
/// The caller (the hosting processor framework) decides how a surfaced error
/// becomes a bus response or a log entry; this crate only classifies.
#[derive(Error, Debug)]
pub enum CompletionError {
    /// Caller error, surfaced immediately, never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limiting, connect/read timeouts, 429/500/502/503/504. Retried
    /// with capped exponential backoff before being surfaced.
    #[error("transient gateway error: {message}")]
    Transient {
        message: String,
        status: Option<u16>,
        #[source]
        source: Option<BoxError>,
    },

    /// Authentication failures, malformed-request 4xx, undecodable response
    /// bodies, unexpected client-library failures. Never retried.
    #[error("fatal gateway error: {message}")]
    Fatal {
        message: String,
        status: Option<u16>,
        #[source]
        source: Option<BoxError>,
    },

    /// Missing or unusable process configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CompletionError {
    /// Whether the retry policy applies to this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// HTTP status attached to the error, if the gateway answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Fatal { status, .. } => *status,
            _ => None,
        }
    }

    /// Classify a non-success gateway status.
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        if TRANSIENT_STATUSES.contains(&status) {
            Self::Transient {
                message: format!("gateway returned {status}: {body}"),
                status: Some(status),
                source: None,
            }
        } else {
            Self::Fatal {
                message: format!("gateway returned {status}: {body}"),
                status: Some(status),
                source: None,
            }
        }
    }

    /// Classify a transport-level failure. Connect failures and timeouts are
    /// transient; everything else the client library reports is fatal.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient {
                message: format!("transport failure: {err}"),
                status: None,
                source: Some(Box::new(err)),
            }
        } else {
            Self::Fatal {
                message: format!("transport failure: {err}"),
                status: None,
                source: Some(Box::new(err)),
            }
        }
    }

    pub(crate) fn decode(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Fatal {
            message: message.into(),
            status: None,
            source: Some(source.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerated_statuses_are_transient() {
        for status in [429, 500, 502, 503, 504] {
            let err = CompletionError::from_status(status, String::new());
            assert!(err.is_transient(), "expected {status} to be transient");
            assert_eq!(err.status(), Some(status));
        }
    }

    #[test]
    fn other_statuses_are_fatal() {
        for status in [400, 401, 403, 404, 422, 501] {
            let err = CompletionError::from_status(status, String::new());
            assert!(!err.is_transient(), "expected {status} to be fatal");
            assert_eq!(err.status(), Some(status));
        }
    }

    #[test]
    fn invalid_request_is_not_retryable() {
        assert!(!CompletionError::InvalidRequest("no prompt".into()).is_transient());
    }
}
