use std::time::Duration;

/// Typed error hierarchy for calls to the generation and posting services.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ExternalError {
    // Fatal: don't retry
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("service overloaded")]
    Overloaded,
    #[error("network error: {0}")]
    Network(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("not found: {0}")]
    NotFound(String),
    /// The request may have taken effect; repeating it could apply it twice.
    #[error("outcome unknown: {0}")]
    Unconfirmed(String),
}

impl ExternalError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Overloaded | Self::Network(_) | Self::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::BadRequest(_) | Self::MalformedResponse(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// A failure after which the call may still have succeeded: the
    /// request left but no definite answer came back.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::ServerError { .. } | Self::Unconfirmed(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::BadRequest(_) => "bad_request",
            Self::MalformedResponse(_) => "malformed_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Overloaded => "overloaded",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not_found",
            Self::Unconfirmed(_) => "unconfirmed",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            404 => Self::NotFound(body),
            400 | 422 => Self::BadRequest(body),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::Overloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::BadRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
