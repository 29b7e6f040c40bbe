use std::time::Duration;

use poster_core::ExternalError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client(request_timeout: Duration) -> Result<Client, ExternalError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .build()
        .map_err(|e| ExternalError::Network(format!("failed to build HTTP client: {e}")))
}

pub(crate) fn send_error(e: reqwest::Error, request_timeout: Duration) -> ExternalError {
    if e.is_timeout() {
        ExternalError::Timeout(request_timeout)
    } else {
        ExternalError::Network(e.to_string())
    }
}

/// Pass successful responses through; classify the rest.
pub(crate) async fn check_status(resp: Response) -> Result<Response, ExternalError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = resp.text().await.unwrap_or_default();
    Err(match ExternalError::from_status(status, body) {
        ExternalError::RateLimited { .. } => ExternalError::RateLimited { retry_after },
        other => other,
    })
}

/// `Retry-After` in its delta-seconds form.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
