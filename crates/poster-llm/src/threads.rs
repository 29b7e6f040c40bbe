use std::time::Duration;

use async_trait::async_trait;
use poster_core::{ExternalError, PostId, Publisher};
use poster_settings::PublisherSettings;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::http;

/// Longest text the Threads API accepts.
pub const MAX_TEXT_CHARS: usize = 500;

/// Threads Graph API publisher.
///
/// Publishing is two calls: create a TEXT media container, wait
/// `phase_delay` for the backend to process it, then publish the container.
/// An ambiguous failure of the second call is reported as
/// [`ExternalError::Unconfirmed`] so no caller retries it with a new
/// container.
pub struct ThreadsPublisher {
    client: Client,
    base_url: String,
    user_id: String,
    access_token: SecretString,
    phase_delay: Duration,
    request_timeout: Duration,
}

#[derive(Deserialize)]
struct IdResponse {
    id: Option<String>,
}

fn extract_id(resp: IdResponse, what: &str) -> Result<String, ExternalError> {
    resp.id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ExternalError::MalformedResponse(format!("{what} response has no id")))
}

/// Errors from the publish call that may hide a live post become
/// [`ExternalError::Unconfirmed`]; definite refusals pass through.
fn confirm_phase_error(container_id: &str, err: ExternalError) -> ExternalError {
    if err.is_ambiguous() {
        ExternalError::Unconfirmed(format!("publish of container {container_id}: {err}"))
    } else {
        err
    }
}

impl ThreadsPublisher {
    pub fn new(settings: &PublisherSettings) -> Result<Self, ExternalError> {
        let access_token = settings
            .access_token
            .clone()
            .ok_or_else(|| ExternalError::AuthenticationFailed("no Threads access token configured".into()))?;
        if settings.user_id.is_empty() {
            return Err(ExternalError::BadRequest("no Threads user id configured".into()));
        }
        let request_timeout = Duration::from_secs(settings.request_timeout_secs);
        Ok(Self {
            client: http::build_client(request_timeout)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            user_id: settings.user_id.clone(),
            access_token,
            phase_delay: Duration::from_secs(settings.phase_delay_secs),
            request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_for_id(&self, path: &str, params: &[(&str, &str)], what: &str) -> Result<String, ExternalError> {
        let resp = self
            .client
            .post(self.url(path))
            .query(params)
            .query(&[("access_token", self.access_token.expose_secret())])
            .send()
            .await
            .map_err(|e| http::send_error(e, self.request_timeout))?;
        let resp = http::check_status(resp).await?;
        let body: IdResponse = resp
            .json()
            .await
            .map_err(|e| ExternalError::MalformedResponse(e.to_string()))?;
        extract_id(body, what)
    }

    async fn create_container(&self, text: &str) -> Result<String, ExternalError> {
        let path = format!("{}/threads", self.user_id);
        self.post_for_id(&path, &[("media_type", "TEXT"), ("text", text)], "container")
            .await
    }

    async fn publish_container(&self, container_id: &str) -> Result<String, ExternalError> {
        let path = format!("{}/threads_publish", self.user_id);
        self.post_for_id(&path, &[("creation_id", container_id)], "publish")
            .await
    }
}

#[async_trait]
impl Publisher for ThreadsPublisher {
    fn name(&self) -> &str {
        "threads"
    }

    #[instrument(skip_all, fields(chars = text.chars().count()))]
    async fn publish(&self, text: &str) -> Result<PostId, ExternalError> {
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(ExternalError::BadRequest(format!(
                "post exceeds {MAX_TEXT_CHARS} characters"
            )));
        }
        let container_id = self.create_container(text).await?;
        debug!(container_id, delay_secs = self.phase_delay.as_secs(), "media container created");
        tokio::time::sleep(self.phase_delay).await;
        let post_id = self
            .publish_container(&container_id)
            .await
            .map_err(|e| confirm_phase_error(&container_id, e))?;
        info!(post_id, "post published");
        Ok(PostId::from_raw(post_id))
    }

    async fn get(&self, id: &PostId) -> Result<Option<serde_json::Value>, ExternalError> {
        let resp = self
            .client
            .get(self.url(id.as_str()))
            .query(&[
                ("fields", "id,text,timestamp,permalink"),
                ("access_token", self.access_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| http::send_error(e, self.request_timeout))?;
        match http::check_status(resp).await {
            Ok(resp) => resp
                .json()
                .await
                .map(Some)
                .map_err(|e| ExternalError::MalformedResponse(e.to_string())),
            Err(ExternalError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, id: &PostId) -> Result<bool, ExternalError> {
        let resp = self
            .client
            .delete(self.url(id.as_str()))
            .query(&[("access_token", self.access_token.expose_secret())])
            .send()
            .await
            .map_err(|e| http::send_error(e, self.request_timeout))?;
        match http::check_status(resp).await {
            Ok(_) => Ok(true),
            Err(ExternalError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PublisherSettings {
        PublisherSettings {
            base_url: "https://graph.example.test/v1.0/".into(),
            user_id: "1234".into(),
            access_token: Some(SecretString::from("tok")),
            ..Default::default()
        }
    }

    #[test]
    fn requires_credentials() {
        let mut s = settings();
        s.access_token = None;
        assert!(matches!(
            ThreadsPublisher::new(&s),
            Err(ExternalError::AuthenticationFailed(_))
        ));

        let mut s = settings();
        s.user_id.clear();
        assert!(matches!(ThreadsPublisher::new(&s), Err(ExternalError::BadRequest(_))));
    }

    #[test]
    fn builds_urls() {
        let p = ThreadsPublisher::new(&settings()).unwrap();
        assert_eq!(p.url("1234/threads"), "https://graph.example.test/v1.0/1234/threads");
        assert_eq!(p.phase_delay, Duration::from_secs(30));
    }

    #[test]
    fn id_extraction() {
        let ok: IdResponse = serde_json::from_str(r#"{"id":"17890"}"#).unwrap();
        assert_eq!(extract_id(ok, "container").unwrap(), "17890");

        let missing: IdResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            extract_id(missing, "publish"),
            Err(ExternalError::MalformedResponse(_))
        ));
    }

    #[test]
    fn ambiguous_publish_failure_is_unconfirmed() {
        let err = confirm_phase_error("c1", ExternalError::Timeout(Duration::from_secs(30)));
        assert!(matches!(&err, ExternalError::Unconfirmed(msg) if msg.contains("c1")));
        assert!(!err.is_retryable());

        let err = confirm_phase_error("c1", ExternalError::Network("connection reset".into()));
        assert!(matches!(err, ExternalError::Unconfirmed(_)));
    }

    #[test]
    fn refused_publish_passes_through() {
        assert!(matches!(
            confirm_phase_error("c1", ExternalError::RateLimited { retry_after: None }),
            ExternalError::RateLimited { .. }
        ));
        assert!(matches!(
            confirm_phase_error("c1", ExternalError::BadRequest("expired container".into())),
            ExternalError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn rejects_oversized_text_without_calling_api() {
        let p = ThreadsPublisher::new(&settings()).unwrap();
        let text = "字".repeat(MAX_TEXT_CHARS + 1);
        assert!(matches!(p.publish(&text).await, Err(ExternalError::BadRequest(_))));
    }
}
