use std::time::Duration;

use async_trait::async_trait;
use poster_core::{ExternalError, GenerationOutput, GenerationRequest, TextGenerator, TokenUsage};
use poster_settings::GeneratorSettings;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::http;

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiGenerator {
    pub fn new(settings: &GeneratorSettings) -> Result<Self, ExternalError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| ExternalError::AuthenticationFailed("no OpenAI API key configured".into()))?;
        let request_timeout = Duration::from_secs(settings.request_timeout_secs);
        Ok(Self {
            client: http::build_client(request_timeout)?,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            api_key,
            request_timeout,
        })
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        let s = &request.sampling;
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: s.temperature,
            max_tokens: s.max_tokens,
            top_p: s.top_p,
            frequency_penalty: s.frequency_penalty,
            presence_penalty: s.presence_penalty,
        }
    }
}

fn parse_reply(resp: ChatResponse) -> Result<(String, TokenUsage), ExternalError> {
    let text = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ExternalError::MalformedResponse("completion has no content".into()))?;
    let usage = resp
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();
    Ok((text, usage))
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, ExternalError> {
        let started = Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| http::send_error(e, self.request_timeout))?;
        let resp = http::check_status(resp).await?;
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ExternalError::MalformedResponse(e.to_string()))?;
        let (text, usage) = parse_reply(parsed)?;
        debug!(chars = text.chars().count(), tokens = usage.total(), "completion received");
        Ok(GenerationOutput {
            text,
            usage,
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poster_core::SamplingParams;

    fn settings() -> GeneratorSettings {
        GeneratorSettings {
            base_url: "https://example.test/v1/".into(),
            api_key: Some(SecretString::from("sk-test")),
            ..Default::default()
        }
    }

    #[test]
    fn requires_api_key() {
        let s = GeneratorSettings::default();
        assert!(matches!(
            OpenAiGenerator::new(&s),
            Err(ExternalError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn endpoint_and_body() {
        let g = OpenAiGenerator::new(&settings()).unwrap();
        assert_eq!(g.endpoint, "https://example.test/v1/chat/completions");
        let req = GenerationRequest {
            system_prompt: "你是小熊".into(),
            user_prompt: "寫一篇貼文".into(),
            sampling: SamplingParams::default(),
        };
        let body = serde_json::to_value(g.body(&req)).unwrap();
        assert_eq!(body["model"], g.model());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "寫一篇貼文");
        assert_eq!(body["max_tokens"], 350);
        assert!(body["presence_penalty"].is_number());
    }

    #[test]
    fn parses_content_and_usage() {
        let raw = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  今天好開心！✨ " } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
        });
        let (text, usage) = parse_reply(serde_json::from_value(raw).unwrap()).unwrap();
        assert_eq!(text, "今天好開心！✨");
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn empty_choices_is_malformed() {
        let raw = serde_json::json!({ "choices": [] });
        let err = parse_reply(serde_json::from_value(raw).unwrap()).unwrap_err();
        assert!(matches!(err, ExternalError::MalformedResponse(_)));

        let raw = serde_json::json!({ "choices": [{ "message": { "content": null } }] });
        assert!(parse_reply(serde_json::from_value(raw).unwrap()).is_err());
    }
}
