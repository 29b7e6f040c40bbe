use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ExternalError;

/// Sampling knobs forwarded to the generation service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.9,
            max_tokens: 350,
            frequency_penalty: 0.5,
            presence_penalty: 0.5,
        }
    }
}

impl SamplingParams {
    /// Nudge temperature and top_p for a regeneration attempt. Values stay
    /// inside the ranges the generation API accepts.
    pub fn perturbed(&self, attempt: u32) -> Self {
        let step = f64::from(attempt);
        Self {
            temperature: (self.temperature + 0.05 * step).clamp(0.0, 2.0),
            top_p: (self.top_p - 0.02 * step).clamp(0.1, 1.0),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub sampling: SamplingParams,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Raw text plus metadata the caller may log but never depends on.
#[derive(Clone, Debug)]
pub struct GenerationOutput {
    pub text: String,
    pub usage: TokenUsage,
    pub latency: Duration,
}

/// Implemented by each generative-text backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, ExternalError>;
}
