use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use poster_core::{ExternalError, GenerationOutput, GenerationRequest, PostId, Publisher, TextGenerator, TokenUsage};

/// Pre-programmed generator replies for deterministic tests.
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Error(ExternalError),
    /// Wait, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Returns scripted replies in order. Once the script runs out the
/// fallback reply (if any) is repeated; otherwise calls fail.
pub struct MockGenerator {
    replies: Vec<MockReply>,
    fallback: Option<MockReply>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            fallback: None,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call yields `text`.
    pub fn always(text: &str) -> Self {
        Self::new(Vec::new()).with_fallback(MockReply::text(text))
    }

    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, ExternalError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(reply) = self.replies.get(idx).or(self.fallback.as_ref()) else {
            return Err(ExternalError::BadRequest(format!(
                "MockGenerator: no reply configured for call {idx}"
            )));
        };

        let mut current = reply;
        loop {
            match current {
                MockReply::Text(text) => {
                    return Ok(GenerationOutput {
                        text: text.clone(),
                        usage: TokenUsage {
                            prompt_tokens: (request.system_prompt.len() + request.user_prompt.len()) as u64 / 4,
                            completion_tokens: text.chars().count() as u64,
                        },
                        latency: Duration::ZERO,
                    });
                }
                MockReply::Error(e) => return Err(e.clone()),
                MockReply::Delay(d, inner) => {
                    tokio::time::sleep(*d).await;
                    current = inner;
                }
            }
        }
    }
}

#[derive(Default)]
struct PublisherState {
    next_id: usize,
    posts: HashMap<PostId, String>,
    order: Vec<PostId>,
    failures: Vec<ExternalError>,
}

/// In-memory publisher. Records what was published; failures can be
/// queued with [`fail_next`](Self::fail_next).
#[derive(Default)]
pub struct MockPublisher {
    state: Mutex<PublisherState>,
    call_count: AtomicUsize,
    phase_delay: Duration,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the wait between container creation and publish.
    pub fn with_phase_delay(mut self, delay: Duration) -> Self {
        self.phase_delay = delay;
        self
    }

    /// The next `n` publish calls fail with `error`.
    pub fn fail_next(&self, n: usize, error: ExternalError) {
        let mut state = self.state.lock();
        state.failures.extend(std::iter::repeat(error).take(n));
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Texts currently published, oldest first.
    pub fn published(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.posts.get(id).cloned())
            .collect()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn publish(&self, text: &str) -> Result<PostId, ExternalError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock();
            if !state.failures.is_empty() {
                return Err(state.failures.remove(0));
            }
        }
        if !self.phase_delay.is_zero() {
            tokio::time::sleep(self.phase_delay).await;
        }
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = PostId::from_raw(format!("mock_post_{}", state.next_id));
        state.posts.insert(id.clone(), text.to_string());
        state.order.push(id.clone());
        Ok(id)
    }

    async fn get(&self, id: &PostId) -> Result<Option<serde_json::Value>, ExternalError> {
        let state = self.state.lock();
        Ok(state
            .posts
            .get(id)
            .map(|text| serde_json::json!({ "id": id.as_str(), "text": text })))
    }

    async fn delete(&self, id: &PostId) -> Result<bool, ExternalError> {
        let mut state = self.state.lock();
        state.order.retain(|p| p != id);
        Ok(state.posts.remove(id).is_some())
    }
}
