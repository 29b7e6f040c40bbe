use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use poster_core::{Clock, ContextKey, GenerationRequest, PersonalityMemory};
use poster_llm::ReliableGenerator;
use poster_settings::PipelineSettings;
use poster_store::{StateStore, TtlCache};
use poster_telemetry::{OperationStats, Telemetry};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::PipelineError;
use crate::text::{visible_length, TextRules};

const SYSTEM_GUIDE: &str = "你正在經營自己的 Threads 帳號，用繁體中文寫貼文。\
語氣自然口語，像在跟朋友聊天。不要加引號、標題或 hashtag，\
每一句都要完整，結尾邀請讀者互動。";

/// A validated post ready for publishing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeneratedContent {
    pub text: String,
    pub scene: ContextKey,
    pub topic: String,
    pub generated_at: DateTime<Utc>,
    /// Served from the duplicate-suppression cache.
    pub from_cache: bool,
}

impl GeneratedContent {
    pub fn cache_key(&self) -> String {
        cache_key(self.scene, &self.topic)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.generated_at).to_std().unwrap_or(Duration::ZERO)
    }
}

fn cache_key(scene: ContextKey, topic: &str) -> String {
    format!("{scene}:{topic}")
}

fn load_personality(store: &StateStore, scene: ContextKey) -> Result<PersonalityMemory, PipelineError> {
    if let Some(found) = store.get_personality_memory(scene)? {
        return Ok(found);
    }
    if scene != ContextKey::Base {
        if let Some(base) = store.get_personality_memory(ContextKey::Base)? {
            debug!(scene = %scene, "no scene personality, using base");
            return Ok(base);
        }
    }
    Err(PipelineError::MissingPersonality { context: scene })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub cached_content: usize,
    pub generations: u64,
    pub cache_hits: u64,
    pub validation_failures: u64,
    pub no_content: u64,
    pub timing: Option<OperationStats>,
}

#[derive(Debug)]
struct Choice {
    scene: ContextKey,
    topic: String,
    angle: Option<String>,
}

/// Produces at most one validated post per call.
///
/// Calls are serialized by an async lock, so two callers never generate
/// at the same time; the second one usually lands on the first one's
/// cache entry. Failures are logged and come back as `None`.
pub struct ContentPipeline {
    generator: Arc<ReliableGenerator>,
    store: Arc<StateStore>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    settings: PipelineSettings,
    rules: TextRules,
    telemetry: Arc<Telemetry>,
    generation_lock: tokio::sync::Mutex<()>,
    cache: Mutex<TtlCache<String, GeneratedContent>>,
    rng: Mutex<StdRng>,
}

impl ContentPipeline {
    pub fn new(
        generator: Arc<ReliableGenerator>,
        store: Arc<StateStore>,
        clock: Arc<dyn Clock>,
        tz: Tz,
        settings: PipelineSettings,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let cache = TtlCache::new(
            Duration::from_secs(settings.content_cache_ttl_secs),
            settings.content_cache_size,
        );
        Self {
            generator,
            store,
            clock,
            tz,
            rules: TextRules::new(settings.validation.clone()),
            settings,
            telemetry,
            generation_lock: tokio::sync::Mutex::new(()),
            cache: Mutex::new(cache),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.lock().ttl()
    }

    /// One validated post, or `None` when nothing usable came out.
    #[instrument(skip_all)]
    pub async fn generate(&self) -> Option<GeneratedContent> {
        let _guard = self.generation_lock.lock().await;
        let timer = self.telemetry.start_operation("pipeline.generate");
        let limit = Duration::from_secs(self.settings.generation_timeout_secs);
        let result = match tokio::time::timeout(limit, self.try_generate()).await {
            Ok(r) => r,
            Err(_) => Err(PipelineError::Timeout(limit)),
        };
        match result {
            Ok(content) => {
                if !content.from_cache {
                    timer.stop();
                }
                Some(content)
            }
            Err(e) => {
                self.telemetry.counter_inc("pipeline.no_content", 1);
                match &e {
                    PipelineError::MissingPersonality { .. }
                    | PipelineError::Store(_)
                    | PipelineError::StoreTask(_) => {
                        error!(error = %e, kind = e.error_kind(), "content pipeline produced nothing");
                    }
                    _ => warn!(error = %e, kind = e.error_kind(), "content pipeline produced nothing"),
                }
                None
            }
        }
    }

    async fn try_generate(&self) -> Result<GeneratedContent, PipelineError> {
        let choice = self.choose(self.clock.now())?;
        let key = cache_key(choice.scene, &choice.topic);

        let cached = self.cache.lock().get(&key);
        if let Some(mut content) = cached {
            self.telemetry.counter_inc("pipeline.cache_hits", 1);
            debug!(key = %key, "content cache hit");
            content.from_cache = true;
            return Ok(content);
        }

        let personality = self.personality(choice.scene).await?;
        let system_prompt = format!(
            "{SYSTEM_GUIDE}\n\n你的人設：\n{}",
            personality.traits.describe()
        );
        let user_prompt = user_prompt(&personality.traits.identity, &choice);

        for attempt in 0..self.settings.max_attempts {
            let request = GenerationRequest {
                system_prompt: system_prompt.clone(),
                user_prompt: user_prompt.clone(),
                sampling: self.settings.sampling.perturbed(attempt),
            };
            let output = self.generator.generate(&request).await?;
            self.telemetry.counter_inc("pipeline.generations", 1);

            let prepared = {
                let mut rng = self.rng.lock();
                self.rules.prepare(&output.text, &mut *rng)
            };
            match prepared {
                Ok(text) => {
                    info!(
                        scene = %choice.scene,
                        topic = %choice.topic,
                        attempt = attempt + 1,
                        chars = visible_length(&text),
                        tokens = output.usage.total(),
                        "content ready"
                    );
                    let content = GeneratedContent {
                        text,
                        scene: choice.scene,
                        topic: choice.topic,
                        generated_at: self.clock.now(),
                        from_cache: false,
                    };
                    self.cache.lock().insert(key, content.clone());
                    return Ok(content);
                }
                Err(reason) => {
                    self.telemetry.counter_inc("pipeline.validation_failures", 1);
                    warn!(attempt = attempt + 1, reason = %reason, "generated text rejected");
                }
            }
        }
        Err(PipelineError::ValidationExhausted {
            attempts: self.settings.max_attempts,
        })
    }

    fn choose(&self, now: DateTime<Utc>) -> Result<Choice, PipelineError> {
        let hour = now.with_timezone(&self.tz).hour();
        let mut rng = self.rng.lock();
        let scene = if self.settings.night_hours.contains(hour) {
            ContextKey::Night
        } else {
            ContextKey::DAYTIME
                .choose(&mut *rng)
                .copied()
                .unwrap_or(ContextKey::Base)
        };
        let topic = self
            .settings
            .topics
            .choose(&mut *rng)
            .ok_or(PipelineError::NoTopics)?;
        let angle = topic.angles.choose(&mut *rng).cloned();
        Ok(Choice {
            scene,
            topic: topic.name.clone(),
            angle,
        })
    }

    /// Scene record, else the base record. A cache miss reads SQLite, so
    /// this runs on the blocking pool.
    async fn personality(&self, scene: ContextKey) -> Result<PersonalityMemory, PipelineError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || load_personality(&store, scene))
            .await
            .map_err(|join| PipelineError::StoreTask(join.to_string()))?
    }

    /// Drop a published post from the cache so its pairing can produce
    /// fresh text next time.
    pub fn forget(&self, content: &GeneratedContent) {
        self.cache.lock().remove(&content.cache_key());
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> PipelineStats {
        let cached_content = {
            let mut cache = self.cache.lock();
            cache.purge_expired();
            cache.len()
        };
        PipelineStats {
            cached_content,
            generations: self.telemetry.counter_get("pipeline.generations"),
            cache_hits: self.telemetry.counter_get("pipeline.cache_hits"),
            validation_failures: self.telemetry.counter_get("pipeline.validation_failures"),
            no_content: self.telemetry.counter_get("pipeline.no_content"),
            timing: self.telemetry.operation_stats("pipeline.generate"),
        }
    }
}

fn user_prompt(identity: &str, choice: &Choice) -> String {
    let identity = if identity.is_empty() { "自己" } else { identity };
    let mut prompt = format!(
        "請你根據「{}」這個主題，以{identity}的身分寫一篇完整的貼文。",
        choice.topic
    );
    if let Some(angle) = &choice.angle {
        prompt.push_str(&format!("提示詞是：{angle}。"));
    }
    prompt.push_str("記得要符合人設特徵，並確保文章內容完整、有頭有尾。");
    prompt
}
