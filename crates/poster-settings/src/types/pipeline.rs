//! Content pipeline settings: topics, validation criteria, sampling.

use poster_core::SamplingParams;
use serde::{Deserialize, Serialize};

use super::schedule::HourRange;

/// A topic plus the prompt angles the pipeline may pair it with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicSettings {
    pub name: String,
    #[serde(default)]
    pub angles: Vec<String>,
}

impl TopicSettings {
    fn new(name: &str, angles: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            angles: angles.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// Fixed criteria generated text must meet before it may be published.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationSettings {
    /// Minimum visible length (emoji excluded).
    pub min_length: usize,
    /// Maximum visible length (emoji excluded).
    pub max_length: usize,
    /// Sentence-aware truncation target once `max_length` is exceeded.
    pub truncate_to: usize,
    pub min_emoji: usize,
    pub max_emoji: usize,
    /// Text containing any of these is refused outright.
    pub forbidden_words: Vec<String>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            min_length: 20,
            max_length: 280,
            truncate_to: 250,
            min_emoji: 1,
            max_emoji: 4,
            forbidden_words: ["髒話", "暴力", "色情"].map(String::from).to_vec(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub topics: Vec<TopicSettings>,
    /// Hours mapped to the night scene.
    pub night_hours: HourRange,
    /// Lifetime of a generated post in the duplicate-suppression cache.
    pub content_cache_ttl_secs: u64,
    pub content_cache_size: usize,
    pub validation: ValidationSettings,
    /// Generation attempts before giving up on valid content.
    pub max_attempts: u32,
    pub sampling: SamplingParams,
    /// Bound on one generation call, retries included.
    pub generation_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let angles = [
            "分享一個今天的有趣經歷",
            "最近發現了一個很棒的",
            "想跟大家聊聊關於",
            "推薦一個我最近很喜歡的",
            "分享一下我對這件事的想法",
        ];
        Self {
            topics: [
                "寵物生活",
                "美食探索",
                "旅遊分享",
                "生活小確幸",
                "工作心得",
                "學習成長",
                "健康運動",
                "科技新知",
                "閱讀心得",
                "音樂藝術",
            ]
            .iter()
            .map(|t| TopicSettings::new(t, &angles))
            .collect(),
            night_hours: HourRange::new(23, 6),
            content_cache_ttl_secs: 24 * 3600,
            content_cache_size: 100,
            validation: ValidationSettings::default(),
            max_attempts: 3,
            sampling: SamplingParams::default(),
            generation_timeout_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topics_have_angles() {
        let s = PipelineSettings::default();
        assert_eq!(s.topics.len(), 10);
        assert!(s.topics.iter().all(|t| !t.angles.is_empty()));
    }

    #[test]
    fn topic_without_angles_parses() {
        let t: TopicSettings = serde_json::from_str(r#"{"name":"遊戲"}"#).unwrap();
        assert!(t.angles.is_empty());
    }

    #[test]
    fn partial_validation_fills_defaults() {
        let v: ValidationSettings = serde_json::from_str(r#"{"maxLength": 300}"#).unwrap();
        assert_eq!(v.max_length, 300);
        assert_eq!(v.min_emoji, 1);
    }
}
