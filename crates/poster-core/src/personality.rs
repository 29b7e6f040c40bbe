use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scene::ContextKey;

/// Character traits consumed when building the generation prompt.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalityTraits {
    pub identity: String,
    pub temperament: String,
    pub quirks: String,
    pub mood: Option<String>,
    pub activities: Vec<String>,
    pub emojis: Vec<String>,
    pub phrases: Vec<String>,
}

impl PersonalityTraits {
    /// Synthesized record for a scene that has never been persisted.
    pub fn default_for(key: ContextKey) -> Self {
        let base = Self {
            identity: "AI少女".into(),
            temperament: "善良、溫柔、容易感到寂寞".into(),
            quirks: "對現實世界充滿好奇，喜歡交朋友".into(),
            ..Self::default()
        };
        match key {
            ContextKey::Base => base,
            ContextKey::Gaming => Self {
                mood: Some("興奮".into()),
                activities: vec!["玩遊戲".into(), "看攻略".into()],
                emojis: vec!["🎮".into(), "✨".into()],
                ..base
            },
            ContextKey::Night => Self {
                mood: Some("安靜".into()),
                activities: vec!["看星星".into(), "聽音樂".into()],
                emojis: vec!["🌙".into(), "💭".into()],
                ..base
            },
            ContextKey::Social => Self {
                mood: Some("開心".into()),
                emojis: vec!["💕".into(), "😊".into()],
                phrases: vec!["大家好".into(), "好想認識更多朋友".into()],
                ..base
            },
        }
    }

    /// Render as prompt lines for the system instruction.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "- 身份：{}\n- 性格：{}\n- 特點：{}",
            self.identity, self.temperament, self.quirks
        );
        if let Some(mood) = &self.mood {
            out.push_str(&format!("\n- 心情：{mood}"));
        }
        if !self.activities.is_empty() {
            out.push_str(&format!("\n- 喜歡：{}", self.activities.join("、")));
        }
        if !self.emojis.is_empty() {
            out.push_str(&format!("\n- 常用表情：{}", self.emojis.join(" ")));
        }
        if !self.phrases.is_empty() {
            out.push_str(&format!("\n- 口頭禪：{}", self.phrases.join("、")));
        }
        out
    }
}

/// One persisted personality record per scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonalityMemory {
    pub context: ContextKey,
    pub traits: PersonalityTraits,
    pub updated_at: DateTime<Utc>,
}

impl PersonalityMemory {
    pub fn default_for(context: ContextKey, now: DateTime<Utc>) -> Self {
        Self {
            context,
            traits: PersonalityTraits::default_for(context),
            updated_at: now,
        }
    }

    /// Deep-merge a JSON patch into the traits. Objects merge key by key,
    /// everything else in the patch replaces the existing value.
    pub fn merged(&self, patch: &Value, now: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let mut current = serde_json::to_value(&self.traits)?;
        merge_value(&mut current, patch);
        Ok(Self {
            context: self.context,
            traits: serde_json::from_value(current)?,
            updated_at: now,
        })
    }
}

fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (key, value) in p {
                match t.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_value(existing, value);
                    }
                    _ => {
                        t.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (t, p) => *t = p.clone(),
    }
}
