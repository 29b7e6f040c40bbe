use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::PostId;
use crate::scene::ContextKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Published,
    Deleted,
}

/// A post that went out. Written once after a confirmed publish.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: PostId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<ContextKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Hex SHA-256 of the content, used to spot repeats in history.
    pub fingerprint: String,
}

impl PostRecord {
    pub fn published(id: PostId, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let content = content.into();
        let fingerprint = fingerprint(&content);
        Self {
            id,
            content,
            created_at,
            status: PostStatus::Published,
            scene: None,
            topic: None,
            fingerprint,
        }
    }

    pub fn with_scene(mut self, scene: ContextKey, topic: impl Into<String>) -> Self {
        self.scene = Some(scene);
        self.topic = Some(topic.into());
        self
    }
}

pub fn fingerprint(content: &str) -> String {
    let digest = Sha256::digest(content.trim().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_sets_status_and_fingerprint() {
        let rec = PostRecord::published(PostId::from_raw("p1"), "你好～", Utc::now());
        assert_eq!(rec.status, PostStatus::Published);
        assert_eq!(rec.fingerprint.len(), 64);
        assert!(rec.scene.is_none());
    }

    #[test]
    fn fingerprint_ignores_surrounding_whitespace() {
        assert_eq!(fingerprint("  今天好開心！ "), fingerprint("今天好開心！"));
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }

    #[test]
    fn with_scene_attaches_metadata() {
        let rec = PostRecord::published(PostId::from_raw("p2"), "x", Utc::now())
            .with_scene(ContextKey::Gaming, "遊戲");
        assert_eq!(rec.scene, Some(ContextKey::Gaming));
        assert_eq!(rec.topic.as_deref(), Some("遊戲"));
    }

    #[test]
    fn serde_skips_missing_scene() {
        let rec = PostRecord::published(PostId::from_raw("p3"), "x", Utc::now());
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("scene").is_none());
        assert_eq!(json["status"], "published");
    }
}
