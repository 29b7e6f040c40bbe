use async_trait::async_trait;

use crate::errors::ExternalError;
use crate::ids::PostId;

/// The social-posting collaborator.
///
/// `publish` is one logical operation even when the backend needs two
/// phases (create a container, wait, confirm).
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, text: &str) -> Result<PostId, ExternalError>;

    /// Fetch a published post. `Ok(None)` when the backend reports it missing.
    async fn get(&self, id: &PostId) -> Result<Option<serde_json::Value>, ExternalError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, id: &PostId) -> Result<bool, ExternalError>;
}
