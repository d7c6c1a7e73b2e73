// src/favorites.rs
//! Saved posts, kept on the device under the `favorites` key as a JSON list.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::PersistenceError;
use crate::model::Post;
use crate::store::KvStore;

pub const FAVORITES_KEY: &str = "favorites";

pub struct FavoritesStore {
    kv: Arc<dyn KvStore>,
    // Serializes read-modify-write cycles.
    write_lock: AsyncMutex<()>,
}

impl FavoritesStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Saved posts, oldest first. Unreadable data reads as an empty list.
    pub async fn list(&self) -> Vec<Post> {
        self.load().await.unwrap_or_else(|e| {
            tracing::warn!(target: "favorites", error = %e, "favorites read failed");
            Vec::new()
        })
    }

    pub async fn is_favorite(&self, post_id: &str) -> bool {
        self.list().await.iter().any(|p| p.id == post_id)
    }

    /// Add the post if absent, remove it if present. Returns the new state.
    pub async fn toggle(&self, post: &Post) -> Result<bool, PersistenceError> {
        let _w = self.write_lock.lock().await;
        let mut list = self.load().await?;
        let now_favorite = if let Some(i) = list.iter().position(|p| p.id == post.id) {
            list.remove(i);
            false
        } else {
            list.push(post.clone());
            true
        };
        self.store(&list).await?;
        Ok(now_favorite)
    }

    /// Returns whether anything was removed.
    pub async fn remove(&self, post_id: &str) -> Result<bool, PersistenceError> {
        let _w = self.write_lock.lock().await;
        let mut list = self.load().await?;
        let before = list.len();
        list.retain(|p| p.id != post_id);
        if list.len() == before {
            return Ok(false);
        }
        self.store(&list).await?;
        Ok(true)
    }

    // Modifications go through here: a store error must not be mistaken for
    // an empty list, or the write would replace everything saved so far.
    async fn load(&self) -> Result<Vec<Post>, PersistenceError> {
        match self.kv.read(FAVORITES_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(target: "favorites", error = %e, "corrupt favorites list, ignoring");
                Vec::new()
            })),
            None => Ok(Vec::new()),
        }
    }

    async fn store(&self, list: &[Post]) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(list).map_err(|e| PersistenceError::Encode {
            key: FAVORITES_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.kv.write(FAVORITES_KEY, &bytes).await
    }
}
