// src/prefs.rs
//! Per-device display toggles. Missing or unreadable values mean "show".

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::store::KvStore;

pub const SHOW_LIKES_KEY: &str = "showLikes";
pub const SHOW_STORIES_KEY: &str = "showStories";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPrefs {
    pub show_likes: bool,
    pub show_stories: bool,
}

impl Default for DisplayPrefs {
    fn default() -> Self {
        Self {
            show_likes: true,
            show_stories: true,
        }
    }
}

impl DisplayPrefs {
    pub async fn load(kv: &dyn KvStore) -> Self {
        Self {
            show_likes: read_flag(kv, SHOW_LIKES_KEY).await,
            show_stories: read_flag(kv, SHOW_STORIES_KEY).await,
        }
    }

    pub async fn save(&self, kv: &dyn KvStore) -> Result<(), PersistenceError> {
        kv.write(SHOW_LIKES_KEY, bool_bytes(self.show_likes)).await?;
        kv.write(SHOW_STORIES_KEY, bool_bytes(self.show_stories)).await
    }
}

fn bool_bytes(v: bool) -> &'static [u8] {
    if v {
        b"true"
    } else {
        b"false"
    }
}

async fn read_flag(kv: &dyn KvStore, key: &str) -> bool {
    match kv.read(key).await {
        Ok(Some(bytes)) => serde_json::from_slice::<bool>(&bytes).unwrap_or(true),
        Ok(None) => true,
        Err(e) => {
            tracing::warn!(target: "prefs", key, error = %e, "failed to load display setting");
            true
        }
    }
}
