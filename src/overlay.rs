//! # Local Overlay Store
//! Device-local like state keyed by post id, persisted as a single JSON
//! document `{"likes": {<post_id>: {"liked": .., "likes": ..}}}` under the
//! `partygram` key.
//!
//! The in-memory map is authoritative for readers; every `set` replaces a whole
//! entry under the lock, so a reader sees either the old or the new entry.
//! Persisting snapshots the map under a separate async writer lock, which keeps
//! the last file written equal to the latest state. The document is never
//! written before it has been read once, so a failed startup read cannot wipe
//! entries saved by an earlier session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::PersistenceError;
use crate::model::OverlayEntry;
use crate::store::KvStore;

pub const OVERLAY_KEY: &str = "partygram";

#[derive(Debug, Default, Serialize, Deserialize)]
struct OverlayDoc {
    #[serde(default)]
    likes: HashMap<String, OverlayEntry>,
}

pub struct OverlayStore {
    kv: Arc<dyn KvStore>,
    entries: RwLock<HashMap<String, OverlayEntry>>,
    // False until the durable document has been read once. While false the
    // on-disk entries are unknown and the document must not be overwritten.
    hydrated: AtomicBool,
    persist_lock: AsyncMutex<()>,
}

impl OverlayStore {
    /// Empty overlay; call [`OverlayStore::load_all`] to hydrate from disk.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            entries: RwLock::new(HashMap::new()),
            hydrated: AtomicBool::new(false),
            persist_lock: AsyncMutex::new(()),
        }
    }

    /// Construct and hydrate. Read failures are logged and yield an empty
    /// overlay (remote truth wins).
    pub async fn open(kv: Arc<dyn KvStore>) -> Self {
        let store = Self::new(kv);
        store.load_all().await;
        store
    }

    /// Reload the mapping from the durable store and return a copy.
    ///
    /// Entries set in memory win over what is on disk. On a read error the
    /// in-memory map is left as it is.
    pub async fn load_all(&self) -> HashMap<String, OverlayEntry> {
        match self.read_doc().await {
            Ok(loaded) => {
                let merged = self.absorb(loaded);
                tracing::debug!(target: "overlay", entries = merged.len(), "overlay loaded");
                merged
            }
            Err(e) => {
                tracing::warn!(target: "overlay", error = %e, "overlay read failed, using remote truth");
                counter!("overlay_read_errors_total").increment(1);
                self.entries.read().expect("overlay rwlock poisoned").clone()
            }
        }
    }

    /// Whether the durable document has been read successfully.
    pub fn is_hydrated(&self) -> bool {
        self.hydrated.load(Ordering::SeqCst)
    }

    pub fn get(&self, post_id: &str) -> Option<OverlayEntry> {
        self.entries
            .read()
            .expect("overlay rwlock poisoned")
            .get(post_id)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("overlay rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the in-memory entry immediately. Durability follows via
    /// [`OverlayStore::persist`].
    pub fn set_local(&self, post_id: &str, entry: OverlayEntry) {
        self.entries
            .write()
            .expect("overlay rwlock poisoned")
            .insert(post_id.to_string(), entry);
    }

    /// Write the current mapping to the durable store.
    ///
    /// If the document was never read, it is read and merged first; when that
    /// read fails nothing is written and the read error is returned.
    pub async fn persist(&self) -> Result<(), PersistenceError> {
        let _writer = self.persist_lock.lock().await;
        if !self.is_hydrated() {
            match self.read_doc().await {
                Ok(on_disk) => {
                    self.absorb(on_disk);
                }
                Err(e) => {
                    tracing::warn!(target: "overlay", error = %e, "overlay baseline unknown, not persisting");
                    counter!("overlay_persist_errors_total").increment(1);
                    return Err(e);
                }
            }
        }

        let bytes = {
            let guard = self.entries.read().expect("overlay rwlock poisoned");
            let doc = OverlayDocRef { likes: &guard };
            serde_json::to_vec(&doc).map_err(|e| PersistenceError::Encode {
                key: OVERLAY_KEY.to_string(),
                reason: e.to_string(),
            })?
        };
        let res = self.kv.write(OVERLAY_KEY, &bytes).await;
        if let Err(e) = &res {
            tracing::warn!(target: "overlay", error = %e, "overlay persist failed");
            counter!("overlay_persist_errors_total").increment(1);
        }
        res
    }

    /// Total overwrite of one entry, then persist.
    pub async fn set(&self, post_id: &str, entry: OverlayEntry) -> Result<(), PersistenceError> {
        self.set_local(post_id, entry);
        self.persist().await
    }

    // A missing or corrupt document reads as empty; only store errors fail.
    async fn read_doc(&self) -> Result<HashMap<String, OverlayEntry>, PersistenceError> {
        match self.kv.read(OVERLAY_KEY).await? {
            Some(bytes) => match serde_json::from_slice::<OverlayDoc>(&bytes) {
                Ok(doc) => Ok(doc.likes),
                Err(e) => {
                    tracing::warn!(target: "overlay", error = %e, "corrupt overlay document, ignoring");
                    Ok(HashMap::new())
                }
            },
            None => Ok(HashMap::new()),
        }
    }

    // Disk entries fill in under the in-memory ones; marks the store hydrated.
    fn absorb(&self, mut on_disk: HashMap<String, OverlayEntry>) -> HashMap<String, OverlayEntry> {
        let mut guard = self.entries.write().expect("overlay rwlock poisoned");
        on_disk.extend(guard.drain());
        *guard = on_disk;
        self.hydrated.store(true, Ordering::SeqCst);
        guard.clone()
    }
}

#[derive(Serialize)]
struct OverlayDocRef<'a> {
    likes: &'a HashMap<String, OverlayEntry>,
}
