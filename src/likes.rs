//! # Like Reconciler
//! Optimistic like toggling over the local overlay, with the remote write
//! running as a detached task.
//!
//! Policy: a failed remote write is logged and reported through
//! [`LikeSync::confirmed`], but the overlay is not rolled back. The overlay
//! keeps winning over remote values for that post from then on.

use std::sync::Arc;

use metrics::counter;
use tokio::task::JoinHandle;

use crate::backend::FeedBackend;
use crate::error::{PersistenceError, WriteError};
use crate::history::SyncHistory;
use crate::model::{anon_id, FeedPost, LikeState, OverlayEntry, Post};
use crate::overlay::OverlayStore;

/// Effective values for a post: the overlay entry if one exists, else the
/// remote values from the fetch.
pub fn merge(post: Post, overlay: Option<OverlayEntry>) -> FeedPost {
    match overlay {
        Some(e) => FeedPost {
            post,
            effective_liked: e.liked,
            effective_likes: e.likes,
            like_state: state_for(e.liked),
        },
        None => FeedPost {
            effective_liked: post.liked,
            effective_likes: post.likes,
            like_state: LikeState::Remote,
            post,
        },
    }
}

/// The entry a toggle produces, derived from the current effective values.
pub fn toggled(current: OverlayEntry) -> OverlayEntry {
    let liked = !current.liked;
    let likes = if liked {
        current.likes.saturating_add(1)
    } else {
        current.likes.saturating_sub(1)
    };
    OverlayEntry { liked, likes }
}

fn state_for(liked: bool) -> LikeState {
    if liked {
        LikeState::OptimisticLiked
    } else {
        LikeState::OptimisticUnliked
    }
}

/// Handle on the remote half of a toggle.
#[derive(Debug)]
pub struct LikeSync {
    post_id: String,
    handle: JoinHandle<Result<(), WriteError>>,
}

impl LikeSync {
    /// Wait for the remote write.
    pub async fn confirmed(self) -> Result<(), WriteError> {
        match self.handle.await {
            Ok(res) => res,
            Err(_) => Err(WriteError::Aborted(self.post_id)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Result of a toggle as seen by the caller: the new view right away, whether
/// the overlay reached disk, and the pending remote write.
#[derive(Debug)]
pub struct ToggleOutcome {
    pub post: FeedPost,
    pub persisted: Result<(), PersistenceError>,
    pub sync: LikeSync,
}

pub struct LikeReconciler {
    overlay: Arc<OverlayStore>,
    backend: Arc<dyn FeedBackend>,
    user_id: String,
    history: Arc<SyncHistory>,
}

impl LikeReconciler {
    pub fn new(
        overlay: Arc<OverlayStore>,
        backend: Arc<dyn FeedBackend>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            overlay,
            backend,
            user_id: user_id.into(),
            history: Arc::new(SyncHistory::default()),
        }
    }

    pub fn with_history(mut self, history: Arc<SyncHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn overlay(&self) -> &Arc<OverlayStore> {
        &self.overlay
    }

    pub fn history(&self) -> &Arc<SyncHistory> {
        &self.history
    }

    /// Merge a freshly fetched post with whatever the overlay holds.
    pub fn merge(&self, post: Post) -> FeedPost {
        let entry = self.overlay.get(&post.id);
        merge(post, entry)
    }

    /// Synchronous half: flip the post in place and record the overlay entry
    /// in memory. Safe to call under the caller's state lock.
    pub fn apply_toggle(&self, post: &mut FeedPost) -> OverlayEntry {
        let next = toggled(post.effective());
        post.effective_liked = next.liked;
        post.effective_likes = next.likes;
        post.like_state = state_for(next.liked);
        self.overlay.set_local(post.id(), next);

        counter!("like_toggle_total", "direction" => if next.liked { "like" } else { "unlike" })
            .increment(1);
        tracing::debug!(
            target: "likes",
            post_id = post.id(),
            liked = next.liked,
            likes = next.likes,
            "optimistic toggle"
        );
        next
    }

    /// Asynchronous half: persist the overlay and fire the remote write.
    pub async fn commit(&self, post: FeedPost) -> ToggleOutcome {
        let persisted = self.overlay.persist().await;
        let sync = self.spawn_remote(post.id().to_string(), post.effective_liked);
        ToggleOutcome {
            post,
            persisted,
            sync,
        }
    }

    /// Toggle a post that is not held behind a lock.
    pub async fn toggle(&self, post: &mut FeedPost) -> ToggleOutcome {
        self.apply_toggle(post);
        self.commit(post.clone()).await
    }

    fn spawn_remote(&self, post_id: String, liked: bool) -> LikeSync {
        let backend = self.backend.clone();
        let history = self.history.clone();
        let user_id = self.user_id.clone();
        let pid = post_id.clone();

        let handle = tokio::spawn(async move {
            if user_id.is_empty() {
                history.record(&pid, liked, Some("no signed-in user".into()));
                return Err(WriteError::Like {
                    post_id: pid,
                    reason: "no signed-in user".into(),
                });
            }
            let res = if liked {
                backend.create_like(&pid, &user_id).await
            } else {
                backend.delete_like(&pid, &user_id).await
            };
            match &res {
                Ok(()) => tracing::debug!(
                    target: "likes",
                    post_id = %pid,
                    user = %anon_id(&user_id),
                    liked,
                    "remote like synced"
                ),
                Err(e) => {
                    counter!("like_sync_errors_total").increment(1);
                    tracing::warn!(
                        target: "likes",
                        post_id = %pid,
                        user = %anon_id(&user_id),
                        error = %e,
                        "remote like sync failed; keeping optimistic state"
                    );
                }
            }
            history.record(&pid, liked, res.as_ref().err().map(|e| e.to_string()));
            res
        });

        LikeSync { post_id, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{LikeCall, MemoryBackend};
    use crate::store::MemoryKvStore;
    use chrono::{TimeZone, Utc};

    fn post(id: &str, likes: u32, liked: bool) -> Post {
        Post {
            id: id.into(),
            user_id: Some("author".into()),
            image: String::new(),
            description: String::new(),
            created_at: Utc.timestamp_opt(5, 0).unwrap(),
            likes,
            liked,
            hashtags: vec![],
            comments: 0,
        }
    }

    async fn reconciler(backend: Arc<MemoryBackend>) -> (LikeReconciler, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        let overlay = Arc::new(OverlayStore::open(kv.clone()).await);
        (LikeReconciler::new(overlay, backend, "viewer"), kv)
    }

    #[test]
    fn unlike_never_goes_below_zero() {
        let e = toggled(OverlayEntry { liked: true, likes: 0 });
        assert_eq!(e, OverlayEntry { liked: false, likes: 0 });
    }

    #[test]
    fn merge_prefers_overlay() {
        let fp = merge(post("A", 3, false), Some(OverlayEntry { liked: true, likes: 9 }));
        assert_eq!((fp.effective_liked, fp.effective_likes), (true, 9));
        assert_eq!(fp.like_state, LikeState::OptimisticLiked);

        let fp = merge(post("A", 3, false), None);
        assert_eq!((fp.effective_liked, fp.effective_likes), (false, 3));
        assert_eq!(fp.like_state, LikeState::Remote);
    }

    #[tokio::test]
    async fn toggle_writes_overlay_and_fires_create() {
        let backend = Arc::new(MemoryBackend::new("viewer").with_posts(vec![post("A", 3, false)]));
        let (r, _kv) = reconciler(backend.clone()).await;

        let mut fp = r.merge(post("A", 3, false));
        let out = r.toggle(&mut fp).await;
        assert_eq!((out.post.effective_liked, out.post.effective_likes), (true, 4));
        assert!(out.persisted.is_ok());
        assert_eq!(r.overlay().get("A"), Some(OverlayEntry { liked: true, likes: 4 }));

        out.sync.confirmed().await.unwrap();
        assert_eq!(
            backend.like_calls.lock().unwrap().as_slice(),
            &[LikeCall::Create {
                post_id: "A".into(),
                user_id: "viewer".into()
            }]
        );
    }

    #[tokio::test]
    async fn double_toggle_restores_original_values() {
        let backend = Arc::new(MemoryBackend::new("viewer"));
        let (r, _kv) = reconciler(backend.clone()).await;

        let mut fp = r.merge(post("A", 3, false));
        let first = r.toggle(&mut fp).await;
        let second = r.toggle(&mut fp).await;
        assert_eq!((second.post.effective_liked, second.post.effective_likes), (false, 3));
        assert_eq!(r.overlay().get("A"), Some(OverlayEntry { liked: false, likes: 3 }));

        let _ = first.sync.confirmed().await;
        let _ = second.sync.confirmed().await;
        assert_eq!(backend.like_call_count(), 2);
    }

    #[tokio::test]
    async fn remote_failure_is_reported_without_rollback() {
        let backend = Arc::new(MemoryBackend::new("viewer"));
        backend.fail_writes(true);
        let (r, _kv) = reconciler(backend).await;

        let mut fp = r.merge(post("A", 0, false));
        let out = r.toggle(&mut fp).await;
        let err = out.sync.confirmed().await.unwrap_err();
        assert!(matches!(err, WriteError::Like { .. }));
        assert_eq!(r.history().failures(), 1);
        assert_eq!(r.overlay().get("A"), Some(OverlayEntry { liked: true, likes: 1 }));
    }

    #[tokio::test]
    async fn persistence_failure_does_not_block_optimistic_view() {
        let backend = Arc::new(MemoryBackend::new("viewer"));
        let (r, kv) = reconciler(backend).await;
        kv.fail_writes(true);

        let mut fp = r.merge(post("A", 1, true));
        let out = r.toggle(&mut fp).await;
        assert!(out.persisted.is_err());
        assert_eq!((out.post.effective_liked, out.post.effective_likes), (false, 0));
        assert_eq!(out.post.like_state, LikeState::OptimisticUnliked);
    }
}
