//! # Feed Orchestrator
//! Composes the story rail, the paginated post window and the like overlay
//! into the [`FeedViewModel`] the UI renders.
//!
//! State lives behind a `std::sync::Mutex` that is only held for in-memory
//! bookkeeping, never across a backend call. Fetch failures leave the
//! previous view in place and are recorded in `last_error`.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

use crate::backend::FeedBackend;
use crate::config::feed::{FeedConfig, DEFAULT_PAGE_SIZE, DEFAULT_STORY_WINDOW_SECS};
use crate::error::{FeedError, FetchError};
use crate::history::SyncHistory;
use crate::likes::{LikeReconciler, ToggleOutcome};
use crate::model::{FeedPost, FeedViewModel, Post, Story};
use crate::overlay::OverlayStore;
use crate::paginator::{MoreRejected, Paginator};
use crate::stories::{active_since, prepare_story_rail};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_refresh_total", "Full feed loads (mount + refresh).");
        describe_counter!("feed_load_more_total", "Load-more pages applied.");
        describe_counter!(
            "feed_load_more_rejected_total",
            "Load-more calls rejected (in flight / exhausted / not loaded)."
        );
        describe_counter!("feed_fetch_errors_total", "Remote reads that failed.");
        describe_counter!("feed_stale_results_total", "Pages discarded after a newer refresh.");
        describe_counter!("like_toggle_total", "Optimistic like toggles.");
        describe_counter!("like_sync_errors_total", "Remote like writes that failed.");
        describe_counter!("overlay_persist_errors_total", "Overlay writes that failed.");
        describe_counter!("stories_dedup_dropped_total", "Stories collapsed by per-author dedup.");
        describe_gauge!("feed_window_size", "Rows consumed from the server ordering.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    /// A page was appended; the count is posts actually added to the view.
    Appended(usize),
    Rejected(MoreRejected),
    /// A refresh replaced the window while this page was in flight.
    Discarded,
}

struct FeedState {
    paginator: Paginator,
    posts: Vec<FeedPost>,
    stories: Vec<Story>,
    last_error: Option<String>,
}

pub struct FeedOrchestrator {
    backend: Arc<dyn FeedBackend>,
    likes: LikeReconciler,
    story_window_secs: u64,
    state: Mutex<FeedState>,
}

impl FeedOrchestrator {
    pub fn new(backend: Arc<dyn FeedBackend>, overlay: Arc<OverlayStore>, user_id: impl Into<String>) -> Self {
        ensure_metrics_described();
        let likes = LikeReconciler::new(overlay, backend.clone(), user_id);
        Self {
            backend,
            likes,
            story_window_secs: DEFAULT_STORY_WINDOW_SECS,
            state: Mutex::new(FeedState {
                paginator: Paginator::new(DEFAULT_PAGE_SIZE),
                posts: Vec::new(),
                stories: Vec::new(),
                last_error: None,
            }),
        }
    }

    pub fn from_config(cfg: &FeedConfig, backend: Arc<dyn FeedBackend>, overlay: Arc<OverlayStore>) -> Self {
        Self::new(backend, overlay, cfg.user_id.clone())
            .with_page_size(cfg.page_size)
            .with_story_window_secs(cfg.story_window_secs)
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.lock().paginator = Paginator::new(page_size);
        self
    }

    pub fn with_story_window_secs(mut self, secs: u64) -> Self {
        self.story_window_secs = secs;
        self
    }

    pub fn with_sync_history(mut self, history: Arc<SyncHistory>) -> Self {
        self.likes = self.likes.with_history(history);
        self
    }

    pub fn sync_history(&self) -> &Arc<SyncHistory> {
        self.likes.history()
    }

    pub fn overlay(&self) -> &Arc<OverlayStore> {
        self.likes.overlay()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.state.lock().expect("feed state mutex poisoned")
    }

    /// First screen load. Identical to a refresh.
    pub async fn mount(&self) -> Result<FeedViewModel, FeedError> {
        self.refresh().await
    }

    /// Re-fetch stories and the first page; the post window is replaced, not
    /// merged. On a post fetch failure the old window and rail both stay and
    /// the error is returned. A story failure alone keeps the old rail and is
    /// reported through `last_error`.
    pub async fn refresh(&self) -> Result<FeedViewModel, FeedError> {
        counter!("feed_refresh_total").increment(1);
        let req = self.lock().paginator.begin_initial();

        let since = active_since(Utc::now(), self.story_window_secs);
        let (stories_res, posts_res) = tokio::join!(
            self.backend.fetch_active_stories(since),
            self.backend.fetch_posts_page(req.offset, req.limit),
        );

        let mut st = self.lock();

        let rows = match posts_res {
            Ok(rows) => rows,
            Err(e) => {
                counter!("feed_fetch_errors_total", "op" => "posts").increment(1);
                tracing::warn!(target: "feed", error = %e, "initial page fetch failed; keeping previous window");
                st.last_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        // Stories travel with the page: a superseded refresh applies neither.
        let page = match st.paginator.apply_initial(req, rows) {
            Ok(page) => page,
            Err(_stale) => {
                counter!("feed_stale_results_total").increment(1);
                return Ok(Self::snapshot(&st));
            }
        };
        st.last_error = None;
        st.posts = page.posts.into_iter().map(|p| self.likes.merge(p)).collect();

        match stories_res {
            Ok(raw) => {
                let (rail, _dropped) = prepare_story_rail(Utc::now(), raw, self.story_window_secs);
                st.stories = rail;
            }
            Err(e) => {
                counter!("feed_fetch_errors_total", "op" => "stories").increment(1);
                tracing::warn!(target: "feed", error = %e, "story fetch failed; keeping previous rail");
                st.last_error = Some(e.to_string());
            }
        }

        tracing::info!(
            target: "feed",
            posts = st.posts.len(),
            stories = st.stories.len(),
            has_more = page.has_more,
            "feed refreshed"
        );
        Ok(Self::snapshot(&st))
    }

    /// Append the next page. Rejected without side effects while another
    /// load-more is outstanding.
    pub async fn load_more(&self) -> Result<LoadMoreOutcome, FeedError> {
        let begun = self.lock().paginator.begin_load_more();
        let req = match begun {
            Ok(req) => req,
            Err(reason) => {
                counter!("feed_load_more_rejected_total").increment(1);
                tracing::debug!(target: "feed", ?reason, "load-more rejected");
                return Ok(LoadMoreOutcome::Rejected(reason));
            }
        };

        let res: Result<_, FetchError> = self.backend.fetch_posts_page(req.offset, req.limit).await;

        let mut st = self.lock();
        let rows = match res {
            Ok(rows) => rows,
            Err(e) => {
                st.paginator.fail_more(req);
                counter!("feed_fetch_errors_total", "op" => "more").increment(1);
                tracing::warn!(target: "feed", offset = req.offset, error = %e, "load-more failed");
                st.last_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        match st.paginator.apply_more(req, rows) {
            Ok(page) => {
                let added = page.posts.len();
                let merged: Vec<FeedPost> =
                    page.posts.into_iter().map(|p| self.likes.merge(p)).collect();
                st.posts.extend(merged);
                st.last_error = None;
                counter!("feed_load_more_total").increment(1);
                Ok(LoadMoreOutcome::Appended(added))
            }
            Err(_stale) => {
                counter!("feed_stale_results_total").increment(1);
                Ok(LoadMoreOutcome::Discarded)
            }
        }
    }

    /// Flip the like on a post in the window. The returned outcome carries
    /// the new view immediately; the remote write completes in the background.
    pub async fn toggle_like(&self, post_id: &str) -> Result<ToggleOutcome, FeedError> {
        let post = {
            let mut st = self.lock();
            let fp = st
                .posts
                .iter_mut()
                .find(|p| p.id() == post_id)
                .ok_or_else(|| FeedError::UnknownPost(post_id.to_string()))?;
            self.likes.apply_toggle(fp);
            fp.clone()
        };
        Ok(self.likes.commit(post).await)
    }

    /// Current render-ready snapshot.
    pub fn view(&self) -> FeedViewModel {
        Self::snapshot(&self.lock())
    }

    /// The remote post behind a window entry, if it is loaded.
    pub fn find_post(&self, post_id: &str) -> Option<Post> {
        self.lock()
            .posts
            .iter()
            .find(|p| p.id() == post_id)
            .map(|p| p.post.clone())
    }

    pub fn window_size(&self) -> usize {
        self.lock().paginator.window_size()
    }

    fn snapshot(st: &FeedState) -> FeedViewModel {
        FeedViewModel {
            posts: st.posts.clone(),
            stories: st.stories.clone(),
            has_more: st.paginator.has_more(),
            loading_more: st.paginator.is_loading_more(),
            last_error: st.last_error.clone(),
        }
    }
}
