// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod history;
pub mod metrics;
pub mod model;
pub mod store;

// Feed core: story rail, paged window, like overlay and the orchestrator on top
pub mod feed;
pub mod likes;
pub mod overlay;
pub mod paginator;
pub mod stories;

// Device-local extras and background polling
pub mod chat;
pub mod favorites;
pub mod poller;
pub mod prefs;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::FeedConfig;
pub use crate::error::{FeedError, FetchError, PersistenceError, WriteError};
pub use crate::feed::{FeedOrchestrator, LoadMoreOutcome};
pub use crate::model::{FeedPost, FeedViewModel, LikeState, OverlayEntry, Post, Story};
