//! Error taxonomy for the feed core.
//!
//! Nothing here is fatal to the process: every variant degrades to
//! "keep showing what we already have".

use thiserror::Error;

/// A remote read (stories, posts, likes, messages) failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed backend payload: {0}")]
    Decode(String),
}

/// A remote like create/delete failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("like sync failed for post {post_id}: {reason}")]
    Like { post_id: String, reason: String },

    #[error("like sync task aborted for post {0}")]
    Aborted(String),
}

/// The local durable store could not be read or written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("reading key '{key}': {reason}")]
    Read { key: String, reason: String },

    #[error("writing key '{key}': {reason}")]
    Write { key: String, reason: String },

    #[error("encoding value for key '{key}': {reason}")]
    Encode { key: String, reason: String },
}

/// Umbrella error surfaced by the orchestrator and the HTTP layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("post {0} is not in the current feed window")]
    UnknownPost(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}
