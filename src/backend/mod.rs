// src/backend/mod.rs
//! Remote collaborators the feed core talks to. Everything behind these traits
//! is plain request/response against the hosted backend.

pub mod memory;
pub mod rest;

use chrono::{DateTime, Utc};

use crate::chat::Message;
use crate::error::{FetchError, WriteError};
use crate::model::{Post, Story};

#[async_trait::async_trait]
pub trait FeedBackend: Send + Sync {
    /// Stories created strictly after `since`.
    async fn fetch_active_stories(&self, since: DateTime<Utc>) -> Result<Vec<Story>, FetchError>;

    /// Posts ordered by `created_at` descending, rows `[offset, offset + limit)`.
    /// `Post::liked` reflects the viewing user's remote like.
    async fn fetch_posts_page(&self, offset: usize, limit: usize) -> Result<Vec<Post>, FetchError>;

    async fn create_like(&self, post_id: &str, user_id: &str) -> Result<(), WriteError>;

    async fn delete_like(&self, post_id: &str, user_id: &str) -> Result<(), WriteError>;

    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Messages of one thread, oldest first.
    async fn fetch_messages(&self, thread_id: &str) -> Result<Vec<Message>, FetchError>;
}
