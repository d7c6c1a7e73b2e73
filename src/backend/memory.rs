// src/backend/memory.rs
//! In-process backend used by tests and local demos.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::{ChatBackend, FeedBackend};
use crate::chat::Message;
use crate::error::{FetchError, WriteError};
use crate::model::{feed_order, Post, Story};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeCall {
    Create { post_id: String, user_id: String },
    Delete { post_id: String, user_id: String },
}

/// Backend holding rows in memory. Viewer-specific `liked` flags are derived
/// from the `post_likes` set for `viewer`.
pub struct MemoryBackend {
    viewer: String,
    posts: Mutex<Vec<Post>>,
    stories: Mutex<Vec<Story>>,
    post_likes: Mutex<HashSet<(String, String)>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    fail_fetches: AtomicBool,
    fail_pages: AtomicBool,
    fail_writes: AtomicBool,
    hold_pages: AtomicBool,
    // Page fetches parked by `hold_pages`, keyed by request index.
    held: Mutex<HashMap<usize, oneshot::Sender<()>>>,
    pub page_requests: Mutex<Vec<(usize, usize)>>,
    pub like_calls: Mutex<Vec<LikeCall>>,
}

impl MemoryBackend {
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            posts: Mutex::new(Vec::new()),
            stories: Mutex::new(Vec::new()),
            post_likes: Mutex::new(HashSet::new()),
            messages: Mutex::new(HashMap::new()),
            fail_fetches: AtomicBool::new(false),
            fail_pages: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            hold_pages: AtomicBool::new(false),
            held: Mutex::new(HashMap::new()),
            page_requests: Mutex::new(Vec::new()),
            like_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_posts(self, posts: Vec<Post>) -> Self {
        *self.posts.lock().expect("posts mutex poisoned") = posts;
        self
    }

    pub fn with_stories(self, stories: Vec<Story>) -> Self {
        *self.stories.lock().expect("stories mutex poisoned") = stories;
        self
    }

    pub fn insert_story(&self, story: Story) {
        self.stories.lock().expect("stories mutex poisoned").push(story);
    }

    pub fn insert_post(&self, post: Post) {
        self.posts.lock().expect("posts mutex poisoned").push(post);
    }

    pub fn set_remote_likes(&self, post_id: &str, likes: u32) {
        let mut posts = self.posts.lock().expect("posts mutex poisoned");
        if let Some(p) = posts.iter_mut().find(|p| p.id == post_id) {
            p.likes = likes;
        }
    }

    pub fn push_message(&self, msg: Message) {
        self.messages
            .lock()
            .expect("messages mutex poisoned")
            .entry(msg.thread_id.clone())
            .or_default()
            .push(msg);
    }

    pub fn fail_fetches(&self, on: bool) {
        self.fail_fetches.store(on, Ordering::SeqCst);
    }

    /// Fail only post page fetches; stories and messages keep working.
    pub fn fail_pages(&self, on: bool) {
        self.fail_pages.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Park every following page fetch until [`MemoryBackend::release_page`]
    /// is called with its request index (its position in `page_requests`).
    pub fn hold_pages(&self) {
        self.hold_pages.store(true, Ordering::SeqCst);
    }

    /// Let one parked fetch complete. Returns false if none is parked under
    /// that index.
    pub fn release_page(&self, request_index: usize) -> bool {
        let tx = self
            .held
            .lock()
            .expect("held mutex poisoned")
            .remove(&request_index);
        tx.is_some_and(|tx| tx.send(()).is_ok())
    }

    /// Stop parking and let every parked fetch complete.
    pub fn release_all_pages(&self) {
        self.hold_pages.store(false, Ordering::SeqCst);
        let held: Vec<_> = self
            .held
            .lock()
            .expect("held mutex poisoned")
            .drain()
            .collect();
        for (_, tx) in held {
            let _ = tx.send(());
        }
    }

    pub fn like_call_count(&self) -> usize {
        self.like_calls.lock().expect("like_calls mutex poisoned").len()
    }

    fn check_fetch(&self) -> Result<(), FetchError> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("memory backend: fetches disabled".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FeedBackend for MemoryBackend {
    async fn fetch_active_stories(&self, since: DateTime<Utc>) -> Result<Vec<Story>, FetchError> {
        self.check_fetch()?;
        let stories = self.stories.lock().expect("stories mutex poisoned");
        Ok(stories
            .iter()
            .filter(|s| s.created_at > since)
            .cloned()
            .collect())
    }

    async fn fetch_posts_page(&self, offset: usize, limit: usize) -> Result<Vec<Post>, FetchError> {
        let parked = {
            let mut requests = self.page_requests.lock().expect("page_requests mutex poisoned");
            requests.push((offset, limit));
            if self.hold_pages.load(Ordering::SeqCst) {
                let (tx, rx) = oneshot::channel();
                self.held
                    .lock()
                    .expect("held mutex poisoned")
                    .insert(requests.len() - 1, tx);
                Some(rx)
            } else {
                None
            }
        };
        if let Some(rx) = parked {
            let _ = rx.await;
        }
        self.check_fetch()?;
        if self.fail_pages.load(Ordering::SeqCst) {
            return Err(FetchError::Status {
                status: 503,
                body: "memory backend: pages disabled".into(),
            });
        }

        let mut sorted = self.posts.lock().expect("posts mutex poisoned").clone();
        sorted.sort_by(feed_order);
        let likes = self.post_likes.lock().expect("post_likes mutex poisoned");
        Ok(sorted
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|mut p| {
                p.liked = likes.contains(&(p.id.clone(), self.viewer.clone()));
                p
            })
            .collect())
    }

    async fn create_like(&self, post_id: &str, user_id: &str) -> Result<(), WriteError> {
        self.like_calls
            .lock()
            .expect("like_calls mutex poisoned")
            .push(LikeCall::Create {
                post_id: post_id.into(),
                user_id: user_id.into(),
            });
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WriteError::Like {
                post_id: post_id.into(),
                reason: "memory backend: writes disabled".into(),
            });
        }
        let inserted = self
            .post_likes
            .lock()
            .expect("post_likes mutex poisoned")
            .insert((post_id.to_string(), user_id.to_string()));
        if inserted {
            let mut posts = self.posts.lock().expect("posts mutex poisoned");
            if let Some(p) = posts.iter_mut().find(|p| p.id == post_id) {
                p.likes = p.likes.saturating_add(1);
            }
        }
        Ok(())
    }

    async fn delete_like(&self, post_id: &str, user_id: &str) -> Result<(), WriteError> {
        self.like_calls
            .lock()
            .expect("like_calls mutex poisoned")
            .push(LikeCall::Delete {
                post_id: post_id.into(),
                user_id: user_id.into(),
            });
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WriteError::Like {
                post_id: post_id.into(),
                reason: "memory backend: writes disabled".into(),
            });
        }
        let removed = self
            .post_likes
            .lock()
            .expect("post_likes mutex poisoned")
            .remove(&(post_id.to_string(), user_id.to_string()));
        if removed {
            let mut posts = self.posts.lock().expect("posts mutex poisoned");
            if let Some(p) = posts.iter_mut().find(|p| p.id == post_id) {
                p.likes = p.likes.saturating_sub(1);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait::async_trait]
impl ChatBackend for MemoryBackend {
    async fn fetch_messages(&self, thread_id: &str) -> Result<Vec<Message>, FetchError> {
        self.check_fetch()?;
        let mut out = self
            .messages
            .lock()
            .expect("messages mutex poisoned")
            .get(thread_id)
            .cloned()
            .unwrap_or_default();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}
