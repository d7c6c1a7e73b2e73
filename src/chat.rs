// src/chat.rs
//! Chat threads are read by polling: re-fetch the whole thread on a fixed
//! interval and publish the latest snapshot to watchers.
//!
//! [`ChatRooms`] keeps one poller per open thread for the HTTP layer; a thread
//! is polled from its first read until it is closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::backend::ChatBackend;
use crate::error::FetchError;
use crate::model::{id_from_any, UserId};
use crate::poller::PollHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(deserialize_with = "id_from_any")]
    pub thread_id: String,
    #[serde(deserialize_with = "id_from_any")]
    pub sender_id: UserId,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct ChatPoller {
    thread_id: String,
    rx: watch::Receiver<Vec<Message>>,
    // Set by the first successful fetch, which always notifies watchers.
    primed: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<FetchError>>>,
    handle: PollHandle,
}

impl ChatPoller {
    /// Start polling `thread_id` every `period`. The first fetch runs
    /// immediately. Failed fetches keep the previous snapshot.
    pub fn start(backend: Arc<dyn ChatBackend>, thread_id: impl Into<String>, period: Duration) -> Self {
        let thread_id = thread_id.into();
        let (tx, rx) = watch::channel(Vec::new());
        let primed = Arc::new(AtomicBool::new(false));
        let last_error = Arc::new(Mutex::new(None));
        let tid = thread_id.clone();
        let (primed_w, error_w) = (primed.clone(), last_error.clone());

        let handle = PollHandle::spawn("chat", period, move || {
            let backend = backend.clone();
            let tx = tx.clone();
            let tid = tid.clone();
            let primed = primed_w.clone();
            let last_error = error_w.clone();
            async move {
                match backend.fetch_messages(&tid).await {
                    Ok(msgs) => {
                        *last_error.lock().expect("chat error mutex poisoned") = None;
                        tx.send_if_modified(|cur| {
                            let first = !primed.swap(true, Ordering::SeqCst);
                            if !first && *cur == msgs {
                                false
                            } else {
                                *cur = msgs;
                                true
                            }
                        });
                    }
                    Err(e) => {
                        metrics::counter!("chat_poll_errors_total").increment(1);
                        tracing::warn!(target: "chat", thread_id = %tid, error = %e, "message poll failed");
                        *last_error.lock().expect("chat error mutex poisoned") = Some(e);
                    }
                }
            }
        });

        tracing::debug!(target: "chat", thread_id = %thread_id, period_secs = period.as_secs(), "chat polling started");
        Self {
            thread_id,
            rx,
            primed,
            last_error,
            handle,
        }
    }

    /// Whether at least one fetch has succeeded.
    pub fn is_primed(&self) -> bool {
        self.primed.load(Ordering::SeqCst)
    }

    /// Error from the latest poll, cleared by the next success.
    pub fn last_error(&self) -> Option<FetchError> {
        self.last_error.lock().expect("chat error mutex poisoned").clone()
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Latest snapshot, oldest message first.
    pub fn messages(&self) -> Vec<Message> {
        self.rx.borrow().clone()
    }

    /// A receiver that wakes whenever the thread content changes.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.rx.clone()
    }

    /// Stop polling (view teardown).
    pub async fn stop(self) {
        self.handle.stop().await;
    }
}

/// Open chat threads, each with its own poller.
pub struct ChatRooms {
    backend: Arc<dyn ChatBackend>,
    period: Duration,
    first_fetch_wait: Duration,
    rooms: AsyncMutex<HashMap<String, ChatPoller>>,
}

impl ChatRooms {
    /// `first_fetch_wait` bounds how long the first read of a thread waits
    /// for its initial snapshot.
    pub fn new(backend: Arc<dyn ChatBackend>, period: Duration, first_fetch_wait: Duration) -> Self {
        Self {
            backend,
            period,
            first_fetch_wait,
            rooms: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Latest snapshot of `thread_id`, oldest message first. The first read
    /// opens the thread and starts polling it.
    ///
    /// Fails only while the thread has never been fetched successfully.
    pub async fn messages(&self, thread_id: &str) -> Result<Vec<Message>, FetchError> {
        let (mut rx, primed) = {
            let mut rooms = self.rooms.lock().await;
            let poller = rooms.entry(thread_id.to_string()).or_insert_with(|| {
                metrics::gauge!("chat_rooms_open").increment(1.0);
                ChatPoller::start(self.backend.clone(), thread_id, self.period)
            });
            (poller.subscribe(), poller.primed.clone())
        };

        if !primed.load(Ordering::SeqCst)
            && tokio::time::timeout(self.first_fetch_wait, rx.changed()).await.is_err()
        {
            tracing::debug!(target: "chat", thread_id, "first chat fetch still pending");
        }
        if primed.load(Ordering::SeqCst) {
            return Ok(rx.borrow().clone());
        }

        let err = self.rooms.lock().await.get(thread_id).and_then(ChatPoller::last_error);
        Err(err.unwrap_or_else(|| FetchError::Transport(format!("thread {thread_id}: no messages fetched yet"))))
    }

    /// Stop polling `thread_id`. Returns false if it was not open.
    pub async fn close(&self, thread_id: &str) -> bool {
        let poller = self.rooms.lock().await.remove(thread_id);
        match poller {
            Some(poller) => {
                metrics::gauge!("chat_rooms_open").decrement(1.0);
                poller.stop().await;
                tracing::debug!(target: "chat", thread_id, "chat thread closed");
                true
            }
            None => false,
        }
    }

    /// Ids of the threads being polled, sorted.
    pub async fn open_threads(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every poller.
    pub async fn shutdown(&self) {
        let rooms: Vec<ChatPoller> = self.rooms.lock().await.drain().map(|(_, p)| p).collect();
        let n = rooms.len();
        for poller in rooms {
            poller.stop().await;
        }
        metrics::gauge!("chat_rooms_open").set(0.0);
        tracing::info!(target: "chat", threads = n, "chat polling stopped");
    }
}
