//! history.rs: bounded in-memory log of remote like-sync outcomes, kept for
//! diagnostics (`/debug/sync`). Failed writes stay visible here until the next
//! refresh settles the post.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRecord {
    pub ts: DateTime<Utc>,
    pub post_id: String,
    pub liked: bool,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct SyncHistory {
    inner: Mutex<VecDeque<SyncRecord>>,
    cap: usize,
}

impl SyncHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn record(&self, post_id: &str, liked: bool, error: Option<String>) {
        let entry = SyncRecord {
            ts: Utc::now(),
            post_id: post_id.to_string(),
            liked,
            ok: error.is_none(),
            error,
        };
        let mut v = self.inner.lock().expect("history mutex poisoned");
        v.push_back(entry);
        while v.len() > self.cap {
            v.pop_front();
        }
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<SyncRecord> {
        let v = self.inner.lock().expect("history mutex poisoned");
        let start = v.len().saturating_sub(n);
        v.iter().skip(start).cloned().collect()
    }

    pub fn failures(&self) -> usize {
        let v = self.inner.lock().expect("history mutex poisoned");
        v.iter().filter(|r| !r.ok).count()
    }
}

impl Default for SyncHistory {
    fn default() -> Self {
        Self::with_capacity(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_last_cap_entries() {
        let h = SyncHistory::with_capacity(2);
        h.record("a", true, None);
        h.record("b", true, Some("boom".into()));
        h.record("c", false, None);
        let rows = h.snapshot_last_n(10);
        let ids: Vec<_> = rows.iter().map(|r| r.post_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(h.failures(), 1);
        assert_eq!(h.snapshot_last_n(1)[0].post_id, "c");
    }
}
