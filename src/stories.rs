// src/stories.rs
//! Story Deduplicator: one active story per author, the most recent one.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::collections::HashMap;

use crate::model::Story;

/// Cutoff for the active window: stories created after this are active.
pub fn active_since(now: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(window_secs)
        .unwrap_or(i64::MAX)
        .min(i64::MAX / 1_000);
    now.checked_sub_signed(Duration::seconds(secs))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn is_active(story: &Story, since: DateTime<Utc>) -> bool {
    story.created_at > since
}

/// Reduce to the latest story per author in a single pass.
///
/// Output keeps the order in which each author first appears. On an exact
/// timestamp tie the earlier entry wins. Stories without an author are keyed
/// by their own id, so they never collapse into each other.
pub fn dedupe_latest_per_author(stories: Vec<Story>) -> Vec<Story> {
    let mut slot_by_author: HashMap<String, usize> = HashMap::with_capacity(stories.len());
    let mut out: Vec<Story> = Vec::with_capacity(stories.len());

    for story in stories {
        let author = match &story.user_id {
            Some(u) => u.clone(),
            None => format!("\u{0}story:{}", story.id),
        };
        match slot_by_author.get(&author) {
            Some(&i) => {
                if out[i].created_at < story.created_at {
                    out[i] = story;
                }
            }
            None => {
                slot_by_author.insert(author, out.len());
                out.push(story);
            }
        }
    }
    out
}

/// Filter to the active window, dedupe, and order by recency (newest first)
/// for display. Returns the stories and how many were dropped by dedup.
pub fn prepare_story_rail(
    now: DateTime<Utc>,
    raw: Vec<Story>,
    window_secs: u64,
) -> (Vec<Story>, usize) {
    let since = active_since(now, window_secs);
    let active: Vec<Story> = raw.into_iter().filter(|s| is_active(s, since)).collect();
    let before = active.len();

    let mut latest = dedupe_latest_per_author(active);
    let dropped = before - latest.len();
    latest.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    counter!("stories_dedup_dropped_total").increment(dropped as u64);
    tracing::debug!(target: "stories", kept = latest.len(), dropped, "story rail prepared");
    (latest, dropped)
}
