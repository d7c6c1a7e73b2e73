// tests/feed_orchestrator.rs
//
// End-to-end behaviour of the feed orchestrator over the in-memory backend:
// mount/refresh/load-more, optimistic likes against the overlay, and the
// failure policies (stale-but-consistent on fetch errors, no rollback on
// like-sync errors).

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use partygram_feed::backend::memory::{LikeCall, MemoryBackend};
use partygram_feed::error::FeedError;
use partygram_feed::feed::{FeedOrchestrator, LoadMoreOutcome};
use partygram_feed::model::{LikeState, OverlayEntry, Post, Story};
use partygram_feed::overlay::{OverlayStore, OVERLAY_KEY};
use partygram_feed::paginator::MoreRejected;
use partygram_feed::store::{FileKvStore, KvStore, MemoryKvStore};

fn post(id: &str, t: i64, likes: u32) -> Post {
    Post {
        id: id.into(),
        user_id: Some("author".into()),
        image: format!("https://img/{id}.jpg"),
        description: String::new(),
        created_at: Utc.timestamp_opt(t, 0).unwrap(),
        likes,
        liked: false,
        hashtags: vec![],
        comments: 0,
    }
}

fn story(id: &str, author: &str, minutes_ago: i64) -> Story {
    Story {
        id: id.into(),
        user_id: Some(author.into()),
        image: String::new(),
        created_at: Utc::now() - Duration::minutes(minutes_ago),
        location: None,
    }
}

fn numbered_posts(n: usize) -> Vec<Post> {
    (0..n).map(|i| post(&format!("p{i:02}"), 1_000 + i as i64, 0)).collect()
}

async fn orchestrator(backend: Arc<MemoryBackend>, page_size: usize) -> FeedOrchestrator {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let overlay = Arc::new(OverlayStore::open(kv).await);
    FeedOrchestrator::new(backend, overlay, "viewer").with_page_size(page_size)
}

fn ids(view: &partygram_feed::FeedViewModel) -> Vec<String> {
    view.posts.iter().map(|p| p.id().to_string()).collect()
}

async fn wait_for_page_requests(backend: &MemoryBackend, n: usize) {
    while backend.page_requests.lock().unwrap().len() < n {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn mount_then_toggle_applies_optimistically() {
    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(vec![post("A", 5, 3), post("B", 4, 0)]));
    let feed = orchestrator(backend.clone(), 10).await;

    let view = feed.mount().await.expect("mount");
    assert_eq!(ids(&view), vec!["A", "B"]);
    assert!(!view.posts[0].effective_liked);
    assert_eq!(view.posts[0].effective_likes, 3);
    assert!(!view.has_more);

    let out = feed.toggle_like("A").await.expect("toggle");
    assert!(out.post.effective_liked);
    assert_eq!(out.post.effective_likes, 4);
    assert_eq!(out.post.like_state, LikeState::OptimisticLiked);
    assert_eq!(feed.overlay().get("A"), Some(OverlayEntry { liked: true, likes: 4 }));

    // The view reflects the toggle before the remote write is awaited.
    let view = feed.view();
    assert_eq!(view.posts[0].effective_likes, 4);

    out.sync.confirmed().await.expect("remote like");
    assert_eq!(
        backend.like_calls.lock().unwrap().as_slice(),
        &[LikeCall::Create {
            post_id: "A".into(),
            user_id: "viewer".into()
        }]
    );
}

#[tokio::test]
async fn overlay_wins_over_refetched_remote_values() {
    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(vec![post("A", 5, 3), post("B", 4, 0)]));
    let feed = orchestrator(backend.clone(), 10).await;
    feed.mount().await.unwrap();

    let out = feed.toggle_like("A").await.unwrap();
    out.sync.confirmed().await.unwrap();
    // Someone else liked it meanwhile; remote now disagrees with the overlay.
    backend.set_remote_likes("A", 42);

    let view = feed.refresh().await.unwrap();
    let a = &view.posts[0];
    assert_eq!(a.id(), "A");
    assert_eq!(a.post.likes, 42);
    assert_eq!((a.effective_liked, a.effective_likes), (true, 4));
}

#[tokio::test]
async fn double_toggle_returns_to_original_state() {
    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(vec![post("A", 5, 3)]));
    let feed = orchestrator(backend.clone(), 10).await;
    feed.mount().await.unwrap();

    let first = feed.toggle_like("A").await.unwrap();
    let second = feed.toggle_like("A").await.unwrap();
    assert!(!second.post.effective_liked);
    assert_eq!(second.post.effective_likes, 3);

    let _ = first.sync.confirmed().await;
    let _ = second.sync.confirmed().await;
    assert_eq!(backend.like_call_count(), 2);
}

#[tokio::test]
async fn failed_like_sync_keeps_optimistic_state() {
    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(vec![post("A", 5, 3)]));
    backend.fail_writes(true);
    let feed = orchestrator(backend.clone(), 10).await;
    feed.mount().await.unwrap();

    let out = feed.toggle_like("A").await.unwrap();
    assert!(out.sync.confirmed().await.is_err());

    let view = feed.view();
    assert_eq!((view.posts[0].effective_liked, view.posts[0].effective_likes), (true, 4));
    assert_eq!(feed.sync_history().failures(), 1);
}

#[tokio::test]
async fn toggling_a_post_outside_the_window_is_an_error() {
    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(vec![post("A", 5, 3)]));
    let feed = orchestrator(backend.clone(), 10).await;
    feed.mount().await.unwrap();

    let err = feed.toggle_like("nope").await.unwrap_err();
    assert_eq!(err, FeedError::UnknownPost("nope".into()));
    assert_eq!(backend.like_call_count(), 0);
}

#[tokio::test]
async fn serial_load_mores_match_one_large_initial_load() {
    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(numbered_posts(11)));
    let feed = orchestrator(backend.clone(), 3).await;
    feed.mount().await.unwrap();

    loop {
        match feed.load_more().await.unwrap() {
            LoadMoreOutcome::Appended(_) => continue,
            LoadMoreOutcome::Rejected(MoreRejected::Exhausted) => break,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    let paged = ids(&feed.view());
    assert_eq!(feed.window_size(), 11);

    let single = orchestrator(backend.clone(), 11).await;
    let whole = single.mount().await.unwrap();
    assert_eq!(paged, ids(&whole));
    assert_eq!(paged.first().map(String::as_str), Some("p10"));

    let requested: Vec<usize> = backend.page_requests.lock().unwrap().iter().map(|r| r.0).collect();
    assert_eq!(&requested[..4], &[0, 3, 6, 9]);
}

#[tokio::test]
async fn load_more_while_one_is_outstanding_is_rejected() {
    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(numbered_posts(6)));
    let feed = Arc::new(orchestrator(backend.clone(), 2).await);
    feed.mount().await.unwrap();
    let before = feed.view();

    backend.hold_pages();
    let pending = {
        let feed = feed.clone();
        tokio::spawn(async move { feed.load_more().await })
    };
    wait_for_page_requests(&backend, 2).await;
    assert!(feed.view().loading_more);

    let second = feed.load_more().await.unwrap();
    assert_eq!(second, LoadMoreOutcome::Rejected(MoreRejected::InFlight));
    assert_eq!(feed.window_size(), 2);
    assert_eq!(ids(&feed.view()), ids(&before));

    assert!(backend.release_page(1));
    let first = pending.await.unwrap().unwrap();
    assert_eq!(first, LoadMoreOutcome::Appended(2));
    assert_eq!(feed.window_size(), 4);
    assert_eq!(backend.page_requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn load_more_landing_after_refresh_is_discarded() {
    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(numbered_posts(6)));
    let feed = Arc::new(orchestrator(backend.clone(), 2).await);
    feed.mount().await.unwrap();

    backend.hold_pages();
    let more = {
        let feed = feed.clone();
        tokio::spawn(async move { feed.load_more().await })
    };
    wait_for_page_requests(&backend, 2).await;
    let refresh = {
        let feed = feed.clone();
        tokio::spawn(async move { feed.refresh().await })
    };
    wait_for_page_requests(&backend, 3).await;

    // Release the load-more first; the refresh has already bumped the generation.
    assert!(backend.release_page(1));
    assert_eq!(more.await.unwrap().unwrap(), LoadMoreOutcome::Discarded);
    assert!(backend.release_page(2));
    refresh.await.unwrap().unwrap();

    let view = feed.view();
    assert_eq!(ids(&view), vec!["p05", "p04"]);
    assert!(!view.loading_more);
    assert_eq!(feed.window_size(), 2);
}

#[tokio::test]
async fn fetch_failure_keeps_previous_window_and_rail() {
    let backend = Arc::new(
        MemoryBackend::new("viewer")
            .with_posts(numbered_posts(4))
            .with_stories(vec![story("s1", "u1", 5)]),
    );
    let feed = orchestrator(backend.clone(), 2).await;
    let mounted = feed.mount().await.unwrap();
    assert_eq!(mounted.stories.len(), 1);

    backend.fail_fetches(true);
    let err = feed.refresh().await.unwrap_err();
    assert!(matches!(err, FeedError::Fetch(_)));
    assert!(feed.load_more().await.is_err());

    let view = feed.view();
    assert_eq!(ids(&view), ids(&mounted));
    assert_eq!(view.stories, mounted.stories);
    assert!(view.last_error.is_some());
    assert!(!view.loading_more);

    // Recovers once the backend is reachable again.
    backend.fail_fetches(false);
    assert_eq!(feed.load_more().await.unwrap(), LoadMoreOutcome::Appended(2));
    assert!(feed.view().last_error.is_none());
}

#[tokio::test]
async fn story_rail_is_one_per_author_newest_first() {
    let backend = Arc::new(MemoryBackend::new("viewer").with_stories(vec![
        story("s1", "u1", 50),
        story("s2", "u1", 10),
        story("s3", "u2", 30),
        story("old", "u3", 60 * 25),
    ]));
    let feed = orchestrator(backend, 10).await;
    let view = feed.mount().await.unwrap();
    let rail: Vec<_> = view.stories.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(rail, vec!["s2", "s3"]);
}

#[tokio::test]
async fn overlay_survives_a_restart_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(vec![post("A", 5, 3), post("B", 4, 0)]));
    // Remote never hears about the like; only the overlay carries it.
    backend.fail_writes(true);

    {
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(tmp.path()));
        let overlay = Arc::new(OverlayStore::open(kv).await);
        let feed = FeedOrchestrator::new(backend.clone(), overlay, "viewer");
        feed.mount().await.unwrap();
        let out = feed.toggle_like("B").await.unwrap();
        assert!(out.persisted.is_ok());
        assert!(out.sync.confirmed().await.is_err());
    }

    let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(tmp.path()));
    let overlay = Arc::new(OverlayStore::open(kv).await);
    let feed = FeedOrchestrator::new(backend, overlay, "viewer");
    let view = feed.mount().await.unwrap();
    let b = view.posts.iter().find(|p| p.id() == "B").unwrap();
    assert_eq!((b.effective_liked, b.effective_likes), (true, 1));
}

#[tokio::test]
async fn post_failure_on_refresh_keeps_the_old_rail() {
    let backend = Arc::new(
        MemoryBackend::new("viewer")
            .with_posts(numbered_posts(2))
            .with_stories(vec![story("s1", "u1", 30)]),
    );
    let feed = orchestrator(backend.clone(), 2).await;
    let mounted = feed.mount().await.unwrap();

    backend.insert_story(story("s2", "u2", 1));
    backend.fail_pages(true);
    assert!(feed.refresh().await.is_err());

    let view = feed.view();
    assert_eq!(view.stories, mounted.stories);
    assert_eq!(ids(&view), ids(&mounted));
    assert!(view.last_error.is_some());

    backend.fail_pages(false);
    let view = feed.refresh().await.unwrap();
    let rail: Vec<_> = view.stories.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(rail, vec!["s2", "s1"]);
}

#[tokio::test]
async fn superseded_refresh_does_not_replace_the_newer_rail() {
    let backend = Arc::new(
        MemoryBackend::new("viewer")
            .with_posts(numbered_posts(2))
            .with_stories(vec![story("s1", "u1", 30)]),
    );
    let feed = Arc::new(orchestrator(backend.clone(), 2).await);
    feed.mount().await.unwrap();

    backend.hold_pages();
    let older = {
        let feed = feed.clone();
        tokio::spawn(async move { feed.refresh().await })
    };
    wait_for_page_requests(&backend, 2).await;

    backend.insert_story(story("s2", "u2", 1));
    let newer = {
        let feed = feed.clone();
        tokio::spawn(async move { feed.refresh().await })
    };
    wait_for_page_requests(&backend, 3).await;

    assert!(backend.release_page(2));
    let fresh = newer.await.unwrap().unwrap();
    assert_eq!(fresh.stories.len(), 2);

    // The older refresh read the rail before s2 existed.
    assert!(backend.release_page(1));
    older.await.unwrap().unwrap();

    let rail: Vec<_> = feed.view().stories.iter().map(|s| s.id.clone()).collect();
    assert_eq!(rail, vec!["s2", "s1"]);
}

#[tokio::test]
async fn unreadable_overlay_at_startup_is_not_overwritten_by_a_toggle() {
    let kv = Arc::new(MemoryKvStore::new());
    kv.put_raw(OVERLAY_KEY, br#"{"likes":{"A":{"liked":true,"likes":4}}}"#);
    kv.fail_reads(true);

    let backend = Arc::new(MemoryBackend::new("viewer").with_posts(vec![post("A", 5, 3), post("B", 4, 0)]));
    let overlay = Arc::new(OverlayStore::open(kv.clone()).await);
    let feed = FeedOrchestrator::new(backend, overlay, "viewer");
    let view = feed.mount().await.unwrap();
    // Without the saved document the remote values show through.
    assert_eq!(view.posts[0].effective_likes, 3);

    let out = feed.toggle_like("B").await.unwrap();
    assert!(out.persisted.is_err());
    assert_eq!(out.post.effective_likes, 1);
    let _ = out.sync.confirmed().await;
    let saved: serde_json::Value = serde_json::from_slice(&kv.raw(OVERLAY_KEY).unwrap()).unwrap();
    assert_eq!(saved["likes"].as_object().unwrap().len(), 1);

    // Once the store is readable the saved entry and the new one are both kept.
    kv.fail_reads(false);
    let out = feed.toggle_like("B").await.unwrap();
    assert!(out.persisted.is_ok());
    let _ = out.sync.confirmed().await;
    let saved: serde_json::Value = serde_json::from_slice(&kv.raw(OVERLAY_KEY).unwrap()).unwrap();
    assert_eq!(saved["likes"]["A"]["likes"], 4);
    assert_eq!(saved["likes"]["B"]["liked"], false);
    assert_eq!(feed.overlay().get("A"), Some(OverlayEntry { liked: true, likes: 4 }));
}
