use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::chat::{ChatRooms, Message};
use crate::error::FeedError;
use crate::favorites::FavoritesStore;
use crate::feed::{FeedOrchestrator, LoadMoreOutcome};
use crate::history::SyncRecord;
use crate::model::{FeedPost, FeedViewModel, Post};
use crate::paginator::MoreRejected;
use crate::prefs::DisplayPrefs;
use crate::store::KvStore;

#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<FeedOrchestrator>,
    pub favorites: Arc<FavoritesStore>,
    pub chats: Arc<ChatRooms>,
    pub kv: Arc<dyn KvStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/feed", get(get_feed))
        .route("/feed/refresh", post(refresh_feed))
        .route("/feed/more", post(load_more))
        .route("/posts/{id}/like", post(toggle_like))
        .route("/posts/{id}/favorite", post(toggle_favorite))
        .route("/favorites", get(list_favorites))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/threads/{id}/messages", get(thread_messages))
        .route("/threads/{id}/close", post(close_thread))
        .route("/debug/sync", get(debug_sync))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let status = match &self {
            FeedError::UnknownPost(_) => StatusCode::NOT_FOUND,
            FeedError::Fetch(_) => StatusCode::BAD_GATEWAY,
            FeedError::Write(_) | FeedError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn get_feed(State(state): State<AppState>) -> Json<FeedViewModel> {
    Json(state.feed.view())
}

async fn refresh_feed(State(state): State<AppState>) -> Result<Json<FeedViewModel>, FeedError> {
    Ok(Json(state.feed.refresh().await?))
}

#[derive(serde::Serialize)]
struct MoreResp {
    /// "appended", "rejected" or "discarded".
    status: &'static str,
    added: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    feed: FeedViewModel,
}

fn rejection_reason(r: MoreRejected) -> &'static str {
    match r {
        MoreRejected::InFlight => "in_flight",
        MoreRejected::Exhausted => "exhausted",
        MoreRejected::NotLoaded => "not_loaded",
    }
}

async fn load_more(State(state): State<AppState>) -> Result<Json<MoreResp>, FeedError> {
    let outcome = state.feed.load_more().await?;
    let (status, added, reason) = match outcome {
        LoadMoreOutcome::Appended(n) => ("appended", n, None),
        LoadMoreOutcome::Rejected(r) => ("rejected", 0, Some(rejection_reason(r))),
        LoadMoreOutcome::Discarded => ("discarded", 0, None),
    };
    Ok(Json(MoreResp {
        status,
        added,
        reason,
        feed: state.feed.view(),
    }))
}

#[derive(serde::Serialize)]
struct LikeResp {
    post: FeedPost,
    /// false when the overlay could not be written to disk; the in-memory
    /// value still applies for this session.
    persisted: bool,
}

async fn toggle_like(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LikeResp>, FeedError> {
    let outcome = state.feed.toggle_like(&id).await?;
    // Remote write keeps running; its result lands in /debug/sync.
    Ok(Json(LikeResp {
        post: outcome.post,
        persisted: outcome.persisted.is_ok(),
    }))
}

#[derive(serde::Serialize)]
struct FavoriteResp {
    post_id: String,
    favorite: bool,
}

async fn toggle_favorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FavoriteResp>, FeedError> {
    let post = state
        .feed
        .find_post(&id)
        .ok_or_else(|| FeedError::UnknownPost(id.clone()))?;
    let favorite = state.favorites.toggle(&post).await?;
    Ok(Json(FavoriteResp {
        post_id: id,
        favorite,
    }))
}

async fn list_favorites(State(state): State<AppState>) -> Json<Vec<Post>> {
    Json(state.favorites.list().await)
}

async fn get_settings(State(state): State<AppState>) -> Json<DisplayPrefs> {
    Json(DisplayPrefs::load(state.kv.as_ref()).await)
}

async fn put_settings(
    State(state): State<AppState>,
    Json(prefs): Json<DisplayPrefs>,
) -> Result<Json<DisplayPrefs>, FeedError> {
    prefs.save(state.kv.as_ref()).await?;
    Ok(Json(prefs))
}

/// Served from the thread's poller; the first read starts polling.
async fn thread_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, FeedError> {
    Ok(Json(state.chats.messages(&id).await?))
}

#[derive(serde::Serialize)]
struct CloseResp {
    thread_id: String,
    closed: bool,
}

async fn close_thread(State(state): State<AppState>, Path(id): Path<String>) -> Json<CloseResp> {
    let closed = state.chats.close(&id).await;
    Json(CloseResp { thread_id: id, closed })
}

async fn debug_sync(State(state): State<AppState>) -> Json<Vec<SyncRecord>> {
    Json(state.feed.sync_history().snapshot_last_n(20))
}
