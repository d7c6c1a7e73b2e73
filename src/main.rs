//! Partygram feed service, binary entrypoint.
//! Boots the Axum HTTP server over the feed core, wiring the remote backend,
//! the on-device store and the metrics endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use partygram_feed::api::{self, AppState};
use partygram_feed::backend::rest::RestBackend;
use partygram_feed::chat::ChatRooms;
use partygram_feed::config::FeedConfig;
use partygram_feed::favorites::FavoritesStore;
use partygram_feed::feed::FeedOrchestrator;
use partygram_feed::metrics::Metrics;
use partygram_feed::overlay::OverlayStore;
use partygram_feed::store::{FileKvStore, KvStore};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("partygram_feed=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = FeedConfig::load_default().context("loading feed config")?;
    if cfg.user_id.is_empty() {
        tracing::warn!(target: "feed", "no user_id configured; like writes will fail");
    }

    let metrics = Metrics::init(&cfg).context("installing prometheus recorder")?;

    let backend = Arc::new(RestBackend::from_config(&cfg));
    let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(cfg.overlay_path.clone()));
    let overlay = Arc::new(OverlayStore::open(kv.clone()).await);
    tracing::info!(target: "overlay", entries = overlay.len(), "overlay hydrated");

    let feed = Arc::new(FeedOrchestrator::from_config(&cfg, backend.clone(), overlay));
    if let Err(e) = feed.mount().await {
        // Serve anyway; the client can retry through /feed/refresh.
        tracing::warn!(target: "feed", error = %e, "initial feed load failed");
    }

    let chats = Arc::new(ChatRooms::new(
        backend,
        Duration::from_secs(cfg.chat_poll_secs),
        Duration::from_secs(cfg.request_timeout_secs),
    ));

    let state = AppState {
        feed,
        favorites: Arc::new(FavoritesStore::new(kv.clone())),
        chats: chats.clone(),
        kv,
    };
    let app = api::router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    chats.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
    tracing::info!("shutdown requested");
}
