use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::config::FeedConfig;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder. Fails if another
    /// recorder is already installed.
    pub fn init(cfg: &FeedConfig) -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        // Static gauges so the effective paging setup is visible on scrape.
        gauge!("feed_page_size").set(cfg.page_size as f64);
        gauge!("story_window_secs").set(cfg.story_window_secs as f64);
        gauge!("chat_poll_secs").set(cfg.chat_poll_secs as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
