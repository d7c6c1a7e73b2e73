// src/backend/rest.rs
//! PostgREST client for the hosted backend (`/rest/v1/<table>`).

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::{counter, histogram};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ChatBackend, FeedBackend};
use crate::chat::Message;
use crate::config::FeedConfig;
use crate::error::{FetchError, WriteError};
use crate::model::{anon_id, id_from_any, Post, Story};

#[derive(Clone)]
pub struct RestBackend {
    base: String,
    api_key: String,
    bearer: String,
    viewer: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Deserialize)]
struct LikeRow {
    #[serde(deserialize_with = "id_from_any")]
    post_id: String,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, viewer: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            base: base_url.into().trim_end_matches('/').to_string(),
            bearer: api_key.clone(),
            api_key,
            viewer: viewer.into(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn from_config(cfg: &FeedConfig) -> Self {
        let mut b = Self::new(&cfg.backend_url, &cfg.api_key, &cfg.user_id)
            .with_timeout(cfg.request_timeout_secs)
            .with_retries(cfg.max_retries);
        b.bearer = cfg.bearer().to_string();
        b
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .timeout(self.timeout)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.bearer)
    }

    /// GET with bounded retries on transport errors and 5xx.
    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, FetchError> {
        let t0 = std::time::Instant::now();
        let mut attempt: u8 = 0;
        let result = loop {
            attempt += 1;
            let res = self.request(Method::GET, table).query(query).send().await;

            let retryable = match &res {
                Ok(rsp) => rsp.status().is_server_error(),
                Err(e) => !e.is_builder(),
            };
            if retryable && attempt < self.max_retries {
                tracing::debug!(target: "backend", table, attempt, "retrying read");
                tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                continue;
            }

            break match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    if !status.is_success() {
                        let body = rsp.text().await.unwrap_or_default();
                        Err(FetchError::Status {
                            status: status.as_u16(),
                            body,
                        })
                    } else {
                        rsp.json::<Vec<T>>().await.map_err(FetchError::from)
                    }
                }
                Err(e) => Err(FetchError::from(e)),
            };
        };

        histogram!("backend_fetch_ms", "table" => table.to_string())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        if result.is_err() {
            counter!("backend_fetch_errors_total", "table" => table.to_string()).increment(1);
        }
        result
    }

    async fn viewer_likes(&self, post_ids: &[String]) -> Result<Vec<String>, FetchError> {
        if post_ids.is_empty() || self.viewer.is_empty() {
            return Ok(Vec::new());
        }
        let list = post_ids
            .iter()
            .map(|id| format!("\"{}\"", id.replace('"', "")))
            .collect::<Vec<_>>()
            .join(",");
        let rows: Vec<LikeRow> = self
            .get_rows(
                "post_likes",
                &[
                    ("select", "post_id".to_string()),
                    ("user_id", format!("eq.{}", self.viewer)),
                    ("post_id", format!("in.({list})")),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.post_id).collect())
    }

    async fn send_like_write(&self, rb: RequestBuilder, post_id: &str) -> Result<(), WriteError> {
        let rsp = rb.send().await.map_err(|e| WriteError::Like {
            post_id: post_id.to_string(),
            reason: e.to_string(),
        })?;
        if let Err(e) = rsp.error_for_status_ref() {
            counter!("backend_write_errors_total").increment(1);
            return Err(WriteError::Like {
                post_id: post_id.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FeedBackend for RestBackend {
    async fn fetch_active_stories(&self, since: DateTime<Utc>) -> Result<Vec<Story>, FetchError> {
        let rows: Vec<serde_json::Value> = self
            .get_rows(
                "stories",
                &[
                    ("select", "*".to_string()),
                    (
                        "created_at",
                        format!("gt.{}", since.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    ),
                ],
            )
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<Story>(row) {
                Ok(s) => out.push(s),
                Err(e) => {
                    tracing::warn!(target: "backend", error = %e, "skipping malformed story row");
                    counter!("backend_story_rows_skipped_total").increment(1);
                }
            }
        }
        Ok(out)
    }

    async fn fetch_posts_page(&self, offset: usize, limit: usize) -> Result<Vec<Post>, FetchError> {
        let posts: Vec<Post> = self
            .get_rows(
                "posts",
                &[
                    ("select", "*".to_string()),
                    ("order", "created_at.desc,id.desc".to_string()),
                    ("offset", offset.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        // One query for the viewer's likes on this page instead of one per post.
        let ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let liked = self.viewer_likes(&ids).await?;

        Ok(posts
            .into_iter()
            .map(|mut p| {
                p.liked = liked.contains(&p.id);
                p.with_extracted_hashtags()
            })
            .collect())
    }

    // Writes are not retried: a duplicate insert after a lost response
    // would surface as a conflict rather than a success.
    async fn create_like(&self, post_id: &str, user_id: &str) -> Result<(), WriteError> {
        tracing::debug!(target: "backend", post_id, user = %anon_id(user_id), "create like");
        let body = serde_json::json!([{ "post_id": post_id, "user_id": user_id }]);
        let rb = self
            .request(Method::POST, "post_likes")
            .header("Prefer", "return=minimal")
            .json(&body);
        self.send_like_write(rb, post_id).await
    }

    async fn delete_like(&self, post_id: &str, user_id: &str) -> Result<(), WriteError> {
        tracing::debug!(target: "backend", post_id, user = %anon_id(user_id), "delete like");
        let rb = self.request(Method::DELETE, "post_likes").query(&[
            ("post_id", format!("eq.{post_id}")),
            ("user_id", format!("eq.{user_id}")),
        ]);
        self.send_like_write(rb, post_id).await
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}

#[async_trait::async_trait]
impl ChatBackend for RestBackend {
    async fn fetch_messages(&self, thread_id: &str) -> Result<Vec<Message>, FetchError> {
        self.get_rows(
            "messages",
            &[
                ("select", "*".to_string()),
                ("thread_id", format!("eq.{thread_id}")),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_url_strips_trailing_slash() {
        let b = RestBackend::new("https://x.supabase.co/", "anon", "u1");
        assert_eq!(b.table_url("posts"), "https://x.supabase.co/rest/v1/posts");
    }

    #[test]
    fn from_config_uses_access_token_as_bearer() {
        let cfg = FeedConfig {
            backend_url: "https://x.supabase.co".into(),
            api_key: "anon".into(),
            access_token: Some("jwt".into()),
            user_id: "u1".into(),
            max_retries: 0,
            ..FeedConfig::default()
        };
        let b = RestBackend::from_config(&cfg);
        assert_eq!(b.bearer, "jwt");
        assert_eq!(b.api_key, "anon");
        assert_eq!(b.max_retries, 1);
    }

    #[tokio::test]
    async fn unreachable_backend_yields_fetch_error() {
        let b = RestBackend::new("http://127.0.0.1:9", "anon", "u1")
            .with_timeout(1)
            .with_retries(1);
        let err = b.fetch_posts_page(0, 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
