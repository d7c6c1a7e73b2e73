//! # Feed Paginator
//! Append-only window over the remote post collection, paged by offset.
//!
//! The paginator does no I/O. Callers ask it for a [`PageRequest`], run the
//! fetch themselves, and hand the rows back. Every request carries the
//! generation it was issued under; rows for an older generation are refused,
//! so a load-more that lands after a refresh cannot resurrect the old window.
//!
//! Offset paging against a collection that gains rows between calls can still
//! skip rows (gaps). Duplicates are filtered against the ids already in the
//! window.

use std::collections::HashSet;

use crate::model::{feed_order, FeedPage, Post, PostId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Initial,
    More,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub kind: RequestKind,
    pub offset: usize,
    pub limit: usize,
    pub generation: u64,
}

/// Why `begin_load_more` did not issue a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoreRejected {
    /// Another load-more is still outstanding.
    InFlight,
    /// The last page came back short; nothing further is known to exist.
    Exhausted,
    /// Nothing loaded yet; use an initial load.
    NotLoaded,
}

/// Rows arrived for a request issued before the latest refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleResult {
    pub request_generation: u64,
    pub current_generation: u64,
}

#[derive(Debug, Clone)]
pub struct Paginator {
    page_size: usize,
    window: usize,
    ids: Vec<PostId>,
    seen: HashSet<PostId>,
    generation: u64,
    loaded: bool,
    has_more: bool,
    more_in_flight: bool,
}

impl Paginator {
    pub fn new(page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            window: page_size,
            ids: Vec::new(),
            seen: HashSet::new(),
            generation: 0,
            loaded: false,
            has_more: false,
            more_in_flight: false,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Current window size `W` (rows consumed from the server ordering).
    pub fn window_size(&self) -> usize {
        self.window
    }

    pub fn ids(&self) -> &[PostId] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading_more(&self) -> bool {
        self.more_in_flight
    }

    /// Issue a request for the first page. Any result still in flight for an
    /// earlier generation becomes stale.
    pub fn begin_initial(&mut self) -> PageRequest {
        self.generation += 1;
        PageRequest {
            kind: RequestKind::Initial,
            offset: 0,
            limit: self.page_size,
            generation: self.generation,
        }
    }

    /// Replace the window with the first page.
    pub fn apply_initial(
        &mut self,
        req: PageRequest,
        rows: Vec<Post>,
    ) -> Result<FeedPage, StaleResult> {
        self.check_current(req)?;
        let returned = rows.len();

        self.ids.clear();
        self.seen.clear();
        let posts = self.accept(rows);

        self.window = returned;
        self.loaded = true;
        self.has_more = returned >= req.limit;
        metrics::gauge!("feed_window_size").set(self.window as f64);
        tracing::debug!(
            target: "paginator",
            generation = self.generation,
            returned,
            kept = posts.len(),
            "initial page applied"
        );
        Ok(FeedPage {
            offset: 0,
            posts,
            has_more: self.has_more,
        })
    }

    /// Issue a request for `[W, W + page_size)` unless one is already out.
    pub fn begin_load_more(&mut self) -> Result<PageRequest, MoreRejected> {
        if self.more_in_flight {
            return Err(MoreRejected::InFlight);
        }
        if !self.loaded {
            return Err(MoreRejected::NotLoaded);
        }
        if !self.has_more {
            return Err(MoreRejected::Exhausted);
        }
        self.more_in_flight = true;
        Ok(PageRequest {
            kind: RequestKind::More,
            offset: self.window,
            limit: self.page_size,
            generation: self.generation,
        })
    }

    /// Append a load-more result. `W` advances by the rows the server actually
    /// returned, duplicates included, since that is what the offset counts.
    pub fn apply_more(&mut self, req: PageRequest, rows: Vec<Post>) -> Result<FeedPage, StaleResult> {
        self.more_in_flight = false;
        self.check_current(req)?;
        let returned = rows.len();
        let posts = self.accept(rows);

        self.window += returned;
        self.has_more = returned >= req.limit;
        metrics::gauge!("feed_window_size").set(self.window as f64);
        tracing::debug!(
            target: "paginator",
            offset = req.offset,
            returned,
            kept = posts.len(),
            window = self.window,
            "page appended"
        );
        Ok(FeedPage {
            offset: req.offset,
            posts,
            has_more: self.has_more,
        })
    }

    /// A load-more fetch failed; the window is left as it was.
    pub fn fail_more(&mut self, req: PageRequest) {
        if req.kind == RequestKind::More {
            self.more_in_flight = false;
        }
    }

    fn check_current(&self, req: PageRequest) -> Result<(), StaleResult> {
        if req.generation != self.generation {
            tracing::debug!(
                target: "paginator",
                request_generation = req.generation,
                current_generation = self.generation,
                "discarding stale page"
            );
            return Err(StaleResult {
                request_generation: req.generation,
                current_generation: self.generation,
            });
        }
        Ok(())
    }

    // Sort into feed order and drop ids already materialized.
    fn accept(&mut self, mut rows: Vec<Post>) -> Vec<Post> {
        rows.sort_by(feed_order);
        rows.retain(|p| self.seen.insert(p.id.clone()));
        self.ids.extend(rows.iter().map(|p| p.id.clone()));
        rows
    }
}
