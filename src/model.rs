//! # Feed data model
//! Rows as they come back from the backend (`Post`, `Story`), the local
//! overlay record (`OverlayEntry`), and the render-facing view types.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;

pub type PostId = String;
pub type UserId = String;

/// A feed post. `liked` is the viewer's remote like flag as of fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(deserialize_with = "id_from_any")]
    pub id: PostId,
    #[serde(default, deserialize_with = "opt_id_from_any")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "count_or_zero")]
    pub likes: u32,
    #[serde(default)]
    pub liked: bool,
    #[serde(default, deserialize_with = "vec_or_empty")]
    pub hashtags: Vec<String>,
    #[serde(default, deserialize_with = "count_or_zero")]
    pub comments: u32,
}

impl Post {
    /// Fill `hashtags` from the description when the row carries none.
    pub fn with_extracted_hashtags(mut self) -> Self {
        if self.hashtags.is_empty() {
            self.hashtags = parse_hashtags(&self.description);
        }
        self
    }
}

/// Feed order: newest first, ties broken by id (descending) so the order is
/// stable across repeated fetches.
pub fn feed_order(a: &Post, b: &Post) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub coords: Coords,
}

/// The backend stores story locations either as a JSON object or as a
/// JSON-encoded string of that object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLocation {
    Embedded(Location),
    Encoded(String),
}

impl RawLocation {
    pub fn decode(self) -> Result<Location, serde_json::Error> {
        match self {
            RawLocation::Embedded(loc) => Ok(loc),
            RawLocation::Encoded(s) => serde_json::from_str(&s),
        }
    }
}

/// An ephemeral per-author story. Active for 24 hours after `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_id_from_any")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub image: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "location_from_any")]
    pub location: Option<Location>,
}

/// User-local like state for one post. Always replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEntry {
    pub liked: bool,
    pub likes: u32,
}

/// One page as returned by the paginator.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub offset: usize,
    pub posts: Vec<Post>,
    pub has_more: bool,
}

/// Where a post's effective like values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeState {
    Remote,
    OptimisticLiked,
    OptimisticUnliked,
}

/// A post with its overlay-merged like values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPost {
    #[serde(flatten)]
    pub post: Post,
    pub effective_liked: bool,
    pub effective_likes: u32,
    pub like_state: LikeState,
}

impl FeedPost {
    pub fn id(&self) -> &str {
        &self.post.id
    }

    pub fn effective(&self) -> OverlayEntry {
        OverlayEntry {
            liked: self.effective_liked,
            likes: self.effective_likes,
        }
    }
}

/// Render-ready snapshot of the home feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedViewModel {
    pub posts: Vec<FeedPost>,
    pub stories: Vec<Story>,
    pub has_more: bool,
    pub loading_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Extract hashtags like `#party`, `#Friday_Night`.
/// Returns distinct, lowercased tags (without `#`) in order of appearance.
pub fn parse_hashtags(input: &str) -> Vec<String> {
    static RE: once_cell::sync::OnceCell<Regex> = once_cell::sync::OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"(?u)#(?P<tag>\w+)").expect("hashtag regex"));
    let mut tags: Vec<String> = Vec::new();
    for caps in re.captures_iter(input) {
        if let Some(m) = caps.name("tag") {
            let t = m.as_str().to_lowercase();
            if !tags.contains(&t) {
                tags.push(t);
            }
        }
    }
    tags
}

/// Short stable digest of a user id for logs. Never log raw ids.
pub(crate) fn anon_id(user_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(user_id.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

// PostgREST returns bigint ids as numbers and uuid ids as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnyId {
    Str(String),
    Num(i64),
}

impl From<AnyId> for String {
    fn from(v: AnyId) -> Self {
        match v {
            AnyId::Str(s) => s,
            AnyId::Num(n) => n.to_string(),
        }
    }
}

pub(crate) fn id_from_any<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    AnyId::deserialize(d).map(String::from)
}

fn opt_id_from_any<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<AnyId>::deserialize(d)?.map(String::from))
}

fn location_from_any<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Location>, D::Error> {
    match Option::<RawLocation>::deserialize(d)? {
        Some(raw) => raw.decode().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn vec_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

// Counts may be null or negative on legacy rows.
fn count_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = Option::<i64>::deserialize(d)?;
    Ok(v.unwrap_or(0).clamp(0, u32::MAX as i64) as u32)
}
