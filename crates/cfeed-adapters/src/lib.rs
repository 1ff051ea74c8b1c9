//! Feed adapter contract + the Reddit-style comment listing decoder.

use cfeed_core::{Comment, Entry, Listing};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "cfeed-adapters";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("feed body is not a listing: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of decoding one feed body. Children that did not match the entry
/// shape are counted in `rejected_entries` and left out of the listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedListing {
    pub listing: Listing,
    pub rejected_entries: usize,
}

pub trait FeedAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    fn parse_listing(&self, body: &[u8]) -> Result<ParsedListing, DecodeError>;
}

#[derive(Debug, Deserialize)]
struct WireListing {
    #[serde(default)]
    kind: Option<String>,
    data: WireListingData,
}

#[derive(Debug, Deserialize)]
struct WireListingData {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    before: Option<String>,
    #[serde(default)]
    dist: Option<i64>,
    #[serde(default, rename = "Modhash", alias = "modhash")]
    modhash: Option<String>,
    #[serde(default)]
    geo_filter: Option<String>,
    #[serde(default)]
    children: Option<Vec<JsonValue>>,
}

#[derive(Debug, Deserialize)]
struct WireChild {
    #[serde(default)]
    kind: Option<String>,
    data: WireComment,
}

#[derive(Debug, Deserialize)]
struct WireComment {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    score: Option<i64>,
}

impl From<WireChild> for Entry {
    fn from(child: WireChild) -> Self {
        let data = child.data;
        Entry {
            kind: child.kind,
            comment: Comment {
                id: data.id.unwrap_or_default(),
                author: data.author.unwrap_or_default(),
                body: data.body.unwrap_or_default(),
                score: data.score.unwrap_or_default(),
            },
        }
    }
}

/// Decoder for `/r/<subreddit>/comments.json` listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedditCommentsAdapter;

impl FeedAdapter for RedditCommentsAdapter {
    fn source_id(&self) -> &'static str {
        "reddit-comments"
    }

    fn parse_listing(&self, body: &[u8]) -> Result<ParsedListing, DecodeError> {
        let wire: WireListing = serde_json::from_slice(body)?;
        let data = wire.data;

        let mut entries = Vec::new();
        let mut rejected_entries = 0usize;
        for (index, child) in data.children.unwrap_or_default().into_iter().enumerate() {
            match serde_json::from_value::<WireChild>(child) {
                Ok(child) => entries.push(Entry::from(child)),
                Err(err) => {
                    rejected_entries += 1;
                    warn!(source_id = self.source_id(), index, error = %err, "dropping malformed feed entry");
                }
            }
        }

        Ok(ParsedListing {
            listing: Listing {
                kind: wire.kind,
                after: data.after,
                before: data.before,
                dist: data.dist,
                modhash: data.modhash,
                geo_filter: data.geo_filter,
                entries,
            },
            rejected_entries,
        })
    }
}

pub fn adapter_for_source(source_id: &str) -> Option<Box<dyn FeedAdapter>> {
    match source_id {
        "reddit-comments" => Some(Box::new(RedditCommentsAdapter)),
        _ => None,
    }
}
