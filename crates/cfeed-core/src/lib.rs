//! Core domain model for the comment feed ingester.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "cfeed-core";

/// Bearer token obtained once at startup and reused for every cycle.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    issued_at: DateTime<Utc>,
    expires_in: Option<Duration>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, issued_at: DateTime<Utc>, expires_in: Option<Duration>) -> Self {
        Self {
            secret: secret.into(),
            issued_at,
            expires_in,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let expires_in = chrono::Duration::from_std(self.expires_in?).ok()?;
        self.issued_at.checked_add_signed(expires_in)
    }

    /// Tokens without an expiry hint never report as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// The persisted unit: one comment keyed by its feed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
}

impl Comment {
    /// A comment may only be stored under a non-empty identifier.
    pub fn has_identifier(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: Option<String>,
    pub comment: Comment,
}

/// One decoded feed response. Lives for a single cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Listing {
    pub kind: Option<String>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub dist: Option<i64>,
    pub modhash: Option<String>,
    pub geo_filter: Option<String>,
    pub entries: Vec<Entry>,
}

impl Listing {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain the listing into its comments, in feed order.
    pub fn into_comments(self) -> impl Iterator<Item = Comment> {
        self.entries.into_iter().map(|entry| entry.comment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn issued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn token_without_expiry_hint_never_expires() {
        let token = AccessToken::new("abc", issued(), None);
        assert!(token.expires_at().is_none());
        assert!(!token.is_expired_at(issued() + chrono::Duration::days(365)));
    }

    #[test]
    fn token_expires_after_hint() {
        let token = AccessToken::new("abc", issued(), Some(Duration::from_secs(86_400)));
        assert!(!token.is_expired_at(issued() + chrono::Duration::hours(23)));
        assert!(token.is_expired_at(issued() + chrono::Duration::hours(24)));
    }

    #[test]
    fn token_debug_output_hides_secret() {
        let token = AccessToken::new("super-secret", issued(), None);
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn blank_identifier_is_not_storable() {
        let mut comment = Comment {
            id: "c1".into(),
            author: "alice".into(),
            body: "hi".into(),
            score: 3,
        };
        assert!(comment.has_identifier());
        comment.id = "  ".into();
        assert!(!comment.has_identifier());
    }

    #[test]
    fn listing_drains_comments_in_order() {
        let listing = Listing {
            entries: ["a", "b", "c"]
                .into_iter()
                .map(|id| Entry {
                    kind: Some("t1".into()),
                    comment: Comment {
                        id: id.into(),
                        author: String::new(),
                        body: String::new(),
                        score: 0,
                    },
                })
                .collect(),
            ..Default::default()
        };
        assert_eq!(listing.len(), 3);
        let ids: Vec<_> = listing.into_comments().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
