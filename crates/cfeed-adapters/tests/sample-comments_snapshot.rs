use std::path::PathBuf;

use cfeed_adapters::{FeedAdapter, RedditCommentsAdapter};
use cfeed_core::Comment;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures/comments")
        .join(name)
}

#[test]
fn sample_comments_fixture_matches_golden_snapshot() {
    let body = std::fs::read(fixture_path("sample.json")).expect("read sample.json");
    let expected: Vec<Comment> = serde_json::from_slice(
        &std::fs::read(fixture_path("expected.json")).expect("read expected.json"),
    )
    .expect("parse expected.json");

    let parsed = RedditCommentsAdapter.parse_listing(&body).expect("decode sample");
    assert_eq!(parsed.rejected_entries, 0);
    assert_eq!(parsed.listing.dist, Some(3));
    assert_eq!(parsed.listing.len(), expected.len());
    assert!(parsed.listing.entries.iter().all(|e| e.kind.as_deref() == Some("t1")));

    let comments: Vec<Comment> = parsed.listing.into_comments().collect();
    assert_eq!(comments, expected);
}
