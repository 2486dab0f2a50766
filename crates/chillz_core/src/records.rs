/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Typed rows decoded from the generic records the data service returns.
//! Timestamps stay RFC 3339 strings on the wire; helpers parse them when a
//! real instant is needed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Text,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub handle: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub rewards: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content_type: MediaKind,
    #[serde(default)]
    pub content_url: Option<String>,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub is_spark: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub user_id: String,
    pub content_url: String,
    pub content_type: MediaKind,
    #[serde(default)]
    pub caption: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    /// Recipient.
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: String,
}

/// Decode a batch of generic records, skipping rows that do not fit the
/// expected shape. Malformed rows are a remote-schema concern, not a reason
/// to blank the whole surface.
pub fn decode_rows<T: serde::de::DeserializeOwned>(entity: &str, rows: Vec<Value>) -> Vec<T> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<T>(row) {
            Ok(v) => out.push(v),
            Err(e) => warn!("skipping malformed {entity} row: {e}"),
        }
    }
    out
}

pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

pub fn now_rfc3339() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_posts_and_skips_malformed_rows() {
        let rows = vec![
            json!({
                "id": "p1",
                "user_id": "u1",
                "content_type": "image",
                "content_url": "https://cdn/p1.jpg",
                "caption": "hello",
                "is_spark": false,
                "created_at": "2026-08-01T10:00:00Z"
            }),
            json!({ "id": "broken" }),
        ];
        let posts: Vec<Post> = decode_rows("posts", rows);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "p1");
        assert_eq!(posts[0].content_type, MediaKind::Image);
    }

    #[test]
    fn timestamp_round_trip() {
        let now = OffsetDateTime::now_utc();
        let parsed = parse_timestamp(&format_timestamp(now)).expect("parse");
        assert_eq!(parsed.unix_timestamp(), now.unix_timestamp());
    }
}
