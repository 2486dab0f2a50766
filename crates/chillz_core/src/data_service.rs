/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The remote data service as the core sees it: generic row queries and
//! mutations, object storage, platform identity, and a broadcast feed of
//! row-level change events. The hosted backend owns auth, persistence and
//! delivery; this crate only consumes the contract.

use async_trait::async_trait;
use chillz_protocol::{AuthUser, ChangeEvent, Entity, Filter, Order};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;

#[async_trait]
pub trait DataService: Send + Sync {
    async fn select(
        &self,
        entity: Entity,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>>;

    async fn count(&self, entity: Entity, filters: &[Filter]) -> Result<u64>;

    /// Insert one record; returns the stored row with server-side defaults
    /// (id, created_at) filled in.
    async fn insert(&self, entity: Entity, record: Value) -> Result<Value>;

    /// Patch all rows matching `filters`; returns the number touched.
    async fn update(&self, entity: Entity, filters: &[Filter], patch: Value) -> Result<u64>;

    /// Delete all rows matching `filters`; returns the number removed.
    async fn delete(&self, entity: Entity, filters: &[Filter]) -> Result<u64>;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<()>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn current_user(&self) -> Result<Option<AuthUser>>;

    /// Row-level deltas. Consumers apply them to in-memory state; a lagged
    /// receiver falls back to a full reload, whose values win.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Membership probe: does any row match?
pub async fn exists(service: &dyn DataService, entity: Entity, filters: &[Filter]) -> Result<bool> {
    let rows = service.select(entity, filters, None, Some(1)).await?;
    Ok(!rows.is_empty())
}

/// Whether a record satisfies every filter. Shared by the in-memory backend
/// and by change-event routing so both sides agree on predicate semantics.
pub fn row_matches(filters: &[Filter], row: &Value) -> bool {
    filters.iter().all(|f| filter_matches(f, row))
}

fn filter_matches(filter: &Filter, row: &Value) -> bool {
    let field = row.get(filter.column());
    match filter {
        Filter::Eq(_, want) => field == Some(want),
        Filter::In(_, wanted) => field.map(|v| wanted.contains(v)).unwrap_or(false),
        Filter::IsNull(_) => field.map(Value::is_null).unwrap_or(true),
        Filter::NotNull(_) => field.map(|v| !v.is_null()).unwrap_or(false),
        Filter::Gt(_, bound) => compare(field, bound).map(|o| o.is_gt()).unwrap_or(false),
        Filter::Lt(_, bound) => compare(field, bound).map(|o| o.is_lt()).unwrap_or(false),
        Filter::Ilike(_, pattern) => field
            .and_then(Value::as_str)
            .map(|s| ilike(s, pattern))
            .unwrap_or(false),
    }
}

/// Ordering over the scalar types that appear in rows. Timestamps are
/// RFC 3339 strings and compare correctly as text.
pub(crate) fn compare(field: Option<&Value>, bound: &Value) -> Option<std::cmp::Ordering> {
    match (field?, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn ilike(haystack: &str, pattern: &str) -> bool {
    let hay = haystack.to_lowercase();
    let pat = pattern.to_lowercase();
    let parts: Vec<&str> = pat.split('%').collect();
    if parts.len() == 1 {
        return hay == pat;
    }
    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match hay[pos..].find(part) {
            Some(found) => {
                // An anchored first segment must match at the start.
                if i == 0 && found != 0 {
                    return false;
                }
                pos += found + part.len();
            }
            None => return false,
        }
    }
    // An anchored last segment must match at the end.
    if let Some(last) = parts.last() {
        if !last.is_empty() && !hay.ends_with(last) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_and_null_filters() {
        let row = json!({ "post_id": "p1", "parent_comment_id": null });
        assert!(row_matches(&[Filter::eq("post_id", "p1")], &row));
        assert!(!row_matches(&[Filter::eq("post_id", "p2")], &row));
        assert!(row_matches(&[Filter::IsNull("parent_comment_id".into())], &row));
        assert!(!row_matches(&[Filter::NotNull("parent_comment_id".into())], &row));
        // Absent column counts as null.
        assert!(row_matches(&[Filter::IsNull("missing".into())], &row));
    }

    #[test]
    fn gt_on_timestamps_compares_as_text() {
        let row = json!({ "expires_at": "2026-08-08T12:00:00Z" });
        let earlier = Filter::Gt("expires_at".into(), json!("2026-08-08T00:00:00Z"));
        let later = Filter::Gt("expires_at".into(), json!("2026-08-09T00:00:00Z"));
        assert!(row_matches(&[earlier], &row));
        assert!(!row_matches(&[later], &row));
    }

    #[test]
    fn ilike_is_case_insensitive_with_wildcards() {
        let row = json!({ "handle": "ChillFan_42" });
        assert!(row_matches(&[Filter::Ilike("handle".into(), "%fan%".into())], &row));
        assert!(row_matches(&[Filter::Ilike("handle".into(), "chill%".into())], &row));
        assert!(!row_matches(&[Filter::Ilike("handle".into(), "%nope%".into())], &row));
    }
}
