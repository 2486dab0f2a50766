/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Author grouping for ephemeral content. Grouping is a pure function of the
//! item list and the viewer's view-record set, so every realtime change just
//! re-derives the groups instead of patching them.

use chillz_protocol::{Entity, Filter, Order};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::warn;

use crate::records::{decode_rows, parse_timestamp, MediaKind, Profile, Story};
use crate::session::Session;

/// One piece of viewer-facing content with its author attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub author: Profile,
    pub media_url: String,
    pub media_kind: MediaKind,
    pub caption: Option<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
}

impl ContentItem {
    pub fn from_story(story: Story, author: Profile) -> Self {
        Self {
            id: story.id,
            author,
            media_url: story.content_url,
            media_kind: story.content_type,
            caption: story.caption,
            created_at: story.created_at,
            expires_at: story.expires_at,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at
            .as_deref()
            .and_then(parse_timestamp)
            .map(|at| at <= now)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorGroup {
    pub author: Profile,
    pub items: Vec<ContentItem>,
    pub has_viewed_all: bool,
}

/// Partition `items` into per-author groups. The viewer's own group (if any)
/// comes first; the rest follow in the order of each group's most-recent item
/// in the input. Item order inside a group is input order, which the caller
/// controls. Pure and deterministic: identical inputs give identical output.
pub fn group_by_author(
    items: &[ContentItem],
    viewed: &HashSet<String>,
    own_author: Option<&str>,
) -> Vec<AuthorGroup> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_author: HashMap<&str, Vec<&ContentItem>> = HashMap::new();
    for item in items {
        let author_id = item.author.user_id.as_str();
        if !by_author.contains_key(author_id) {
            order.push(author_id);
        }
        by_author.entry(author_id).or_default().push(item);
    }

    // Position of each group's most-recent item in the input (earliest index
    // wins a timestamp tie).
    let mut newest_pos: HashMap<&str, usize> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        let author_id = item.author.user_id.as_str();
        let entry = newest_pos.entry(author_id).or_insert(idx);
        if items[*entry].created_at < item.created_at {
            *entry = idx;
        }
    }
    order.sort_by_key(|a| newest_pos.get(a).copied().unwrap_or(usize::MAX));
    if let Some(own) = own_author {
        if let Some(pos) = order.iter().position(|a| *a == own) {
            let own_key = order.remove(pos);
            order.insert(0, own_key);
        }
    }

    order
        .into_iter()
        .map(|author_id| {
            let group_items: Vec<ContentItem> = by_author
                .remove(author_id)
                .unwrap_or_default()
                .into_iter()
                .cloned()
                .collect();
            let has_viewed_all = group_items.iter().all(|i| viewed.contains(&i.id));
            AuthorGroup {
                author: group_items[0].author.clone(),
                items: group_items,
                has_viewed_all,
            }
        })
        .collect()
}

/// The stories rail: live (non-expired) stories grouped per author, own
/// group first, annotated with the viewer's seen state.
pub struct StoryRail {
    session: Arc<Session>,
}

impl StoryRail {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Reads fail soft: any error logs and yields an empty rail.
    pub async fn load(&self) -> Vec<AuthorGroup> {
        let filters = [Filter::Gt(
            "expires_at".to_string(),
            serde_json::Value::String(crate::records::now_rfc3339()),
        )];
        let rows = match self
            .session
            .service()
            .select(
                Entity::Stories,
                &filters,
                Some(&Order::desc("created_at")),
                None,
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("story load failed: {e}");
                return Vec::new();
            }
        };
        let stories: Vec<Story> = decode_rows("stories", rows);
        if stories.is_empty() {
            return Vec::new();
        }

        let author_ids: Vec<&str> = stories.iter().map(|s| s.user_id.as_str()).collect();
        let authors = crate::profile::resolve_profiles(&self.session, &author_ids).await;

        let viewed = self.viewed_ids().await;
        let items: Vec<ContentItem> = stories
            .into_iter()
            .filter_map(|story| {
                let author = authors.get(&story.user_id).cloned()?;
                Some(ContentItem::from_story(story, author))
            })
            .collect();
        group_by_author(&items, &viewed, self.session.viewer_id())
    }

    async fn viewed_ids(&self) -> HashSet<String> {
        let Some(viewer) = self.session.viewer_id() else {
            return HashSet::new();
        };
        let rows = self
            .session
            .service()
            .select(
                Entity::StoryViews,
                &[Filter::eq("user_id", viewer)],
                None,
                None,
            )
            .await
            .unwrap_or_else(|e| {
                warn!("view record load failed: {e}");
                Vec::new()
            });
        rows.iter()
            .filter_map(|r| r.get("story_id").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .collect()
    }
}
