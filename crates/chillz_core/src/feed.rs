/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Feed surfaces: the home/discover grids of regular posts and the sparks
//! rail of short videos, with authors batch-resolved in one query. Also the
//! post-level actions that live on a card: delete own post, pin/unpin.

use chillz_protocol::{Entity, Filter, Order};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::data_service::exists;
use crate::error::Result;
use crate::profile::resolve_profiles;
use crate::records::{decode_rows, Post, Profile};
use crate::session::Session;
use crate::ui_events::UiEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedPost {
    pub post: Post,
    pub author: Option<Profile>,
}

pub struct FeedController {
    session: Arc<Session>,
}

impl FeedController {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Regular posts, newest first. Fails soft to an empty page.
    pub async fn load_posts(&self, limit: u32) -> Vec<FeedPost> {
        self.load(Filter::eq("is_spark", false), limit).await
    }

    /// The sparks rail: short videos, newest first.
    pub async fn load_sparks(&self, limit: u32) -> Vec<FeedPost> {
        self.load(Filter::eq("is_spark", true), limit).await
    }

    async fn load(&self, kind: Filter, limit: u32) -> Vec<FeedPost> {
        let rows = match self
            .session
            .service()
            .select(
                Entity::Posts,
                &[kind],
                Some(&Order::desc("created_at")),
                Some(limit),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("feed load failed: {e}");
                return Vec::new();
            }
        };
        let posts: Vec<Post> = decode_rows("posts", rows);
        let author_ids: Vec<&str> = posts.iter().map(|p| p.user_id.as_str()).collect();
        let authors = resolve_profiles(&self.session, &author_ids).await;
        posts
            .into_iter()
            .map(|post| {
                let author = authors.get(&post.user_id).cloned();
                FeedPost { post, author }
            })
            .collect()
    }

    /// Delete one of the viewer's own posts. The remote delete is scoped to
    /// the viewer's rows, so deleting someone else's post is a silent no-op
    /// just like it would be under row-level auth.
    pub async fn delete_post(&self, post_id: &str) -> Result<bool> {
        let viewer = self.session.require_viewer()?.id.clone();
        let filters = [
            Filter::eq("id", post_id),
            Filter::eq("user_id", viewer.as_str()),
        ];
        match self.session.service().delete(Entity::Posts, &filters).await {
            Ok(n) => Ok(n > 0),
            Err(e) => {
                self.session
                    .notify(UiEvent::write_failure("delete post", &e));
                Err(e)
            }
        }
    }

    pub async fn is_pinned(&self, post_id: &str) -> bool {
        let Some(viewer) = self.session.viewer_id() else {
            return false;
        };
        let probe = [
            Filter::eq("user_id", viewer),
            Filter::eq("post_id", post_id),
        ];
        exists(self.session.service().as_ref(), Entity::PinnedPosts, &probe)
            .await
            .unwrap_or_else(|e| {
                warn!("pin probe failed: {e}");
                false
            })
    }

    /// Pin or unpin a post on the viewer's profile. Returns the new state.
    pub async fn toggle_pin(&self, post_id: &str) -> Result<bool> {
        let viewer = self.session.require_viewer()?.id.clone();
        let key = [
            Filter::eq("user_id", viewer.as_str()),
            Filter::eq("post_id", post_id),
        ];
        let pinned = exists(self.session.service().as_ref(), Entity::PinnedPosts, &key)
            .await
            .unwrap_or(false);
        let result = if pinned {
            self.session
                .service()
                .delete(Entity::PinnedPosts, &key)
                .await
                .map(|_| false)
        } else {
            self.session
                .service()
                .insert(
                    Entity::PinnedPosts,
                    json!({ "user_id": viewer, "post_id": post_id }),
                )
                .await
                .map(|_| true)
        };
        result.map_err(|e| {
            self.session.notify(UiEvent::write_failure("update pin", &e));
            e
        })
    }
}
