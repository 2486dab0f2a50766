/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Profile pages: load, edit, post grid, follower counts and search.

use chillz_protocol::{Entity, Filter, Order};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::{Result, ServiceError};
use crate::records::{decode_rows, Post, Profile};
use crate::session::Session;
use crate::ui_events::UiEvent;

/// Batch-resolve profiles with a single `in` query instead of one request
/// per author. Missing or failed lookups just leave holes.
pub(crate) async fn resolve_profiles(
    session: &Session,
    user_ids: &[&str],
) -> HashMap<String, Profile> {
    let mut unique: Vec<&str> = user_ids.to_vec();
    unique.sort_unstable();
    unique.dedup();
    if unique.is_empty() {
        return HashMap::new();
    }
    let values = unique.iter().map(|id| json!(id)).collect();
    let rows = session
        .service()
        .select(
            Entity::Profiles,
            &[Filter::In("user_id".to_string(), values)],
            None,
            None,
        )
        .await
        .unwrap_or_else(|e| {
            warn!("profile batch load failed: {e}");
            Vec::new()
        });
    decode_rows::<Profile>("profiles", rows)
        .into_iter()
        .map(|p| (p.user_id.clone(), p))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowStats {
    pub followers: u64,
    pub following: u64,
}

/// Editable subset of the viewer's own profile. Absent fields are left
/// untouched by the update.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

pub struct ProfileController {
    session: Arc<Session>,
}

impl ProfileController {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn load_profile(&self, user_id: &str) -> Result<Profile> {
        let rows = self
            .session
            .service()
            .select(
                Entity::Profiles,
                &[Filter::eq("user_id", user_id)],
                None,
                Some(1),
            )
            .await?;
        decode_rows::<Profile>("profiles", rows)
            .into_iter()
            .next()
            .ok_or(ServiceError::NotFound("profile"))
    }

    pub async fn own_profile(&self) -> Result<Profile> {
        let viewer = self.session.require_viewer()?.id.clone();
        self.load_profile(&viewer).await
    }

    /// The profile's post grid, newest first. Fails soft to empty.
    pub async fn load_posts(&self, user_id: &str) -> Vec<Post> {
        let rows = self
            .session
            .service()
            .select(
                Entity::Posts,
                &[Filter::eq("user_id", user_id)],
                Some(&Order::desc("created_at")),
                None,
            )
            .await
            .unwrap_or_else(|e| {
                warn!("post grid load failed: {e}");
                Vec::new()
            });
        decode_rows("posts", rows)
    }

    pub async fn follow_stats(&self, user_id: &str) -> FollowStats {
        let followers = self
            .session
            .service()
            .count(Entity::Follows, &[Filter::eq("following_id", user_id)])
            .await
            .unwrap_or_else(|e| {
                warn!("follower count failed: {e}");
                0
            });
        let following = self
            .session
            .service()
            .count(Entity::Follows, &[Filter::eq("follower_id", user_id)])
            .await
            .unwrap_or_else(|e| {
                warn!("following count failed: {e}");
                0
            });
        FollowStats {
            followers,
            following,
        }
    }

    /// Case-insensitive search over handles and display names.
    pub async fn search(&self, query: &str, limit: u32) -> Vec<Profile> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let pattern = format!("%{query}%");
        let mut out: Vec<Profile> = Vec::new();
        for column in ["handle", "display_name"] {
            let rows = self
                .session
                .service()
                .select(
                    Entity::Profiles,
                    &[Filter::Ilike(column.to_string(), pattern.clone())],
                    None,
                    Some(limit),
                )
                .await
                .unwrap_or_else(|e| {
                    warn!("profile search failed: {e}");
                    Vec::new()
                });
            for p in decode_rows::<Profile>("profiles", rows) {
                if !out.iter().any(|q| q.user_id == p.user_id) {
                    out.push(p);
                }
            }
        }
        out.truncate(limit as usize);
        out
    }

    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<()> {
        let viewer = self.session.require_viewer()?.id.clone();
        let patch = serde_json::to_value(&patch)
            .map_err(|e| ServiceError::write(anyhow::anyhow!("encode patch: {e}")))?;
        if patch.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            return Ok(());
        }
        if let Err(e) = self
            .session
            .service()
            .update(
                Entity::Profiles,
                &[Filter::eq("user_id", viewer.as_str())],
                patch,
            )
            .await
        {
            self.session
                .notify(UiEvent::write_failure("save profile", &e));
            return Err(e);
        }
        Ok(())
    }
}
