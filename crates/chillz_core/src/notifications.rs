/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Engagement notifications and the unread badge. Inserts are best-effort
//! side effects of likes/comments/follows; losing one never rolls back the
//! engagement itself.

use chillz_protocol::{ChangeAction, ChangeEvent, Entity, Filter};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::records::{decode_rows, Notification, Profile};
use crate::session::Session;

/// Insert a notification for `recipient` about something `session`'s viewer
/// did. Self-engagement never notifies.
pub(crate) async fn push_notification(
    session: &Session,
    recipient: &str,
    kind: &str,
    post_id: Option<&str>,
) {
    let Some(actor) = session.viewer_id() else {
        return;
    };
    if actor == recipient {
        return;
    }
    let actor = actor.to_string();
    let actor_name = actor_display_name(session, &actor).await;
    let (title, message) = match kind {
        "like" => ("New Like", format!("{actor_name} liked your post")),
        "comment" => ("New Comment", format!("{actor_name} commented on your post")),
        "follow" => ("New Follower", format!("{actor_name} started following you")),
        other => ("New Activity", format!("{actor_name}: {other}")),
    };
    let record = json!({
        "user_id": recipient,
        "type": kind,
        "title": title,
        "message": message,
        "actor_id": actor,
        "post_id": post_id,
        "read": false,
    });
    if let Err(e) = session
        .service()
        .insert(Entity::Notifications, record)
        .await
    {
        warn!("notification insert failed: {e}");
    }
}

async fn actor_display_name(session: &Session, actor: &str) -> String {
    let rows = session
        .service()
        .select(
            Entity::Profiles,
            &[Filter::eq("user_id", actor)],
            None,
            Some(1),
        )
        .await
        .unwrap_or_default();
    decode_rows::<Profile>("profiles", rows)
        .into_iter()
        .next()
        .map(|p| p.display_name)
        .unwrap_or_else(|| "Someone".to_string())
}

/// Unread badge plus the notification list, kept current by change-feed
/// deltas between reloads.
pub struct NotificationCenter {
    session: Arc<Session>,
    unread: u64,
}

impl NotificationCenter {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session, unread: 0 }
    }

    pub fn unread(&self) -> u64 {
        self.unread
    }

    /// Recount from the server; fails soft and keeps the previous badge.
    pub async fn refresh_unread(&mut self) {
        let Some(viewer) = self.session.viewer_id() else {
            self.unread = 0;
            return;
        };
        let filters = [
            Filter::eq("user_id", viewer),
            Filter::eq("read", false),
        ];
        match self
            .session
            .service()
            .count(Entity::Notifications, &filters)
            .await
        {
            Ok(n) => self.unread = n,
            Err(e) => warn!("unread count failed, keeping {}: {e}", self.unread),
        }
    }

    pub async fn list(&self, limit: u32) -> Vec<Notification> {
        let Some(viewer) = self.session.viewer_id() else {
            return Vec::new();
        };
        let rows = self
            .session
            .service()
            .select(
                Entity::Notifications,
                &[Filter::eq("user_id", viewer)],
                Some(&chillz_protocol::Order::desc("created_at")),
                Some(limit),
            )
            .await
            .unwrap_or_else(|e| {
                warn!("notification list failed: {e}");
                Vec::new()
            });
        decode_rows("notifications", rows)
    }

    pub async fn mark_all_read(&mut self) -> Result<()> {
        let viewer = self.session.require_viewer()?.id.clone();
        self.session
            .service()
            .update(
                Entity::Notifications,
                &[Filter::eq("user_id", viewer), Filter::eq("read", false)],
                json!({ "read": true }),
            )
            .await?;
        self.unread = 0;
        Ok(())
    }

    /// Apply one change-feed delta. Returns true when the caller should do a
    /// full `refresh_unread` instead (updates/deletes are not worth tracking
    /// row-by-row).
    pub fn apply_change(&mut self, ev: &ChangeEvent) -> bool {
        if ev.entity != Entity::Notifications {
            return false;
        }
        let for_viewer = self.session.viewer_id().is_some()
            && ev.field("user_id") == self.session.viewer_id();
        if !for_viewer {
            return false;
        }
        match ev.action {
            ChangeAction::Inserted => {
                let already_read = ev
                    .record
                    .get("read")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if !already_read {
                    self.unread += 1;
                }
                false
            }
            ChangeAction::Updated | ChangeAction::Deleted => true,
        }
    }
}
