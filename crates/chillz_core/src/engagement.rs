/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-item engagement state: like/comment counters, the viewer's own flags
//! and the follow relation to the item's author. One store per rendered
//! surface; a feed card and the immersive viewer each hold their own and are
//! reconciled only by reload, so counters never need cross-instance locking.

use chillz_protocol::{ChangeAction, ChangeEvent, Entity, Filter};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::data_service::exists;
use crate::error::Result;
use crate::notifications::push_notification;
use crate::session::Session;
use crate::ui_events::UiEvent;

/// What the like edge points at. Each target kind lives in its own table
/// with its own key column; the toggle logic is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeTarget {
    Post(String),
    Story(String),
    Comment(String),
}

impl LikeTarget {
    pub fn id(&self) -> &str {
        match self {
            LikeTarget::Post(id) | LikeTarget::Story(id) | LikeTarget::Comment(id) => id,
        }
    }

    fn edge_entity(&self) -> Entity {
        match self {
            LikeTarget::Post(_) => Entity::Likes,
            LikeTarget::Story(_) => Entity::StoryLikes,
            LikeTarget::Comment(_) => Entity::CommentLikes,
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            LikeTarget::Post(_) => "post_id",
            LikeTarget::Story(_) => "story_id",
            LikeTarget::Comment(_) => "comment_id",
        }
    }

    fn comment_entity(&self) -> Option<(Entity, &'static str)> {
        match self {
            LikeTarget::Post(_) => Some((Entity::Comments, "post_id")),
            LikeTarget::Story(_) => Some((Entity::StoryComments, "story_id")),
            LikeTarget::Comment(_) => None,
        }
    }
}

/// Snapshot of the optimistic counter state, taken before the remote write.
/// Dropped on success; replayed to undo the local toggle when the write
/// fails, so the UI never keeps a count the server rejected.
struct CounterRollback {
    like_count: u64,
    viewer_has_liked: bool,
}

pub struct EngagementStore {
    session: Arc<Session>,
    target: LikeTarget,
    author_id: String,
    like_count: u64,
    viewer_has_liked: bool,
    comment_count: u64,
    viewer_follows_author: bool,
}

impl EngagementStore {
    pub fn new(session: Arc<Session>, target: LikeTarget, author_id: &str) -> Self {
        Self {
            session,
            target,
            author_id: author_id.to_string(),
            like_count: 0,
            viewer_has_liked: false,
            comment_count: 0,
            viewer_follows_author: false,
        }
    }

    pub fn like_count(&self) -> u64 {
        self.like_count
    }

    pub fn viewer_has_liked(&self) -> bool {
        self.viewer_has_liked
    }

    pub fn comment_count(&self) -> u64 {
        self.comment_count
    }

    pub fn follows_author(&self) -> bool {
        self.viewer_follows_author
    }

    pub fn target(&self) -> &LikeTarget {
        &self.target
    }

    /// Count query plus a membership probe. Fails soft: on a read error the
    /// prior state stays on screen and the failure is only logged.
    pub async fn load_counts(&mut self) {
        let key = [Filter::eq(self.target.key_column(), self.target.id())];
        match self
            .session
            .service()
            .count(self.target.edge_entity(), &key)
            .await
        {
            Ok(n) => self.like_count = n,
            Err(e) => {
                warn!("like count load failed, keeping prior state: {e}");
                return;
            }
        }
        let Some(viewer) = self.session.viewer_id() else {
            self.viewer_has_liked = false;
            return;
        };
        let probe = [
            Filter::eq(self.target.key_column(), self.target.id()),
            Filter::eq("user_id", viewer),
        ];
        match exists(
            self.session.service().as_ref(),
            self.target.edge_entity(),
            &probe,
        )
        .await
        {
            Ok(liked) => self.viewer_has_liked = liked,
            Err(e) => warn!("like probe failed, keeping prior state: {e}"),
        }
    }

    pub async fn load_comment_count(&mut self) {
        let Some((entity, key_column)) = self.target.comment_entity() else {
            return;
        };
        let key = [Filter::eq(key_column, self.target.id())];
        match self.session.service().count(entity, &key).await {
            Ok(n) => self.comment_count = n,
            Err(e) => warn!("comment count load failed, keeping prior state: {e}"),
        }
    }

    pub async fn load_follow_state(&mut self) {
        let Some(viewer) = self.session.viewer_id() else {
            self.viewer_follows_author = false;
            return;
        };
        let probe = [
            Filter::eq("follower_id", viewer),
            Filter::eq("following_id", self.author_id.as_str()),
        ];
        match exists(self.session.service().as_ref(), Entity::Follows, &probe).await {
            Ok(following) => self.viewer_follows_author = following,
            Err(e) => warn!("follow probe failed, keeping prior state: {e}"),
        }
    }

    /// Optimistic like toggle. The counter flips before the write goes out;
    /// if the write is rejected the snapshot is restored and a transient
    /// notice surfaces.
    pub async fn toggle_like(&mut self) -> Result<()> {
        let viewer = self.session.require_viewer()?.id.clone();
        let rollback = CounterRollback {
            like_count: self.like_count,
            viewer_has_liked: self.viewer_has_liked,
        };
        let key = [
            Filter::eq(self.target.key_column(), self.target.id()),
            Filter::eq("user_id", viewer.as_str()),
        ];
        let unliking = self.viewer_has_liked;
        if unliking {
            self.viewer_has_liked = false;
            self.like_count = self.like_count.saturating_sub(1);
        } else {
            self.viewer_has_liked = true;
            self.like_count += 1;
        }

        let result = if unliking {
            self.session
                .service()
                .delete(self.target.edge_entity(), &key)
                .await
                .map(|_| ())
        } else {
            self.session
                .service()
                .insert(
                    self.target.edge_entity(),
                    json!({
                        self.target.key_column(): self.target.id(),
                        "user_id": viewer,
                    }),
                )
                .await
                .map(|_| ())
        };

        if let Err(e) = result {
            self.like_count = rollback.like_count;
            self.viewer_has_liked = rollback.viewer_has_liked;
            self.session.notify(UiEvent::write_failure("update like", &e));
            return Err(e);
        }

        if !unliking {
            self.notify_on_engagement("like").await;
        }
        Ok(())
    }

    /// Tell the item's author about an engagement. Self-engagement never
    /// notifies; failures only log.
    pub async fn notify_on_engagement(&self, kind: &str) {
        let post_id = match &self.target {
            LikeTarget::Post(id) => Some(id.as_str()),
            _ => None,
        };
        push_notification(&self.session, &self.author_id, kind, post_id).await;
    }

    /// Follow/unfollow the item's author, with the same optimistic shape.
    pub async fn toggle_follow(&mut self) -> Result<()> {
        let viewer = self.session.require_viewer()?.id.clone();
        let was_following = self.viewer_follows_author;
        self.viewer_follows_author = !was_following;
        let key = [
            Filter::eq("follower_id", viewer.as_str()),
            Filter::eq("following_id", self.author_id.as_str()),
        ];
        let result = if was_following {
            self.session
                .service()
                .delete(Entity::Follows, &key)
                .await
                .map(|_| ())
        } else {
            self.session
                .service()
                .insert(
                    Entity::Follows,
                    json!({
                        "follower_id": viewer,
                        "following_id": self.author_id,
                    }),
                )
                .await
                .map(|_| ())
        };
        if let Err(e) = result {
            self.viewer_follows_author = was_following;
            self.session
                .notify(UiEvent::write_failure("update follow", &e));
            return Err(e);
        }
        if !was_following {
            push_notification(&self.session, &self.author_id, "follow", None).await;
        }
        Ok(())
    }

    /// Apply one change-feed delta in place. The viewer's own echoes are
    /// absorbed (the optimistic toggle already counted them); everyone else
    /// moves the counters.
    pub fn apply_change(&mut self, ev: &ChangeEvent) {
        if ev.entity == self.target.edge_entity()
            && ev.field(self.target.key_column()) == Some(self.target.id())
        {
            let from_viewer =
                self.session.viewer_id().is_some() && ev.field("user_id") == self.session.viewer_id();
            match ev.action {
                ChangeAction::Inserted => {
                    if from_viewer {
                        if !self.viewer_has_liked {
                            self.viewer_has_liked = true;
                            self.like_count += 1;
                        }
                    } else {
                        self.like_count += 1;
                    }
                }
                ChangeAction::Deleted => {
                    if from_viewer {
                        if self.viewer_has_liked {
                            self.viewer_has_liked = false;
                            self.like_count = self.like_count.saturating_sub(1);
                        }
                    } else {
                        self.like_count = self.like_count.saturating_sub(1);
                    }
                }
                ChangeAction::Updated => {}
            }
            return;
        }
        if let Some((entity, key_column)) = self.target.comment_entity() {
            if ev.entity == entity && ev.field(key_column) == Some(self.target.id()) {
                match ev.action {
                    ChangeAction::Inserted => self.comment_count += 1,
                    ChangeAction::Deleted => {
                        self.comment_count = self.comment_count.saturating_sub(1)
                    }
                    ChangeAction::Updated => {}
                }
            }
        }
    }

    /// Full reload; server-derived values win over anything applied locally.
    pub async fn reload(&mut self) {
        self.load_counts().await;
        self.load_comment_count().await;
        self.load_follow_state().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_service::DataService;
    use crate::memory::MemoryService;
    use crate::session::Viewer;
    use serde_json::Value;

    fn fixture(viewer: Option<&str>) -> (Arc<MemoryService>, Arc<Session>) {
        let svc = Arc::new(MemoryService::new());
        let session = Session::with_viewer(
            svc.clone(),
            viewer.map(|id| Viewer {
                id: id.to_string(),
                metadata: Value::Null,
            }),
        );
        (svc, Arc::new(session))
    }

    #[tokio::test]
    async fn toggle_like_is_its_own_inverse() {
        let (svc, session) = fixture(Some("fan"));
        svc.seed(
            Entity::Likes,
            json!({ "post_id": "p1", "user_id": "someone_else" }),
        );
        let mut store = EngagementStore::new(session, LikeTarget::Post("p1".into()), "author");
        store.load_counts().await;
        assert_eq!(store.like_count(), 1);
        assert!(!store.viewer_has_liked());

        store.toggle_like().await.expect("like");
        assert_eq!(store.like_count(), 2);
        assert!(store.viewer_has_liked());

        store.toggle_like().await.expect("unlike");
        assert_eq!(store.like_count(), 1);
        assert!(!store.viewer_has_liked());
        assert_eq!(
            svc.count(Entity::Likes, &[Filter::eq("user_id", "fan")])
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn write_failure_rolls_back_and_surfaces_a_notice() {
        let (svc, session) = fixture(Some("fan"));
        let mut events = session.ui_events();
        let mut store =
            EngagementStore::new(session.clone(), LikeTarget::Post("p1".into()), "author");
        store.load_counts().await;

        svc.set_offline(true);
        let err = store.toggle_like().await.expect_err("write must fail");
        assert!(matches!(err, crate::error::ServiceError::RemoteWrite(_)));
        // Optimistic state reverted before the error surfaced.
        assert_eq!(store.like_count(), 0);
        assert!(!store.viewer_has_liked());
        assert_eq!(events.try_recv().expect("notice").kind, "write_failure");
    }

    #[tokio::test]
    async fn anonymous_toggle_requires_auth() {
        let (_svc, session) = fixture(None);
        let mut store = EngagementStore::new(session, LikeTarget::Post("p1".into()), "author");
        assert!(matches!(
            store.toggle_like().await,
            Err(crate::error::ServiceError::AuthRequired)
        ));
        assert_eq!(store.like_count(), 0);
    }

    #[tokio::test]
    async fn own_like_never_notifies_but_foreign_one_does() {
        let (svc, session) = fixture(Some("author"));
        let mut store =
            EngagementStore::new(session, LikeTarget::Post("p1".into()), "author");
        store.toggle_like().await.expect("self like");
        assert_eq!(svc.count(Entity::Notifications, &[]).await.unwrap(), 0);

        let (svc2, session2) = fixture(Some("fan"));
        let mut store2 =
            EngagementStore::new(session2, LikeTarget::Post("p1".into()), "author");
        store2.toggle_like().await.expect("foreign like");
        assert_eq!(svc2.count(Entity::Notifications, &[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn load_failure_keeps_prior_counts() {
        let (svc, session) = fixture(Some("fan"));
        svc.seed(Entity::Likes, json!({ "post_id": "p1", "user_id": "x" }));
        let mut store = EngagementStore::new(session, LikeTarget::Post("p1".into()), "author");
        store.load_counts().await;
        assert_eq!(store.like_count(), 1);

        svc.set_offline(true);
        store.load_counts().await;
        assert_eq!(store.like_count(), 1, "prior state survives a failed read");
    }

    #[tokio::test]
    async fn deltas_move_counts_but_absorb_viewer_echoes() {
        let (_svc, session) = fixture(Some("fan"));
        let mut store = EngagementStore::new(session, LikeTarget::Story("s1".into()), "author");
        store.toggle_like().await.expect("like");
        assert_eq!(store.like_count(), 1);

        // Echo of our own insert: no double count.
        store.apply_change(&ChangeEvent::new(
            ChangeAction::Inserted,
            Entity::StoryLikes,
            json!({ "story_id": "s1", "user_id": "fan" }),
        ));
        assert_eq!(store.like_count(), 1);

        // Someone else's like moves the counter.
        store.apply_change(&ChangeEvent::new(
            ChangeAction::Inserted,
            Entity::StoryLikes,
            json!({ "story_id": "s1", "user_id": "other" }),
        ));
        assert_eq!(store.like_count(), 2);

        // Unrelated story is ignored.
        store.apply_change(&ChangeEvent::new(
            ChangeAction::Inserted,
            Entity::StoryLikes,
            json!({ "story_id": "s9", "user_id": "other" }),
        ));
        assert_eq!(store.like_count(), 2);
    }

    #[tokio::test]
    async fn follow_toggle_notifies_once() {
        let (svc, session) = fixture(Some("fan"));
        let mut store = EngagementStore::new(session, LikeTarget::Post("p1".into()), "author");
        store.toggle_follow().await.expect("follow");
        assert!(store.follows_author());
        assert_eq!(svc.count(Entity::Follows, &[]).await.unwrap(), 1);
        assert_eq!(svc.count(Entity::Notifications, &[]).await.unwrap(), 1);

        store.toggle_follow().await.expect("unfollow");
        assert!(!store.follows_author());
        assert_eq!(svc.count(Entity::Follows, &[]).await.unwrap(), 0);
        // Unfollow does not notify.
        assert_eq!(svc.count(Entity::Notifications, &[]).await.unwrap(), 1);
    }
}
