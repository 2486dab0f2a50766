/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Flattened comment thread for one content item: top-level comments newest
//! first, with a comment's direct replies spliced immediately after it while
//! expanded. The list never contains a reply whose parent is absent or
//! collapsed.

use chillz_protocol::{Entity, Filter, Order};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::data_service::exists;
use crate::error::Result;
use crate::notifications::push_notification;
use crate::records::{decode_rows, Comment, Profile};
use crate::session::Session;
use crate::ui_events::UiEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEntry {
    pub comment: Comment,
    pub author: Option<Profile>,
    pub like_count: u64,
    pub viewer_liked: bool,
    /// Direct replies only; zero for replies themselves.
    pub reply_count: u64,
}

impl ThreadEntry {
    fn is_top_level(&self) -> bool {
        self.comment.parent_comment_id.is_none()
    }
}

pub struct CommentThread {
    session: Arc<Session>,
    item_id: String,
    item_author_id: String,
    entries: Vec<ThreadEntry>,
    expanded: HashSet<String>,
}

impl CommentThread {
    pub fn new(session: Arc<Session>, item_id: &str, item_author_id: &str) -> Self {
        Self {
            session,
            item_id: item_id.to_string(),
            item_author_id: item_author_id.to_string(),
            entries: Vec::new(),
            expanded: HashSet::new(),
        }
    }

    pub fn entries(&self) -> &[ThreadEntry] {
        &self.entries
    }

    pub fn is_expanded(&self, comment_id: &str) -> bool {
        self.expanded.contains(comment_id)
    }

    /// Replace the list with the item's top-level comments, newest first.
    /// Fails soft: a read error logs and leaves the previous list alone.
    pub async fn load_top_level(&mut self) {
        let filters = [
            Filter::eq("post_id", self.item_id.as_str()),
            Filter::IsNull("parent_comment_id".to_string()),
        ];
        let rows = match self
            .session
            .service()
            .select(
                Entity::Comments,
                &filters,
                Some(&Order::desc("created_at")),
                None,
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("comment load failed, keeping previous list: {e}");
                return;
            }
        };
        let comments: Vec<Comment> = decode_rows("comments", rows);
        let mut entries = Vec::with_capacity(comments.len());
        for comment in comments {
            let entry = self.hydrate(comment, true).await;
            entries.push(entry);
        }
        self.attach_authors(&mut entries).await;
        self.entries = entries;
        self.expanded.clear();
    }

    /// Fetch the direct replies of a top-level comment (oldest first) and
    /// splice them in right after it.
    pub async fn expand_replies(&mut self, comment_id: &str) {
        if self.expanded.contains(comment_id) {
            return;
        }
        let Some(parent_idx) = self.position(comment_id) else {
            return;
        };
        if !self.entries[parent_idx].is_top_level() {
            return;
        }
        let rows = match self
            .session
            .service()
            .select(
                Entity::Comments,
                &[Filter::eq("parent_comment_id", comment_id)],
                Some(&Order::asc("created_at")),
                None,
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("reply load failed: {e}");
                return;
            }
        };
        let replies: Vec<Comment> = decode_rows("comments", rows);
        let mut hydrated = Vec::with_capacity(replies.len());
        for reply in replies {
            hydrated.push(self.hydrate(reply, false).await);
        }
        self.attach_authors(&mut hydrated).await;
        self.entries
            .splice(parent_idx + 1..parent_idx + 1, hydrated);
        self.expanded.insert(comment_id.to_string());
    }

    /// Remove a comment's replies from the flattened list.
    pub fn collapse_replies(&mut self, comment_id: &str) {
        if !self.expanded.remove(comment_id) {
            return;
        }
        self.entries
            .retain(|e| e.comment.parent_comment_id.as_deref() != Some(comment_id));
    }

    /// Post a top-level comment or a reply. The new comment is spliced into
    /// place (top of the list, or right after its parent when the parent is
    /// expanded) and the item's author is notified unless they wrote it.
    pub async fn post_comment(&mut self, content: &str, parent_id: Option<&str>) -> Result<()> {
        let viewer = self.session.require_viewer()?.id.clone();
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }
        let record = json!({
            "post_id": self.item_id,
            "user_id": viewer,
            "content": content,
            "parent_comment_id": parent_id,
        });
        let stored = match self.session.service().insert(Entity::Comments, record).await {
            Ok(row) => row,
            Err(e) => {
                self.session
                    .notify(UiEvent::write_failure("post comment", &e));
                return Err(e);
            }
        };
        let comment: Option<Comment> = serde_json::from_value(stored).ok();
        if let Some(comment) = comment {
            let mut entry = ThreadEntry {
                comment,
                author: None,
                like_count: 0,
                viewer_liked: false,
                reply_count: 0,
            };
            self.attach_authors(std::slice::from_mut(&mut entry)).await;
            match parent_id {
                None => self.entries.insert(0, entry),
                Some(parent_id) => {
                    if let Some(parent_idx) = self.position(parent_id) {
                        self.entries[parent_idx].reply_count += 1;
                        if self.expanded.contains(parent_id) {
                            self.entries.insert(parent_idx + 1, entry);
                        }
                    }
                }
            }
        }
        push_notification(
            &self.session,
            &self.item_author_id,
            "comment",
            Some(self.item_id.as_str()),
        )
        .await;
        Ok(())
    }

    /// Optimistic like toggle on one entry, with rollback on write failure —
    /// the same shape as the item-level like toggle, scoped to comments.
    pub async fn toggle_comment_like(&mut self, comment_id: &str) -> Result<()> {
        let viewer = self.session.require_viewer()?.id.clone();
        let Some(idx) = self.position(comment_id) else {
            return Ok(());
        };
        let prior = (self.entries[idx].like_count, self.entries[idx].viewer_liked);
        let unliking = prior.1;
        {
            let entry = &mut self.entries[idx];
            if unliking {
                entry.viewer_liked = false;
                entry.like_count = entry.like_count.saturating_sub(1);
            } else {
                entry.viewer_liked = true;
                entry.like_count += 1;
            }
        }
        let key = [
            Filter::eq("comment_id", comment_id),
            Filter::eq("user_id", viewer.as_str()),
        ];
        let result = if unliking {
            self.session
                .service()
                .delete(Entity::CommentLikes, &key)
                .await
                .map(|_| ())
        } else {
            self.session
                .service()
                .insert(
                    Entity::CommentLikes,
                    json!({ "comment_id": comment_id, "user_id": viewer }),
                )
                .await
                .map(|_| ())
        };
        if let Err(e) = result {
            let entry = &mut self.entries[idx];
            entry.like_count = prior.0;
            entry.viewer_liked = prior.1;
            self.session
                .notify(UiEvent::write_failure("update like", &e));
            return Err(e);
        }
        Ok(())
    }

    fn position(&self, comment_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.comment.id == comment_id)
    }

    async fn hydrate(&self, comment: Comment, with_replies: bool) -> ThreadEntry {
        let like_key = [Filter::eq("comment_id", comment.id.as_str())];
        let like_count = self
            .session
            .service()
            .count(Entity::CommentLikes, &like_key)
            .await
            .unwrap_or_else(|e| {
                warn!("comment like count failed: {e}");
                0
            });
        let viewer_liked = match self.session.viewer_id() {
            None => false,
            Some(viewer) => {
                let probe = [
                    Filter::eq("comment_id", comment.id.as_str()),
                    Filter::eq("user_id", viewer),
                ];
                exists(self.session.service().as_ref(), Entity::CommentLikes, &probe)
                    .await
                    .unwrap_or(false)
            }
        };
        let reply_count = if with_replies {
            self.session
                .service()
                .count(
                    Entity::Comments,
                    &[Filter::eq("parent_comment_id", comment.id.as_str())],
                )
                .await
                .unwrap_or(0)
        } else {
            0
        };
        ThreadEntry {
            comment,
            author: None,
            like_count,
            viewer_liked,
            reply_count,
        }
    }

    async fn attach_authors(&self, entries: &mut [ThreadEntry]) {
        let ids: Vec<&str> = entries
            .iter()
            .map(|e| e.comment.user_id.as_str())
            .collect();
        if ids.is_empty() {
            return;
        }
        let profiles = crate::profile::resolve_profiles(&self.session, &ids).await;
        for entry in entries.iter_mut() {
            entry.author = profiles.get(&entry.comment.user_id).cloned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_service::DataService;
    use crate::memory::MemoryService;
    use crate::session::Viewer;
    use serde_json::Value;

    fn fixture(viewer: &str) -> (Arc<MemoryService>, Arc<Session>) {
        let svc = Arc::new(MemoryService::new());
        let session = Session::with_viewer(
            svc.clone(),
            Some(Viewer {
                id: viewer.to_string(),
                metadata: Value::Null,
            }),
        );
        (svc, Arc::new(session))
    }

    fn seed_comment(
        svc: &MemoryService,
        id: &str,
        user: &str,
        content: &str,
        created_at: &str,
        parent: Option<&str>,
    ) {
        svc.seed(
            Entity::Comments,
            json!({
                "id": id,
                "post_id": "p1",
                "user_id": user,
                "content": content,
                "created_at": created_at,
                "parent_comment_id": parent,
            }),
        );
    }

    #[tokio::test]
    async fn top_level_loads_newest_first_with_counts() {
        let (svc, session) = fixture("fan");
        seed_comment(&svc, "c1", "alice", "first", "2026-08-01T00:00:00Z", None);
        seed_comment(&svc, "c2", "bob", "second", "2026-08-02T00:00:00Z", None);
        seed_comment(&svc, "r1", "carol", "reply", "2026-08-03T00:00:00Z", Some("c1"));
        svc.seed(
            Entity::CommentLikes,
            json!({ "comment_id": "c2", "user_id": "fan" }),
        );

        let mut thread = CommentThread::new(session, "p1", "author");
        thread.load_top_level().await;
        let ids: Vec<&str> = thread.entries().iter().map(|e| e.comment.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"], "newest first, replies excluded");
        assert_eq!(thread.entries()[0].like_count, 1);
        assert!(thread.entries()[0].viewer_liked);
        assert_eq!(thread.entries()[1].reply_count, 1);
    }

    #[tokio::test]
    async fn expand_then_collapse_restores_the_list_exactly() {
        let (svc, session) = fixture("fan");
        seed_comment(&svc, "c1", "alice", "top a", "2026-08-02T00:00:00Z", None);
        seed_comment(&svc, "c2", "bob", "top b", "2026-08-01T00:00:00Z", None);
        seed_comment(&svc, "r1", "carol", "older reply", "2026-08-03T00:00:00Z", Some("c1"));
        seed_comment(&svc, "r2", "dave", "newer reply", "2026-08-04T00:00:00Z", Some("c1"));

        let mut thread = CommentThread::new(session, "p1", "author");
        thread.load_top_level().await;
        let before = thread.entries().to_vec();

        thread.expand_replies("c1").await;
        assert!(thread.is_expanded("c1"));
        let ids: Vec<&str> = thread.entries().iter().map(|e| e.comment.id.as_str()).collect();
        // Replies oldest first, immediately after their parent.
        assert_eq!(ids, vec!["c1", "r1", "r2", "c2"]);

        thread.collapse_replies("c1");
        assert!(!thread.is_expanded("c1"));
        assert_eq!(thread.entries(), before.as_slice());
    }

    #[tokio::test]
    async fn comment_like_toggle_round_trips() {
        let (svc, session) = fixture("fan");
        seed_comment(&svc, "c1", "alice", "top", "2026-08-01T00:00:00Z", None);
        for u in ["u1", "u2", "u3"] {
            svc.seed(
                Entity::CommentLikes,
                json!({ "comment_id": "c1", "user_id": u }),
            );
        }
        let mut thread = CommentThread::new(session, "p1", "author");
        thread.load_top_level().await;
        assert_eq!(thread.entries()[0].like_count, 3);
        assert!(!thread.entries()[0].viewer_liked);

        thread.toggle_comment_like("c1").await.expect("like");
        assert_eq!(thread.entries()[0].like_count, 4);
        assert!(thread.entries()[0].viewer_liked);

        thread.toggle_comment_like("c1").await.expect("unlike");
        assert_eq!(thread.entries()[0].like_count, 3);
        assert!(!thread.entries()[0].viewer_liked);
    }

    #[tokio::test]
    async fn comment_like_failure_rolls_back() {
        let (svc, session) = fixture("fan");
        seed_comment(&svc, "c1", "alice", "top", "2026-08-01T00:00:00Z", None);
        let mut thread = CommentThread::new(session, "p1", "author");
        thread.load_top_level().await;

        svc.set_offline(true);
        assert!(thread.toggle_comment_like("c1").await.is_err());
        assert_eq!(thread.entries()[0].like_count, 0);
        assert!(!thread.entries()[0].viewer_liked);
    }

    #[tokio::test]
    async fn posting_a_top_level_comment_splices_to_the_top_and_notifies() {
        let (svc, session) = fixture("fan");
        seed_comment(&svc, "c1", "alice", "old", "2026-08-01T00:00:00Z", None);
        let mut thread = CommentThread::new(session, "p1", "author");
        thread.load_top_level().await;

        thread.post_comment("hot take", None).await.expect("post");
        assert_eq!(thread.entries()[0].comment.content, "hot take");
        assert_eq!(thread.entries().len(), 2);
        assert_eq!(svc.count(Entity::Notifications, &[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replying_splices_after_the_parent_and_bumps_its_count() {
        let (svc, session) = fixture("fan");
        seed_comment(&svc, "c1", "alice", "top a", "2026-08-02T00:00:00Z", None);
        seed_comment(&svc, "c2", "bob", "top b", "2026-08-01T00:00:00Z", None);
        let mut thread = CommentThread::new(session, "p1", "author");
        thread.load_top_level().await;
        thread.expand_replies("c1").await;

        thread
            .post_comment("me too", Some("c1"))
            .await
            .expect("reply");
        let ids: Vec<&str> = thread.entries().iter().map(|e| e.comment.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], "c1");
        assert_eq!(thread.entries()[1].comment.content, "me too");
        assert_eq!(thread.entries()[0].reply_count, 1);

        // Every reply in the list has its parent present and expanded.
        for e in thread.entries() {
            if let Some(parent) = e.comment.parent_comment_id.as_deref() {
                assert!(thread.is_expanded(parent));
                assert!(thread.entries().iter().any(|p| p.comment.id == parent));
            }
        }
    }

    #[tokio::test]
    async fn replying_to_a_collapsed_parent_only_bumps_the_count() {
        let (svc, session) = fixture("fan");
        seed_comment(&svc, "c1", "alice", "top", "2026-08-01T00:00:00Z", None);
        let mut thread = CommentThread::new(session, "p1", "author");
        thread.load_top_level().await;

        thread
            .post_comment("quiet reply", Some("c1"))
            .await
            .expect("reply");
        assert_eq!(thread.entries().len(), 1, "collapsed parent gains no row");
        assert_eq!(thread.entries()[0].reply_count, 1);
        assert_eq!(
            svc.count(Entity::Comments, &[Filter::NotNull("parent_comment_id".into())])
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn the_items_author_is_not_notified_of_their_own_comment() {
        let (svc, session) = fixture("author");
        let mut thread = CommentThread::new(session, "p1", "author");
        thread.load_top_level().await;
        thread.post_comment("my own post", None).await.expect("post");
        assert_eq!(svc.count(Entity::Notifications, &[]).await.unwrap(), 0);
    }
}
