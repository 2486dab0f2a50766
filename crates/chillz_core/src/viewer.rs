/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Immersive playback of author-grouped ephemeral content. The state machine
//! itself is pure and synchronous: fixed-duration auto-advance, manual
//! forward/back, pause, and removal of items deleted mid-session. A
//! controller drives it with a 100 ms timer task and performs the per-item
//! side effects (view records, engagement loads) when an item becomes
//! current. Keeping progress as reset-on-transition elapsed time means the
//! progress bar can never drift from actual exposure time, and "mark as
//! viewed" is a single well-defined per-transition event.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex};
use tracing::warn;

use chillz_protocol::{ChangeAction, ChangeEvent, Entity, Filter};

use crate::engagement::{EngagementStore, LikeTarget};
use crate::error::Result;
use crate::session::Session;
use crate::story_groups::{AuthorGroup, ContentItem};
use crate::ui_events::UiEvent;

/// Full exposure budget per item, advanced in fixed ticks.
pub const ITEM_DURATION_MS: u64 = 15_000;
pub const TICK_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    Closed,
    Playing { group: usize, item: usize },
    Paused { group: usize, item: usize },
}

/// Result of a transition, telling the driver which side effects to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing moved.
    None,
    /// A new item became current: record the view, load its counts.
    Current(ContentItem),
    /// The session ended.
    Closed,
}

#[derive(Debug)]
struct LiveSession {
    groups: Vec<AuthorGroup>,
    group_idx: usize,
    item_idx: usize,
    elapsed_ms: u64,
    paused: bool,
}

impl LiveSession {
    fn current(&self) -> &ContentItem {
        &self.groups[self.group_idx].items[self.item_idx]
    }
}

#[derive(Debug, Default)]
pub struct ViewerStateMachine {
    live: Option<LiveSession>,
}

impl ViewerStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ViewerState {
        match &self.live {
            None => ViewerState::Closed,
            Some(s) if s.paused => ViewerState::Paused {
                group: s.group_idx,
                item: s.item_idx,
            },
            Some(s) => ViewerState::Playing {
                group: s.group_idx,
                item: s.item_idx,
            },
        }
    }

    /// Progress through the current item, 0..=1. Resets on every transition
    /// and only grows while unpaused.
    pub fn progress_ratio(&self) -> f32 {
        match &self.live {
            None => 0.0,
            Some(s) => (s.elapsed_ms as f32 / ITEM_DURATION_MS as f32).min(1.0),
        }
    }

    pub fn current(&self) -> Option<&ContentItem> {
        self.live.as_ref().map(|s| s.current())
    }

    pub fn groups(&self) -> &[AuthorGroup] {
        self.live.as_ref().map(|s| s.groups.as_slice()).unwrap_or(&[])
    }

    /// Start a session at the first item of `start_group`. A start index
    /// pointing nowhere leaves the machine closed.
    pub fn open(&mut self, groups: Vec<AuthorGroup>, start_group: usize) -> Step {
        if groups.get(start_group).map(|g| g.items.is_empty()).unwrap_or(true) {
            return Step::None;
        }
        self.live = Some(LiveSession {
            groups,
            group_idx: start_group,
            item_idx: 0,
            elapsed_ms: 0,
            paused: false,
        });
        Step::Current(self.live.as_ref().unwrap().current().clone())
    }

    pub fn close(&mut self) {
        self.live = None;
    }

    pub fn pause(&mut self) {
        if let Some(s) = self.live.as_mut() {
            s.paused = true;
        }
    }

    pub fn resume(&mut self) {
        if let Some(s) = self.live.as_mut() {
            s.paused = false;
        }
    }

    /// One timer tick. A tick that lands after close, or while paused, does
    /// nothing; a tick that fills the exposure budget advances.
    pub fn tick(&mut self) -> Step {
        let Some(s) = self.live.as_mut() else {
            return Step::None;
        };
        if s.paused {
            return Step::None;
        }
        s.elapsed_ms += TICK_MS;
        if s.elapsed_ms >= ITEM_DURATION_MS {
            self.advance_forward()
        } else {
            Step::None
        }
    }

    pub fn advance_forward(&mut self) -> Step {
        let Some(s) = self.live.as_mut() else {
            return Step::None;
        };
        if s.item_idx + 1 < s.groups[s.group_idx].items.len() {
            s.item_idx += 1;
        } else if s.group_idx + 1 < s.groups.len() {
            s.group_idx += 1;
            s.item_idx = 0;
        } else {
            self.live = None;
            return Step::Closed;
        }
        s.elapsed_ms = 0;
        Step::Current(s.current().clone())
    }

    /// Manual "previous". At the very first item overall this is a no-op and
    /// the whole state, progress included, stays put.
    pub fn advance_backward(&mut self) -> Step {
        let Some(s) = self.live.as_mut() else {
            return Step::None;
        };
        if s.item_idx > 0 {
            s.item_idx -= 1;
        } else if s.group_idx > 0 {
            s.group_idx -= 1;
            s.item_idx = s.groups[s.group_idx].items.len() - 1;
        } else {
            return Step::None;
        }
        s.elapsed_ms = 0;
        Step::Current(s.current().clone())
    }

    /// Drop the current item (author deletion, expiry) and make the same
    /// motion as `advance_forward` from that position. The item is gone from
    /// the session, so `advance_backward` can never land on it again.
    pub fn remove_current(&mut self) -> Step {
        let Some(s) = self.live.as_mut() else {
            return Step::None;
        };
        s.groups[s.group_idx].items.remove(s.item_idx);
        if s.groups[s.group_idx].items.is_empty() {
            s.groups.remove(s.group_idx);
            s.item_idx = 0;
        } else if s.item_idx >= s.groups[s.group_idx].items.len() {
            // Removed the tail of a still-populated group: move on.
            s.group_idx += 1;
            s.item_idx = 0;
        }
        if s.group_idx >= s.groups.len() {
            self.live = None;
            return Step::Closed;
        }
        s.elapsed_ms = 0;
        Step::Current(s.current().clone())
    }

    /// Drop an item anywhere in the session, keeping the current position
    /// stable. Used when a deletion event arrives for a non-current item.
    pub fn remove_item(&mut self, item_id: &str) -> Step {
        let Some(s) = self.live.as_ref() else {
            return Step::None;
        };
        let mut found = None;
        for (g, group) in s.groups.iter().enumerate() {
            if let Some(i) = group.items.iter().position(|it| it.id == item_id) {
                found = Some((g, i));
                break;
            }
        }
        let Some((g, i)) = found else {
            return Step::None;
        };
        if g == s.group_idx && i == s.item_idx {
            return self.remove_current();
        }
        let s = self.live.as_mut().unwrap();
        s.groups[g].items.remove(i);
        if g == s.group_idx && i < s.item_idx {
            s.item_idx -= 1;
        }
        if s.groups[g].items.is_empty() {
            s.groups.remove(g);
            if g < s.group_idx {
                s.group_idx -= 1;
            }
        }
        Step::None
    }

    /// Expiry-while-displayed policy: an expired current item is treated as
    /// deleted. Loops because the slide-in replacement may be expired too.
    pub fn sweep_expired(&mut self, now: OffsetDateTime) -> Step {
        let mut last = Step::None;
        while let Some(cur) = self.current() {
            if !cur.is_expired(now) {
                break;
            }
            last = self.remove_current();
            if last == Step::Closed {
                break;
            }
        }
        last
    }
}

struct ViewerInner {
    machine: ViewerStateMachine,
    /// Item ids whose view was already recorded this session; keeps the
    /// RecordView side effect to exactly one per (item, viewer).
    recorded: HashSet<String>,
    engagement: Option<EngagementStore>,
}

/// Drives a `ViewerStateMachine` against the data service: autoplay timer,
/// view records, per-item engagement state, likes/replies/deletes.
pub struct ViewerController {
    session: Arc<Session>,
    inner: Arc<Mutex<ViewerInner>>,
    shutdown: watch::Sender<bool>,
}

impl ViewerController {
    pub fn new(session: Arc<Session>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            session,
            inner: Arc::new(Mutex::new(ViewerInner {
                machine: ViewerStateMachine::new(),
                recorded: HashSet::new(),
                engagement: None,
            })),
            shutdown,
        }
    }

    pub async fn open(&self, groups: Vec<AuthorGroup>, start_group: usize) {
        let _ = self.shutdown.send(false);
        let mut inner = self.inner.lock().await;
        let step = inner.machine.open(groups, start_group);
        handle_step(&self.session, &mut inner, step).await;
    }

    /// Spawn the auto-advance loop. Stops when the session closes or the
    /// shutdown flag flips.
    pub fn start_autoplay(&self) {
        let session = self.session.clone();
        let inner = self.inner.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(TICK_MS)) => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                let mut guard = inner.lock().await;
                if guard.machine.state() == ViewerState::Closed {
                    break;
                }
                let swept = guard.machine.sweep_expired(OffsetDateTime::now_utc());
                let step = match swept {
                    Step::None => guard.machine.tick(),
                    other => other,
                };
                let done = step == Step::Closed;
                handle_step(&session, &mut guard, step).await;
                if done {
                    break;
                }
            }
        });
    }

    pub async fn advance_forward(&self) {
        let mut inner = self.inner.lock().await;
        let step = inner.machine.advance_forward();
        handle_step(&self.session, &mut inner, step).await;
    }

    pub async fn advance_backward(&self) {
        let mut inner = self.inner.lock().await;
        let step = inner.machine.advance_backward();
        handle_step(&self.session, &mut inner, step).await;
    }

    pub async fn pause(&self) {
        self.inner.lock().await.machine.pause();
    }

    pub async fn resume(&self) {
        self.inner.lock().await.machine.resume();
    }

    /// Tear the session down. The timer is cancelled synchronously before
    /// the state goes away, so a racing tick lands on a closed machine and
    /// does nothing. In-flight fire-and-forget writes may still complete.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let mut inner = self.inner.lock().await;
        inner.machine.close();
        inner.engagement = None;
        inner.recorded.clear();
    }

    pub async fn state(&self) -> ViewerState {
        self.inner.lock().await.machine.state()
    }

    pub async fn progress_ratio(&self) -> f32 {
        self.inner.lock().await.machine.progress_ratio()
    }

    pub async fn current(&self) -> Option<ContentItem> {
        self.inner.lock().await.machine.current().cloned()
    }

    /// Like count and viewer-liked flag of the current item.
    pub async fn current_like_state(&self) -> Option<(u64, bool)> {
        let inner = self.inner.lock().await;
        inner
            .engagement
            .as_ref()
            .map(|e| (e.like_count(), e.viewer_has_liked()))
    }

    pub async fn toggle_like_current(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(engagement) = inner.engagement.as_mut() else {
            return Ok(());
        };
        engagement.toggle_like().await
    }

    /// Reply to the current story (lands in the author's story inbox).
    pub async fn send_reply(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let viewer = self.session.require_viewer()?.id.clone();
        let current = {
            let inner = self.inner.lock().await;
            inner.machine.current().cloned()
        };
        let Some(item) = current else {
            return Ok(());
        };
        let record = serde_json::json!({
            "story_id": item.id,
            "user_id": viewer,
            "content": text,
        });
        if let Err(e) = self
            .session
            .service()
            .insert(Entity::StoryComments, record)
            .await
        {
            self.session.notify(UiEvent::write_failure("send reply", &e));
            return Err(e);
        }
        Ok(())
    }

    /// Author-only delete of the current item. The remote delete is scoped to
    /// the viewer's own rows; on success the item leaves the session with the
    /// same motion as an auto-advance.
    pub async fn delete_current(&self) -> Result<()> {
        let viewer = self.session.require_viewer()?.id.clone();
        let current = {
            let inner = self.inner.lock().await;
            inner.machine.current().cloned()
        };
        let Some(item) = current else {
            return Ok(());
        };
        let filters = [
            Filter::eq("id", item.id.as_str()),
            Filter::eq("user_id", viewer.as_str()),
        ];
        match self.session.service().delete(Entity::Stories, &filters).await {
            Ok(0) => Ok(()),
            Ok(_) => {
                let mut inner = self.inner.lock().await;
                let step = inner.machine.remove_item(&item.id);
                handle_step(&self.session, &mut inner, step).await;
                Ok(())
            }
            Err(e) => {
                self.session
                    .notify(UiEvent::write_failure("delete story", &e));
                Err(e)
            }
        }
    }

    /// Route a change-feed delta into the open session: a deleted story must
    /// never be rendered again, wherever it sits.
    pub async fn apply_change(&self, ev: &ChangeEvent) {
        if ev.entity != Entity::Stories || ev.action != ChangeAction::Deleted {
            return;
        }
        let Some(id) = ev.field("id") else {
            return;
        };
        let id = id.to_string();
        let mut inner = self.inner.lock().await;
        let step = inner.machine.remove_item(&id);
        handle_step(&self.session, &mut inner, step).await;
    }
}

/// Per-item side effects when an item becomes current: one view record per
/// (item, viewer) per session, fired and forgotten, plus a fresh engagement
/// load for the likes overlay.
async fn handle_step(session: &Arc<Session>, inner: &mut ViewerInner, step: Step) {
    match step {
        Step::None => {}
        Step::Closed => {
            inner.engagement = None;
        }
        Step::Current(item) => {
            if let Some(viewer) = session.viewer_id() {
                if inner.recorded.insert(item.id.clone()) {
                    let service = session.service().clone();
                    let record = serde_json::json!({
                        "story_id": item.id,
                        "user_id": viewer,
                    });
                    tokio::spawn(async move {
                        if let Err(e) = service.insert(Entity::StoryViews, record).await {
                            warn!("view record failed: {e}");
                        }
                    });
                }
            }
            let mut engagement = EngagementStore::new(
                session.clone(),
                LikeTarget::Story(item.id.clone()),
                &item.author.user_id,
            );
            engagement.load_counts().await;
            inner.engagement = Some(engagement);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_service::DataService;
    use crate::memory::MemoryService;
    use crate::records::{MediaKind, Profile};
    use crate::session::Viewer;
    use serde_json::{json, Value};

    fn profile(id: &str) -> Profile {
        Profile {
            user_id: id.to_string(),
            handle: id.to_string(),
            display_name: id.to_uppercase(),
            avatar_url: None,
            verified: false,
            bio: None,
            location: None,
            cover_url: None,
            rewards: 0,
        }
    }

    fn item(id: &str, author: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            author: profile(author),
            media_url: format!("https://cdn/{id}.jpg"),
            media_kind: MediaKind::Image,
            caption: None,
            created_at: "2026-08-08T00:00:00Z".to_string(),
            expires_at: None,
        }
    }

    fn group(author: &str, ids: &[&str]) -> AuthorGroup {
        AuthorGroup {
            author: profile(author),
            items: ids.iter().map(|id| item(id, author)).collect(),
            has_viewed_all: false,
        }
    }

    fn two_groups() -> Vec<AuthorGroup> {
        vec![group("a", &["a1", "a2"]), group("b", &["b1"])]
    }

    #[test]
    fn three_forwards_walk_a1_a2_b1_then_close() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 0);
        assert_eq!(m.state(), ViewerState::Playing { group: 0, item: 0 });

        assert!(matches!(m.advance_forward(), Step::Current(i) if i.id == "a2"));
        assert!(matches!(m.advance_forward(), Step::Current(i) if i.id == "b1"));
        assert_eq!(m.advance_forward(), Step::Closed);
        assert_eq!(m.state(), ViewerState::Closed);
    }

    #[test]
    fn forward_never_closes_except_from_the_last_item() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 0);
        for _ in 0..2 {
            assert_ne!(m.advance_forward(), Step::Closed);
        }
        assert_eq!(m.advance_forward(), Step::Closed);
    }

    #[test]
    fn backward_at_the_very_first_item_is_a_no_op() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 0);
        for _ in 0..7 {
            m.tick();
        }
        let progress_before = m.progress_ratio();
        assert_eq!(m.advance_backward(), Step::None);
        assert_eq!(m.state(), ViewerState::Playing { group: 0, item: 0 });
        assert_eq!(m.progress_ratio(), progress_before, "state unchanged");
    }

    #[test]
    fn backward_crosses_into_the_previous_groups_last_item() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 1);
        assert_eq!(m.state(), ViewerState::Playing { group: 1, item: 0 });
        assert!(matches!(m.advance_backward(), Step::Current(i) if i.id == "a2"));
        assert_eq!(m.state(), ViewerState::Playing { group: 0, item: 1 });
    }

    #[test]
    fn open_close_open_reproduces_the_start_state() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 1);
        for _ in 0..20 {
            m.tick();
        }
        m.close();
        assert_eq!(m.state(), ViewerState::Closed);
        m.open(two_groups(), 1);
        assert_eq!(m.state(), ViewerState::Playing { group: 1, item: 0 });
        assert_eq!(m.progress_ratio(), 0.0);
    }

    #[test]
    fn a_full_exposure_budget_of_ticks_advances() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 0);
        let ticks_per_item = (ITEM_DURATION_MS / TICK_MS) as usize;
        for _ in 0..ticks_per_item - 1 {
            assert_eq!(m.tick(), Step::None);
        }
        assert!(m.progress_ratio() < 1.0);
        assert!(matches!(m.tick(), Step::Current(i) if i.id == "a2"));
        assert_eq!(m.progress_ratio(), 0.0, "progress resets on transition");
    }

    #[test]
    fn pause_freezes_progress_without_moving() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 0);
        for _ in 0..5 {
            m.tick();
        }
        let frozen = m.progress_ratio();
        m.pause();
        assert_eq!(m.state(), ViewerState::Paused { group: 0, item: 0 });
        for _ in 0..1000 {
            assert_eq!(m.tick(), Step::None);
        }
        assert_eq!(m.progress_ratio(), frozen);
        m.resume();
        m.tick();
        assert!(m.progress_ratio() > frozen);
    }

    #[test]
    fn ticks_after_close_are_no_ops() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 0);
        m.close();
        assert_eq!(m.tick(), Step::None);
        assert_eq!(m.state(), ViewerState::Closed);
    }

    #[test]
    fn open_at_a_bad_index_stays_closed() {
        let mut m = ViewerStateMachine::new();
        assert_eq!(m.open(two_groups(), 9), Step::None);
        assert_eq!(m.state(), ViewerState::Closed);
        assert_eq!(m.open(Vec::new(), 0), Step::None);
    }

    #[test]
    fn removing_the_current_item_moves_like_an_advance() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 0);
        assert!(matches!(m.remove_current(), Step::Current(i) if i.id == "a2"));
        // The removed item is gone for good: backward is now a no-op.
        assert_eq!(m.advance_backward(), Step::None);
        assert_eq!(m.state(), ViewerState::Playing { group: 0, item: 0 });
    }

    #[test]
    fn removing_the_last_item_overall_closes() {
        let mut m = ViewerStateMachine::new();
        m.open(vec![group("a", &["a1"])], 0);
        assert_eq!(m.remove_current(), Step::Closed);
        assert_eq!(m.state(), ViewerState::Closed);
    }

    #[test]
    fn removing_the_tail_of_a_group_moves_to_the_next_group() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 0);
        m.advance_forward(); // a2
        assert!(matches!(m.remove_current(), Step::Current(i) if i.id == "b1"));
        assert_eq!(m.state(), ViewerState::Playing { group: 1, item: 0 });
    }

    #[test]
    fn removing_a_non_current_item_keeps_the_position_stable() {
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 0);
        m.advance_forward(); // now at a2
        assert_eq!(m.remove_item("a1"), Step::None);
        let cur = m.current().unwrap().id.clone();
        assert_eq!(cur, "a2");
        assert_eq!(m.state(), ViewerState::Playing { group: 0, item: 0 });

        // Removing an entire earlier group shifts the group index.
        let mut m = ViewerStateMachine::new();
        m.open(two_groups(), 1);
        assert_eq!(m.remove_item("a1"), Step::None);
        assert_eq!(m.remove_item("a2"), Step::None);
        assert_eq!(m.current().unwrap().id, "b1");
        assert_eq!(m.state(), ViewerState::Playing { group: 0, item: 0 });
    }

    #[test]
    fn an_expired_current_item_is_swept_like_a_deletion() {
        let mut groups = two_groups();
        groups[0].items[0].expires_at = Some("2026-08-08T10:00:00Z".to_string());
        let mut m = ViewerStateMachine::new();
        m.open(groups, 0);
        let now = crate::records::parse_timestamp("2026-08-08T11:00:00Z").unwrap();
        assert!(matches!(m.sweep_expired(now), Step::Current(i) if i.id == "a2"));
        // Nothing else is expired: sweep is a no-op now.
        assert_eq!(m.sweep_expired(now), Step::None);
    }

    fn viewer_session(viewer: &str) -> (Arc<MemoryService>, Arc<Session>) {
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

    async fn settle() {
        // Let fire-and-forget view inserts land.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn views_are_recorded_once_per_item_per_session() {
        let (svc, session) = viewer_session("fan");
        let controller = ViewerController::new(session);
        controller.open(two_groups(), 0).await;
        controller.advance_forward().await; // a2
        controller.advance_backward().await; // back to a1, already recorded
        controller.advance_forward().await; // a2 again, already recorded
        settle().await;

        let a1_views = svc
            .count(Entity::StoryViews, &[Filter::eq("story_id", "a1")])
            .await
            .unwrap();
        let a2_views = svc
            .count(Entity::StoryViews, &[Filter::eq("story_id", "a2")])
            .await
            .unwrap();
        assert_eq!(a1_views, 1);
        assert_eq!(a2_views, 1);
    }

    #[tokio::test]
    async fn open_loads_engagement_for_the_first_item() {
        let (svc, session) = viewer_session("fan");
        svc.seed(
            Entity::StoryLikes,
            json!({ "story_id": "a1", "user_id": "someone" }),
        );
        let controller = ViewerController::new(session);
        controller.open(two_groups(), 0).await;
        assert_eq!(controller.current_like_state().await, Some((1, false)));

        controller.toggle_like_current().await.expect("like");
        assert_eq!(controller.current_like_state().await, Some((2, true)));
    }

    #[tokio::test]
    async fn deleting_the_current_story_advances_and_removes_the_row() {
        let (svc, session) = viewer_session("a");
        svc.seed(Entity::Stories, json!({ "id": "a1", "user_id": "a" }));
        let controller = ViewerController::new(session);
        controller.open(two_groups(), 0).await;
        controller.delete_current().await.expect("delete own story");

        assert_eq!(controller.current().await.unwrap().id, "a2");
        assert_eq!(svc.count(Entity::Stories, &[]).await.unwrap(), 0);
        // The deleted item cannot be revisited.
        controller.advance_backward().await;
        assert_eq!(controller.current().await.unwrap().id, "a2");
    }

    #[tokio::test]
    async fn a_foreign_delete_event_drops_the_item_from_the_session() {
        let (_svc, session) = viewer_session("fan");
        let controller = ViewerController::new(session);
        controller.open(two_groups(), 0).await;
        controller
            .apply_change(&ChangeEvent::new(
                ChangeAction::Deleted,
                Entity::Stories,
                json!({ "id": "a2" }),
            ))
            .await;
        controller.advance_forward().await;
        assert_eq!(controller.current().await.unwrap().id, "b1");
    }

    #[tokio::test]
    async fn close_discards_the_session_and_later_motion_is_inert() {
        let (_svc, session) = viewer_session("fan");
        let controller = ViewerController::new(session);
        controller.open(two_groups(), 1).await;
        controller.close().await;
        assert_eq!(controller.state().await, ViewerState::Closed);
        controller.advance_forward().await;
        assert_eq!(controller.state().await, ViewerState::Closed);

        // Reopening starts clean at the requested group.
        controller.open(two_groups(), 1).await;
        assert_eq!(
            controller.state().await,
            ViewerState::Playing { group: 1, item: 0 }
        );
        assert_eq!(controller.progress_ratio().await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_advances_after_a_full_item_budget() {
        let (_svc, session) = viewer_session("fan");
        let controller = ViewerController::new(session);
        controller.open(two_groups(), 0).await;
        controller.start_autoplay();

        tokio::time::sleep(Duration::from_millis(ITEM_DURATION_MS + 5 * TICK_MS)).await;
        assert_eq!(controller.current().await.unwrap().id, "a2");

        // Closing cancels the timer; time passing changes nothing.
        controller.close().await;
        tokio::time::sleep(Duration::from_millis(2 * ITEM_DURATION_MS)).await;
        assert_eq!(controller.state().await, ViewerState::Closed);
    }

    #[tokio::test]
    async fn replies_land_in_story_comments() {
        let (svc, session) = viewer_session("fan");
        let controller = ViewerController::new(session);
        controller.open(two_groups(), 0).await;
        controller.send_reply("  nice one  ").await.expect("reply");
        let rows = svc
            .select(Entity::StoryComments, &[], None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["content"], "nice one");
        assert_eq!(rows[0]["story_id"], "a1");
    }
}
