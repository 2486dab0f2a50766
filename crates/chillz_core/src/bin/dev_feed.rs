/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Debug client: wires the core against a backend and walks the main
//! surfaces. With the default in-memory backend it seeds demo content, so
//! the story viewer and feed can be exercised without a hosted project.

use chillz_core::data_service::DataService;
use chillz_core::feed::FeedController;
use chillz_core::memory::MemoryService;
use chillz_core::session::{build_data_service, ClientConfig, Session};
use chillz_core::story_groups::StoryRail;
use chillz_core::viewer::{ViewerController, ViewerState};
use chillz_protocol::Entity;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let cfg: ClientConfig = match std::env::var("CHILLZ_CONFIG") {
        Ok(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        Err(_) => ClientConfig::default(),
    };
    let memory_backed = cfg
        .backend
        .as_deref()
        .map(|b| b.eq_ignore_ascii_case("memory"))
        .unwrap_or(true);
    let service: Arc<dyn DataService> = if memory_backed {
        let memory = Arc::new(MemoryService::new());
        seed_demo_data(&memory);
        memory
    } else {
        build_data_service(&cfg, shutdown_rx)?
    };

    let session = Arc::new(Session::establish(service).await?);
    info!(viewer = ?session.viewer_id(), "session established");

    let rail = StoryRail::new(session.clone());
    let groups = rail.load().await;
    info!("story rail: {} author group(s)", groups.len());
    for g in &groups {
        info!(
            "  @{} — {} item(s), viewed_all={}",
            g.author.handle,
            g.items.len(),
            g.has_viewed_all
        );
    }

    if !groups.is_empty() {
        let viewer = ViewerController::new(session.clone());
        viewer.open(groups, 0).await;
        while viewer.state().await != ViewerState::Closed {
            let item = viewer.current().await.expect("open session has an item");
            let likes = viewer.current_like_state().await.unwrap_or((0, false));
            info!(
                "viewing {} by @{} ({} like(s))",
                item.id, item.author.handle, likes.0
            );
            viewer.advance_forward().await;
        }
        info!("viewer walked every story and closed");
    }

    let feed = FeedController::new(session.clone());
    for fp in feed.load_posts(10).await {
        let by = fp
            .author
            .map(|a| format!("@{}", a.handle))
            .unwrap_or_else(|| "unknown".to_string());
        info!("feed: [{}] {} — {}", fp.post.id, by, fp.post.caption);
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

/// A couple of profiles, stories and posts for the in-memory backend.
fn seed_demo_data(memory: &MemoryService) {
    memory.sign_in("demo");
    for (id, handle, name) in [
        ("demo", "demo", "Demo User"),
        ("ava", "ava", "Ava"),
        ("noah", "noah", "Noah"),
    ] {
        memory.seed(
            Entity::Profiles,
            json!({ "user_id": id, "handle": handle, "display_name": name }),
        );
    }
    for (id, user, at) in [
        ("s1", "ava", "2026-08-08T09:00:00Z"),
        ("s2", "ava", "2026-08-08T08:00:00Z"),
        ("s3", "noah", "2026-08-08T07:00:00Z"),
    ] {
        memory.seed(
            Entity::Stories,
            json!({
                "id": id,
                "user_id": user,
                "content_url": format!("memory://posts/{user}/{id}.jpg"),
                "content_type": "image",
                "created_at": at,
                "expires_at": "2100-01-01T00:00:00Z",
            }),
        );
    }
    memory.seed(
        Entity::Posts,
        json!({
            "id": "p1",
            "user_id": "noah",
            "content_type": "text",
            "caption": "first!",
            "is_spark": false,
            "created_at": "2026-08-08T06:00:00Z",
        }),
    );
}
