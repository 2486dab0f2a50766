/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Explicit session context: the data service handle, the resolved viewer
//! identity and the UI notice channel, passed into every controller. Nothing
//! in the crate consults a global singleton, so tests run with injected fake
//! identities.

use chillz_protocol::AuthUser;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::data_service::DataService;
use crate::error::{Result, ServiceError};
use crate::memory::MemoryService;
use crate::realtime::{start_change_feed, RealtimeConfig};
use crate::rest::{RestConfig, RestService};
use crate::ui_events::UiEvent;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClientConfig {
    /// "memory" (default) or "rest".
    pub backend: Option<String>,
    pub rest: Option<RestConfig>,
    pub realtime: Option<RealtimeConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: Some("memory".to_string()),
            rest: None,
            realtime: None,
        }
    }
}

/// Build the configured data service. The REST backend gets its change feed
/// worker wired up here; the worker stops when `shutdown` flips true.
pub fn build_data_service(
    cfg: &ClientConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<Arc<dyn DataService>> {
    let backend = cfg
        .backend
        .clone()
        .unwrap_or_else(|| "memory".to_string())
        .to_lowercase();
    match backend.as_str() {
        "memory" => Ok(Arc::new(MemoryService::new())),
        "rest" => {
            let rest_cfg = cfg.rest.clone().ok_or_else(|| {
                ServiceError::read(anyhow::anyhow!("backend=rest requires a [rest] section"))
            })?;
            let service = RestService::new(rest_cfg);
            if let Some(rt) = cfg.realtime.clone() {
                start_change_feed(rt, service.change_sender(), shutdown);
            }
            Ok(Arc::new(service))
        }
        other => Err(ServiceError::read(anyhow::anyhow!(
            "unsupported backend: {other}"
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct Viewer {
    pub id: String,
    pub metadata: Value,
}

impl From<AuthUser> for Viewer {
    fn from(user: AuthUser) -> Self {
        Self {
            id: user.id,
            metadata: user.metadata,
        }
    }
}

pub struct Session {
    service: Arc<dyn DataService>,
    viewer: Option<Viewer>,
    ui_events: broadcast::Sender<UiEvent>,
}

impl Session {
    /// Resolve the platform identity once and pin it for the session.
    pub async fn establish(service: Arc<dyn DataService>) -> Result<Self> {
        let viewer = service.current_user().await?.map(Viewer::from);
        Ok(Self::with_viewer(service, viewer))
    }

    pub fn with_viewer(service: Arc<dyn DataService>, viewer: Option<Viewer>) -> Self {
        let (ui_events, _) = broadcast::channel(64);
        Self {
            service,
            viewer,
            ui_events,
        }
    }

    pub fn service(&self) -> &Arc<dyn DataService> {
        &self.service
    }

    pub fn viewer(&self) -> Option<&Viewer> {
        self.viewer.as_ref()
    }

    pub fn viewer_id(&self) -> Option<&str> {
        self.viewer.as_ref().map(|v| v.id.as_str())
    }

    /// Gate for mutating actions: short-circuits with a sign-in prompt when
    /// nobody is signed in.
    pub fn require_viewer(&self) -> Result<&Viewer> {
        match self.viewer.as_ref() {
            Some(v) => Ok(v),
            None => {
                self.notify(UiEvent::sign_in_prompt());
                Err(ServiceError::AuthRequired)
            }
        }
    }

    pub fn ui_events(&self) -> broadcast::Receiver<UiEvent> {
        self.ui_events.subscribe()
    }

    pub(crate) fn notify(&self, event: UiEvent) {
        let _ = self.ui_events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_session(viewer: Option<&str>) -> Session {
        let svc = Arc::new(MemoryService::new());
        Session::with_viewer(
            svc,
            viewer.map(|id| Viewer {
                id: id.to_string(),
                metadata: Value::Null,
            }),
        )
    }

    #[tokio::test]
    async fn establish_picks_up_signed_in_user() {
        let svc = Arc::new(MemoryService::new());
        svc.sign_in("u1");
        let session = Session::establish(svc).await.expect("establish");
        assert_eq!(session.viewer_id(), Some("u1"));
    }

    #[tokio::test]
    async fn require_viewer_prompts_and_short_circuits() {
        let session = memory_session(None);
        let mut events = session.ui_events();
        assert!(matches!(
            session.require_viewer(),
            Err(ServiceError::AuthRequired)
        ));
        assert_eq!(events.try_recv().expect("prompt").kind, "auth_required");
    }
}
