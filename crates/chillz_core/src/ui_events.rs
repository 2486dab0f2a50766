/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;

use crate::error::ServiceError;

fn now_ms_u64() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Transient user-visible notice pushed to the embedding shell over a
/// broadcast channel: failed writes, sign-in prompts. Never load-bearing;
/// dropping events when nobody listens is fine.
#[derive(Clone, Debug, Serialize)]
pub struct UiEvent {
    pub kind: String,
    pub ts_ms: u64,
    pub title: Option<String>,
    pub detail: Option<String>,
}

impl UiEvent {
    pub fn new(kind: &str, title: Option<String>, detail: Option<String>) -> Self {
        Self {
            kind: kind.to_string(),
            ts_ms: now_ms_u64(),
            title,
            detail,
        }
    }

    pub fn write_failure(what: &str, err: &ServiceError) -> Self {
        Self::new(
            "write_failure",
            Some(format!("Could not {what}")),
            Some(err.to_string()),
        )
    }

    pub fn sign_in_prompt() -> Self {
        Self::new(
            "auth_required",
            Some("Sign in".to_string()),
            Some("Please sign in to continue".to_string()),
        )
    }
}
