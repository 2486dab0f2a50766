/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use rand::{thread_rng, Rng};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Send a request, retrying transient failures (connection errors, 429s and
/// 5xx) with doubling backoff and a little jitter. Non-retryable statuses are
/// returned to the caller to classify.
pub async fn send_with_retry<F>(mut build: F, attempts: u32) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let max_attempts = attempts.clamp(1, 5);
    let mut backoff = Duration::from_millis(200);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let last = attempt >= max_attempts;
        match build().send().await {
            Ok(resp) if retryable(resp.status()) && !last => {}
            Ok(resp) => return Ok(resp),
            Err(e) if last => return Err(e.into()),
            Err(_) => {}
        }
        let jitter = Duration::from_millis(thread_rng().gen_range(0..=200));
        tokio::time::sleep(backoff + jitter).await;
        backoff = backoff.saturating_mul(2).min(Duration::from_secs(5));
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
