/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Realtime change feed: a background worker that keeps a websocket to the
//! hosted backend, subscribes to the tables we render, and turns row payloads
//! into tagged `ChangeEvent`s on the service's broadcast sender. Consumers
//! apply the deltas in place; a lagged receiver reloads and the server wins.

use chillz_protocol::{ChangeAction, ChangeEvent, Entity};
use futures_util::{SinkExt, StreamExt};
use rand::{thread_rng, Rng};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite;
use tracing::{info, warn};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RealtimeConfig {
    pub ws_url: String,
    pub api_key: String,
    /// Tables to watch. Defaults to everything the UI renders live.
    pub tables: Option<Vec<String>>,
}

impl RealtimeConfig {
    fn watched_tables(&self) -> Vec<String> {
        self.tables.clone().unwrap_or_else(|| {
            ["posts", "stories", "likes", "comments", "notifications"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }
}

/// Wire shape of one change notification from the feed.
#[derive(Debug, serde::Deserialize)]
struct WireChange {
    table: String,
    #[serde(rename = "type")]
    kind: String,
    record: Option<Value>,
    old_record: Option<Value>,
}

pub fn start_change_feed(
    cfg: RealtimeConfig,
    sender: broadcast::Sender<ChangeEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut backoff = Duration::from_secs(1);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match run_feed(&cfg, &sender, &mut shutdown).await {
                Ok(()) => break,
                Err(e) => warn!("change feed dropped: {e:#}"),
            }
            let jitter = Duration::from_millis(thread_rng().gen_range(0..=500));
            tokio::select! {
                _ = tokio::time::sleep(backoff + jitter) => {}
                _ = shutdown.changed() => {}
            }
            backoff = backoff.saturating_mul(2).min(Duration::from_secs(60));
        }
    });
}

async fn run_feed(
    cfg: &RealtimeConfig,
    sender: &broadcast::Sender<ChangeEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let token = urlencoding::encode(&cfg.api_key);
    let url = format!(
        "{}/realtime/v1/changes?apikey={token}",
        cfg.ws_url.trim_end_matches('/')
    );
    info!("connecting change feed");
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    for table in cfg.watched_tables() {
        let join = serde_json::json!({ "action": "subscribe", "table": table });
        ws_tx
            .send(tungstenite::Message::Text(join.to_string()))
            .await?;
    }

    let mut ping = tokio::time::interval(Duration::from_secs(25));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            _ = ping.tick() => {
                ws_tx.send(tungstenite::Message::Ping(Vec::new())).await?;
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else {
                    anyhow::bail!("feed closed by server");
                };
                let text = match msg? {
                    tungstenite::Message::Text(t) => t,
                    tungstenite::Message::Ping(p) => {
                        let _ = ws_tx.send(tungstenite::Message::Pong(p)).await;
                        continue;
                    }
                    tungstenite::Message::Close(_) => anyhow::bail!("feed closed by server"),
                    _ => continue,
                };
                let wire: WireChange = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("bad change payload: {e}");
                        continue;
                    }
                };
                if let Some(ev) = decode_change(wire) {
                    // Nobody listening is fine; receivers come and go with views.
                    let _ = sender.send(ev);
                }
            }
        }
    }
}

fn decode_change(wire: WireChange) -> Option<ChangeEvent> {
    let entity = Entity::from_table_name(&wire.table)?;
    let (action, record) = match wire.kind.as_str() {
        "INSERT" => (ChangeAction::Inserted, wire.record?),
        "UPDATE" => (ChangeAction::Updated, wire.record?),
        "DELETE" => (ChangeAction::Deleted, wire.old_record?),
        other => {
            warn!("unknown change type {other:?}");
            return None;
        }
    };
    Some(ChangeEvent::new(action, entity, record))
}
