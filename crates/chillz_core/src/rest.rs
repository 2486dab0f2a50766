/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Hosted-backend implementation of the data service: a PostgREST-style row
//! API plus object storage and the identity endpoint, all under one base URL.
//! Change events are produced by the realtime worker (see `realtime`), which
//! publishes into this service's broadcast sender.

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chillz_protocol::{AuthUser, ChangeEvent, Entity, Filter, Order};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::data_service::DataService;
use crate::error::{Result, ServiceError};
use crate::net::send_with_retry;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    /// Bearer token of the signed-in user; anonymous when absent.
    pub access_token: Option<String>,
}

pub struct RestService {
    cfg: RestConfig,
    http: reqwest::Client,
    changes: broadcast::Sender<ChangeEvent>,
}

impl RestService {
    pub fn new(cfg: RestConfig) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            cfg,
            http: reqwest::Client::new(),
            changes,
        }
    }

    /// Sender the realtime worker publishes decoded change events into.
    pub fn change_sender(&self) -> broadcast::Sender<ChangeEvent> {
        self.changes.clone()
    }

    fn base(&self) -> &str {
        self.cfg.base_url.trim_end_matches('/')
    }

    fn table_url(&self, entity: Entity) -> String {
        format!("{}/rest/v1/{}", self.base(), entity.table_name())
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self
            .cfg
            .access_token
            .as_deref()
            .unwrap_or(self.cfg.api_key.as_str());
        req.header("apikey", &self.cfg.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    async fn send_read(&self, req: reqwest::RequestBuilder) -> AnyResult<reqwest::Response> {
        let resp = send_with_retry(|| req.try_clone().expect("clonable request"), 3).await?;
        expect_success(resp).await
    }
}

#[async_trait]
impl DataService for RestService {
    async fn select(
        &self,
        entity: Entity,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>> {
        let mut params = filter_params(filters);
        if let Some(order) = order {
            let dir = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{dir}", order.column)));
        }
        if let Some(limit) = limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        let req = self.authed(self.http.get(self.table_url(entity)).query(&params));
        let resp = self
            .send_read(req)
            .await
            .with_context(|| format!("select {}", entity.table_name()))
            .map_err(ServiceError::read)?;
        let rows = resp
            .json::<Vec<Value>>()
            .await
            .context("decode rows")
            .map_err(ServiceError::read)?;
        Ok(rows)
    }

    async fn count(&self, entity: Entity, filters: &[Filter]) -> Result<u64> {
        let params = filter_params(filters);
        let req = self
            .authed(self.http.head(self.table_url(entity)).query(&params))
            .header("Prefer", "count=exact");
        let resp = self
            .send_read(req)
            .await
            .with_context(|| format!("count {}", entity.table_name()))
            .map_err(ServiceError::read)?;
        let range = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        parse_content_range_total(range)
            .with_context(|| format!("bad content-range {range:?}"))
            .map_err(ServiceError::read)
    }

    async fn insert(&self, entity: Entity, record: Value) -> Result<Value> {
        let req = self
            .authed(self.http.post(self.table_url(entity)).json(&record))
            .header("Prefer", "return=representation");
        let resp = send_with_retry(|| req.try_clone().expect("clonable request"), 3)
            .await
            .map_err(ServiceError::write)?;
        let resp = expect_success(resp)
            .await
            .with_context(|| format!("insert {}", entity.table_name()))
            .map_err(ServiceError::write)?;
        let mut rows = resp
            .json::<Vec<Value>>()
            .await
            .context("decode inserted row")
            .map_err(ServiceError::write)?;
        rows.pop()
            .ok_or_else(|| ServiceError::write(anyhow::anyhow!("insert returned no row")))
    }

    async fn update(&self, entity: Entity, filters: &[Filter], patch: Value) -> Result<u64> {
        let params = filter_params(filters);
        let req = self
            .authed(
                self.http
                    .patch(self.table_url(entity))
                    .query(&params)
                    .json(&patch),
            )
            .header("Prefer", "return=representation");
        let resp = send_with_retry(|| req.try_clone().expect("clonable request"), 3)
            .await
            .map_err(ServiceError::write)?;
        let resp = expect_success(resp)
            .await
            .with_context(|| format!("update {}", entity.table_name()))
            .map_err(ServiceError::write)?;
        let rows = resp
            .json::<Vec<Value>>()
            .await
            .context("decode updated rows")
            .map_err(ServiceError::write)?;
        Ok(rows.len() as u64)
    }

    async fn delete(&self, entity: Entity, filters: &[Filter]) -> Result<u64> {
        let params = filter_params(filters);
        let req = self
            .authed(self.http.delete(self.table_url(entity)).query(&params))
            .header("Prefer", "return=representation");
        let resp = send_with_retry(|| req.try_clone().expect("clonable request"), 3)
            .await
            .map_err(ServiceError::write)?;
        let resp = expect_success(resp)
            .await
            .with_context(|| format!("delete {}", entity.table_name()))
            .map_err(ServiceError::write)?;
        let rows = resp
            .json::<Vec<Value>>()
            .await
            .context("decode deleted rows")
            .map_err(ServiceError::write)?;
        Ok(rows.len() as u64)
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/storage/v1/object/{bucket}/{path}", self.base());
        let media_type = content_type
            .map(|s| s.to_string())
            .or_else(|| {
                mime_guess::from_path(path)
                    .first()
                    .map(|m| m.to_string())
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let req = self
            .authed(self.http.post(&url).body(bytes.to_vec()))
            .header("Content-Type", media_type);
        let resp = send_with_retry(|| req.try_clone().expect("clonable request"), 3)
            .await
            .map_err(ServiceError::write)?;
        expect_success(resp)
            .await
            .with_context(|| format!("upload {bucket}/{path}"))
            .map_err(ServiceError::write)?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base())
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        let Some(token) = self.cfg.access_token.as_deref() else {
            return Ok(None);
        };
        let url = format!("{}/auth/v1/user", self.base());
        let req = self
            .http
            .get(&url)
            .header("apikey", &self.cfg.api_key)
            .header("Authorization", format!("Bearer {token}"));
        let resp = send_with_retry(|| req.try_clone().expect("clonable request"), 3)
            .await
            .map_err(ServiceError::read)?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let resp = expect_success(resp)
            .await
            .context("identity endpoint")
            .map_err(ServiceError::read)?;
        let user = resp
            .json::<WireUser>()
            .await
            .context("decode identity")
            .map_err(ServiceError::read)?;
        Ok(Some(AuthUser {
            id: user.id,
            metadata: user.user_metadata,
        }))
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[derive(Debug, serde::Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    user_metadata: Value,
}

async fn expect_success(resp: reqwest::Response) -> AnyResult<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("{status}: {text}");
    }
    Ok(resp)
}

/// `content-range: 0-24/3573` (or `*/0` when empty) — total after the slash.
fn parse_content_range_total(range: &str) -> AnyResult<u64> {
    let total = range
        .rsplit('/')
        .next()
        .context("missing total")?
        .trim();
    Ok(total.parse::<u64>()?)
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| match f {
            Filter::Eq(c, v) => (c.clone(), format!("eq.{}", scalar(v))),
            Filter::In(c, vals) => {
                let joined = vals.iter().map(scalar).collect::<Vec<_>>().join(",");
                (c.clone(), format!("in.({joined})"))
            }
            Filter::IsNull(c) => (c.clone(), "is.null".to_string()),
            Filter::NotNull(c) => (c.clone(), "not.is.null".to_string()),
            Filter::Gt(c, v) => (c.clone(), format!("gt.{}", scalar(v))),
            Filter::Lt(c, v) => (c.clone(), format!("lt.{}", scalar(v))),
            Filter::Ilike(c, pat) => (c.clone(), format!("ilike.{}", pat.replace('%', "*"))),
        })
        .collect()
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
