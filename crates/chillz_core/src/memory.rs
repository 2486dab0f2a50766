/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-process data service: the offline/dev backend and the fixture for every
//! test. Implements the same filter semantics as the hosted backend and
//! broadcasts a change event for every mutation, so controllers cannot tell
//! the difference.

use async_trait::async_trait;
use chillz_protocol::{AuthUser, ChangeAction, ChangeEvent, Entity, Filter, Order};
use rand::{rngs::OsRng, RngCore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::data_service::{compare, row_matches, DataService};
use crate::error::{Result, ServiceError};
use crate::records::now_rfc3339;

pub struct MemoryService {
    tables: Mutex<HashMap<Entity, Vec<Value>>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    user: Mutex<Option<AuthUser>>,
    changes: broadcast::Sender<ChangeEvent>,
    offline: AtomicBool,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            tables: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            user: Mutex::new(None),
            changes,
            offline: AtomicBool::new(false),
        }
    }

    /// Fix the identity the service reports. Tests inject fake viewers here.
    pub fn sign_in(&self, id: &str) {
        let mut g = self.user.lock().unwrap();
        *g = Some(AuthUser {
            id: id.to_string(),
            metadata: Value::Null,
        });
    }

    pub fn sign_out(&self) {
        let mut g = self.user.lock().unwrap();
        *g = None;
    }

    /// Simulate losing the backend: every read and write fails until flipped
    /// back. Lets tests exercise fail-soft reads and optimistic rollback.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::Relaxed);
    }

    /// Seed a row verbatim, without defaults or a change event.
    pub fn seed(&self, entity: Entity, row: Value) {
        let mut tables = self.tables.lock().unwrap();
        tables.entry(entity).or_default().push(row);
    }

    pub fn stored_object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects.get(&format!("{bucket}/{path}")).cloned()
    }

    fn check_read(&self) -> Result<()> {
        if self.offline.load(AtomicOrdering::Relaxed) {
            return Err(ServiceError::read(anyhow::anyhow!("backend unreachable")));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.offline.load(AtomicOrdering::Relaxed) {
            return Err(ServiceError::write(anyhow::anyhow!("backend unreachable")));
        }
        Ok(())
    }

    fn publish(&self, action: ChangeAction, entity: Entity, record: Value) {
        let _ = self.changes.send(ChangeEvent::new(action, entity, record));
    }
}

#[async_trait]
impl DataService for MemoryService {
    async fn select(
        &self,
        entity: Entity,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>> {
        self.check_read()?;
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<Value> = tables
            .get(&entity)
            .map(|t| {
                t.iter()
                    .filter(|row| row_matches(filters, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ord = match (a.get(&order.column), b.get(&order.column)) {
                    (Some(av), Some(bv)) => {
                        compare(Some(av), bv).unwrap_or(std::cmp::Ordering::Equal)
                    }
                    _ => std::cmp::Ordering::Equal,
                };
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn count(&self, entity: Entity, filters: &[Filter]) -> Result<u64> {
        self.check_read()?;
        let tables = self.tables.lock().unwrap();
        let n = tables
            .get(&entity)
            .map(|t| t.iter().filter(|row| row_matches(filters, row)).count())
            .unwrap_or(0);
        Ok(n as u64)
    }

    async fn insert(&self, entity: Entity, record: Value) -> Result<Value> {
        self.check_write()?;
        let mut row = record;
        let obj = row
            .as_object_mut()
            .ok_or_else(|| ServiceError::write(anyhow::anyhow!("record must be an object")))?;
        // The managed database fills these; mirror its defaults.
        if !obj.contains_key("id") {
            obj.insert("id".to_string(), Value::String(new_row_id()));
        }
        if !obj.contains_key("created_at") {
            obj.insert("created_at".to_string(), Value::String(now_rfc3339()));
        }
        {
            let mut tables = self.tables.lock().unwrap();
            tables.entry(entity).or_default().push(row.clone());
        }
        self.publish(ChangeAction::Inserted, entity, row.clone());
        Ok(row)
    }

    async fn update(&self, entity: Entity, filters: &[Filter], patch: Value) -> Result<u64> {
        self.check_write()?;
        let patch_obj = patch
            .as_object()
            .ok_or_else(|| ServiceError::write(anyhow::anyhow!("patch must be an object")))?;
        let mut touched = Vec::new();
        {
            let mut tables = self.tables.lock().unwrap();
            if let Some(table) = tables.get_mut(&entity) {
                for row in table.iter_mut() {
                    if !row_matches(filters, row) {
                        continue;
                    }
                    if let Some(obj) = row.as_object_mut() {
                        for (k, v) in patch_obj {
                            obj.insert(k.clone(), v.clone());
                        }
                    }
                    touched.push(row.clone());
                }
            }
        }
        for row in &touched {
            self.publish(ChangeAction::Updated, entity, row.clone());
        }
        Ok(touched.len() as u64)
    }

    async fn delete(&self, entity: Entity, filters: &[Filter]) -> Result<u64> {
        self.check_write()?;
        let mut removed = Vec::new();
        {
            let mut tables = self.tables.lock().unwrap();
            if let Some(table) = tables.get_mut(&entity) {
                table.retain(|row| {
                    if row_matches(filters, row) {
                        removed.push(row.clone());
                        false
                    } else {
                        true
                    }
                });
            }
        }
        for row in &removed {
            self.publish(ChangeAction::Deleted, entity, row.clone());
        }
        Ok(removed.len() as u64)
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        _content_type: Option<&str>,
    ) -> Result<()> {
        self.check_write()?;
        let mut objects = self.objects.lock().unwrap();
        objects.insert(format!("{bucket}/{path}"), bytes.to_vec());
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        self.check_read()?;
        Ok(self.user.lock().unwrap().clone())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

fn new_row_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    b.iter().map(|v| format!("{v:02x}")).collect()
}
