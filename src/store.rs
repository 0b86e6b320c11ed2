//! Persisted app data: arbitrary JSON records tagged by `dataType`, scoped
//! to (appId, userId).
//!
//! The engine's contract with the persistence collaborator is deliberately
//! small: append a JSON blob, read most-recent-first up to a limit, delete by
//! id. Records are never updated in place by generated code paths, so no
//! locking discipline beyond the store's own is required.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::RunScope;

/// One persisted app-data record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: String,
    pub data_type: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// Persistence collaborator for app data.
///
/// Implementations own the actual storage; the engine only appends, reads
/// most-recent-first and deletes by id, always scoped to
/// (appId, userId, dataType).
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Append one record. Returns the stored record with its assigned id.
    async fn store(
        &self,
        scope: &RunScope,
        data_type: &str,
        data: Value,
    ) -> anyhow::Result<StoredRecord>;

    /// Most-recent-first records for `data_type`. `limit` of `None` means
    /// unbounded (still practically limited by the store).
    async fn query(
        &self,
        scope: &RunScope,
        data_type: &str,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<StoredRecord>>;

    /// Delete one record by id. Returns whether a record was removed.
    async fn delete(&self, scope: &RunScope, data_type: &str, id: &str) -> anyhow::Result<bool>;
}

type StoreKey = (String, String, String);

/// In-memory [`DataStore`] used by tests, dry runs and the demo binary.
#[derive(Default)]
pub struct MemoryDataStore {
    records: RwLock<HashMap<StoreKey, Vec<StoredRecord>>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(scope: &RunScope, data_type: &str) -> StoreKey {
        (
            scope.app_id.clone(),
            scope.user_id.clone(),
            data_type.to_string(),
        )
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn store(
        &self,
        scope: &RunScope,
        data_type: &str,
        data: Value,
    ) -> anyhow::Result<StoredRecord> {
        let record = StoredRecord {
            id: Uuid::new_v4().to_string(),
            data_type: data_type.to_string(),
            data,
            created_at: Utc::now(),
        };
        let mut records = self.records.write().await;
        records
            .entry(Self::key(scope, data_type))
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn query(
        &self,
        scope: &RunScope,
        data_type: &str,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<StoredRecord>> {
        let records = self.records.read().await;
        let rows = records
            .get(&Self::key(scope, data_type))
            .map(|rows| {
                // Appended in order, so newest is last.
                rows.iter()
                    .rev()
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn delete(&self, scope: &RunScope, data_type: &str, id: &str) -> anyhow::Result<bool> {
        let mut records = self.records.write().await;
        if let Some(rows) = records.get_mut(&Self::key(scope, data_type)) {
            let before = rows.len();
            rows.retain(|r| r.id != id);
            return Ok(rows.len() < before);
        }
        Ok(false)
    }
}
