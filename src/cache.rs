//! Workflow snapshot cache
//!
//! Grounded on `original_source/backend/services/workflow_cache.py`'s
//! `WorkflowCache`: a Redis-backed read-through cache of workflow state
//! snapshots for fast dashboard queries, separate from the authoritative
//! Postgres state store. Same key pattern (`workflow:state:{workflow_id}`),
//! same default TTL (3600s, see [`crate::config::EngineConfig::cache_ttl`]),
//! and the same pattern-based bulk invalidation used by the KB sync workflow.

use std::time::Duration;

use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to (de)serialize cached snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read-through cache of workflow state snapshots.
pub struct SnapshotCache {
    conn: redis::aio::ConnectionManager,
    default_ttl: Duration,
}

impl SnapshotCache {
    pub fn new(conn: redis::aio::ConnectionManager, default_ttl: Duration) -> Self {
        Self { conn, default_ttl }
    }

    fn key_for(workflow_id: Uuid) -> String {
        format!("workflow:state:{workflow_id}")
    }

    /// Fetch the cached snapshot, if present and still parseable.
    pub async fn get<T: DeserializeOwned>(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<T>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key_for(workflow_id)).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    /// Write a snapshot with `ttl`, or the cache's default TTL if `None`.
    pub async fn set<T: Serialize>(
        &self,
        workflow_id: Uuid,
        snapshot: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(snapshot)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        conn.set_ex(Self::key_for(workflow_id), payload, ttl.as_secs())
            .await?;
        Ok(())
    }

    /// Remove a single workflow's cached snapshot.
    pub async fn delete(&self, workflow_id: Uuid) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(Self::key_for(workflow_id)).await?;
        Ok(deleted > 0)
    }

    /// Invalidate every key matching the given glob patterns (e.g.
    /// `"runbook:*"`), used by the KB sync workflow after a bulk re-embed.
    pub async fn invalidate_patterns(&self, patterns: &[String]) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let mut deleted = 0u64;
        for pattern in patterns {
            let keys: Vec<String> = conn.keys(pattern).await?;
            if !keys.is_empty() {
                deleted += conn.del::<_, i64>(&keys).await? as u64;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_matches_python_pattern() {
        let id = Uuid::nil();
        assert_eq!(
            SnapshotCache::key_for(id),
            "workflow:state:00000000-0000-0000-0000-000000000000"
        );
    }
}
