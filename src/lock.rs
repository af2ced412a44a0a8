//! Distributed advisory lock
//!
//! Adapted from `distributed_circuit_breaker.rs`'s compare-and-swap-plus-lease
//! pattern (cached local state, store round trip on miss), but aimed at
//! mutual exclusion over a workflow id instead of failure counting. Backed
//! by the same Redis connection as the snapshot cache: `SET key token NX PX
//! lease_ms` to acquire, and a conditional `GET`-then-`DEL` (so a lock
//! holder never releases a lease it no longer owns) to release.

use std::time::Duration;

use redis::AsyncCommands;
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Advisory lock over a single Redis key. Not a substitute for a real
/// consensus system: acquisition does not guarantee the holder retains
/// exclusivity past lease expiry, so callers that span more than one lease
/// duration must re-acquire or accept the race.
///
/// Keyed on a caller-chosen name rather than a workflow id: callers that
/// need per-kind single-execution (e.g. only one `kb_sync` workflow running
/// at a time) pass the same name across every composition of that kind, so
/// two concurrent triggers collide on the same Redis key.
pub struct DistributedLock {
    conn: redis::aio::ConnectionManager,
}

/// A held lock. Dropping this without calling [`LockGuard::release`] is
/// safe — the lease simply expires — but doesn't release it early.
pub struct LockGuard {
    key: String,
    token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock already held: {0}")]
    AlreadyHeld(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl DistributedLock {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    fn key_for(name: &str) -> String {
        format!("lock:{name}")
    }

    /// Attempt to acquire the lock named `name`, held for `lease`. Returns
    /// `Err(LockError::AlreadyHeld)` if another holder has it.
    pub async fn acquire(&self, name: &str, lease: Duration) -> Result<LockGuard, LockError> {
        let key = Self::key_for(name);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let acquired: bool = conn
            .set_options(
                &key,
                &token,
                redis::SetOptions::default()
                    .with_expiration(redis::SetExpiry::PX(lease.as_millis() as usize))
                    .conditional_set(redis::ExistenceCheck::NX),
            )
            .await?;

        if acquired {
            Ok(LockGuard { key, token })
        } else {
            Err(LockError::AlreadyHeld(key))
        }
    }

    /// Release a previously-acquired guard. A no-op (returns `Ok(false)`)
    /// if the lease already expired or was stolen by another holder.
    pub async fn release(&self, guard: LockGuard) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(RELEASE_SCRIPT);
        let released: i32 = script
            .key(&guard.key)
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }
}
