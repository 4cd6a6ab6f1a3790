//! Advisory run lock.
//!
//! One `keel` process at a time may run against a state. A lock older than
//! [`LOCK_EXPIRY_SECS`] is treated as abandoned and can be taken over.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds after which a lock lapses.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// A held run lock, as persisted next to the state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Token the holder presents to release the lock.
    pub lock_id: String,
    /// Process or operator holding the lock.
    pub holder: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
    /// When the lock lapses.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Takes a lock for `holder`, or for this process when `holder` is empty.
    #[must_use]
    pub fn acquire(holder: &str) -> Self {
        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let acquired_at = Utc::now();

        Self {
            lock_id: Uuid::new_v4().simple().to_string(),
            holder,
            acquired_at,
            expires_at: acquired_at + TimeDelta::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// True once the lock has lapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Time left before the lock lapses; zero once expired.
    #[must_use]
    pub fn remaining(&self) -> TimeDelta {
        (self.expires_at - Utc::now()).max(TimeDelta::zero())
    }
}

/// Identifies this process as `<host>-<pid>-<suffix>`.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| String::from("unknown"));
    let suffix = Uuid::new_v4().simple().to_string();

    format!("{host}-{}-{}", std::process::id(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_named_holder() {
        let lock = LockInfo::acquire("ci");
        assert_eq!(lock.holder, "ci");
        assert!(!lock.is_expired());
        assert!(lock.remaining() > TimeDelta::zero());
        assert_eq!(lock.expires_at - lock.acquired_at, TimeDelta::seconds(LOCK_EXPIRY_SECS));
    }

    #[test]
    fn test_acquire_defaults_to_process_holder() {
        let pid = std::process::id().to_string();
        let lock = LockInfo::acquire("");
        assert!(lock.holder.contains(&pid));
        assert_ne!(generate_holder_id(), generate_holder_id());
    }

    #[test]
    fn test_lapsed_lock() {
        let mut lock = LockInfo::acquire("ci");
        lock.expires_at = lock.acquired_at - TimeDelta::seconds(1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining(), TimeDelta::zero());
    }
}
