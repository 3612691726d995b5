//! Per-user turn serialization.
//!
//! Turns for the same user run one at a time; turns for different users
//! never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::foundation::UserId;

/// Held for the lifetime of one turn.
///
/// Owned so it can move into a spawned commit task.
pub type UserTurnGuard = OwnedMutexGuard<()>;

/// Registry of one async mutex per active user.
#[derive(Debug, Default)]
pub struct UserTurnLocks {
    locks: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl UserTurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other turn for `user_id` is running.
    pub async fn acquire(&self, user_id: &UserId) -> UserTurnGuard {
        let lock = {
            let mut locks = self.registry();
            // Entries only the registry references are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(user_id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of users with a running or waiting turn, as of the last acquire.
    pub fn tracked_users(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<UserId, Arc<AsyncMutex<()>>>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
