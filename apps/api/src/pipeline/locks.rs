use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per conversation. Turns on the same conversation run one
/// after another; different conversations never wait on each other.
#[derive(Default)]
pub struct TurnLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl TurnLocks {
    /// Waits until no other turn holds `conversation_id`. The turn owns the
    /// conversation until the guard is dropped.
    pub async fn acquire(&self, conversation_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Only the map holds idle locks
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(conversation_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
