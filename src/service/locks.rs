//! Per-owner mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::value_objects::CartOwner;

/// One lock per cart owner, created lazily. Two callers presenting the same
/// owner are strictly serialized; different owners proceed independently.
///
/// The entry API makes the get-or-insert a single atomic step on the map, so
/// two first-time callers for the same owner always end up on the same mutex.
///
/// TODO: entries are never evicted, so heavy anonymous-session churn grows
/// this map without bound. Needs a TTL keyed off cart expiry before the
/// guest-traffic rollout.
#[derive(Default)]
pub struct CartLockRegistry {
    locks: DashMap<CartOwner, Arc<Mutex<()>>>,
}

impl CartLockRegistry {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Blocks until the owner's lock is held. The guard must be held across
    /// the entire read-modify-write cycle of any mutating cart operation.
    pub async fn acquire(&self, owner: &CartOwner) -> OwnedMutexGuard<()> {
        let lock = self.locks
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize { self.locks.len() }
    pub fn is_empty(&self) -> bool { self.locks.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn owner(token: &str) -> CartOwner { CartOwner::Session(token.into()) }

    #[tokio::test]
    async fn test_same_owner_is_serialized() {
        let registry = Arc::new(CartLockRegistry::new());
        let trace = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for task in 0..4 {
            let registry = registry.clone();
            let trace = trace.clone();
            handles.push(tokio::spawn(async move {
                let _guard = registry.acquire(&owner("sess-1")).await;
                trace.lock().unwrap().push((task, "enter"));
                tokio::time::sleep(Duration::from_millis(5)).await;
                trace.lock().unwrap().push((task, "exit"));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // Critical sections never interleave: every enter is immediately
        // followed by the same task's exit.
        let trace = trace.lock().unwrap();
        assert_eq!(trace.len(), 8);
        for pair in trace.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert_eq!(pair[0].1, "enter");
            assert_eq!(pair[1].1, "exit");
        }
    }

    #[tokio::test]
    async fn test_different_owners_run_in_parallel() {
        let registry = CartLockRegistry::new();
        let _held = registry.acquire(&owner("a")).await;
        let other = tokio::time::timeout(Duration::from_millis(100), registry.acquire(&owner("b"))).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_same_owner_blocks_until_release() {
        let registry = Arc::new(CartLockRegistry::new());
        let held = registry.acquire(&owner("a")).await;
        let blocked = tokio::time::timeout(Duration::from_millis(20), registry.acquire(&owner("a"))).await;
        assert!(blocked.is_err());
        drop(held);
        let acquired = tokio::time::timeout(Duration::from_millis(100), registry.acquire(&owner("a"))).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_locks_are_created_lazily() {
        let registry = CartLockRegistry::new();
        assert!(registry.is_empty());
        let _a = registry.acquire(&owner("a")).await;
        let _b = registry.acquire(&owner("b")).await;
        assert_eq!(registry.len(), 2);
    }
}
