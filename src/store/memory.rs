//! In-memory cart store.
//!
//! Mirrors the Postgres adapter's contract, including the duplicate-owner
//! outcome: the single mutex over the map makes `insert` check-and-write
//! atomic. Service tests lean on the call counters to assert persist-once
//! behavior, and on `miss_next_find` to force the create-race recovery path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::aggregates::cart::Cart;
use crate::domain::value_objects::CartOwner;
use crate::store::{CartStore, InsertOutcome};
use crate::{CartError, Result};

#[derive(Default)]
pub struct MemoryCartStore {
    carts: Mutex<HashMap<Uuid, Cart>>,
    inserts: AtomicUsize,
    saves: AtomicUsize,
    finds: AtomicUsize,
    duplicate_conflicts: AtomicUsize,
    miss_next_find: AtomicBool,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inserts(&self) -> usize { self.inserts.load(Ordering::SeqCst) }
    pub fn saves(&self) -> usize { self.saves.load(Ordering::SeqCst) }
    pub fn finds(&self) -> usize { self.finds.load(Ordering::SeqCst) }
    pub fn duplicate_conflicts(&self) -> usize { self.duplicate_conflicts.load(Ordering::SeqCst) }

    /// Makes the next `find_active_by_owner` report no cart, simulating the
    /// read-then-insert window another process can win.
    pub fn miss_next_find(&self) {
        self.miss_next_find.store(true, Ordering::SeqCst);
    }

    pub fn active_count(&self, owner: &CartOwner) -> usize {
        self.carts.lock().unwrap().values()
            .filter(|c| c.owner() == owner && c.is_active())
            .count()
    }

    pub fn get(&self, cart_id: Uuid) -> Option<Cart> {
        self.carts.lock().unwrap().get(&cart_id).cloned()
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn find_active_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        if self.miss_next_find.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.carts.lock().unwrap().values()
            .find(|c| c.owner() == owner && c.is_active())
            .cloned())
    }

    async fn insert(&self, cart: &Cart) -> Result<InsertOutcome> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let mut carts = self.carts.lock().unwrap();
        if cart.is_active() && carts.values().any(|c| c.owner() == cart.owner() && c.is_active()) {
            self.duplicate_conflicts.fetch_add(1, Ordering::SeqCst);
            return Ok(InsertOutcome::DuplicateOwner);
        }
        carts.insert(cart.id(), cart.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut carts = self.carts.lock().unwrap();
        if !carts.contains_key(&cart.id()) {
            return Err(CartError::Storage(format!("cart {} missing on save", cart.id())));
        }
        carts.insert(cart.id(), cart.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::DEFAULT_GST_RATE;
    use chrono::Duration;

    fn cart(owner: &CartOwner) -> Cart {
        Cart::open(owner.clone(), "USD", DEFAULT_GST_RATE, Duration::days(30))
    }

    #[tokio::test]
    async fn test_second_active_insert_reports_duplicate_owner() {
        let store = MemoryCartStore::new();
        let owner = CartOwner::Session("sess-1".into());
        assert_eq!(store.insert(&cart(&owner)).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&cart(&owner)).await.unwrap(), InsertOutcome::DuplicateOwner);
        assert_eq!(store.active_count(&owner), 1);
    }

    #[tokio::test]
    async fn test_retired_cart_frees_the_owner_slot() {
        let store = MemoryCartStore::new();
        let owner = CartOwner::Session("sess-2".into());
        let mut first = cart(&owner);
        store.insert(&first).await.unwrap();
        first.deactivate().unwrap();
        store.save(&first).await.unwrap();
        assert_eq!(store.insert(&cart(&owner)).await.unwrap(), InsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_save_requires_existing_row() {
        let store = MemoryCartStore::new();
        let owner = CartOwner::Session("sess-3".into());
        let err = store.save(&cart(&owner)).await.unwrap_err();
        assert!(matches!(err, CartError::Storage(_)));
    }

    #[tokio::test]
    async fn test_find_round_trips_items() {
        let store = MemoryCartStore::new();
        let owner = CartOwner::Session("sess-4".into());
        let cart = cart(&owner);
        store.insert(&cart).await.unwrap();
        let loaded = store.find_active_by_owner(&owner).await.unwrap().unwrap();
        assert_eq!(loaded.id(), cart.id());
        assert!(store.find_active_by_owner(&CartOwner::Session("other".into())).await.unwrap().is_none());
    }
}
