//! Cart persistence adapters.

use async_trait::async_trait;

use crate::domain::aggregates::cart::Cart;
use crate::domain::value_objects::CartOwner;
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryCartStore;
pub use postgres::PgCartStore;

/// Outcome of inserting a fresh cart. A second concurrent insert for the same
/// owner is an expected result under multi-instance load, not an error; the
/// service recovers from it by re-reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateOwner,
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Loads the owner's single active cart, items included.
    async fn find_active_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>>;

    /// Inserts a new cart. Backing storage must enforce uniqueness on
    /// (owner, active) so the losing side of a create race is told apart
    /// from a plain storage failure.
    async fn insert(&self, cart: &Cart) -> Result<InsertOutcome>;

    /// Rewrites the cart and its items as one unit.
    async fn save(&self, cart: &Cart) -> Result<()>;
}
