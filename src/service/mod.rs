//! Cart orchestration: identity resolution, per-owner locking, the cart
//! service, and the bulk sync coordinator.

pub mod cart;
pub mod gateway;
pub mod identity;
pub mod locks;
pub mod sync;

pub use cart::{AddItemCommand, CartConfig, CartService, CartSnapshot, ItemCustomization};
pub use gateway::{CustomizationGateway, InlineCustomization, ResolvedCustomization};
pub use locks::CartLockRegistry;
pub use sync::{BulkSyncCoordinator, PendingLine};
