//! Domain events
use serde::Serialize;
use uuid::Uuid;

use crate::domain::value_objects::CartOwner;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    Created { cart_id: Uuid, owner: CartOwner },
    ItemAdded { cart_id: Uuid, item_id: Uuid, product_id: Uuid, variant_id: Uuid, quantity: u32 },
    ItemRemoved { cart_id: Uuid, item_id: Uuid },
    Cleared { cart_id: Uuid, items_removed: usize },
    Synced { cart_id: Uuid, lines_applied: usize, lines_skipped: usize },
    Expired { cart_id: Uuid },
}

impl CartEvent {
    /// Subject suffix used when the event is published.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::ItemAdded { .. } => "item_added",
            Self::ItemRemoved { .. } => "item_removed",
            Self::Cleared { .. } => "cleared",
            Self::Synced { .. } => "synced",
            Self::Expired { .. } => "expired",
        }
    }
}
