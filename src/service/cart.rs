//! Cart Service
//!
//! Orchestrates get-or-create and single-item mutations. Every mutating
//! operation runs its whole read-modify-write cycle under the owner's lock
//! and persists exactly once.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::cart::{Cart, CartItem, NewLine, DEFAULT_GST_RATE};
use crate::domain::events::CartEvent;
use crate::domain::value_objects::{CartOwner, Money, Quantity};
use crate::service::gateway::CustomizationGateway;
use crate::service::locks::CartLockRegistry;
use crate::store::{CartStore, InsertOutcome};
use crate::{CartError, Result};

#[derive(Clone, Debug)]
pub struct CartConfig {
    pub currency: String,
    pub gst_rate: Decimal,
    pub ttl_days: i64,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self { currency: "USD".to_string(), gst_rate: DEFAULT_GST_RATE, ttl_days: 30 }
    }
}

impl CartConfig {
    pub fn ttl(&self) -> Duration { Duration::days(self.ttl_days) }
}

#[derive(Clone, Debug)]
pub struct AddItemCommand {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub customization: Option<ItemCustomization>,
}

/// Reference to an already-persisted customization accompanying a new line.
#[derive(Clone, Debug)]
pub struct ItemCustomization {
    pub id: Uuid,
    pub price: Decimal,
    pub preview_url: Option<String>,
}

pub struct CartService {
    pub(crate) store: Arc<dyn CartStore>,
    pub(crate) locks: Arc<CartLockRegistry>,
    pub(crate) customizations: Arc<dyn CustomizationGateway>,
    pub(crate) events: Option<async_nats::Client>,
    pub(crate) config: CartConfig,
}

impl CartService {
    pub fn new(
        store: Arc<dyn CartStore>,
        locks: Arc<CartLockRegistry>,
        customizations: Arc<dyn CustomizationGateway>,
        events: Option<async_nats::Client>,
        config: CartConfig,
    ) -> Self {
        Self { store, locks, customizations, events, config }
    }

    /// Returns the owner's active cart, creating an empty one if none exists.
    pub async fn get_or_create(&self, owner: &CartOwner) -> Result<CartSnapshot> {
        let _guard = self.locks.acquire(owner).await;
        let cart = self.load_or_create(owner).await?;
        Ok(CartSnapshot::from(&cart))
    }

    pub async fn add_item(&self, owner: &CartOwner, cmd: AddItemCommand) -> Result<CartSnapshot> {
        let line = self.line_from_command(cmd)?;
        let _guard = self.locks.acquire(owner).await;
        let mut cart = self.load_or_create(owner).await?;
        cart.add_line(line)?;
        cart.refresh_expiry(self.config.ttl());
        self.persist(&mut cart).await?;
        Ok(CartSnapshot::from(&cart))
    }

    pub async fn remove_item(&self, owner: &CartOwner, item_id: Uuid) -> Result<CartSnapshot> {
        let _guard = self.locks.acquire(owner).await;
        let mut cart = self.require_active(owner).await?;
        let cleanup_target = {
            let item = cart.item(item_id)
                .ok_or_else(|| CartError::NotFound { entity: "cart item", id: item_id.to_string() })?;
            match (item.customization_id, item.customization_preview.as_deref()) {
                (Some(id), Some(preview)) if !preview.is_empty() => Some(id),
                _ => None,
            }
        };
        if let Some(customization_id) = cleanup_target {
            self.cleanup_best_effort(customization_id).await;
        }
        cart.remove_line(item_id)?;
        cart.refresh_expiry(self.config.ttl());
        self.persist(&mut cart).await?;
        Ok(CartSnapshot::from(&cart))
    }

    pub async fn clear_cart(&self, owner: &CartOwner) -> Result<CartSnapshot> {
        let _guard = self.locks.acquire(owner).await;
        let mut cart = self.require_active(owner).await?;
        let cleanup_targets: Vec<Uuid> = cart.items().iter().filter_map(|i| i.customization_id).collect();
        for customization_id in cleanup_targets {
            self.cleanup_best_effort(customization_id).await;
        }
        cart.clear()?;
        cart.refresh_expiry(self.config.ttl());
        self.persist(&mut cart).await?;
        Ok(CartSnapshot::from(&cart))
    }

    /// Retires the owner's cart once its expiry has passed. The background
    /// sweep goes through here so expiry takes the same lock as every other
    /// mutation instead of racing get-or-create at the storage layer.
    pub async fn expire_cart(&self, owner: &CartOwner) -> Result<bool> {
        let _guard = self.locks.acquire(owner).await;
        let Some(mut cart) = self.store.find_active_by_owner(owner).await? else {
            return Ok(false);
        };
        if !cart.is_expired() {
            return Ok(false);
        }
        cart.deactivate()?;
        self.persist(&mut cart).await?;
        tracing::info!(%owner, cart_id = %cart.id(), "expired cart retired");
        Ok(true)
    }

    // Caller must hold the owner's lock.
    pub(crate) async fn load_or_create(&self, owner: &CartOwner) -> Result<Cart> {
        if let Some(cart) = self.store.find_active_by_owner(owner).await? {
            return Ok(cart);
        }
        let mut cart = Cart::open(owner.clone(), &self.config.currency, self.config.gst_rate, self.config.ttl());
        match self.store.insert(&cart).await? {
            InsertOutcome::Inserted => {
                self.publish(cart.take_events()).await;
                Ok(cart)
            }
            // Another instance won the race between our read and our insert;
            // the winner's cart is the cart.
            InsertOutcome::DuplicateOwner => {
                tracing::debug!(%owner, "lost cart create race, re-reading winner");
                self.store.find_active_by_owner(owner).await?.ok_or_else(|| {
                    CartError::Storage("active cart missing after duplicate-owner insert".into())
                })
            }
        }
    }

    pub(crate) async fn persist(&self, cart: &mut Cart) -> Result<()> {
        self.store.save(cart).await?;
        self.publish(cart.take_events()).await;
        Ok(())
    }

    pub(crate) async fn publish(&self, events: Vec<CartEvent>) {
        let Some(client) = &self.events else { return };
        for event in events {
            let subject = format!("ecommerce.cart.{}", event.kind());
            match serde_json::to_vec(&event) {
                Ok(payload) => {
                    if let Err(e) = client.publish(subject, payload.into()).await {
                        tracing::warn!(error = %e, "cart event publish failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "cart event serialization failed"),
            }
        }
    }

    pub(crate) async fn cleanup_best_effort(&self, customization_id: Uuid) {
        if let Err(e) = self.customizations.cleanup_asset(customization_id).await {
            tracing::warn!(%customization_id, error = %e, "customization cleanup failed, continuing");
        }
    }

    async fn require_active(&self, owner: &CartOwner) -> Result<Cart> {
        self.store.find_active_by_owner(owner).await?
            .ok_or_else(|| CartError::NotFound { entity: "cart", id: owner.to_string() })
    }

    fn line_from_command(&self, cmd: AddItemCommand) -> Result<NewLine> {
        if cmd.product_id.is_nil() || cmd.variant_id.is_nil() {
            return Err(CartError::Validation { reason: "product and variant identifiers are required".into() });
        }
        let quantity = Quantity::try_new(cmd.quantity)
            .map_err(|e| CartError::Validation { reason: e.to_string() })?;
        if cmd.unit_price < Decimal::ZERO {
            return Err(CartError::Validation { reason: "unit price cannot be negative".into() });
        }
        let (customization_id, customization_preview, customization_price) = match cmd.customization {
            Some(c) => {
                if c.price < Decimal::ZERO {
                    return Err(CartError::Validation { reason: "customization price cannot be negative".into() });
                }
                (Some(c.id), c.preview_url, c.price)
            }
            None => (None, None, Decimal::ZERO),
        };
        Ok(NewLine {
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            customization_id,
            customization_preview,
            quantity,
            unit_price: Money::new(cmd.unit_price, &self.config.currency),
            customization_price: Money::new(customization_price, &self.config.currency),
        })
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Read model handed to the request layer; mirrors the aggregate's state.
#[derive(Clone, Debug, Serialize)]
pub struct CartSnapshot {
    pub id: Uuid,
    pub owner: CartOwner,
    pub items: Vec<CartItemSnapshot>,
    pub subtotal: Money,
    pub discount_amount: Money,
    pub tax_amount: Money,
    pub shipping_cost: Money,
    pub total: Money,
    pub gst_rate: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartItemSnapshot {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub customization_id: Option<Uuid>,
    pub customization_preview: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub customization_price: Money,
    pub item_total: Money,
}

impl From<&CartItem> for CartItemSnapshot {
    fn from(item: &CartItem) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            variant_id: item.variant_id,
            customization_id: item.customization_id,
            customization_preview: item.customization_preview.clone(),
            quantity: item.quantity.get(),
            unit_price: item.unit_price.clone(),
            customization_price: item.customization_price.clone(),
            item_total: item.item_total.clone(),
        }
    }
}

impl From<&Cart> for CartSnapshot {
    fn from(cart: &Cart) -> Self {
        Self {
            id: cart.id(),
            owner: cart.owner().clone(),
            items: cart.items().iter().map(CartItemSnapshot::from).collect(),
            subtotal: cart.subtotal().clone(),
            discount_amount: cart.discount_amount().clone(),
            tax_amount: cart.tax_amount().clone(),
            shipping_cost: cart.shipping_cost().clone(),
            total: cart.total().clone(),
            gst_rate: cart.gst_rate(),
            is_active: cart.is_active(),
            created_at: cart.created_at(),
            updated_at: cart.updated_at(),
            expires_at: cart.expires_at(),
        }
    }
}
