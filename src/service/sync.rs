//! Bulk Sync Coordinator
//!
//! Folds a batch of pending guest lines into the authenticated owner's cart
//! as one atomic unit: one lock acquisition, one recalculation, one persist.
//! No observer on the same owner can see a partially-merged cart.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::aggregates::cart::NewLine;
use crate::domain::events::CartEvent;
use crate::domain::value_objects::{CartOwner, Money, Quantity};
use crate::service::cart::{CartService, CartSnapshot};
use crate::service::gateway::InlineCustomization;
use crate::{CartError, Result};

/// A line captured before login, waiting to be merged into the owner's cart.
#[derive(Clone, Debug, Deserialize)]
pub struct PendingLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub customization: Option<InlineCustomization>,
}

struct ValidatedLine {
    product_id: Uuid,
    variant_id: Uuid,
    quantity: Quantity,
    unit_price: Money,
    customization: Option<InlineCustomization>,
}

pub struct BulkSyncCoordinator {
    service: Arc<CartService>,
}

impl BulkSyncCoordinator {
    pub fn new(service: Arc<CartService>) -> Self {
        Self { service }
    }

    /// Merges the pending lines into the owner's cart. Customization payloads
    /// are resolved to persisted references line by line; a line whose
    /// resolution fails is skipped and the rest of the batch still lands.
    pub async fn sync_pending_lines(&self, owner: &CartOwner, lines: Vec<PendingLine>) -> Result<CartSnapshot> {
        // Reject the whole batch up front so a bad line can never leave the
        // cart half-merged.
        let mut validated = Vec::with_capacity(lines.len());
        for line in lines {
            validated.push(self.validate(line)?);
        }

        let _guard = self.service.locks.acquire(owner).await;
        let mut cart = self.service.load_or_create(owner).await?;

        let mut merged = Vec::with_capacity(validated.len());
        let mut skipped = 0usize;
        for line in validated {
            let (customization_id, customization_preview, customization_price) = match &line.customization {
                Some(payload) => {
                    match self.service.customizations.resolve_or_create(owner, payload).await {
                        Ok(resolved) => (
                            Some(resolved.id),
                            resolved.preview_url,
                            Money::new(payload.price, &self.service.config.currency),
                        ),
                        Err(e) => {
                            tracing::warn!(
                                product_id = %line.product_id,
                                variant_id = %line.variant_id,
                                error = %e,
                                "customization resolution failed, pending line skipped"
                            );
                            skipped += 1;
                            continue;
                        }
                    }
                }
                None => (None, None, Money::zero(&self.service.config.currency)),
            };
            merged.push(NewLine {
                product_id: line.product_id,
                variant_id: line.variant_id,
                customization_id,
                customization_preview,
                quantity: line.quantity,
                unit_price: line.unit_price,
                customization_price,
            });
        }

        let applied = cart.merge_pending(merged)?;
        cart.raise_event(CartEvent::Synced {
            cart_id: cart.id(),
            lines_applied: applied,
            lines_skipped: skipped,
        });
        cart.refresh_expiry(self.service.config.ttl());
        self.service.persist(&mut cart).await?;
        Ok(CartSnapshot::from(&cart))
    }

    fn validate(&self, line: PendingLine) -> Result<ValidatedLine> {
        if line.product_id.is_nil() || line.variant_id.is_nil() {
            return Err(CartError::Validation { reason: "product and variant identifiers are required".into() });
        }
        let quantity = Quantity::try_new(line.quantity)
            .map_err(|e| CartError::Validation { reason: e.to_string() })?;
        if line.unit_price < Decimal::ZERO {
            return Err(CartError::Validation { reason: "unit price cannot be negative".into() });
        }
        if line.customization.as_ref().is_some_and(|c| c.price < Decimal::ZERO) {
            return Err(CartError::Validation { reason: "customization price cannot be negative".into() });
        }
        Ok(ValidatedLine {
            product_id: line.product_id,
            variant_id: line.variant_id,
            quantity,
            unit_price: Money::new(line.unit_price, &self.service.config.currency),
            customization: line.customization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::cart::{AddItemCommand, CartConfig};
    use crate::service::gateway::CustomizationGatewayStub;
    use crate::service::locks::CartLockRegistry;
    use crate::store::MemoryCartStore;

    fn setup() -> (BulkSyncCoordinator, Arc<CartService>, Arc<MemoryCartStore>, Arc<CustomizationGatewayStub>) {
        let store = Arc::new(MemoryCartStore::new());
        let gateway = Arc::new(CustomizationGatewayStub::new());
        let service = Arc::new(CartService::new(
            store.clone(),
            Arc::new(CartLockRegistry::new()),
            gateway.clone(),
            None,
            CartConfig::default(),
        ));
        (BulkSyncCoordinator::new(service.clone()), service, store, gateway)
    }

    fn pending(product: Uuid, variant: Uuid, quantity: i64, unit_price: Decimal) -> PendingLine {
        PendingLine { product_id: product, variant_id: variant, quantity, unit_price, customization: None }
    }

    fn inline_customization(preview: &str) -> InlineCustomization {
        InlineCustomization {
            design: serde_json::json!({ "text": "CUSTOM" }),
            preview_url: Some(preview.into()),
            price: Decimal::new(15, 0),
        }
    }

    #[tokio::test]
    async fn test_batch_lands_in_a_single_persist() {
        let (coordinator, _, store, _) = setup();
        let owner = CartOwner::User(Uuid::now_v7());
        let lines = vec![
            pending(Uuid::now_v7(), Uuid::now_v7(), 2, Decimal::new(100, 0)),
            pending(Uuid::now_v7(), Uuid::now_v7(), 1, Decimal::new(40, 0)),
            pending(Uuid::now_v7(), Uuid::now_v7(), 3, Decimal::new(10, 0)),
        ];

        let snapshot = coordinator.sync_pending_lines(&owner, lines).await.unwrap();
        assert_eq!(snapshot.items.len(), 3);
        assert_eq!(snapshot.subtotal.amount(), Decimal::new(270, 0));
        assert_eq!(store.inserts(), 1);
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn test_lines_sharing_product_and_variant_merge() {
        let (coordinator, _, store, _) = setup();
        let owner = CartOwner::User(Uuid::now_v7());
        let (p, v) = (Uuid::now_v7(), Uuid::now_v7());
        let lines = vec![
            pending(p, v, 2, Decimal::new(100, 0)),
            pending(p, v, 1, Decimal::new(100, 0)),
        ];

        let snapshot = coordinator.sync_pending_lines(&owner, lines).await.unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].quantity, 3);
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn test_sync_merges_into_existing_cart() {
        let (coordinator, service, store, _) = setup();
        let owner = CartOwner::User(Uuid::now_v7());
        let (p, v) = (Uuid::now_v7(), Uuid::now_v7());
        service.add_item(&owner, AddItemCommand {
            product_id: p, variant_id: v, quantity: 1,
            unit_price: Decimal::new(100, 0), customization: None,
        }).await.unwrap();

        let snapshot = coordinator
            .sync_pending_lines(&owner, vec![pending(p, v, 2, Decimal::new(100, 0))])
            .await
            .unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].quantity, 3);
        assert_eq!(store.saves(), 2);
    }

    #[tokio::test]
    async fn test_inline_customization_is_resolved_before_merge() {
        let (coordinator, _, _, gateway) = setup();
        let owner = CartOwner::User(Uuid::now_v7());
        let mut line = pending(Uuid::now_v7(), Uuid::now_v7(), 1, Decimal::new(100, 0));
        line.customization = Some(inline_customization("https://cdn.opensase.dev/previews/sync.png"));

        let snapshot = coordinator.sync_pending_lines(&owner, vec![line]).await.unwrap();
        assert_eq!(gateway.resolve_calls(), 1);
        assert!(snapshot.items[0].customization_id.is_some());
        assert_eq!(snapshot.items[0].customization_preview.as_deref(), Some("https://cdn.opensase.dev/previews/sync.png"));
        // 100 + 15 customization charge
        assert_eq!(snapshot.subtotal.amount(), Decimal::new(115, 0));
    }

    #[tokio::test]
    async fn test_resolution_failure_skips_only_that_line() {
        let (coordinator, _, store, gateway) = setup();
        let owner = CartOwner::User(Uuid::now_v7());
        gateway.fail_resolve.store(true, std::sync::atomic::Ordering::SeqCst);

        let mut customized = pending(Uuid::now_v7(), Uuid::now_v7(), 1, Decimal::new(100, 0));
        customized.customization = Some(inline_customization("https://cdn.opensase.dev/previews/bad.png"));
        let plain = pending(Uuid::now_v7(), Uuid::now_v7(), 2, Decimal::new(50, 0));

        let snapshot = coordinator.sync_pending_lines(&owner, vec![customized, plain]).await.unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.subtotal.amount(), Decimal::new(100, 0));
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn test_invalid_line_fails_whole_batch_before_any_write() {
        let (coordinator, _, store, _) = setup();
        let owner = CartOwner::User(Uuid::now_v7());
        let lines = vec![
            pending(Uuid::now_v7(), Uuid::now_v7(), 2, Decimal::new(100, 0)),
            pending(Uuid::now_v7(), Uuid::now_v7(), 0, Decimal::new(40, 0)),
        ];

        let err = coordinator.sync_pending_lines(&owner, lines).await.unwrap_err();
        assert!(matches!(err, CartError::Validation { .. }));
        assert_eq!(store.inserts(), 0);
        assert_eq!(store.saves(), 0);
    }
}
