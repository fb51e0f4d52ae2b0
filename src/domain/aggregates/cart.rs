//! Cart Aggregate

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::domain::events::CartEvent;
use crate::domain::value_objects::{CartOwner, Money, Quantity};
use crate::{CartError, Result};

/// Tax rate applied when no explicit rate is configured.
pub const DEFAULT_GST_RATE: Decimal = Decimal::from_parts(18, 0, 0, false, 2);

#[derive(Clone, Debug)]
pub struct Cart {
    id: Uuid,
    owner: CartOwner,
    items: Vec<CartItem>,
    subtotal: Money,
    discount_amount: Money,
    tax_amount: Money,
    shipping_cost: Money,
    total: Money,
    gst_rate: Decimal,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    events: Vec<CartEvent>,
}

#[derive(Clone, Debug)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub customization_id: Option<Uuid>,
    pub customization_preview: Option<String>,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub customization_price: Money,
    pub item_total: Money,
}

impl CartItem {
    fn recompute_total(&mut self) {
        let unit = self.unit_price.amount() + self.customization_price.amount();
        self.item_total = Money::new(unit * Decimal::from(self.quantity.get()), self.unit_price.currency());
    }
}

/// An incoming line, already validated at the service boundary.
#[derive(Clone, Debug)]
pub struct NewLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub customization_id: Option<Uuid>,
    pub customization_preview: Option<String>,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub customization_price: Money,
}

/// Persisted cart fields, used by stores to rebuild the aggregate.
#[derive(Clone, Debug)]
pub struct CartState {
    pub id: Uuid,
    pub owner: CartOwner,
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

impl Cart {
    pub fn open(owner: CartOwner, currency: &str, gst_rate: Decimal, ttl: Duration) -> Self {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut cart = Self {
            id, owner: owner.clone(), items: vec![],
            subtotal: Money::zero(currency), discount_amount: Money::zero(currency),
            tax_amount: Money::zero(currency), shipping_cost: Money::zero(currency),
            total: Money::zero(currency), gst_rate, is_active: true,
            created_at: now, updated_at: now, expires_at: now + ttl, events: vec![],
        };
        cart.raise_event(CartEvent::Created { cart_id: id, owner });
        cart
    }

    pub fn rehydrate(state: CartState, items: Vec<CartItem>) -> Self {
        Self {
            id: state.id, owner: state.owner, items,
            subtotal: state.subtotal, discount_amount: state.discount_amount,
            tax_amount: state.tax_amount, shipping_cost: state.shipping_cost,
            total: state.total, gst_rate: state.gst_rate, is_active: state.is_active,
            created_at: state.created_at, updated_at: state.updated_at,
            expires_at: state.expires_at, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn owner(&self) -> &CartOwner { &self.owner }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item(&self, item_id: Uuid) -> Option<&CartItem> { self.items.iter().find(|i| i.id == item_id) }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn discount_amount(&self) -> &Money { &self.discount_amount }
    pub fn tax_amount(&self) -> &Money { &self.tax_amount }
    pub fn shipping_cost(&self) -> &Money { &self.shipping_cost }
    pub fn total(&self) -> &Money { &self.total }
    pub fn gst_rate(&self) -> Decimal { self.gst_rate }
    pub fn currency(&self) -> &str { self.subtotal.currency() }
    pub fn is_active(&self) -> bool { self.is_active }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn expires_at(&self) -> DateTime<Utc> { self.expires_at }
    pub fn is_expired(&self) -> bool { Utc::now() >= self.expires_at }

    /// Adds a single line under the merge-or-append rule and recalculates.
    pub fn add_line(&mut self, line: NewLine) -> Result<()> {
        self.ensure_active()?;
        self.check_currency(&line)?;
        self.upsert_line(line);
        self.recalculate();
        Ok(())
    }

    /// Applies a whole batch of lines in order, then recalculates once.
    /// Nothing is persisted here; callers persist the result in one write.
    pub fn merge_pending(&mut self, lines: Vec<NewLine>) -> Result<usize> {
        self.ensure_active()?;
        for line in &lines {
            self.check_currency(line)?;
        }
        let applied = lines.len();
        for line in lines {
            self.upsert_line(line);
        }
        self.recalculate();
        Ok(applied)
    }

    pub fn remove_line(&mut self, item_id: Uuid) -> Result<CartItem> {
        self.ensure_active()?;
        let pos = self.items.iter().position(|i| i.id == item_id)
            .ok_or_else(|| CartError::NotFound { entity: "cart item", id: item_id.to_string() })?;
        let item = self.items.remove(pos);
        self.raise_event(CartEvent::ItemRemoved { cart_id: self.id, item_id });
        self.recalculate();
        Ok(item)
    }

    pub fn clear(&mut self) -> Result<usize> {
        self.ensure_active()?;
        let removed = self.items.len();
        self.items.clear();
        self.raise_event(CartEvent::Cleared { cart_id: self.id, items_removed: removed });
        self.recalculate();
        Ok(removed)
    }

    /// Discount and shipping are policy inputs owned by other subsystems;
    /// they flow in here and the derived totals follow.
    pub fn apply_adjustments(&mut self, discount: Money, shipping: Money) -> Result<()> {
        self.ensure_active()?;
        if discount.currency() != self.currency() || shipping.currency() != self.currency() {
            return Err(CartError::Validation { reason: format!("adjustment currency does not match cart currency {}", self.currency()) });
        }
        self.discount_amount = discount;
        self.shipping_cost = shipping;
        self.recalculate();
        Ok(())
    }

    /// Retires the cart. Once inactive it can never be mutated again.
    pub fn deactivate(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.is_active = false;
        self.raise_event(CartEvent::Expired { cart_id: self.id });
        self.touch();
        Ok(())
    }

    pub fn refresh_expiry(&mut self, ttl: Duration) {
        self.expires_at = Utc::now() + ttl;
    }

    pub fn take_events(&mut self) -> Vec<CartEvent> { std::mem::take(&mut self.events) }
    pub(crate) fn raise_event(&mut self, e: CartEvent) { self.events.push(e); }

    fn ensure_active(&self) -> Result<()> {
        if !self.is_active {
            return Err(CartError::IllegalState { reason: format!("cart {} is no longer active", self.id) });
        }
        Ok(())
    }

    fn check_currency(&self, line: &NewLine) -> Result<()> {
        if line.unit_price.currency() != self.currency() || line.customization_price.currency() != self.currency() {
            return Err(CartError::Validation { reason: format!("line currency does not match cart currency {}", self.currency()) });
        }
        Ok(())
    }

    // Merge-or-append: an uncustomized line folds into an existing
    // uncustomized line for the same (product, variant); anything carrying a
    // customization always gets its own row.
    fn upsert_line(&mut self, line: NewLine) {
        if line.customization_id.is_none() {
            if let Some(existing) = self.items.iter_mut().find(|i| {
                i.product_id == line.product_id && i.variant_id == line.variant_id && i.customization_id.is_none()
            }) {
                existing.quantity = existing.quantity.saturating_add(line.quantity);
                existing.recompute_total();
                let (item_id, quantity) = (existing.id, existing.quantity.get());
                self.raise_event(CartEvent::ItemAdded {
                    cart_id: self.id, item_id,
                    product_id: line.product_id, variant_id: line.variant_id, quantity,
                });
                return;
            }
        }
        let mut item = CartItem {
            id: Uuid::now_v7(),
            product_id: line.product_id,
            variant_id: line.variant_id,
            customization_id: line.customization_id,
            customization_preview: line.customization_preview,
            quantity: line.quantity,
            unit_price: line.unit_price,
            customization_price: line.customization_price,
            item_total: Money::zero(self.currency()),
        };
        item.recompute_total();
        self.raise_event(CartEvent::ItemAdded {
            cart_id: self.id, item_id: item.id,
            product_id: item.product_id, variant_id: item.variant_id, quantity: item.quantity.get(),
        });
        self.items.push(item);
    }

    // Derived fields are only ever written together, here.
    fn recalculate(&mut self) {
        let currency = self.currency().to_string();
        let subtotal: Decimal = self.items.iter().map(|i| i.item_total.amount()).sum();
        let taxable = (subtotal - self.discount_amount.amount()).max(Decimal::ZERO);
        let tax = round2(taxable * self.gst_rate);
        let total = subtotal - self.discount_amount.amount() + tax + self.shipping_cost.amount();
        self.subtotal = Money::new(subtotal, &currency);
        self.tax_amount = Money::new(tax, &currency);
        self.total = Money::new(total, &currency);
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(raw: i64) -> Quantity { Quantity::try_new(raw).unwrap() }

    fn cart() -> Cart {
        Cart::open(CartOwner::Session("sess-1".into()), "USD", DEFAULT_GST_RATE, Duration::days(30))
    }

    fn line(product: Uuid, variant: Uuid, quantity: i64, unit_price: Decimal) -> NewLine {
        NewLine {
            product_id: product, variant_id: variant,
            customization_id: None, customization_preview: None,
            quantity: qty(quantity),
            unit_price: Money::new(unit_price, "USD"),
            customization_price: Money::zero("USD"),
        }
    }

    #[test]
    fn test_merge_or_append_totals() {
        let mut cart = cart();
        let (p, v) = (Uuid::now_v7(), Uuid::now_v7());
        cart.add_line(line(p, v, 2, Decimal::new(100, 0))).unwrap();
        assert_eq!(cart.subtotal().amount(), Decimal::new(200, 0));

        cart.add_line(line(p, v, 1, Decimal::new(100, 0))).unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity.get(), 3);
        assert_eq!(cart.subtotal().amount(), Decimal::new(300, 0));
        assert_eq!(cart.tax_amount().amount(), Decimal::new(5400, 2));
        assert_eq!(cart.total().amount(), Decimal::new(35400, 2));
    }

    #[test]
    fn test_customized_lines_never_merge() {
        let mut cart = cart();
        let (p, v) = (Uuid::now_v7(), Uuid::now_v7());
        let mut customized = line(p, v, 1, Decimal::new(100, 0));
        customized.customization_id = Some(Uuid::now_v7());
        customized.customization_price = Money::new(Decimal::new(25, 0), "USD");
        cart.add_line(customized.clone()).unwrap();
        cart.add_line(line(p, v, 2, Decimal::new(100, 0))).unwrap();
        cart.add_line(customized).unwrap();
        assert_eq!(cart.items().len(), 3);
        // 125 + 200 + 125
        assert_eq!(cart.subtotal().amount(), Decimal::new(450, 0));
    }

    #[test]
    fn test_item_total_includes_customization_price() {
        let mut cart = cart();
        let mut l = line(Uuid::now_v7(), Uuid::now_v7(), 2, Decimal::new(100, 0));
        l.customization_id = Some(Uuid::now_v7());
        l.customization_price = Money::new(Decimal::new(25, 0), "USD");
        cart.add_line(l).unwrap();
        assert_eq!(cart.items()[0].item_total.amount(), Decimal::new(250, 0));
    }

    #[test]
    fn test_adjustments_feed_totals() {
        let mut cart = cart();
        cart.add_line(line(Uuid::now_v7(), Uuid::now_v7(), 1, Decimal::new(100, 0))).unwrap();
        cart.apply_adjustments(Money::new(Decimal::new(20, 0), "USD"), Money::new(Decimal::new(10, 0), "USD")).unwrap();
        // tax = round2(80 * 0.18) = 14.40, total = 100 - 20 + 14.40 + 10
        assert_eq!(cart.tax_amount().amount(), Decimal::new(1440, 2));
        assert_eq!(cart.total().amount(), Decimal::new(10440, 2));
    }

    #[test]
    fn test_tax_base_clamped_at_zero() {
        let mut cart = cart();
        cart.add_line(line(Uuid::now_v7(), Uuid::now_v7(), 1, Decimal::new(10, 0))).unwrap();
        cart.apply_adjustments(Money::new(Decimal::new(50, 0), "USD"), Money::zero("USD")).unwrap();
        assert_eq!(cart.tax_amount().amount(), Decimal::ZERO);
    }

    #[test]
    fn test_tax_rounding() {
        let mut cart = cart();
        // 3 * 3.33 = 9.99, tax = round2(1.7982) = 1.80
        cart.add_line(line(Uuid::now_v7(), Uuid::now_v7(), 3, Decimal::new(333, 2))).unwrap();
        assert_eq!(cart.tax_amount().amount(), Decimal::new(180, 2));
    }

    #[test]
    fn test_remove_recalculates() {
        let mut cart = cart();
        cart.add_line(line(Uuid::now_v7(), Uuid::now_v7(), 2, Decimal::new(100, 0))).unwrap();
        cart.add_line(line(Uuid::now_v7(), Uuid::now_v7(), 1, Decimal::new(50, 0))).unwrap();
        let removed = cart.items()[0].id;
        cart.remove_line(removed).unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.subtotal().amount(), Decimal::new(50, 0));
        assert!(matches!(cart.remove_line(removed), Err(CartError::NotFound { .. })));
    }

    #[test]
    fn test_clear_zeroes_derived_fields() {
        let mut cart = cart();
        cart.add_line(line(Uuid::now_v7(), Uuid::now_v7(), 2, Decimal::new(100, 0))).unwrap();
        assert_eq!(cart.clear().unwrap(), 1);
        assert!(cart.is_empty());
        assert_eq!(cart.subtotal().amount(), Decimal::ZERO);
        assert_eq!(cart.tax_amount().amount(), Decimal::ZERO);
        assert_eq!(cart.total().amount(), Decimal::ZERO);
    }

    #[test]
    fn test_merge_pending_batches_in_order() {
        let mut cart = cart();
        let (p, v) = (Uuid::now_v7(), Uuid::now_v7());
        let lines = vec![
            line(p, v, 2, Decimal::new(100, 0)),
            line(Uuid::now_v7(), Uuid::now_v7(), 1, Decimal::new(40, 0)),
            line(p, v, 1, Decimal::new(100, 0)),
        ];
        assert_eq!(cart.merge_pending(lines).unwrap(), 3);
        assert_eq!(cart.items().len(), 2);
        assert_eq!(cart.items()[0].quantity.get(), 3);
        assert_eq!(cart.subtotal().amount(), Decimal::new(340, 0));
    }

    #[test]
    fn test_inactive_cart_rejects_mutation() {
        let mut cart = cart();
        cart.deactivate().unwrap();
        let l = line(Uuid::now_v7(), Uuid::now_v7(), 1, Decimal::new(10, 0));
        assert!(matches!(cart.add_line(l), Err(CartError::IllegalState { .. })));
        assert!(matches!(cart.clear(), Err(CartError::IllegalState { .. })));
        assert!(matches!(cart.deactivate(), Err(CartError::IllegalState { .. })));
    }
}
