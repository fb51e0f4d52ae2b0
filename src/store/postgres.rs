//! Postgres cart store.
//!
//! The partial unique index `carts_active_owner_key` on
//! `(owner_kind, owner_ref) WHERE is_active` is the cross-process backstop
//! for the single-active-cart invariant; a violation of it surfaces as
//! `InsertOutcome::DuplicateOwner` rather than an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::cart::{Cart, CartItem, CartState};
use crate::domain::value_objects::{CartOwner, Money, Quantity};
use crate::store::{CartStore, InsertOutcome};
use crate::{CartError, Result};

const ACTIVE_OWNER_CONSTRAINT: &str = "carts_active_owner_key";

pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: Uuid,
    owner_kind: String,
    owner_ref: String,
    currency: String,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    shipping_cost: Decimal,
    total: Decimal,
    gst_rate: Decimal,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    id: Uuid,
    product_id: Uuid,
    variant_id: Uuid,
    customization_id: Option<Uuid>,
    customization_preview: Option<String>,
    quantity: i32,
    unit_price: Decimal,
    customization_price: Decimal,
    item_total: Decimal,
}

impl CartRow {
    fn into_state(self) -> Result<CartState> {
        let owner = owner_from_columns(&self.owner_kind, &self.owner_ref)?;
        Ok(CartState {
            id: self.id,
            owner,
            subtotal: Money::new(self.subtotal, &self.currency),
            discount_amount: Money::new(self.discount_amount, &self.currency),
            tax_amount: Money::new(self.tax_amount, &self.currency),
            shipping_cost: Money::new(self.shipping_cost, &self.currency),
            total: Money::new(self.total, &self.currency),
            gst_rate: self.gst_rate,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        })
    }
}

impl CartItemRow {
    fn into_item(self, currency: &str) -> Result<CartItem> {
        let quantity = Quantity::try_new(i64::from(self.quantity))
            .map_err(|e| CartError::Storage(format!("cart item {} has corrupt quantity: {}", self.id, e)))?;
        Ok(CartItem {
            id: self.id,
            product_id: self.product_id,
            variant_id: self.variant_id,
            customization_id: self.customization_id,
            customization_preview: self.customization_preview,
            quantity,
            unit_price: Money::new(self.unit_price, currency),
            customization_price: Money::new(self.customization_price, currency),
            item_total: Money::new(self.item_total, currency),
        })
    }
}

fn owner_from_columns(kind: &str, reference: &str) -> Result<CartOwner> {
    match kind {
        "user" => Uuid::parse_str(reference)
            .map(CartOwner::User)
            .map_err(|_| CartError::Storage(format!("corrupt user owner reference '{reference}'"))),
        "session" => Ok(CartOwner::Session(reference.to_string())),
        other => Err(CartError::Storage(format!("unknown owner kind '{other}'"))),
    }
}

fn storage_err(e: sqlx::Error) -> CartError {
    CartError::Storage(e.to_string())
}

fn is_duplicate_owner(e: &sqlx::Error) -> bool {
    e.as_database_error().is_some_and(|db| {
        db.code().as_deref() == Some("23505") && db.constraint() == Some(ACTIVE_OWNER_CONSTRAINT)
    })
}

async fn insert_items(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, cart: &Cart) -> Result<()> {
    for (position, item) in cart.items().iter().enumerate() {
        sqlx::query(
            "INSERT INTO cart_items (id, cart_id, product_id, variant_id, customization_id, customization_preview, quantity, unit_price, customization_price, item_total, position) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(item.id)
        .bind(cart.id())
        .bind(item.product_id)
        .bind(item.variant_id)
        .bind(item.customization_id)
        .bind(&item.customization_preview)
        .bind(item.quantity.get() as i32)
        .bind(item.unit_price.amount())
        .bind(item.customization_price.amount())
        .bind(item.item_total.amount())
        .bind(position as i32)
        .execute(&mut **tx)
        .await
        .map_err(storage_err)?;
    }
    Ok(())
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn find_active_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>> {
        let row: Option<CartRow> = sqlx::query_as(
            "SELECT * FROM carts WHERE owner_kind = $1 AND owner_ref = $2 AND is_active LIMIT 1",
        )
        .bind(owner.kind())
        .bind(owner.reference())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some(row) = row else { return Ok(None) };
        let item_rows: Vec<CartItemRow> = sqlx::query_as(
            "SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let currency = row.currency.clone();
        let state = row.into_state()?;
        let items = item_rows
            .into_iter()
            .map(|r| r.into_item(&currency))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Cart::rehydrate(state, items)))
    }

    async fn insert(&self, cart: &Cart) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let inserted = sqlx::query(
            "INSERT INTO carts (id, owner_kind, owner_ref, currency, subtotal, discount_amount, tax_amount, shipping_cost, total, gst_rate, is_active, created_at, updated_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(cart.id())
        .bind(cart.owner().kind())
        .bind(cart.owner().reference())
        .bind(cart.currency())
        .bind(cart.subtotal().amount())
        .bind(cart.discount_amount().amount())
        .bind(cart.tax_amount().amount())
        .bind(cart.shipping_cost().amount())
        .bind(cart.total().amount())
        .bind(cart.gst_rate())
        .bind(cart.is_active())
        .bind(cart.created_at())
        .bind(cart.updated_at())
        .bind(cart.expires_at())
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_duplicate_owner(&e) {
                return Ok(InsertOutcome::DuplicateOwner);
            }
            return Err(storage_err(e));
        }
        insert_items(&mut tx, cart).await?;
        tx.commit().await.map_err(storage_err)?;
        Ok(InsertOutcome::Inserted)
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let updated = sqlx::query(
            "UPDATE carts SET subtotal = $2, discount_amount = $3, tax_amount = $4, shipping_cost = $5, total = $6, gst_rate = $7, is_active = $8, updated_at = $9, expires_at = $10 WHERE id = $1",
        )
        .bind(cart.id())
        .bind(cart.subtotal().amount())
        .bind(cart.discount_amount().amount())
        .bind(cart.tax_amount().amount())
        .bind(cart.shipping_cost().amount())
        .bind(cart.total().amount())
        .bind(cart.gst_rate())
        .bind(cart.is_active())
        .bind(cart.updated_at())
        .bind(cart.expires_at())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        if updated.rows_affected() == 0 {
            return Err(CartError::Storage(format!("cart {} missing on save", cart.id())));
        }

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart.id())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        insert_items(&mut tx, cart).await?;
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }
}
