//! Value Objects for the cart core

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The identity a cart belongs to. Doubles as the per-owner lock key and the
/// storage uniqueness key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    User(Uuid),
    Session(String),
}

impl CartOwner {
    pub fn kind(&self) -> &'static str {
        match self { Self::User(_) => "user", Self::Session(_) => "session" }
    }

    pub fn reference(&self) -> String {
        match self { Self::User(id) => id.to_string(), Self::Session(token) => token.clone() }
    }
}

impl fmt::Display for CartOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.reference())
    }
}

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_string() } }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch); }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }
}

impl Default for Money { fn default() -> Self { Self::zero("USD") } }

#[derive(Debug, Clone)] pub enum MoneyError { CurrencyMismatch }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Currency mismatch") }
}

/// Quantity value object; a cart line never carries fewer than one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    /// Validates a raw quantity from an untrusted boundary.
    pub fn try_new(raw: i64) -> Result<Self, QuantityError> {
        if raw < 1 { return Err(QuantityError::NotPositive); }
        u32::try_from(raw).map(Self).map_err(|_| QuantityError::TooLarge)
    }
    pub fn get(&self) -> u32 { self.0 }
    pub fn saturating_add(self, other: Quantity) -> Quantity { Self(self.0.saturating_add(other.0)) }
}

#[derive(Debug, Clone)] pub enum QuantityError { NotPositive, TooLarge }
impl std::error::Error for QuantityError {}
impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPositive => write!(f, "quantity must be a positive integer"),
            Self::TooLarge => write!(f, "quantity too large"),
        }
    }
}
