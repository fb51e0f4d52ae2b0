//! Aggregates module
pub mod cart;

pub use cart::{Cart, CartItem, CartState, NewLine, DEFAULT_GST_RATE};
