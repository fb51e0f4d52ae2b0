//! OpenSASE Cart - Cart Identity and Concurrency Core
//!
//! Guarantees exactly one live shopping cart per customer identity
//! (authenticated user or anonymous session) under concurrent requests,
//! folds pending guest lines into the owner's cart as one atomic batch on
//! login, and keeps monetary totals consistent with line items on every
//! mutation.
//!
//! ## Features
//! - Per-owner mutual exclusion with lazily created locks
//! - Storage-level uniqueness backstop for multi-instance deployments
//! - Merge-or-append line semantics with GST-inclusive totals
//! - Best-effort customization asset cleanup on removal

use thiserror::Error;

pub mod domain;
pub mod service;
pub mod store;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CartError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("illegal cart state: {reason}")]
    IllegalState { reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, CartError>;
