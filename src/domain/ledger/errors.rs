use uuid::Uuid;

use super::value_objects::MovementType;
use crate::domain::errors::{transient_from_kind, Classify, ErrorKind};
use crate::store::StoreError;

// ============================================================================
// Stock Ledger Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Invalid product: {0}")]
    InvalidProduct(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Invalid {movement_type} movement of {quantity} on product {product_id}: {reason}")]
    InvalidMovement {
        product_id: Uuid,
        movement_type: MovementType,
        quantity: i32,
        reason: String,
    },

    #[error("Invalid quantity {quantity} for {movement_type} movement")]
    InvalidQuantity {
        movement_type: MovementType,
        quantity: i32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Shortfall for stock errors, so callers can report per line item
    pub fn shortfall(&self) -> Option<i32> {
        match self {
            LedgerError::InsufficientStock {
                requested,
                available,
                ..
            } => Some(requested - available),
            _ => None,
        }
    }
}

impl Classify for LedgerError {
    fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::ProductNotFound(_) => ErrorKind::NotFound,
            LedgerError::InvalidProduct(_) => ErrorKind::Validation,
            LedgerError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            LedgerError::InvalidMovement { .. } => ErrorKind::Conflict,
            LedgerError::InvalidQuantity { .. } => ErrorKind::Validation,
            LedgerError::Store(e) => e.kind(),
        }
    }
}

transient_from_kind!(LedgerError);
