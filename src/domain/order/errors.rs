use rust_decimal::Decimal;
use uuid::Uuid;

use super::value_objects::OrderStatus;
use crate::domain::errors::{transient_from_kind, Classify, ErrorKind};
use crate::domain::ledger::LedgerError;
use crate::store::StoreError;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: Uuid, quantity: i32 },

    #[error("Invalid price {price} for product {product_id}")]
    InvalidPrice { product_id: Uuid, price: Decimal },

    #[error("Customer not found: {0}")]
    CustomerNotFound(Uuid),

    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Product is inactive: {0}")]
    ProductInactive(Uuid),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Invalid order status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LedgerError> for OrderError {
    /// Lift ledger failures that callers report per line item to the order level
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ProductNotFound(id) => OrderError::ProductNotFound(id),
            LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            } => OrderError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            LedgerError::Store(e) => OrderError::Store(e),
            other => OrderError::Ledger(other),
        }
    }
}

impl Classify for OrderError {
    fn kind(&self) -> ErrorKind {
        match self {
            OrderError::EmptyItems
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidPrice { .. } => ErrorKind::Validation,
            OrderError::CustomerNotFound(_)
            | OrderError::NotFound(_)
            | OrderError::ProductNotFound(_) => ErrorKind::NotFound,
            OrderError::ProductInactive(_) => ErrorKind::Conflict,
            OrderError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            OrderError::InvalidStatusTransition { .. } => ErrorKind::Conflict,
            OrderError::Ledger(e) => e.kind(),
            OrderError::Store(e) => e.kind(),
        }
    }
}

transient_from_kind!(OrderError);
