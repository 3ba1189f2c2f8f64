use uuid::Uuid;

use super::value_objects::DeliveryStatus;
use crate::domain::order::OrderStatus;
use crate::domain::errors::{transient_from_kind, Classify, ErrorKind};
use crate::domain::order::OrderError;
use crate::store::StoreError;

// ============================================================================
// Delivery Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery not found: {0}")]
    NotFound(Uuid),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Order {0} already has a delivery")]
    DeliveryAlreadyExists(Uuid),

    #[error("Order {order_id} is {status}, not ready for delivery")]
    OrderNotDeliverable { order_id: Uuid, status: OrderStatus },

    #[error("User {0} cannot be assigned deliveries")]
    InvalidAssignee(Uuid),

    #[error("Actor {actor_id} may not update delivery {delivery_id}")]
    Forbidden { actor_id: Uuid, delivery_id: Uuid },

    #[error("Invalid delivery status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Classify for DeliveryError {
    fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::NotFound(_) | DeliveryError::OrderNotFound(_) => ErrorKind::NotFound,
            DeliveryError::DeliveryAlreadyExists(_) | DeliveryError::OrderNotDeliverable { .. } => ErrorKind::Conflict,
            DeliveryError::InvalidAssignee(_) => ErrorKind::Validation,
            DeliveryError::Forbidden { .. } => ErrorKind::Forbidden,
            DeliveryError::InvalidStatusTransition { .. } => ErrorKind::Conflict,
            DeliveryError::Order(e) => e.kind(),
            DeliveryError::Store(e) => e.kind(),
        }
    }
}

transient_from_kind!(DeliveryError);
