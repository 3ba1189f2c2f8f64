use crate::domain::delivery::DeliveryError;
use crate::domain::errors::{transient_from_kind, Classify, ErrorKind};
use crate::store::StoreError;

use super::value_objects::TokenContext;

// ============================================================================
// Action Token Errors
// ============================================================================
//
// Field staff need to tell "not found" from "expired" from "already used",
// so each gets its own variant.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Action token not found")]
    NotFound,

    #[error("Action token expired")]
    Expired,

    #[error("Action token already used")]
    AlreadyUsed,

    #[error("Token target not found")]
    TargetNotFound,

    #[error("Scan not permitted for this actor")]
    Forbidden,

    #[error("Token TTL must be positive, got {0} hours")]
    InvalidTtl(i64),

    #[error("Scan context {context} cannot be applied in the current delivery state")]
    NotYetApplicable { context: TokenContext },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Classify for TokenError {
    fn kind(&self) -> ErrorKind {
        match self {
            TokenError::NotFound | TokenError::TargetNotFound => ErrorKind::NotFound,
            TokenError::Expired => ErrorKind::Expired,
            TokenError::AlreadyUsed => ErrorKind::Conflict,
            TokenError::Forbidden => ErrorKind::Forbidden,
            TokenError::InvalidTtl(_) => ErrorKind::Validation,
            TokenError::NotYetApplicable { .. } => ErrorKind::Conflict,
            TokenError::Delivery(e) => e.kind(),
            TokenError::Store(e) => e.kind(),
        }
    }
}

transient_from_kind!(TokenError);
