use serde::Serialize;

// ============================================================================
// Error Taxonomy
// ============================================================================
//
// Every component error maps onto one of these classes. Only `Transient` is
// safe to retry automatically; everything else is terminal for the request.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, rejected before any transaction opens
    Validation,
    NotFound,
    /// Illegal transition, token already used, duplicate delivery
    Conflict,
    InsufficientStock,
    Forbidden,
    /// Action token past its TTL
    Expired,
    /// Lock timeout / serialization failure
    Transient,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Expired => "expired",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification hook implemented by every engine error
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Derive `IsTransient` from `Classify` for an error type
macro_rules! transient_from_kind {
    ($ty:ty) => {
        impl $crate::utils::IsTransient for $ty {
            fn is_transient(&self) -> bool {
                $crate::domain::errors::Classify::kind(self)
                    == $crate::domain::errors::ErrorKind::Transient
            }
        }
    };
}

pub(crate) use transient_from_kind;
