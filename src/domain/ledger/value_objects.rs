use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Stock Ledger Value Objects
// ============================================================================

/// Catalog item with its stock counters.
///
/// `on_hand` and `reserved` are written only by the stock ledger and always
/// satisfy `0 <= reserved <= on_hand`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub on_hand: i32,
    pub reserved: i32,
    pub reorder_point: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Stock that can still be reserved
    pub fn available(&self) -> i32 {
        self.on_hand - self.reserved
    }

    pub fn is_low_stock(&self) -> bool {
        self.on_hand <= self.reorder_point
    }

    pub fn levels(&self) -> StockLevels {
        StockLevels {
            on_hand: self.on_hand,
            reserved: self.reserved,
        }
    }
}

/// Catalog registration input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub reorder_point: i32,
    pub initial_stock: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Goods received: `on_hand += q`
    In,
    /// Goods shipped: `on_hand -= q`
    Out,
    /// Soft hold: `reserved += q`
    Reserved,
    /// Hold returned: `reserved -= q`
    Released,
    /// Administrative correction: `on_hand = q`
    Adjustment,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Reserved => "RESERVED",
            MovementType::Released => "RELEASED",
            MovementType::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "IN" => Some(MovementType::In),
            "OUT" => Some(MovementType::Out),
            "RESERVED" => Some(MovementType::Reserved),
            "RELEASED" => Some(MovementType::Released),
            "ADJUSTMENT" => Some(MovementType::Adjustment),
            _ => None,
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit row, one per ledger mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    pub on_hand: i32,
    pub reserved: i32,
}

impl StockLevels {
    /// Fold one movement into the levels, the same arithmetic the ledger applies
    pub fn apply(&mut self, movement_type: MovementType, quantity: i32) {
        match movement_type {
            MovementType::In => self.on_hand += quantity,
            MovementType::Out => self.on_hand -= quantity,
            MovementType::Reserved => self.reserved += quantity,
            MovementType::Released => self.reserved -= quantity,
            MovementType::Adjustment => self.on_hand = quantity,
        }
    }

    /// Replay a product's movement history from zero, in order
    pub fn replay<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> Self {
        movements.into_iter().fold(Self::default(), |mut levels, m| {
            levels.apply(m.movement_type, m.quantity);
            levels
        })
    }

    pub fn is_consistent(&self) -> bool {
        self.on_hand >= 0 && self.reserved >= 0 && self.reserved <= self.on_hand
    }
}

/// Outcome of replaying a product's movements against its counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub product_id: Uuid,
    pub current: StockLevels,
    pub replayed: StockLevels,
    pub movement_count: usize,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.current == self.replayed
    }
}
