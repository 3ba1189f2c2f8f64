use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::OrderError;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

/// One requested line of a new order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub customer_id: Uuid,
    pub items: Vec<OrderLine>,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
}

impl PlaceOrder {
    pub fn new(customer_id: Uuid, items: Vec<OrderLine>) -> Self {
        Self {
            customer_id,
            items,
            delivery_address: None,
            notes: None,
        }
    }

    pub fn with_delivery_address(mut self, address: impl Into<String>) -> Self {
        self.delivery_address = Some(address.into());
        self
    }

    /// Shape checks that run before any transaction is opened
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::EmptyItems);
        }

        for line in &self.items {
            if line.quantity <= 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: line.quantity,
                });
            }
            if line.price.is_sign_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: line.product_id,
                    price: line.price,
                });
            }
        }

        self.quantities_by_product()?;
        self.total_amount()?;
        Ok(())
    }

    /// Summed quantity per product, in the ascending id order rows are locked in
    pub fn quantities_by_product(&self) -> Result<BTreeMap<Uuid, i32>, OrderError> {
        let mut requested: BTreeMap<Uuid, i32> = BTreeMap::new();
        for line in &self.items {
            let total = requested.entry(line.product_id).or_default();
            *total = total
                .checked_add(line.quantity)
                .ok_or(OrderError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: line.quantity,
                })?;
        }
        Ok(requested)
    }

    pub fn total_amount(&self) -> Result<Decimal, OrderError> {
        self.items.iter().try_fold(Decimal::ZERO, |sum, line| {
            line.price
                .checked_mul(Decimal::from(line.quantity))
                .and_then(|line_total| sum.checked_add(line_total))
                .ok_or(OrderError::InvalidPrice {
                    product_id: line.product_id,
                    price: line.price,
                })
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionOrder {
    pub order_id: Uuid,
    pub target: OrderStatus,
    pub notes: Option<String>,
}

impl TransitionOrder {
    pub fn new(order_id: Uuid, target: OrderStatus) -> Self {
        Self {
            order_id,
            target,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Filter for the order listing read model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub customer_id: Option<Uuid>,
}
