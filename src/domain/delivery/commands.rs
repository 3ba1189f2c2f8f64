use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::DeliveryStatus;

// ============================================================================
// Delivery Commands
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryAddresses {
    pub pickup_address: Option<String>,
    pub delivery_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDelivery {
    pub order_id: Uuid,
    pub assigned_to_id: Option<Uuid>,
    pub addresses: DeliveryAddresses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDeliveryStatus {
    pub delivery_id: Uuid,
    pub target: DeliveryStatus,
    pub notes: Option<String>,
    /// Free-form position reported by the courier (e.g. "lat,lng")
    pub location: Option<String>,
}

impl UpdateDeliveryStatus {
    pub fn new(delivery_id: Uuid, target: DeliveryStatus) -> Self {
        Self {
            delivery_id,
            target,
            notes: None,
            location: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}
