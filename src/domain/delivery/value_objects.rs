use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Delivery Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Failed,
    Returned,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 7] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Assigned,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
        DeliveryStatus::Delivered,
        DeliveryStatus::Failed,
        DeliveryStatus::Returned,
    ];

    /// The transition table. FAILED/RETURNED are reachable from every
    /// non-terminal state.
    pub fn allowed_next(self) -> &'static [DeliveryStatus] {
        use DeliveryStatus::*;
        match self {
            Pending => &[Assigned, Failed, Returned],
            Assigned => &[PickedUp, Failed, Returned],
            PickedUp => &[InTransit, Delivered, Failed, Returned],
            InTransit => &[Delivered, Failed, Returned],
            Delivered | Failed | Returned => &[],
        }
    }

    pub fn can_transition_to(self, target: DeliveryStatus) -> bool {
        self.allowed_next().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Position along the happy path; every terminal state ranks last
    pub fn progress(self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Assigned => 1,
            DeliveryStatus::PickedUp => 2,
            DeliveryStatus::InTransit => 3,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Returned => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Assigned => "ASSIGNED",
            DeliveryStatus::PickedUp => "PICKED_UP",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Returned => "RETURNED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub assigned_to_id: Option<Uuid>,
    pub status: DeliveryStatus,
    pub pickup_address: Option<String>,
    pub delivery_address: Option<String>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_assigned_to(&self, user_id: Uuid) -> bool {
        self.assigned_to_id == Some(user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatusEvent {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    pub notes: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_is_exact() {
        use DeliveryStatus::*;
        let expected: Vec<(DeliveryStatus, Vec<DeliveryStatus>)> = vec![
            (Pending, vec![Assigned, Failed, Returned]),
            (Assigned, vec![PickedUp, Failed, Returned]),
            (PickedUp, vec![InTransit, Delivered, Failed, Returned]),
            (InTransit, vec![Delivered, Failed, Returned]),
            (Delivered, vec![]),
            (Failed, vec![]),
            (Returned, vec![]),
        ];

        for (from, allowed) in expected {
            for to in DeliveryStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_failure_reachable_from_every_open_state() {
        for status in DeliveryStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_transition_to(DeliveryStatus::Failed));
            assert!(status.can_transition_to(DeliveryStatus::Returned));
        }
    }

    #[test]
    fn test_status_storage_names() {
        for status in DeliveryStatus::ALL {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Some(status));
        }
    }
}
