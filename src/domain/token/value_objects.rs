use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::delivery::DeliveryStatus;
use crate::domain::order::OrderStatus;

// ============================================================================
// Action Token Value Objects
// ============================================================================

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenContext {
    Pickup,
    Deliver,
    Track,
}

impl TokenContext {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenContext::Pickup => "pickup",
            TokenContext::Deliver => "deliver",
            TokenContext::Track => "track",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pickup" => Some(TokenContext::Pickup),
            "deliver" => Some(TokenContext::Deliver),
            "track" => Some(TokenContext::Track),
            _ => None,
        }
    }

    /// Only pickup/deliver scans change state; track is read-only forever
    pub fn is_actionable(self) -> bool {
        !matches!(self, TokenContext::Track)
    }

    /// Delivery states from which this scan may fire, and the status it sets
    pub fn delivery_transition(self) -> Option<(&'static [DeliveryStatus], DeliveryStatus)> {
        match self {
            TokenContext::Pickup => Some((&[DeliveryStatus::Assigned], DeliveryStatus::PickedUp)),
            TokenContext::Deliver => Some((
                &[DeliveryStatus::PickedUp, DeliveryStatus::InTransit],
                DeliveryStatus::Delivered,
            )),
            TokenContext::Track => None,
        }
    }
}

impl std::fmt::Display for TokenContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity a token is bound to; exactly one of order or delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum TokenTarget {
    Order(Uuid),
    Delivery(Uuid),
}

impl TokenTarget {
    pub fn order_id(self) -> Option<Uuid> {
        match self {
            TokenTarget::Order(id) => Some(id),
            TokenTarget::Delivery(_) => None,
        }
    }

    pub fn delivery_id(self) -> Option<Uuid> {
        match self {
            TokenTarget::Delivery(id) => Some(id),
            TokenTarget::Order(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionToken {
    pub token: String,
    pub target: TokenTarget,
    pub context: TokenContext,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ActionToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Opaque capability string: 256 bits from the OS RNG, hex encoded
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returned on issue; `payload` is what gets rendered into the QR code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub context: TokenContext,
    pub target: TokenTarget,
    pub expires_at: DateTime<Utc>,
    pub payload: String,
}

/// Status of the entity behind a scanned token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "status", rename_all = "lowercase")]
pub enum ScannedStatus {
    Order(OrderStatus),
    Delivery(DeliveryStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemOutcome {
    pub subject_id: Uuid,
    pub state: ScannedStatus,
    /// True only when this scan applied a transition
    pub changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_long_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_scan_transitions() {
        let (from, to) = TokenContext::Pickup.delivery_transition().unwrap();
        assert_eq!(from, &[DeliveryStatus::Assigned]);
        assert_eq!(to, DeliveryStatus::PickedUp);

        let (from, to) = TokenContext::Deliver.delivery_transition().unwrap();
        assert_eq!(from, &[DeliveryStatus::PickedUp, DeliveryStatus::InTransit]);
        assert_eq!(to, DeliveryStatus::Delivered);

        assert!(TokenContext::Track.delivery_transition().is_none());
        assert!(!TokenContext::Track.is_actionable());
    }

    #[test]
    fn test_expiry_is_strictly_after() {
        let now = Utc::now();
        let token = ActionToken {
            token: generate_token(),
            target: TokenTarget::Delivery(Uuid::new_v4()),
            context: TokenContext::Pickup,
            expires_at: now,
            is_used: false,
            used_at: None,
            created_at: now,
        };
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_outcome_serialization_shape() {
        let outcome = RedeemOutcome {
            subject_id: Uuid::nil(),
            state: ScannedStatus::Delivery(DeliveryStatus::PickedUp),
            changed: true,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["state"]["type"], "delivery");
        assert_eq!(json["state"]["status"], "PICKED_UP");
        assert_eq!(json["changed"], true);
    }
}
