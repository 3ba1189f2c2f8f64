use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::delivery::{Delivery, DeliveryStatus};
use crate::domain::ledger::Product;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::token::{RedeemOutcome, TokenContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.status_changed")]
    OrderStatusChanged,
    #[serde(rename = "delivery.created")]
    DeliveryCreated,
    #[serde(rename = "delivery.assigned")]
    DeliveryAssigned,
    #[serde(rename = "delivery.status_changed")]
    DeliveryStatusChanged,
    #[serde(rename = "inventory.low_stock")]
    LowStock,
    #[serde(rename = "token.redeemed")]
    TokenRedeemed,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::OrderCreated => "order.created",
            Topic::OrderStatusChanged => "order.status_changed",
            Topic::DeliveryCreated => "delivery.created",
            Topic::DeliveryAssigned => "delivery.assigned",
            Topic::DeliveryStatusChanged => "delivery.status_changed",
            Topic::LowStock => "inventory.low_stock",
            Topic::TokenRedeemed => "token.redeemed",
        }
    }

    /// Broker topic name, e.g. `fulfillment.order.created`
    pub fn qualified(self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.as_str().to_string()
        } else {
            format!("{}.{}", prefix, self.as_str())
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope handed to the publisher after commit.
///
/// `key` selects the partition on the broker and the "room" for in-process
/// subscribers. It defaults to the aggregate id; assignment notifications are
/// keyed by the assignee so a courier's feed stays ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event_id: Uuid,
    pub event_type: String,
    pub topic: Topic,
    pub key: String,
    pub aggregate_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(
        topic: Topic,
        event_type: &str,
        aggregate_id: Uuid,
        occurred_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            topic,
            key: aggregate_id.to_string(),
            aggregate_id,
            occurred_at,
            payload,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn order_created(order: &Order) -> Self {
        Self::new(
            Topic::OrderCreated,
            "OrderCreated",
            order.id,
            order.created_at,
            json!({
                "order_id": order.id,
                "order_number": order.order_number,
                "customer_id": order.customer_id,
                "status": order.status,
                "total_amount": order.total_amount,
                "item_count": order.items.len(),
            }),
        )
    }

    pub fn order_status_changed(
        order: &Order,
        from: OrderStatus,
        to: OrderStatus,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            Topic::OrderStatusChanged,
            "OrderStatusChanged",
            order.id,
            at,
            json!({
                "order_id": order.id,
                "order_number": order.order_number,
                "customer_id": order.customer_id,
                "from": from,
                "to": to,
                "notes": notes,
            }),
        )
    }

    pub fn delivery_created(delivery: &Delivery) -> Self {
        Self::new(
            Topic::DeliveryCreated,
            "DeliveryCreated",
            delivery.id,
            delivery.created_at,
            json!({
                "delivery_id": delivery.id,
                "order_id": delivery.order_id,
                "status": delivery.status,
                "assigned_to_id": delivery.assigned_to_id,
            }),
        )
    }

    pub fn delivery_assigned(delivery: &Delivery, assignee_id: Uuid, at: DateTime<Utc>) -> Self {
        Self::new(
            Topic::DeliveryAssigned,
            "DeliveryAssigned",
            delivery.id,
            at,
            json!({
                "delivery_id": delivery.id,
                "order_id": delivery.order_id,
                "assigned_to_id": assignee_id,
                "pickup_address": delivery.pickup_address,
                "delivery_address": delivery.delivery_address,
            }),
        )
        .with_key(assignee_id.to_string())
    }

    pub fn delivery_status_changed(
        delivery: &Delivery,
        from: DeliveryStatus,
        to: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            Topic::DeliveryStatusChanged,
            "DeliveryStatusChanged",
            delivery.id,
            at,
            json!({
                "delivery_id": delivery.id,
                "order_id": delivery.order_id,
                "assigned_to_id": delivery.assigned_to_id,
                "from": from,
                "to": to,
            }),
        )
    }

    pub fn low_stock(product: &Product, at: DateTime<Utc>) -> Self {
        Self::new(
            Topic::LowStock,
            "LowStock",
            product.id,
            at,
            json!({
                "product_id": product.id,
                "sku": product.sku,
                "on_hand": product.on_hand,
                "reserved": product.reserved,
                "reorder_point": product.reorder_point,
            }),
        )
    }

    pub fn token_redeemed(
        context: TokenContext,
        outcome: &RedeemOutcome,
        actor_id: Uuid,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            Topic::TokenRedeemed,
            "TokenRedeemed",
            outcome.subject_id,
            at,
            json!({
                "context": context,
                "subject_id": outcome.subject_id,
                "state": outcome.state,
                "actor_id": actor_id,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_qualification() {
        assert_eq!(Topic::LowStock.qualified("fulfillment"), "fulfillment.inventory.low_stock");
        assert_eq!(Topic::OrderCreated.qualified(""), "order.created");
    }

    #[test]
    fn test_topic_serializes_as_dotted_name() {
        let raw = serde_json::to_string(&Topic::DeliveryAssigned).unwrap();
        assert_eq!(raw, "\"delivery.assigned\"");
    }

    #[test]
    fn test_assignment_is_keyed_by_assignee() {
        let now = Utc::now();
        let assignee = Uuid::new_v4();
        let delivery = Delivery {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            assigned_to_id: Some(assignee),
            status: DeliveryStatus::Assigned,
            pickup_address: None,
            delivery_address: None,
            picked_up_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };

        let n = Notification::delivery_assigned(&delivery, assignee, now);
        assert_eq!(n.key, assignee.to_string());
        assert_eq!(n.aggregate_id, delivery.id);
        assert_eq!(n.topic, Topic::DeliveryAssigned);
    }
}
