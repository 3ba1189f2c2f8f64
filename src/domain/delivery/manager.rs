use std::sync::Arc;

use uuid::Uuid;

use super::commands::{CreateDelivery, DeliveryAddresses, UpdateDeliveryStatus};
use super::errors::DeliveryError;
use super::value_objects::{Delivery, DeliveryStatus, DeliveryStatusEvent};
use crate::clock::Clock;
use crate::domain::identity::Principal;
use crate::domain::order::{Order, OrderLifecycleManager, OrderStatus, OrderTransition};
use crate::messaging::Notification;
use crate::store::{StoreError, UnitOfWork};

// ============================================================================
// Delivery Lifecycle Manager
// ============================================================================
//
// One delivery per order. Reaching DELIVERED cascades into the order through
// `OrderLifecycleManager::transition`, so the order side is still checked
// against its own transition table and both writes share the unit of work.
//
// Lock order is delivery before order. Paths that start from the order only
// read the delivery row and rely on the unique `order_id` for races.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct DeliveryTransition {
    pub delivery: Delivery,
    pub from: DeliveryStatus,
    /// Set when the change cascaded into the linked order
    pub order: Option<OrderTransition>,
}

pub struct DeliveryLifecycleManager {
    orders: Arc<OrderLifecycleManager>,
    clock: Arc<dyn Clock>,
}

impl DeliveryLifecycleManager {
    pub fn new(orders: Arc<OrderLifecycleManager>, clock: Arc<dyn Clock>) -> Self {
        Self { orders, clock }
    }

    pub async fn create(&self, uow: &mut UnitOfWork, command: CreateDelivery) -> Result<Delivery, DeliveryError> {
        let order = uow
            .tx()
            .lock_order(command.order_id)
            .await?
            .ok_or(DeliveryError::OrderNotFound(command.order_id))?;

        if !matches!(order.status, OrderStatus::ReadyForDispatch | OrderStatus::OutForDelivery) {
            return Err(DeliveryError::OrderNotDeliverable {
                order_id: order.id,
                status: order.status,
            });
        }
        if uow.tx().get_delivery_by_order(order.id).await?.is_some() {
            return Err(DeliveryError::DeliveryAlreadyExists(order.id));
        }
        if let Some(assignee_id) = command.assigned_to_id {
            self.check_assignee(uow, assignee_id).await?;
        }

        let delivery = self
            .insert_new(uow, &order, command.assigned_to_id, command.addresses)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => DeliveryError::DeliveryAlreadyExists(order.id),
                other => other.into(),
            })?;

        tracing::info!(
            delivery_id = %delivery.id,
            order_id = %delivery.order_id,
            status = %delivery.status,
            "Delivery created"
        );

        Ok(delivery)
    }

    /// Implicit creation once an order is ready for dispatch. An existing
    /// delivery for the order is left alone.
    pub async fn ensure_for_order(
        &self,
        uow: &mut UnitOfWork,
        order: &Order,
        pickup_address: Option<String>,
    ) -> Result<Option<Delivery>, StoreError> {
        if uow.tx().get_delivery_by_order(order.id).await?.is_some() {
            return Ok(None);
        }
        let addresses = DeliveryAddresses {
            pickup_address,
            delivery_address: None,
        };
        let delivery = self.insert_new(uow, order, None, addresses).await?;
        tracing::info!(
            delivery_id = %delivery.id,
            order_id = %order.id,
            "Delivery created for dispatched order"
        );
        Ok(Some(delivery))
    }

    /// Assign from PENDING, or hand an ASSIGNED delivery to another courier
    pub async fn assign(
        &self,
        uow: &mut UnitOfWork,
        delivery_id: Uuid,
        assignee_id: Uuid,
    ) -> Result<DeliveryTransition, DeliveryError> {
        let mut delivery = uow
            .tx()
            .lock_delivery(delivery_id)
            .await?
            .ok_or(DeliveryError::NotFound(delivery_id))?;

        let from = delivery.status;
        let reassignment = match from {
            DeliveryStatus::Assigned => true,
            s if s.can_transition_to(DeliveryStatus::Assigned) => false,
            s => {
                return Err(DeliveryError::InvalidStatusTransition {
                    from: s,
                    to: DeliveryStatus::Assigned,
                })
            }
        };

        self.check_assignee(uow, assignee_id).await?;

        let now = self.clock.now();
        let previous = delivery.assigned_to_id.replace(assignee_id);
        delivery.status = DeliveryStatus::Assigned;
        delivery.updated_at = now;
        uow.tx().update_delivery(&delivery).await?;

        let notes = match (reassignment, previous) {
            (true, Some(prev)) => Some(format!("Reassigned from {prev}")),
            _ => None,
        };
        self.write_event(uow, delivery.id, DeliveryStatus::Assigned, notes, None)
            .await?;

        uow.enqueue(Notification::delivery_assigned(&delivery, assignee_id, now));
        if !reassignment {
            uow.enqueue(Notification::delivery_status_changed(
                &delivery,
                from,
                DeliveryStatus::Assigned,
                now,
            ));
        }

        tracing::info!(
            delivery_id = %delivery.id,
            assigned_to = %assignee_id,
            reassignment = reassignment,
            "Delivery assigned"
        );

        Ok(DeliveryTransition {
            delivery,
            from,
            order: None,
        })
    }

    pub async fn update_status(
        &self,
        uow: &mut UnitOfWork,
        command: UpdateDeliveryStatus,
        actor: &Principal,
    ) -> Result<DeliveryTransition, DeliveryError> {
        let mut delivery = uow
            .tx()
            .lock_delivery(command.delivery_id)
            .await?
            .ok_or(DeliveryError::NotFound(command.delivery_id))?;

        Self::authorize(&delivery, actor)?;

        let from = delivery.status;
        let target = command.target;
        // ASSIGNED needs a courier, so it is only reachable through `assign`
        if target == DeliveryStatus::Assigned || !from.can_transition_to(target) {
            return Err(DeliveryError::InvalidStatusTransition { from, to: target });
        }

        let now = self.clock.now();
        match target {
            DeliveryStatus::PickedUp => delivery.picked_up_at = Some(now),
            DeliveryStatus::Delivered => delivery.delivered_at = Some(now),
            _ => {}
        }
        delivery.status = target;
        delivery.updated_at = now;
        uow.tx().update_delivery(&delivery).await?;
        self.write_event(uow, delivery.id, target, command.notes, command.location)
            .await?;
        uow.enqueue(Notification::delivery_status_changed(&delivery, from, target, now));

        let order = if target == DeliveryStatus::Delivered {
            let note = format!("Delivery {} completed", delivery.id);
            Some(
                self.orders
                    .transition(uow, delivery.order_id, OrderStatus::Delivered, Some(note))
                    .await?,
            )
        } else {
            None
        };

        tracing::info!(
            delivery_id = %delivery.id,
            actor_id = %actor.id,
            from = %from,
            to = %target,
            "Delivery status changed"
        );

        Ok(DeliveryTransition {
            delivery,
            from,
            order,
        })
    }

    /// Administrators may drive any delivery; couriers only their own.
    /// An unassigned delivery does not exist from a courier's point of view.
    pub fn authorize(delivery: &Delivery, actor: &Principal) -> Result<(), DeliveryError> {
        if actor.is_administrator() {
            return Ok(());
        }
        if !actor.is_delivery_actor() {
            return Err(DeliveryError::Forbidden {
                actor_id: actor.id,
                delivery_id: delivery.id,
            });
        }
        match delivery.assigned_to_id {
            None => Err(DeliveryError::NotFound(delivery.id)),
            Some(id) if id == actor.id => Ok(()),
            Some(_) => Err(DeliveryError::Forbidden {
                actor_id: actor.id,
                delivery_id: delivery.id,
            }),
        }
    }

    async fn insert_new(
        &self,
        uow: &mut UnitOfWork,
        order: &Order,
        assigned_to_id: Option<Uuid>,
        addresses: DeliveryAddresses,
    ) -> Result<Delivery, StoreError> {
        let now = self.clock.now();
        let delivery = Delivery {
            id: Uuid::now_v7(),
            order_id: order.id,
            assigned_to_id,
            status: if assigned_to_id.is_some() {
                DeliveryStatus::Assigned
            } else {
                DeliveryStatus::Pending
            },
            pickup_address: addresses.pickup_address,
            delivery_address: addresses
                .delivery_address
                .or_else(|| order.delivery_address.clone()),
            picked_up_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };
        uow.tx().insert_delivery(&delivery).await?;

        self.write_event(uow, delivery.id, DeliveryStatus::Pending, Some("Delivery created".to_string()), None)
            .await?;
        uow.enqueue(Notification::delivery_created(&delivery));

        if let Some(assignee_id) = assigned_to_id {
            self.write_event(uow, delivery.id, DeliveryStatus::Assigned, None, None)
                .await?;
            uow.enqueue(Notification::delivery_assigned(&delivery, assignee_id, now));
        }
        Ok(delivery)
    }

    async fn check_assignee(&self, uow: &mut UnitOfWork, assignee_id: Uuid) -> Result<(), DeliveryError> {
        match uow.tx().find_user(assignee_id).await? {
            Some(user) if user.can_carry_deliveries() => Ok(()),
            _ => Err(DeliveryError::InvalidAssignee(assignee_id)),
        }
    }

    async fn write_event(
        &self,
        uow: &mut UnitOfWork,
        delivery_id: Uuid,
        status: DeliveryStatus,
        notes: Option<String>,
        location: Option<String>,
    ) -> Result<(), StoreError> {
        let event = DeliveryStatusEvent {
            id: Uuid::now_v7(),
            delivery_id,
            status,
            notes,
            location,
            created_at: self.clock.now(),
        };
        uow.tx().insert_delivery_status_event(&event).await?;
        Ok(())
    }
}
