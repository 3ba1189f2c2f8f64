use std::sync::Arc;

use uuid::Uuid;

use super::commands::PlaceOrder;
use super::errors::OrderError;
use super::value_objects::{generate_order_number, Order, OrderItem, OrderStatus, OrderStatusEvent, StockEffect};
use crate::clock::Clock;
use crate::domain::ledger::{MovementType, StockLedger};
use crate::messaging::Notification;
use crate::store::UnitOfWork;

// ============================================================================
// Order Lifecycle Manager
// ============================================================================
//
// Owns every write to `orders.status`. Each transition:
// 1. Locks the order row and checks the transition table
// 2. Applies the ledger effect of the transition (reserve/release/consume)
// 3. Writes the new status and its OrderStatusEvent
// 4. Queues the notification on the unit of work
//
// ============================================================================

/// A committed-to-be status change, returned so callers can report it
#[derive(Debug, Clone)]
pub struct OrderTransition {
    pub order: Order,
    pub from: OrderStatus,
}

pub struct OrderLifecycleManager {
    ledger: Arc<StockLedger>,
    clock: Arc<dyn Clock>,
    auto_confirm: bool,
}

impl OrderLifecycleManager {
    pub fn new(ledger: Arc<StockLedger>, clock: Arc<dyn Clock>, auto_confirm: bool) -> Self {
        Self {
            ledger,
            clock,
            auto_confirm,
        }
    }

    /// Place an order and reserve stock for every line, all or nothing.
    ///
    /// Product rows are locked in ascending id order so concurrent orders
    /// over overlapping products cannot deadlock. Availability is checked
    /// per product against the summed quantity of all its lines before any
    /// reservation is written.
    pub async fn create(&self, uow: &mut UnitOfWork, command: PlaceOrder) -> Result<Order, OrderError> {
        command.validate()?;

        if uow.tx().find_user(command.customer_id).await?.is_none() {
            return Err(OrderError::CustomerNotFound(command.customer_id));
        }

        let requested = command.quantities_by_product()?;
        let total_amount = command.total_amount()?;

        for (&product_id, &quantity) in &requested {
            let product = uow
                .tx()
                .lock_product(product_id)
                .await?
                .ok_or(OrderError::ProductNotFound(product_id))?;

            if !product.is_active {
                return Err(OrderError::ProductInactive(product_id));
            }
            if product.available() < quantity {
                return Err(OrderError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available: product.available(),
                });
            }
        }

        let now = self.clock.now();
        let order_id = Uuid::now_v7();
        let items: Vec<OrderItem> = command
            .items
            .iter()
            .map(|line| OrderItem {
                id: Uuid::now_v7(),
                order_id,
                product_id: line.product_id,
                quantity: line.quantity,
                price: line.price,
            })
            .collect();

        let mut order = Order {
            id: order_id,
            order_number: generate_order_number(now),
            customer_id: command.customer_id,
            status: OrderStatus::Pending,
            total_amount,
            delivery_address: command.delivery_address,
            notes: command.notes,
            items,
            created_at: now,
            updated_at: now,
        };
        uow.tx().insert_order(&order).await?;

        for item in &order.items {
            self.ledger
                .apply_movement(
                    uow,
                    item.product_id,
                    MovementType::Reserved,
                    item.quantity,
                    &order.order_number,
                )
                .await?;
        }

        self.write_event(uow, order.id, OrderStatus::Pending, Some("Order placed".to_string()))
            .await?;

        if self.auto_confirm {
            uow.tx()
                .update_order_status(order.id, OrderStatus::Confirmed, now)
                .await?;
            self.write_event(
                uow,
                order.id,
                OrderStatus::Confirmed,
                Some("Stock reserved".to_string()),
            )
            .await?;
            order.status = OrderStatus::Confirmed;
        }

        uow.enqueue(Notification::order_created(&order));

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            customer_id = %order.customer_id,
            items = order.items.len(),
            status = %order.status,
            "Order created"
        );

        Ok(order)
    }

    pub async fn transition(
        &self,
        uow: &mut UnitOfWork,
        order_id: Uuid,
        target: OrderStatus,
        notes: Option<String>,
    ) -> Result<OrderTransition, OrderError> {
        let mut order = uow
            .tx()
            .lock_order(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;

        let from = order.status;
        if !from.can_transition_to(target) {
            return Err(OrderError::InvalidStatusTransition { from, to: target });
        }

        let items = items_in_lock_order(&order);
        match StockEffect::for_transition(from, target) {
            Some(StockEffect::Consume) => {
                for item in &items {
                    self.ledger
                        .apply_movement(uow, item.product_id, MovementType::Released, item.quantity, &order.order_number)
                        .await?;
                    self.ledger
                        .apply_movement(uow, item.product_id, MovementType::Out, item.quantity, &order.order_number)
                        .await?;
                }
            }
            Some(StockEffect::Release) => {
                for item in &items {
                    self.ledger
                        .apply_movement(uow, item.product_id, MovementType::Released, item.quantity, &order.order_number)
                        .await?;
                }
            }
            None => {}
        }

        let now = self.clock.now();
        uow.tx().update_order_status(order.id, target, now).await?;
        self.write_event(uow, order.id, target, notes.clone()).await?;

        order.status = target;
        order.updated_at = now;
        uow.enqueue(Notification::order_status_changed(
            &order,
            from,
            target,
            notes.as_deref(),
            now,
        ));

        tracing::info!(
            order_id = %order.id,
            from = %from,
            to = %target,
            "Order status changed"
        );

        Ok(OrderTransition { order, from })
    }

    async fn write_event(
        &self,
        uow: &mut UnitOfWork,
        order_id: Uuid,
        status: OrderStatus,
        notes: Option<String>,
    ) -> Result<(), OrderError> {
        let event = OrderStatusEvent {
            id: Uuid::now_v7(),
            order_id,
            status,
            notes,
            created_at: self.clock.now(),
        };
        uow.tx().insert_order_status_event(&event).await?;
        Ok(())
    }
}

/// Items by ascending product id, the order product rows are locked in
fn items_in_lock_order(order: &Order) -> Vec<&OrderItem> {
    let mut items: Vec<&OrderItem> = order.items.iter().collect();
    items.sort_by_key(|item| item.product_id);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::domain::errors::{Classify, ErrorKind};
    use crate::domain::identity::{Role, UserRecord};
    use crate::domain::ledger::{NewProduct, Product};
    use crate::domain::order::OrderLine;
    use crate::store::{InMemoryStore, Store};
    use rust_decimal::Decimal;

    struct Fixture {
        store: InMemoryStore,
        manager: OrderLifecycleManager,
        ledger: Arc<StockLedger>,
        customer_id: Uuid,
    }

    async fn fixture(auto_confirm: bool) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger = Arc::new(StockLedger::new(clock.clone()));
        let store = InMemoryStore::default();
        let customer_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_user(&UserRecord {
            id: customer_id,
            name: "Ada".to_string(),
            role: Role::Customer,
            is_active: true,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        Fixture {
            store,
            manager: OrderLifecycleManager::new(ledger.clone(), clock, auto_confirm),
            ledger,
            customer_id,
        }
    }

    impl Fixture {
        async fn product(&self, stock: i32) -> Product {
            let mut uow = UnitOfWork::begin(&self.store).await.unwrap();
            let product = self
                .ledger
                .register_product(
                    &mut uow,
                    NewProduct {
                        sku: format!("SKU-{}", Uuid::new_v4().simple()),
                        name: "Widget".to_string(),
                        reorder_point: 0,
                        initial_stock: stock,
                    },
                )
                .await
                .unwrap();
            uow.commit(chrono::Utc::now()).await.unwrap();
            product
        }

        async fn levels(&self, product_id: Uuid) -> (i32, i32) {
            let mut tx = self.store.begin().await.unwrap();
            let p = tx.get_product(product_id).await.unwrap().unwrap();
            (p.on_hand, p.reserved)
        }

        async fn place(&self, lines: Vec<OrderLine>) -> Result<Order, OrderError> {
            let mut uow = UnitOfWork::begin(&self.store).await.unwrap();
            let result = self
                .manager
                .create(&mut uow, PlaceOrder::new(self.customer_id, lines))
                .await;
            match result {
                Ok(order) => {
                    uow.commit(chrono::Utc::now()).await.unwrap();
                    Ok(order)
                }
                Err(e) => {
                    uow.rollback().await.unwrap();
                    Err(e)
                }
            }
        }

        async fn transition(&self, order_id: Uuid, target: OrderStatus) -> Result<OrderTransition, OrderError> {
            let mut uow = UnitOfWork::begin(&self.store).await.unwrap();
            let result = self.manager.transition(&mut uow, order_id, target, None).await;
            if result.is_ok() {
                uow.commit(chrono::Utc::now()).await.unwrap();
            }
            result
        }
    }

    fn line(product_id: Uuid, quantity: i32) -> OrderLine {
        OrderLine {
            product_id,
            quantity,
            price: Decimal::new(1999, 2),
        }
    }

    #[tokio::test]
    async fn test_create_reserves_and_confirms() {
        let f = fixture(true).await;
        let p = f.product(5).await;

        let order = f.place(vec![line(p.id, 5)]).await.unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.total_amount, Decimal::new(9995, 2));
        assert_eq!(f.levels(p.id).await, (5, 5));

        let mut tx = f.store.begin().await.unwrap();
        let events = tx.list_order_status_events(order.id).await.unwrap();
        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![OrderStatus::Pending, OrderStatus::Confirmed]);
    }

    #[tokio::test]
    async fn test_create_without_auto_confirm_stays_pending() {
        let f = fixture(false).await;
        let p = f.product(5).await;

        let order = f.place(vec![line(p.id, 2)]).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        // Cancelling a pending order gives the reservation back
        f.transition(order.id, OrderStatus::Canceled).await.unwrap();
        assert_eq!(f.levels(p.id).await, (5, 0));
    }

    #[tokio::test]
    async fn test_one_short_line_reserves_nothing() {
        let f = fixture(true).await;
        let plenty = f.product(10).await;
        let scarce = f.product(1).await;

        let err = f
            .place(vec![line(plenty.id, 3), line(scarce.id, 2)])
            .await
            .unwrap_err();
        match err {
            OrderError::InsufficientStock {
                product_id,
                requested,
                available,
            } => {
                assert_eq!(product_id, scarce.id);
                assert_eq!((requested, available), (2, 1));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(f.levels(plenty.id).await, (10, 0));
        let mut tx = f.store.begin().await.unwrap();
        assert_eq!(tx.list_stock_movements(plenty.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_product_lines_are_summed() {
        let f = fixture(true).await;
        let p = f.product(5).await;

        let err = f.place(vec![line(p.id, 3), line(p.id, 3)]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(f.levels(p.id).await, (5, 0));
    }

    #[tokio::test]
    async fn test_unknown_customer_and_inactive_product() {
        let f = fixture(true).await;
        let p = f.product(5).await;

        let mut uow = UnitOfWork::begin(&f.store).await.unwrap();
        let err = f
            .manager
            .create(&mut uow, PlaceOrder::new(Uuid::new_v4(), vec![line(p.id, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::CustomerNotFound(_)));
        drop(uow);

        let mut tx = f.store.begin().await.unwrap();
        tx.set_product_active(p.id, false, chrono::Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let err = f.place(vec![line(p.id, 1)]).await.unwrap_err();
        assert!(matches!(err, OrderError::ProductInactive(id) if id == p.id));
    }

    #[tokio::test]
    async fn test_dispatch_consumes_reservation() {
        let f = fixture(true).await;
        let p = f.product(5).await;
        let order = f.place(vec![line(p.id, 3)]).await.unwrap();

        f.transition(order.id, OrderStatus::Preparing).await.unwrap();
        let t = f.transition(order.id, OrderStatus::ReadyForDispatch).await.unwrap();
        assert_eq!(t.from, OrderStatus::Preparing);
        assert_eq!(f.levels(p.id).await, (2, 0));

        let mut tx = f.store.begin().await.unwrap();
        let types: Vec<_> = tx
            .list_stock_movements(p.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.movement_type)
            .collect();
        assert_eq!(
            types,
            vec![
                MovementType::In,
                MovementType::Reserved,
                MovementType::Released,
                MovementType::Out
            ]
        );
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_status() {
        let f = fixture(true).await;
        let p = f.product(5).await;
        let order = f.place(vec![line(p.id, 1)]).await.unwrap();

        let err = f.transition(order.id, OrderStatus::Delivered).await.unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidStatusTransition {
                from: OrderStatus::Confirmed,
                to: OrderStatus::Delivered
            }
        ));

        let mut tx = f.store.begin().await.unwrap();
        assert_eq!(
            tx.get_order(order.id).await.unwrap().unwrap().status,
            OrderStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_cannot_cancel_after_dispatch() {
        let f = fixture(true).await;
        let p = f.product(5).await;
        let order = f.place(vec![line(p.id, 1)]).await.unwrap();
        f.transition(order.id, OrderStatus::Preparing).await.unwrap();
        f.transition(order.id, OrderStatus::ReadyForDispatch).await.unwrap();

        let err = f.transition(order.id, OrderStatus::Canceled).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.levels(p.id).await, (4, 0));
    }

    #[tokio::test]
    async fn test_overflowing_lines_rejected_before_reserving() {
        let f = fixture(true).await;
        let p = f.product(5).await;

        let err = f
            .place(vec![line(p.id, i32::MAX), line(p.id, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidQuantity { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = f
            .place(vec![OrderLine {
                product_id: p.id,
                quantity: 2,
                price: Decimal::MAX,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidPrice { .. }));
        assert_eq!(f.levels(p.id).await, (5, 0));
    }

    #[tokio::test]
    async fn test_transition_walks_items_by_product_id() {
        let f = fixture(true).await;
        let a = f.product(5).await;
        let b = f.product(5).await;
        let (low, high) = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };

        let order = f.place(vec![line(high, 1), line(low, 2)]).await.unwrap();
        assert_eq!(order.items[0].product_id, high);
        let ordered: Vec<Uuid> = items_in_lock_order(&order)
            .iter()
            .map(|item| item.product_id)
            .collect();
        assert_eq!(ordered, vec![low, high]);

        f.transition(order.id, OrderStatus::Canceled).await.unwrap();
        assert_eq!(f.levels(low).await, (5, 0));
        assert_eq!(f.levels(high).await, (5, 0));
    }
}
