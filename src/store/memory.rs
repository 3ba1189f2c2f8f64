use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Page, PageRequest, Store, StoreError, Transaction};
use crate::domain::delivery::{Delivery, DeliveryStatusEvent};
use crate::domain::identity::UserRecord;
use crate::domain::ledger::{Product, StockMovement};
use crate::domain::order::{Order, OrderFilter, OrderStatus, OrderStatusEvent};
use crate::domain::token::ActionToken;

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Single-writer: a transaction holds the store lock from begin to
// commit/rollback, which makes every transaction serializable. Writes go to
// a working copy that replaces the committed state only on commit, so a
// failed transaction leaves nothing behind.
//
// ============================================================================

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, UserRecord>,
    products: HashMap<Uuid, Product>,
    movements: Vec<StockMovement>,
    orders: HashMap<Uuid, Order>,
    order_sequence: Vec<Uuid>,
    order_events: Vec<OrderStatusEvent>,
    deliveries: HashMap<Uuid, Delivery>,
    delivery_events: Vec<DeliveryStatusEvent>,
    tokens: HashMap<String, ActionToken>,
}

#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    lock_timeout: Duration,
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            lock_timeout,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| {
                StoreError::Busy(format!(
                    "lock not acquired within {}ms",
                    self.lock_timeout.as_millis()
                ))
            })?;

        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

fn missing(entity: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::Database(format!("{entity} {id} does not exist"))
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn find_user(&mut self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn upsert_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if self.working.products.values().any(|p| p.sku == product.sku) {
            return Err(StoreError::Conflict(format!("products.sku = {}", product.sku)));
        }
        self.working.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        self.get_product(id).await
    }

    async fn update_product_stock(
        &mut self,
        id: Uuid,
        on_hand: i32,
        reserved: i32,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Mirrors the CHECK constraints of the relational schema
        if on_hand < 0 || reserved < 0 || reserved > on_hand {
            return Err(StoreError::Conflict(format!(
                "products stock check violated for {id}: on_hand={on_hand}, reserved={reserved}"
            )));
        }
        let product = self
            .working
            .products
            .get_mut(&id)
            .ok_or_else(|| missing("product", id))?;
        product.on_hand = on_hand;
        product.reserved = reserved;
        product.updated_at = updated_at;
        Ok(())
    }

    async fn set_product_active(
        &mut self,
        id: Uuid,
        is_active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.working.products.get_mut(&id) {
            Some(product) => {
                product.is_active = is_active;
                product.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_stock_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.working.movements.push(movement.clone());
        Ok(())
    }

    async fn list_stock_movements(&mut self, product_id: Uuid) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .working
            .movements
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if self
            .working
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(StoreError::Conflict(format!(
                "orders.order_number = {}",
                order.order_number
            )));
        }
        self.working.orders.insert(order.id, order.clone());
        self.working.order_sequence.push(order.id);
        Ok(())
    }

    async fn get_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        self.get_order(id).await
    }

    async fn list_orders(
        &mut self,
        filter: &OrderFilter,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError> {
        let matching: Vec<&Order> = self
            .working
            .order_sequence
            .iter()
            .rev()
            .filter_map(|id| self.working.orders.get(id))
            .filter(|o| filter.status.map_or(true, |s| o.status == s))
            .filter(|o| filter.customer_id.map_or(true, |c| o.customer_id == c))
            .collect();

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();

        Ok(Page::new(items, total, page))
    }

    async fn update_order_status(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let order = self
            .working
            .orders
            .get_mut(&id)
            .ok_or_else(|| missing("order", id))?;
        order.status = status;
        order.updated_at = updated_at;
        Ok(())
    }

    async fn insert_order_status_event(&mut self, event: &OrderStatusEvent) -> Result<(), StoreError> {
        self.working.order_events.push(event.clone());
        Ok(())
    }

    async fn list_order_status_events(&mut self, order_id: Uuid) -> Result<Vec<OrderStatusEvent>, StoreError> {
        Ok(self
            .working
            .order_events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_delivery(&mut self, delivery: &Delivery) -> Result<(), StoreError> {
        if self
            .working
            .deliveries
            .values()
            .any(|d| d.order_id == delivery.order_id)
        {
            return Err(StoreError::Conflict(format!(
                "deliveries.order_id = {}",
                delivery.order_id
            )));
        }
        self.working.deliveries.insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn get_delivery(&mut self, id: Uuid) -> Result<Option<Delivery>, StoreError> {
        Ok(self.working.deliveries.get(&id).cloned())
    }

    async fn lock_delivery(&mut self, id: Uuid) -> Result<Option<Delivery>, StoreError> {
        self.get_delivery(id).await
    }

    async fn get_delivery_by_order(&mut self, order_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        Ok(self
            .working
            .deliveries
            .values()
            .find(|d| d.order_id == order_id)
            .cloned())
    }

    async fn lock_delivery_by_order(&mut self, order_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        self.get_delivery_by_order(order_id).await
    }

    async fn update_delivery(&mut self, delivery: &Delivery) -> Result<(), StoreError> {
        let slot = self
            .working
            .deliveries
            .get_mut(&delivery.id)
            .ok_or_else(|| missing("delivery", delivery.id))?;
        *slot = delivery.clone();
        Ok(())
    }

    async fn insert_delivery_status_event(&mut self, event: &DeliveryStatusEvent) -> Result<(), StoreError> {
        self.working.delivery_events.push(event.clone());
        Ok(())
    }

    async fn list_delivery_status_events(&mut self, delivery_id: Uuid) -> Result<Vec<DeliveryStatusEvent>, StoreError> {
        Ok(self
            .working
            .delivery_events
            .iter()
            .filter(|e| e.delivery_id == delivery_id)
            .cloned()
            .collect())
    }

    async fn insert_action_token(&mut self, token: &ActionToken) -> Result<(), StoreError> {
        if self.working.tokens.contains_key(&token.token) {
            return Err(StoreError::Conflict("action_tokens.token".to_string()));
        }
        self.working.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn lock_action_token(&mut self, token: &str) -> Result<Option<ActionToken>, StoreError> {
        Ok(self.working.tokens.get(token).cloned())
    }

    async fn mark_action_token_used(&mut self, token: &str, used_at: DateTime<Utc>) -> Result<(), StoreError> {
        let stored = self
            .working
            .tokens
            .get_mut(token)
            .ok_or_else(|| missing("action token", "<redacted>"))?;
        stored.is_used = true;
        stored.used_at = Some(used_at);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
