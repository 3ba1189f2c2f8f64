// ============================================================================
// Persistent Store Contract
// ============================================================================
//
// The engine is written against a transactional unit-of-work primitive:
// - `Store::begin` opens one transaction
// - `Transaction` exposes typed, key-addressed operations only
// - `lock_*` reads take a row lock held until commit/rollback
// - Lock waits are bounded; a timeout surfaces as `StoreError::Busy`
//
// Backends:
// - memory   - single-writer store for tests and local runs
// - postgres - sqlx/PostgreSQL with SELECT ... FOR UPDATE
//
// ============================================================================

mod memory;
mod page;
mod postgres;
mod unit_of_work;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::delivery::{Delivery, DeliveryStatusEvent};
use crate::domain::errors::{transient_from_kind, Classify, ErrorKind};
use crate::domain::identity::UserRecord;
use crate::domain::ledger::{Product, StockMovement};
use crate::domain::order::{Order, OrderFilter, OrderStatus, OrderStatusEvent};
use crate::domain::token::ActionToken;

pub use memory::InMemoryStore;
pub use page::{Page, PageRequest};
pub use postgres::PgStore;
pub use unit_of_work::UnitOfWork;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lock wait exceeded, serialization failure or deadlock; safe to retry
    #[error("Store busy: {0}")]
    Busy(String),

    /// Unique constraint violated
    #[error("Constraint violated: {0}")]
    Conflict(String),

    /// A stored value could not be decoded into a domain type
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Busy(_) => ErrorKind::Transient,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::Corrupt(_) | StoreError::Database(_) => ErrorKind::Internal,
        }
    }
}

transient_from_kind!(StoreError);

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// One open transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait Transaction: Send {
    // --- users (mirrored from the identity provider) ---
    async fn find_user(&mut self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;
    async fn upsert_user(&mut self, user: &UserRecord) -> Result<(), StoreError>;

    // --- products & movements ---
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;
    async fn get_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn update_product_stock(
        &mut self,
        id: Uuid,
        on_hand: i32,
        reserved: i32,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn set_product_active(
        &mut self,
        id: Uuid,
        is_active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn insert_stock_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;
    async fn list_stock_movements(&mut self, product_id: Uuid) -> Result<Vec<StockMovement>, StoreError>;

    // --- orders ---
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;
    async fn get_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn list_orders(
        &mut self,
        filter: &OrderFilter,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError>;
    async fn update_order_status(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn insert_order_status_event(&mut self, event: &OrderStatusEvent) -> Result<(), StoreError>;
    async fn list_order_status_events(&mut self, order_id: Uuid) -> Result<Vec<OrderStatusEvent>, StoreError>;

    // --- deliveries ---
    async fn insert_delivery(&mut self, delivery: &Delivery) -> Result<(), StoreError>;
    async fn get_delivery(&mut self, id: Uuid) -> Result<Option<Delivery>, StoreError>;
    async fn lock_delivery(&mut self, id: Uuid) -> Result<Option<Delivery>, StoreError>;
    async fn get_delivery_by_order(&mut self, order_id: Uuid) -> Result<Option<Delivery>, StoreError>;
    async fn lock_delivery_by_order(&mut self, order_id: Uuid) -> Result<Option<Delivery>, StoreError>;
    async fn update_delivery(&mut self, delivery: &Delivery) -> Result<(), StoreError>;
    async fn insert_delivery_status_event(&mut self, event: &DeliveryStatusEvent) -> Result<(), StoreError>;
    async fn list_delivery_status_events(&mut self, delivery_id: Uuid) -> Result<Vec<DeliveryStatusEvent>, StoreError>;

    // --- action tokens ---
    async fn insert_action_token(&mut self, token: &ActionToken) -> Result<(), StoreError>;
    async fn lock_action_token(&mut self, token: &str) -> Result<Option<ActionToken>, StoreError>;
    async fn mark_action_token_used(&mut self, token: &str, used_at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
