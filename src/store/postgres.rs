use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use uuid::Uuid;

use super::{Page, PageRequest, Store, StoreError, Transaction};
use crate::domain::delivery::{Delivery, DeliveryStatus, DeliveryStatusEvent};
use crate::domain::identity::{Role, UserRecord};
use crate::domain::ledger::{MovementType, Product, StockMovement};
use crate::domain::order::{Order, OrderFilter, OrderItem, OrderStatus, OrderStatusEvent};
use crate::domain::token::{ActionToken, TokenContext, TokenTarget};

// ============================================================================
// PostgreSQL Store
// ============================================================================
//
// Each transaction sets a local lock_timeout, so every `lock_*` read
// (SELECT ... FOR UPDATE) waits a bounded time. Lock timeouts, serialization
// failures and deadlocks come back as `StoreError::Busy`.
//
// ============================================================================

const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
const SQLSTATE_CHECK_VIOLATION: &str = "23514";
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(SQLSTATE_LOCK_NOT_AVAILABLE)
                | Some(SQLSTATE_SERIALIZATION_FAILURE)
                | Some(SQLSTATE_DEADLOCK_DETECTED) => StoreError::Busy(db.message().to_string()),
                Some(SQLSTATE_UNIQUE_VIOLATION) | Some(SQLSTATE_CHECK_VIOLATION) => {
                    StoreError::Conflict(db.message().to_string())
                }
                _ => StoreError::Database(err.to_string()),
            },
            sqlx::Error::PoolTimedOut => StoreError::Busy("connection pool exhausted".to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StoreError::Corrupt(err.to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool, lock_timeout })
    }

    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Apply `schema.sql`; every statement is idempotent
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&self.pool)
            .await?;
        tracing::info!("Database schema applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters
        let statement = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&statement).execute(&mut *tx).await?;

        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn corrupt(column: &str, raw: &str) -> StoreError {
    StoreError::Corrupt(format!("unexpected {column} value '{raw}'"))
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(UserRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        role: Role::parse(&role).ok_or_else(|| corrupt("users.role", &role))?,
        is_active: row.try_get("is_active")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: row.try_get("id")?,
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        on_hand: row.try_get("on_hand")?,
        reserved: row.try_get("reserved")?,
        reorder_point: row.try_get("reorder_point")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let movement_type: String = row.try_get("movement_type")?;
    Ok(StockMovement {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        movement_type: MovementType::parse(&movement_type)
            .ok_or_else(|| corrupt("stock_movements.movement_type", &movement_type))?,
        quantity: row.try_get("quantity")?,
        reference: row.try_get("reference")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Order header only; items are attached by the caller
fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        order_number: row.try_get("order_number")?,
        customer_id: row.try_get("customer_id")?,
        status: OrderStatus::parse(&status).ok_or_else(|| corrupt("orders.status", &status))?,
        total_amount: row.try_get("total_amount")?,
        delivery_address: row.try_get("delivery_address")?,
        notes: row.try_get("notes")?,
        items: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn order_item_from_row(row: &PgRow) -> Result<OrderItem, StoreError> {
    Ok(OrderItem {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        product_id: row.try_get("product_id")?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
    })
}

fn order_event_from_row(row: &PgRow) -> Result<OrderStatusEvent, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(OrderStatusEvent {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| corrupt("order_status_events.status", &status))?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Delivery {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        assigned_to_id: row.try_get("assigned_to_id")?,
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| corrupt("deliveries.status", &status))?,
        pickup_address: row.try_get("pickup_address")?,
        delivery_address: row.try_get("delivery_address")?,
        picked_up_at: row.try_get("picked_up_at")?,
        delivered_at: row.try_get("delivered_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn delivery_event_from_row(row: &PgRow) -> Result<DeliveryStatusEvent, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(DeliveryStatusEvent {
        id: row.try_get("id")?,
        delivery_id: row.try_get("delivery_id")?,
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| corrupt("delivery_status_events.status", &status))?,
        notes: row.try_get("notes")?,
        location: row.try_get("location")?,
        created_at: row.try_get("created_at")?,
    })
}

fn token_from_row(row: &PgRow) -> Result<ActionToken, StoreError> {
    let context: String = row.try_get("context")?;
    let order_id: Option<Uuid> = row.try_get("order_id")?;
    let delivery_id: Option<Uuid> = row.try_get("delivery_id")?;
    let target = match (order_id, delivery_id) {
        (Some(id), None) => TokenTarget::Order(id),
        (None, Some(id)) => TokenTarget::Delivery(id),
        _ => return Err(StoreError::Corrupt("action token target is ambiguous".to_string())),
    };

    Ok(ActionToken {
        token: row.try_get("token")?,
        target,
        context: TokenContext::parse(&context)
            .ok_or_else(|| corrupt("action_tokens.context", &context))?,
        expires_at: row.try_get("expires_at")?,
        is_used: row.try_get("is_used")?,
        used_at: row.try_get("used_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const PRODUCT_COLUMNS: &str =
    "id, sku, name, on_hand, reserved, reorder_point, is_active, created_at, updated_at";
const ORDER_COLUMNS: &str =
    "id, order_number, customer_id, status, total_amount, delivery_address, notes, created_at, updated_at";
const DELIVERY_COLUMNS: &str = "id, order_id, assigned_to_id, status, pickup_address, delivery_address, \
     picked_up_at, delivered_at, created_at, updated_at";

impl PgTransaction {
    async fn fetch_product(&mut self, id: Uuid, for_update: bool) -> Result<Option<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn fetch_order(&mut self, id: Uuid, for_update: bool) -> Result<Option<Order>, StoreError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut order = order_from_row(&row)?;
        order.items = self.fetch_items(&[order.id]).await?;
        Ok(Some(order))
    }

    async fn fetch_items(&mut self, order_ids: &[Uuid]) -> Result<Vec<OrderItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, order_id, product_id, quantity, price FROM order_items \
             WHERE order_id = ANY($1) ORDER BY order_id, position",
        )
        .bind(order_ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(order_item_from_row).collect()
    }

    async fn fetch_delivery(
        &mut self,
        column: &str,
        id: Uuid,
        for_update: bool,
    ) -> Result<Option<Delivery>, StoreError> {
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE {column} = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(delivery_from_row).transpose()
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn find_user(&mut self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT id, name, role, is_active FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn upsert_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, role, is_active) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, role = EXCLUDED.role, \
             is_active = EXCLUDED.is_active",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO products (id, sku, name, on_hand, reserved, reorder_point, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.on_hand)
        .bind(product.reserved)
        .bind(product.reorder_point)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        self.fetch_product(id, false).await
    }

    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        self.fetch_product(id, true).await
    }

    async fn update_product_stock(
        &mut self,
        id: Uuid,
        on_hand: i32,
        reserved: i32,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE products SET on_hand = $2, reserved = $3, updated_at = $4 WHERE id = $1")
            .bind(id)
            .bind(on_hand)
            .bind(reserved)
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_product_active(
        &mut self,
        id: Uuid,
        is_active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE products SET is_active = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(is_active)
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_stock_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO stock_movements (id, product_id, movement_type, quantity, reference, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(movement.id)
        .bind(movement.product_id)
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity)
        .bind(&movement.reference)
        .bind(movement.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_stock_movements(&mut self, product_id: Uuid) -> Result<Vec<StockMovement>, StoreError> {
        // v7 ids sort by creation time, which keeps same-instant movements in write order
        let rows = sqlx::query(
            "SELECT id, product_id, movement_type, quantity, reference, created_at \
             FROM stock_movements WHERE product_id = $1 ORDER BY created_at, id",
        )
        .bind(product_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(movement_from_row).collect()
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, order_number, customer_id, status, total_amount, delivery_address, notes, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.customer_id)
        .bind(order.status.as_str())
        .bind(order.total_amount)
        .bind(&order.delivery_address)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, price, position) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(item.id)
            .bind(order.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.price)
            .bind(position as i32)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn get_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        self.fetch_order(id, false).await
    }

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        self.fetch_order(id, true).await
    }

    async fn list_orders(
        &mut self,
        filter: &OrderFilter,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM orders \
             WHERE ($1::text IS NULL OR status = $1) AND ($2::uuid IS NULL OR customer_id = $2)",
        )
        .bind(status)
        .bind(filter.customer_id)
        .fetch_one(&mut *self.tx)
        .await?
        .try_get("total")?;

        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE ($1::text IS NULL OR status = $1) AND ($2::uuid IS NULL OR customer_id = $2) \
             ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(filter.customer_id)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&mut *self.tx)
            .await?;

        let mut orders = rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items = self.fetch_items(&ids).await?;
        for order in &mut orders {
            let (mine, rest): (Vec<_>, Vec<_>) = items.into_iter().partition(|i| i.order_id == order.id);
            order.items = mine;
            items = rest;
        }

        Ok(Page::new(orders, total.max(0) as u64, page))
    }

    async fn update_order_status(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_order_status_event(&mut self, event: &OrderStatusEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO order_status_events (id, order_id, status, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id)
        .bind(event.order_id)
        .bind(event.status.as_str())
        .bind(&event.notes)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_order_status_events(&mut self, order_id: Uuid) -> Result<Vec<OrderStatusEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, order_id, status, notes, created_at FROM order_status_events \
             WHERE order_id = $1 ORDER BY seq",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(order_event_from_row).collect()
    }

    async fn insert_delivery(&mut self, delivery: &Delivery) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO deliveries (id, order_id, assigned_to_id, status, pickup_address, delivery_address, \
             picked_up_at, delivered_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(delivery.id)
        .bind(delivery.order_id)
        .bind(delivery.assigned_to_id)
        .bind(delivery.status.as_str())
        .bind(&delivery.pickup_address)
        .bind(&delivery.delivery_address)
        .bind(delivery.picked_up_at)
        .bind(delivery.delivered_at)
        .bind(delivery.created_at)
        .bind(delivery.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_delivery(&mut self, id: Uuid) -> Result<Option<Delivery>, StoreError> {
        self.fetch_delivery("id", id, false).await
    }

    async fn lock_delivery(&mut self, id: Uuid) -> Result<Option<Delivery>, StoreError> {
        self.fetch_delivery("id", id, true).await
    }

    async fn get_delivery_by_order(&mut self, order_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        self.fetch_delivery("order_id", order_id, false).await
    }

    async fn lock_delivery_by_order(&mut self, order_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        self.fetch_delivery("order_id", order_id, true).await
    }

    async fn update_delivery(&mut self, delivery: &Delivery) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE deliveries SET assigned_to_id = $2, status = $3, pickup_address = $4, \
             delivery_address = $5, picked_up_at = $6, delivered_at = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(delivery.id)
        .bind(delivery.assigned_to_id)
        .bind(delivery.status.as_str())
        .bind(&delivery.pickup_address)
        .bind(&delivery.delivery_address)
        .bind(delivery.picked_up_at)
        .bind(delivery.delivered_at)
        .bind(delivery.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_delivery_status_event(&mut self, event: &DeliveryStatusEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO delivery_status_events (id, delivery_id, status, notes, location, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.delivery_id)
        .bind(event.status.as_str())
        .bind(&event.notes)
        .bind(&event.location)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_delivery_status_events(&mut self, delivery_id: Uuid) -> Result<Vec<DeliveryStatusEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, delivery_id, status, notes, location, created_at FROM delivery_status_events \
             WHERE delivery_id = $1 ORDER BY seq",
        )
        .bind(delivery_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(delivery_event_from_row).collect()
    }

    async fn insert_action_token(&mut self, token: &ActionToken) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO action_tokens (token, order_id, delivery_id, context, expires_at, is_used, used_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&token.token)
        .bind(token.target.order_id())
        .bind(token.target.delivery_id())
        .bind(token.context.as_str())
        .bind(token.expires_at)
        .bind(token.is_used)
        .bind(token.used_at)
        .bind(token.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_action_token(&mut self, token: &str) -> Result<Option<ActionToken>, StoreError> {
        let row = sqlx::query(
            "SELECT token, order_id, delivery_id, context, expires_at, is_used, used_at, created_at \
             FROM action_tokens WHERE token = $1 FOR UPDATE",
        )
        .bind(token)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn mark_action_token_used(&mut self, token: &str, used_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE action_tokens SET is_used = TRUE, used_at = $2 WHERE token = $1")
            .bind(token)
            .bind(used_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
