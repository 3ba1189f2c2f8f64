// ============================================================================
// Fulfillment Engine - one transaction per external call
// ============================================================================
//
// Every write operation follows the same shape:
// 1. Validate input (no transaction yet)
// 2. Begin a unit of work, run the component(s), commit
// 3. Record metrics and hand the outbox to the notifier
//
// Any error drops the unit of work, which rolls the transaction back, so no
// partial ledger or status change is ever committed. Transient errors are
// surfaced unchanged; callers retry them with `utils::retry_on_transient`.
//
// ============================================================================


use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::domain::delivery::{CreateDelivery, Delivery, DeliveryError, DeliveryLifecycleManager, DeliveryStatusEvent, DeliveryTransition, UpdateDeliveryStatus};
use crate::domain::errors::Classify;
use crate::domain::identity::{Principal, UserRecord};
use crate::domain::ledger::{LedgerError, MovementType, NewProduct, Product, Reconciliation, StockLedger, StockMovement};
use crate::domain::order::{Order, OrderError, OrderFilter, OrderLifecycleManager, OrderStatus, OrderStatusEvent, OrderTransition, PlaceOrder, TransitionOrder};
use crate::domain::token::{ActionTokenService, IssuedToken, RedeemOutcome, Redemption, TokenContext, TokenError, TokenTarget};
use crate::messaging::{EventPublisher, Notifier, Topic};
use crate::metrics::Metrics;
use crate::store::{Page, PageRequest, Store, StoreError, UnitOfWork};

pub struct FulfillmentEngine {
    store: Arc<dyn Store>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    config: EngineConfig,
    ledger: Arc<StockLedger>,
    orders: Arc<OrderLifecycleManager>,
    deliveries: Arc<DeliveryLifecycleManager>,
    tokens: ActionTokenService,
}

impl FulfillmentEngine {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        config: EngineConfig,
    ) -> Self {
        let ledger = Arc::new(StockLedger::new(clock.clone()));
        let orders = Arc::new(OrderLifecycleManager::new(
            ledger.clone(),
            clock.clone(),
            config.auto_confirm_orders,
        ));
        let deliveries = Arc::new(DeliveryLifecycleManager::new(orders.clone(), clock.clone()));
        let tokens = ActionTokenService::new(deliveries.clone(), clock.clone(), config.scan_base_url.clone());

        Self {
            store,
            notifier: Notifier::new(publisher, metrics.clone()),
            clock,
            metrics,
            config,
            ledger,
            orders,
            deliveries,
            tokens,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Catalog and stock
    // ------------------------------------------------------------------

    pub async fn register_product(&self, new_product: NewProduct) -> Result<Product, LedgerError> {
        let started = Instant::now();
        let result: Result<Product, LedgerError> = async {
            let mut uow = self.begin().await?;
            let product = self.ledger.register_product(&mut uow, new_product).await?;
            self.commit(uow).await?;
            Ok(product)
        }
        .await;
        self.finish("register_product", started, result)
    }

    pub async fn receive_stock(&self, product_id: Uuid, quantity: i32, reference: &str) -> Result<Product, LedgerError> {
        let started = Instant::now();
        let result = self
            .apply_stock_movement(product_id, MovementType::In, quantity, reference)
            .await;
        self.finish("receive_stock", started, result)
    }

    /// Administrative count correction: `on_hand` becomes the counted quantity
    pub async fn adjust_stock(&self, product_id: Uuid, on_hand: i32, reference: &str) -> Result<Product, LedgerError> {
        let started = Instant::now();
        let result = self
            .apply_stock_movement(product_id, MovementType::Adjustment, on_hand, reference)
            .await;
        self.finish("adjust_stock", started, result)
    }

    pub async fn set_product_active(&self, product_id: Uuid, is_active: bool) -> Result<Product, LedgerError> {
        let started = Instant::now();
        let result: Result<Product, LedgerError> = async {
            let mut uow = self.begin().await?;
            if !uow
                .tx()
                .set_product_active(product_id, is_active, self.clock.now())
                .await?
            {
                return Err(LedgerError::ProductNotFound(product_id));
            }
            let product = uow
                .tx()
                .get_product(product_id)
                .await?
                .ok_or(LedgerError::ProductNotFound(product_id))?;
            self.commit(uow).await?;
            tracing::info!(product_id = %product_id, is_active, "Product activation changed");
            Ok(product)
        }
        .await;
        self.finish("set_product_active", started, result)
    }

    /// Mirror a user from the identity provider
    pub async fn sync_principal(&self, user: UserRecord) -> Result<(), StoreError> {
        let started = Instant::now();
        let result: Result<(), StoreError> = async {
            let mut uow = self.begin().await?;
            uow.tx().upsert_user(&user).await?;
            self.commit(uow).await?;
            tracing::debug!(user_id = %user.id, role = %user.role.as_str(), "User synced");
            Ok(())
        }
        .await;
        self.finish("sync_principal", started, result)
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    pub async fn create_order(&self, command: PlaceOrder) -> Result<Order, OrderError> {
        let started = Instant::now();
        let result: Result<Order, OrderError> = async {
            command.validate()?;
            let mut uow = self.begin().await?;
            let order = self.orders.create(&mut uow, command).await?;
            self.commit(uow).await?;

            self.metrics.orders_created.inc();
            if order.status == OrderStatus::Confirmed {
                self.metrics
                    .record_order_transition(OrderStatus::Pending.as_str(), OrderStatus::Confirmed.as_str());
            }
            Ok(order)
        }
        .await;
        self.finish("create_order", started, result)
    }

    /// Move an order through its transition table. Reaching
    /// READY_FOR_DISPATCH also creates its delivery when configured to.
    pub async fn transition_order_status(&self, command: TransitionOrder) -> Result<Order, OrderError> {
        let started = Instant::now();
        let result: Result<Order, OrderError> = async {
            let mut uow = self.begin().await?;
            let transition = self
                .orders
                .transition(&mut uow, command.order_id, command.target, command.notes)
                .await?;

            if transition.order.status == OrderStatus::ReadyForDispatch && self.config.auto_create_delivery {
                self.deliveries
                    .ensure_for_order(&mut uow, &transition.order, self.config.warehouse_address.clone())
                    .await?;
            }

            self.commit(uow).await?;
            self.record_order_transition(&transition);
            Ok(transition.order)
        }
        .await;
        self.finish("transition_order_status", started, result)
    }

    // ------------------------------------------------------------------
    // Deliveries
    // ------------------------------------------------------------------

    pub async fn create_delivery(&self, command: CreateDelivery) -> Result<Delivery, DeliveryError> {
        let started = Instant::now();
        let result: Result<Delivery, DeliveryError> = async {
            let mut uow = self.begin().await?;
            let delivery = self.deliveries.create(&mut uow, command).await?;
            self.commit(uow).await?;
            Ok(delivery)
        }
        .await;
        self.finish("create_delivery", started, result)
    }

    pub async fn assign_delivery(&self, delivery_id: Uuid, assignee_id: Uuid) -> Result<Delivery, DeliveryError> {
        let started = Instant::now();
        let result: Result<Delivery, DeliveryError> = async {
            let mut uow = self.begin().await?;
            let transition = self.deliveries.assign(&mut uow, delivery_id, assignee_id).await?;
            self.commit(uow).await?;
            self.record_delivery_transition(&transition);
            Ok(transition.delivery)
        }
        .await;
        self.finish("assign_delivery", started, result)
    }

    pub async fn update_delivery_status(
        &self,
        command: UpdateDeliveryStatus,
        actor: &Principal,
    ) -> Result<Delivery, DeliveryError> {
        let started = Instant::now();
        let result: Result<Delivery, DeliveryError> = async {
            let mut uow = self.begin().await?;
            let transition = self.deliveries.update_status(&mut uow, command, actor).await?;
            self.commit(uow).await?;
            self.record_delivery_transition(&transition);
            Ok(transition.delivery)
        }
        .await;
        self.finish("update_delivery_status", started, result)
    }

    // ------------------------------------------------------------------
    // Action tokens
    // ------------------------------------------------------------------

    /// Issue a scan token; `ttl_hours` falls back to the configured default
    pub async fn issue_action_token(
        &self,
        target: TokenTarget,
        context: TokenContext,
        ttl_hours: Option<i64>,
    ) -> Result<IssuedToken, TokenError> {
        let started = Instant::now();
        let ttl_hours = ttl_hours.unwrap_or(self.config.default_token_ttl_hours);
        let result: Result<IssuedToken, TokenError> = async {
            if ttl_hours <= 0 {
                return Err(TokenError::InvalidTtl(ttl_hours));
            }
            let mut uow = self.begin().await?;
            let issued = self.tokens.issue(&mut uow, target, context, ttl_hours).await?;
            self.commit(uow).await?;
            Ok(issued)
        }
        .await;
        self.finish("issue_action_token", started, result)
    }

    pub async fn redeem_action_token(
        &self,
        token: &str,
        actor: Option<&Principal>,
    ) -> Result<RedeemOutcome, TokenError> {
        let started = Instant::now();
        let result: Result<Redemption, TokenError> = async {
            let mut uow = self.begin().await?;
            let redemption = self.tokens.redeem(&mut uow, token, actor).await?;
            self.commit(uow).await?;
            Ok(redemption)
        }
        .await;

        let result = match result {
            Ok(redemption) => {
                let outcome = if redemption.outcome.changed { "applied" } else { "unchanged" };
                self.metrics
                    .record_redemption(redemption.context.as_str(), outcome);
                if let Some(transition) = &redemption.transition {
                    self.record_delivery_transition(transition);
                }
                Ok(redemption.outcome)
            }
            Err(e) => {
                self.metrics.record_redemption("unknown", e.kind().as_str());
                Err(e)
            }
        };
        self.finish("redeem_action_token", started, result)
    }

    // ------------------------------------------------------------------
    // Read models
    // ------------------------------------------------------------------

    pub async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, StoreError> {
        let mut tx = self.store.begin().await?;
        let product = tx.get_product(product_id).await?;
        tx.rollback().await?;
        Ok(product)
    }

    pub async fn stock_movements(&self, product_id: Uuid) -> Result<Vec<StockMovement>, StoreError> {
        let mut tx = self.store.begin().await?;
        let movements = tx.list_stock_movements(product_id).await?;
        tx.rollback().await?;
        Ok(movements)
    }

    /// Replay a product's movements and compare with its counters
    pub async fn reconcile_product(&self, product_id: Uuid) -> Result<Reconciliation, LedgerError> {
        let mut uow = self.begin().await?;
        let report = self.ledger.reconcile(&mut uow, product_id).await?;
        uow.rollback().await?;

        if !report.is_balanced() {
            tracing::error!(
                product_id = %product_id,
                current = ?report.current,
                replayed = ?report.replayed,
                "Stock ledger out of balance"
            );
        }
        Ok(report)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut tx = self.store.begin().await?;
        let order = tx.get_order(order_id).await?;
        tx.rollback().await?;
        Ok(order)
    }

    pub async fn list_orders(&self, filter: OrderFilter, page: PageRequest) -> Result<Page<Order>, StoreError> {
        let mut tx = self.store.begin().await?;
        let orders = tx.list_orders(&filter, page).await?;
        tx.rollback().await?;
        Ok(orders)
    }

    pub async fn order_history(&self, order_id: Uuid) -> Result<Vec<OrderStatusEvent>, StoreError> {
        let mut tx = self.store.begin().await?;
        let events = tx.list_order_status_events(order_id).await?;
        tx.rollback().await?;
        Ok(events)
    }

    pub async fn get_delivery(&self, delivery_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        let mut tx = self.store.begin().await?;
        let delivery = tx.get_delivery(delivery_id).await?;
        tx.rollback().await?;
        Ok(delivery)
    }

    pub async fn get_delivery_for_order(&self, order_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        let mut tx = self.store.begin().await?;
        let delivery = tx.get_delivery_by_order(order_id).await?;
        tx.rollback().await?;
        Ok(delivery)
    }

    pub async fn delivery_history(&self, delivery_id: Uuid) -> Result<Vec<DeliveryStatusEvent>, StoreError> {
        let mut tx = self.store.begin().await?;
        let events = tx.list_delivery_status_events(delivery_id).await?;
        tx.rollback().await?;
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    async fn apply_stock_movement(
        &self,
        product_id: Uuid,
        movement_type: MovementType,
        quantity: i32,
        reference: &str,
    ) -> Result<Product, LedgerError> {
        let mut uow = self.begin().await?;
        let product = self
            .ledger
            .apply_movement(&mut uow, product_id, movement_type, quantity, reference)
            .await?;
        self.commit(uow).await?;
        Ok(product)
    }

    async fn begin(&self) -> Result<UnitOfWork, StoreError> {
        UnitOfWork::begin(self.store.as_ref()).await
    }

    /// Commit, then record ledger metrics and dispatch the outbox
    async fn commit(&self, uow: UnitOfWork) -> Result<(), StoreError> {
        let movements = uow.movements().to_vec();
        let notifications = uow.commit(self.clock.now()).await?;

        for movement_type in movements {
            self.metrics.record_stock_movement(movement_type.as_str());
        }
        let low_stock = notifications
            .iter()
            .filter(|n| n.topic == Topic::LowStock)
            .count();
        if low_stock > 0 {
            self.metrics.low_stock_alerts.inc_by(low_stock as u64);
            tracing::warn!(products = low_stock, "Stock at or below reorder point");
        }

        self.notifier.dispatch(notifications).await;
        Ok(())
    }

    fn record_order_transition(&self, transition: &OrderTransition) {
        self.metrics
            .record_order_transition(transition.from.as_str(), transition.order.status.as_str());
    }

    fn record_delivery_transition(&self, transition: &DeliveryTransition) {
        if transition.from != transition.delivery.status {
            self.metrics
                .record_delivery_transition(transition.from.as_str(), transition.delivery.status.as_str());
        }
        if let Some(order) = &transition.order {
            self.record_order_transition(order);
        }
    }

    fn finish<T, E>(&self, operation: &str, started: Instant, result: Result<T, E>) -> Result<T, E>
    where
        E: Classify + std::fmt::Display,
    {
        self.metrics
            .observe_duration(operation, started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            let kind = e.kind();
            self.metrics.record_failure(operation, kind.as_str());
            tracing::warn!(operation = operation, kind = %kind, error = %e, "Operation rejected");
        }
        result
    }
}
