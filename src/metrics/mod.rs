// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the fulfillment engine
// ============================================================================
//
// Covers:
// - Order creation and status transitions
// - Delivery transitions
// - Stock ledger movements and low-stock alerts
// - Action token redemptions
// - Operation failures by error class, operation latency
// - Notification dispatch and broker circuit breaker state
//
// Scraped via /metrics (see server.rs)
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub orders_created: IntCounter,
    pub order_transitions: IntCounterVec,
    pub delivery_transitions: IntCounterVec,

    pub stock_movements: IntCounterVec,
    pub low_stock_alerts: IntCounter,

    pub token_redemptions: IntCounterVec,

    pub operation_failures: IntCounterVec,
    pub operation_duration: HistogramVec,

    pub notifications_published: IntCounterVec,
    pub notification_failures: IntCounterVec,
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Orders placed and reserved")?;
        registry.register(Box::new(orders_created.clone()))?;

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let delivery_transitions = IntCounterVec::new(
            Opts::new("delivery_transitions_total", "Committed delivery status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(delivery_transitions.clone()))?;

        let stock_movements = IntCounterVec::new(
            Opts::new("stock_movements_total", "Committed stock ledger movements"),
            &["type"],
        )?;
        registry.register(Box::new(stock_movements.clone()))?;

        let low_stock_alerts = IntCounter::new(
            "low_stock_alerts_total",
            "Low-stock notifications raised after commit",
        )?;
        registry.register(Box::new(low_stock_alerts.clone()))?;

        let token_redemptions = IntCounterVec::new(
            Opts::new("token_redemptions_total", "Action token scans by outcome"),
            &["context", "outcome"],
        )?;
        registry.register(Box::new(token_redemptions.clone()))?;

        let operation_failures = IntCounterVec::new(
            Opts::new("operation_failures_total", "Rejected or aborted engine operations"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(operation_failures.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new("operation_duration_seconds", "Engine operation latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let notifications_published = IntCounterVec::new(
            Opts::new("notifications_published_total", "Notifications handed to the publisher"),
            &["topic"],
        )?;
        registry.register(Box::new(notifications_published.clone()))?;

        let notification_failures = IntCounterVec::new(
            Opts::new("notification_failures_total", "Notifications the publisher rejected"),
            &["topic"],
        )?;
        registry.register(Box::new(notification_failures.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Broker circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            order_transitions,
            delivery_transitions,
            stock_movements,
            low_stock_alerts,
            token_redemptions,
            operation_failures,
            operation_duration,
            notifications_published,
            notification_failures,
            circuit_breaker_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_transition(&self, from: &str, to: &str) {
        self.order_transitions.with_label_values(&[from, to]).inc();
    }

    pub fn record_delivery_transition(&self, from: &str, to: &str) {
        self.delivery_transitions.with_label_values(&[from, to]).inc();
    }

    pub fn record_stock_movement(&self, movement_type: &str) {
        self.stock_movements.with_label_values(&[movement_type]).inc();
    }

    pub fn record_redemption(&self, context: &str, outcome: &str) {
        self.token_redemptions.with_label_values(&[context, outcome]).inc();
    }

    pub fn record_failure(&self, operation: &str, kind: &str) {
        self.operation_failures.with_label_values(&[operation, kind]).inc();
    }

    pub fn observe_duration(&self, operation: &str, seconds: f64) {
        self.operation_duration.with_label_values(&[operation]).observe(seconds);
    }

    pub fn record_publish(&self, topic: &str, success: bool) {
        if success {
            self.notifications_published.with_label_values(&[topic]).inc();
        } else {
            self.notification_failures.with_label_values(&[topic]).inc();
        }
    }
}
