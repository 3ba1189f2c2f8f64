use std::sync::Arc;

use rust_decimal::Decimal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use fulfillment_engine::clock::{Clock, SystemClock};
use fulfillment_engine::config::EngineConfig;
use fulfillment_engine::domain::delivery::{DeliveryStatus, UpdateDeliveryStatus};
use fulfillment_engine::domain::identity::{Role, UserRecord};
use fulfillment_engine::domain::ledger::NewProduct;
use fulfillment_engine::domain::order::{OrderLine, OrderStatus, PlaceOrder, TransitionOrder};
use fulfillment_engine::domain::token::{TokenContext, TokenTarget};
use fulfillment_engine::messaging::{BroadcastPublisher, EventPublisher, KafkaPublisher};
use fulfillment_engine::metrics::{self, Metrics};
use fulfillment_engine::store::{InMemoryStore, PgStore, Store};
use fulfillment_engine::utils::retry_on_transient;
use fulfillment_engine::FulfillmentEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fulfillment_engine=debug")),
        )
        .init();

    let config = EngineConfig::from_env()?;
    tracing::info!(
        postgres = config.database_url.is_some(),
        kafka = config.kafka_brokers.is_some(),
        "Starting fulfillment engine"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let registry = metrics.registry().clone();
    let metrics_port = config.metrics_port;
    // actix-web runs its own system; keep it off the main runtime
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start metrics runtime");
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(registry, metrics_port).await {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    });

    // === 2. Store ===
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.database_max_connections, config.lock_timeout).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(InMemoryStore::new(config.lock_timeout))
        }
    };

    // === 3. Event publisher ===
    let publisher: Arc<dyn EventPublisher> = match &config.kafka_brokers {
        Some(brokers) => Arc::new(KafkaPublisher::new(brokers, &config.topic_prefix, metrics.clone())?),
        None => {
            let publisher = BroadcastPublisher::default();
            tokio::spawn(BroadcastPublisher::consume(publisher.subscribe(), |notification| {
                tracing::info!(
                    topic = notification.topic.as_str(),
                    key = %notification.key,
                    event_type = %notification.event_type,
                    "Notification"
                );
            }));
            Arc::new(publisher)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = FulfillmentEngine::new(store, publisher, clock, metrics.clone(), config.clone());

    // === 4. Walk one order through its lifecycle ===
    run_demo(&engine, &config).await?;

    tracing::info!(
        orders_created = metrics.orders_created.get(),
        low_stock_alerts = metrics.low_stock_alerts.get(),
        "Demo complete"
    );
    Ok(())
}

async fn run_demo(engine: &FulfillmentEngine, config: &EngineConfig) -> anyhow::Result<()> {
    let customer = UserRecord {
        id: Uuid::new_v4(),
        name: "Demo customer".to_string(),
        role: Role::Customer,
        is_active: true,
    };
    let courier = UserRecord {
        id: Uuid::new_v4(),
        name: "Demo courier".to_string(),
        role: Role::Delivery,
        is_active: true,
    };
    engine.sync_principal(customer.clone()).await?;
    engine.sync_principal(courier.clone()).await?;

    let sku = format!("DEMO-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let product = engine
        .register_product(NewProduct {
            sku,
            name: "Demo widget".to_string(),
            reorder_point: 3,
            initial_stock: 5,
        })
        .await?;

    let command = PlaceOrder::new(
        customer.id,
        vec![OrderLine {
            product_id: product.id,
            quantity: 3,
            price: Decimal::new(1999, 2),
        }],
    )
    .with_delivery_address("221B Baker Street");
    let order = retry_on_transient(&config.retry, "create_order", move |_| engine.create_order(command.clone())).await?;
    tracing::info!(order_number = %order.order_number, status = %order.status, "Order placed");

    for target in [OrderStatus::Preparing, OrderStatus::ReadyForDispatch] {
        retry_on_transient(&config.retry, "transition_order_status", move |_| {
            engine.transition_order_status(TransitionOrder::new(order.id, target))
        })
        .await?;
    }

    let delivery = engine
        .get_delivery_for_order(order.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no delivery for order {}", order.id))?;
    engine.assign_delivery(delivery.id, courier.id).await?;
    engine
        .transition_order_status(TransitionOrder::new(order.id, OrderStatus::OutForDelivery))
        .await?;

    let courier = courier.principal();
    let pickup = engine
        .issue_action_token(TokenTarget::Delivery(delivery.id), TokenContext::Pickup, None)
        .await?;
    tracing::info!(payload = %pickup.payload, "Pickup QR issued");
    engine.redeem_action_token(&pickup.token, Some(&courier)).await?;

    engine
        .update_delivery_status(
            UpdateDeliveryStatus::new(delivery.id, DeliveryStatus::InTransit).with_location("On route"),
            &courier,
        )
        .await?;

    let deliver = engine
        .issue_action_token(TokenTarget::Delivery(delivery.id), TokenContext::Deliver, None)
        .await?;
    let outcome = engine.redeem_action_token(&deliver.token, Some(&courier)).await?;
    tracing::info!(state = ?outcome.state, "Delivery completed");

    let report = engine.reconcile_product(product.id).await?;
    tracing::info!(
        balanced = report.is_balanced(),
        on_hand = report.current.on_hand,
        reserved = report.current.reserved,
        "Ledger reconciled"
    );
    Ok(())
}
