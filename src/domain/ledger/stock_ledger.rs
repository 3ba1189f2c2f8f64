use std::sync::Arc;

use uuid::Uuid;

use super::errors::LedgerError;
use super::value_objects::{MovementType, NewProduct, Product, Reconciliation, StockLevels, StockMovement};
use crate::clock::Clock;
use crate::store::UnitOfWork;

// ============================================================================
// Stock Ledger
// ============================================================================
//
// The only writer of `on_hand`/`reserved`. Every mutation goes through
// `apply_movement`, which:
// 1. Locks the product row
// 2. Checks the movement against the current counters
// 3. Writes the new counters and exactly one StockMovement
//
// All of it inside the caller's unit of work, so a failure anywhere in the
// enclosing operation leaves no ledger trace.
//
// ============================================================================

pub struct StockLedger {
    clock: Arc<dyn Clock>,
}

impl StockLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub async fn apply_movement(
        &self,
        uow: &mut UnitOfWork,
        product_id: Uuid,
        movement_type: MovementType,
        quantity: i32,
        reference: &str,
    ) -> Result<Product, LedgerError> {
        let quantity_ok = match movement_type {
            MovementType::Adjustment => quantity >= 0,
            _ => quantity > 0,
        };
        if !quantity_ok {
            return Err(LedgerError::InvalidQuantity {
                movement_type,
                quantity,
            });
        }

        let mut product = uow
            .tx()
            .lock_product(product_id)
            .await?
            .ok_or(LedgerError::ProductNotFound(product_id))?;

        let invalid = |reason: &str| LedgerError::InvalidMovement {
            product_id,
            movement_type,
            quantity,
            reason: reason.to_string(),
        };

        let (on_hand, reserved) = match movement_type {
            MovementType::In => {
                let on_hand = product
                    .on_hand
                    .checked_add(quantity)
                    .ok_or_else(|| invalid("on_hand would overflow"))?;
                (on_hand, product.reserved)
            }
            MovementType::Out => {
                if product.on_hand < quantity {
                    return Err(LedgerError::InsufficientStock {
                        product_id,
                        requested: quantity,
                        available: product.on_hand,
                    });
                }
                let on_hand = product.on_hand - quantity;
                if on_hand < product.reserved {
                    return Err(invalid("on_hand would drop below reserved stock"));
                }
                (on_hand, product.reserved)
            }
            MovementType::Reserved => {
                if product.available() < quantity {
                    return Err(LedgerError::InsufficientStock {
                        product_id,
                        requested: quantity,
                        available: product.available(),
                    });
                }
                (product.on_hand, product.reserved + quantity)
            }
            MovementType::Released => {
                if product.reserved < quantity {
                    return Err(invalid("release exceeds reserved stock"));
                }
                (product.on_hand, product.reserved - quantity)
            }
            MovementType::Adjustment => {
                if quantity < product.reserved {
                    return Err(invalid("on_hand would drop below reserved stock"));
                }
                (quantity, product.reserved)
            }
        };

        let now = self.clock.now();
        uow.tx()
            .update_product_stock(product_id, on_hand, reserved, now)
            .await?;

        let movement = StockMovement {
            id: Uuid::now_v7(),
            product_id,
            movement_type,
            quantity,
            reference: reference.to_string(),
            created_at: now,
        };
        uow.tx().insert_stock_movement(&movement).await?;

        product.on_hand = on_hand;
        product.reserved = reserved;
        product.updated_at = now;
        uow.track_product(&product);
        uow.record_movement(&movement);

        tracing::debug!(
            product_id = %product_id,
            movement = %movement_type,
            quantity = quantity,
            on_hand = on_hand,
            reserved = reserved,
            reference = reference,
            "Stock movement applied"
        );

        Ok(product)
    }

    /// Create a catalog entry; initial stock is booked as an IN movement
    pub async fn register_product(
        &self,
        uow: &mut UnitOfWork,
        new_product: NewProduct,
    ) -> Result<Product, LedgerError> {
        if new_product.sku.trim().is_empty() {
            return Err(LedgerError::InvalidProduct("sku must not be empty".to_string()));
        }
        if new_product.reorder_point < 0 {
            return Err(LedgerError::InvalidProduct(format!(
                "reorder point must not be negative, got {}",
                new_product.reorder_point
            )));
        }
        if new_product.initial_stock < 0 {
            return Err(LedgerError::InvalidQuantity {
                movement_type: MovementType::In,
                quantity: new_product.initial_stock,
            });
        }

        let now = self.clock.now();
        let product = Product {
            id: Uuid::now_v7(),
            sku: new_product.sku.trim().to_string(),
            name: new_product.name,
            on_hand: 0,
            reserved: 0,
            reorder_point: new_product.reorder_point,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        uow.tx().insert_product(&product).await?;

        if new_product.initial_stock > 0 {
            let reference = format!("initial-stock:{}", product.sku);
            return self
                .apply_movement(uow, product.id, MovementType::In, new_product.initial_stock, &reference)
                .await;
        }

        uow.track_product(&product);
        Ok(product)
    }

    /// Replay the movement history and compare it with the stored counters
    pub async fn reconcile(
        &self,
        uow: &mut UnitOfWork,
        product_id: Uuid,
    ) -> Result<Reconciliation, LedgerError> {
        let product = uow
            .tx()
            .get_product(product_id)
            .await?
            .ok_or(LedgerError::ProductNotFound(product_id))?;
        let movements = uow.tx().list_stock_movements(product_id).await?;

        Ok(Reconciliation {
            product_id,
            current: product.levels(),
            replayed: StockLevels::replay(&movements),
            movement_count: movements.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::domain::errors::{Classify, ErrorKind};
    use crate::store::{InMemoryStore, Store};

    async fn seeded(store: &InMemoryStore, ledger: &StockLedger, on_hand: i32) -> Product {
        let mut uow = UnitOfWork::begin(store).await.unwrap();
        let product = ledger
            .register_product(
                &mut uow,
                NewProduct {
                    sku: format!("SKU-{}", Uuid::new_v4().simple()),
                    name: "Widget".to_string(),
                    reorder_point: 2,
                    initial_stock: on_hand,
                },
            )
            .await
            .unwrap();
        uow.commit(chrono::Utc::now()).await.unwrap();
        product
    }

    fn ledger() -> StockLedger {
        StockLedger::new(Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_reserve_then_consume() {
        let store = InMemoryStore::default();
        let ledger = ledger();
        let product = seeded(&store, &ledger, 10).await;

        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        let p = ledger
            .apply_movement(&mut uow, product.id, MovementType::Reserved, 4, "ORD-1")
            .await
            .unwrap();
        assert_eq!((p.on_hand, p.reserved), (10, 4));

        ledger
            .apply_movement(&mut uow, product.id, MovementType::Released, 4, "ORD-1")
            .await
            .unwrap();
        let p = ledger
            .apply_movement(&mut uow, product.id, MovementType::Out, 4, "ORD-1")
            .await
            .unwrap();
        assert_eq!((p.on_hand, p.reserved), (6, 0));
        assert_eq!(
            uow.movements(),
            &[MovementType::Reserved, MovementType::Released, MovementType::Out]
        );
    }

    #[tokio::test]
    async fn test_reservation_beyond_available_is_rejected() {
        let store = InMemoryStore::default();
        let ledger = ledger();
        let product = seeded(&store, &ledger, 5).await;

        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        ledger
            .apply_movement(&mut uow, product.id, MovementType::Reserved, 3, "ORD-1")
            .await
            .unwrap();
        let err = ledger
            .apply_movement(&mut uow, product.id, MovementType::Reserved, 3, "ORD-2")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(err.shortfall(), Some(1));
    }

    #[tokio::test]
    async fn test_release_beyond_reserved_is_invalid() {
        let store = InMemoryStore::default();
        let ledger = ledger();
        let product = seeded(&store, &ledger, 5).await;

        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        let err = ledger
            .apply_movement(&mut uow, product.id, MovementType::Released, 1, "ORD-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidMovement { .. }));
    }

    #[tokio::test]
    async fn test_adjustment_cannot_undercut_reservations() {
        let store = InMemoryStore::default();
        let ledger = ledger();
        let product = seeded(&store, &ledger, 5).await;

        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        ledger
            .apply_movement(&mut uow, product.id, MovementType::Reserved, 4, "ORD-1")
            .await
            .unwrap();
        let err = ledger
            .apply_movement(&mut uow, product.id, MovementType::Adjustment, 3, "count")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidMovement { .. }));

        let p = ledger
            .apply_movement(&mut uow, product.id, MovementType::Adjustment, 4, "count")
            .await
            .unwrap();
        assert_eq!((p.on_hand, p.reserved), (4, 4));
    }

    #[tokio::test]
    async fn test_non_positive_quantity_rejected() {
        let store = InMemoryStore::default();
        let ledger = ledger();
        let product = seeded(&store, &ledger, 5).await;

        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        let err = ledger
            .apply_movement(&mut uow, product.id, MovementType::In, 0, "dock")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let store = InMemoryStore::default();
        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        let err = ledger()
            .apply_movement(&mut uow, Uuid::new_v4(), MovementType::In, 1, "dock")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ProductNotFound(_)));
    }

    #[tokio::test]
    async fn test_reconciliation_balances_after_history() {
        let store = InMemoryStore::default();
        let ledger = ledger();
        let product = seeded(&store, &ledger, 8).await;

        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        ledger
            .apply_movement(&mut uow, product.id, MovementType::Reserved, 2, "ORD-1")
            .await
            .unwrap();
        ledger
            .apply_movement(&mut uow, product.id, MovementType::Adjustment, 6, "count")
            .await
            .unwrap();
        uow.commit(chrono::Utc::now()).await.unwrap();

        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        let report = ledger.reconcile(&mut uow, product.id).await.unwrap();
        assert!(report.is_balanced());
        assert_eq!(report.movement_count, 3);
        assert_eq!(report.current, StockLevels { on_hand: 6, reserved: 2 });
    }

    #[tokio::test]
    async fn test_failed_movement_leaves_nothing_after_rollback() {
        let store = InMemoryStore::default();
        let ledger = ledger();
        let product = seeded(&store, &ledger, 5).await;

        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        ledger
            .apply_movement(&mut uow, product.id, MovementType::Reserved, 2, "ORD-1")
            .await
            .unwrap();
        assert!(ledger
            .apply_movement(&mut uow, product.id, MovementType::Out, 99, "ORD-1")
            .await
            .is_err());
        uow.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let p = tx.get_product(product.id).await.unwrap().unwrap();
        assert_eq!((p.on_hand, p.reserved), (5, 0));
        assert_eq!(tx.list_stock_movements(product.id).await.unwrap().len(), 1);
    }
}
