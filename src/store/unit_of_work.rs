use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Store, StoreError, Transaction};
use crate::domain::ledger::{MovementType, Product, StockMovement};
use crate::messaging::Notification;

/// One transaction plus the side effects it will release on commit.
///
/// Notifications queued here are only handed back by `commit`; a rollback
/// (explicit or by drop) discards them with the writes.
pub struct UnitOfWork {
    tx: Box<dyn Transaction>,
    outbox: Vec<Notification>,
    touched_products: BTreeMap<Uuid, Product>,
    movements: Vec<MovementType>,
}

impl UnitOfWork {
    pub async fn begin(store: &dyn Store) -> Result<Self, StoreError> {
        Ok(Self {
            tx: store.begin().await?,
            outbox: Vec::new(),
            touched_products: BTreeMap::new(),
            movements: Vec::new(),
        })
    }

    pub fn tx(&mut self) -> &mut dyn Transaction {
        self.tx.as_mut()
    }

    pub fn enqueue(&mut self, notification: Notification) {
        self.outbox.push(notification);
    }

    /// Remember the latest committed-to-be state of a product the ledger wrote
    pub fn track_product(&mut self, product: &Product) {
        self.touched_products.insert(product.id, product.clone());
    }

    pub fn record_movement(&mut self, movement: &StockMovement) {
        self.movements.push(movement.movement_type);
    }

    /// Movement types written so far, in write order
    pub fn movements(&self) -> &[MovementType] {
        &self.movements
    }

    pub fn pending(&self) -> &[Notification] {
        &self.outbox
    }

    /// Commit and return the notifications to dispatch, low-stock alerts last
    pub async fn commit(self, at: DateTime<Utc>) -> Result<Vec<Notification>, StoreError> {
        let Self {
            tx,
            mut outbox,
            touched_products,
            ..
        } = self;

        tx.commit().await?;

        outbox.extend(
            touched_products
                .values()
                .filter(|p| p.is_low_stock())
                .map(|p| Notification::low_stock(p, at)),
        );
        Ok(outbox)
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Topic;
    use crate::store::InMemoryStore;

    fn product(on_hand: i32, reorder_point: i32) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            sku: format!("SKU-{}", Uuid::new_v4().simple()),
            name: "Widget".to_string(),
            on_hand,
            reserved: 0,
            reorder_point,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_low_stock_alert_raised_once_per_product() {
        let store = InMemoryStore::default();
        let mut uow = UnitOfWork::begin(&store).await.unwrap();

        let mut low = product(5, 5);
        uow.track_product(&low);
        low.on_hand = 3;
        uow.track_product(&low);
        uow.track_product(&product(50, 5));

        let sent = uow.commit(Utc::now()).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, Topic::LowStock);
        assert_eq!(sent[0].payload["on_hand"], 3);
    }

    #[tokio::test]
    async fn test_rollback_discards_outbox() {
        let store = InMemoryStore::default();
        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        uow.track_product(&product(0, 5));
        assert!(uow.rollback().await.is_ok());

        let uow = UnitOfWork::begin(&store).await.unwrap();
        assert!(uow.commit(Utc::now()).await.unwrap().is_empty());
    }
}
