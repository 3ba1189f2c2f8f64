use std::sync::Arc;

use chrono::Duration;

use super::errors::TokenError;
use super::value_objects::{
    generate_token, ActionToken, IssuedToken, RedeemOutcome, ScannedStatus, TokenContext, TokenTarget,
};
use crate::clock::Clock;
use crate::domain::delivery::{Delivery, DeliveryLifecycleManager, DeliveryTransition, UpdateDeliveryStatus};
use crate::domain::identity::Principal;
use crate::messaging::Notification;
use crate::store::UnitOfWork;

// ============================================================================
// Action Token Service
// ============================================================================
//
// The token string is the capability. Redemption order of checks:
// 1. Token exists, not expired
// 2. Used pickup/deliver tokens are rejected; track tokens never get used
// 3. Anonymous or track scans get a read-only status projection
// 4. Only the assigned courier may fire pickup/deliver
// 5. The scan applies only if the delivery sits in one of its source states;
//    a delivery already past the scan's target is a no-op, not an error
//
// The token row stays locked for the whole unit of work, so two concurrent
// scans of one token apply at most one transition.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct Redemption {
    pub outcome: RedeemOutcome,
    pub context: TokenContext,
    /// The delivery change this scan applied, if any
    pub transition: Option<DeliveryTransition>,
}

pub struct ActionTokenService {
    deliveries: Arc<DeliveryLifecycleManager>,
    clock: Arc<dyn Clock>,
    scan_base_url: String,
}

impl ActionTokenService {
    pub fn new(deliveries: Arc<DeliveryLifecycleManager>, clock: Arc<dyn Clock>, scan_base_url: impl Into<String>) -> Self {
        Self {
            deliveries,
            clock,
            scan_base_url: scan_base_url.into(),
        }
    }

    pub async fn issue(
        &self,
        uow: &mut UnitOfWork,
        target: TokenTarget,
        context: TokenContext,
        ttl_hours: i64,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = Duration::try_hours(ttl_hours)
            .filter(|_| ttl_hours > 0)
            .ok_or(TokenError::InvalidTtl(ttl_hours))?;

        let exists = match target {
            TokenTarget::Order(id) => uow.tx().get_order(id).await?.is_some(),
            TokenTarget::Delivery(id) => uow.tx().get_delivery(id).await?.is_some(),
        };
        if !exists {
            return Err(TokenError::TargetNotFound);
        }

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(TokenError::InvalidTtl(ttl_hours))?;

        let token = ActionToken {
            token: generate_token(),
            target,
            context,
            expires_at,
            is_used: false,
            used_at: None,
            created_at: now,
        };
        uow.tx().insert_action_token(&token).await?;

        tracing::info!(token_target = ?target, context = %context, expires_at = %expires_at, "Action token issued");

        Ok(IssuedToken {
            payload: format!("{}/{}", self.scan_base_url.trim_end_matches('/'), token.token),
            token: token.token,
            context,
            target,
            expires_at,
        })
    }

    pub async fn redeem(
        &self,
        uow: &mut UnitOfWork,
        token: &str,
        actor: Option<&Principal>,
    ) -> Result<Redemption, TokenError> {
        let stored = uow
            .tx()
            .lock_action_token(token)
            .await?
            .ok_or(TokenError::NotFound)?;

        let now = self.clock.now();
        if stored.is_expired(now) {
            return Err(TokenError::Expired);
        }
        if stored.is_used && stored.context.is_actionable() {
            return Err(TokenError::AlreadyUsed);
        }

        let actor = match actor {
            Some(actor) if stored.context.is_actionable() => actor,
            _ => return self.project(uow, &stored).await,
        };

        let delivery = self.resolve_delivery(uow, stored.target).await?;
        let Some(delivery) = delivery else {
            return Err(TokenError::NotYetApplicable {
                context: stored.context,
            });
        };

        if !(actor.is_delivery_actor() && delivery.is_assigned_to(actor.id)) {
            return Err(TokenError::Forbidden);
        }

        let Some((sources, target)) = stored.context.delivery_transition() else {
            return self.project(uow, &stored).await;
        };

        if sources.contains(&delivery.status) {
            let command = UpdateDeliveryStatus::new(delivery.id, target)
                .with_notes(format!("Scanned {} token", stored.context));
            let transition = self.deliveries.update_status(uow, command, actor).await?;
            uow.tx().mark_action_token_used(&stored.token, now).await?;

            let outcome = RedeemOutcome {
                subject_id: delivery.id,
                state: ScannedStatus::Delivery(transition.delivery.status),
                changed: true,
            };
            uow.enqueue(Notification::token_redeemed(stored.context, &outcome, actor.id, now));

            tracing::info!(
                delivery_id = %delivery.id,
                context = %stored.context,
                actor_id = %actor.id,
                status = %transition.delivery.status,
                "Action token redeemed"
            );

            return Ok(Redemption {
                outcome,
                context: stored.context,
                transition: Some(transition),
            });
        }

        if delivery.status.progress() >= target.progress() {
            tracing::debug!(
                delivery_id = %delivery.id,
                context = %stored.context,
                status = %delivery.status,
                "Scan already applied, returning current state"
            );
            return Ok(Redemption {
                outcome: RedeemOutcome {
                    subject_id: delivery.id,
                    state: ScannedStatus::Delivery(delivery.status),
                    changed: false,
                },
                context: stored.context,
                transition: None,
            });
        }

        Err(TokenError::NotYetApplicable {
            context: stored.context,
        })
    }

    /// Status of the token's own target, no writes
    async fn project(&self, uow: &mut UnitOfWork, stored: &ActionToken) -> Result<Redemption, TokenError> {
        let (subject_id, state) = match stored.target {
            TokenTarget::Order(id) => {
                let order = uow.tx().get_order(id).await?.ok_or(TokenError::TargetNotFound)?;
                (order.id, ScannedStatus::Order(order.status))
            }
            TokenTarget::Delivery(id) => {
                let delivery = uow.tx().get_delivery(id).await?.ok_or(TokenError::TargetNotFound)?;
                (delivery.id, ScannedStatus::Delivery(delivery.status))
            }
        };

        Ok(Redemption {
            outcome: RedeemOutcome {
                subject_id,
                state,
                changed: false,
            },
            context: stored.context,
            transition: None,
        })
    }

    async fn resolve_delivery(
        &self,
        uow: &mut UnitOfWork,
        target: TokenTarget,
    ) -> Result<Option<Delivery>, TokenError> {
        match target {
            TokenTarget::Delivery(id) => match uow.tx().lock_delivery(id).await? {
                Some(delivery) => Ok(Some(delivery)),
                None => Err(TokenError::TargetNotFound),
            },
            TokenTarget::Order(id) => {
                if uow.tx().get_order(id).await?.is_none() {
                    return Err(TokenError::TargetNotFound);
                }
                Ok(uow.tx().lock_delivery_by_order(id).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::delivery::{DeliveryStatus, DeliveryStatusEvent};
    use crate::domain::errors::{Classify, ErrorKind};
    use crate::domain::identity::{Role, UserRecord};
    use crate::domain::ledger::StockLedger;
    use crate::domain::order::{Order, OrderLifecycleManager, OrderStatus};
    use crate::store::{InMemoryStore, Store};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    struct Fixture {
        store: InMemoryStore,
        clock: Arc<ManualClock>,
        service: ActionTokenService,
        courier: Principal,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let ledger = Arc::new(StockLedger::new(dyn_clock.clone()));
        let orders = Arc::new(OrderLifecycleManager::new(ledger, dyn_clock.clone(), true));
        let deliveries = Arc::new(DeliveryLifecycleManager::new(orders, dyn_clock.clone()));

        let store = InMemoryStore::default();
        let courier = UserRecord {
            id: Uuid::new_v4(),
            name: "Courier".to_string(),
            role: Role::Delivery,
            is_active: true,
        };
        let mut tx = store.begin().await.unwrap();
        tx.upsert_user(&courier).await.unwrap();
        tx.commit().await.unwrap();

        Fixture {
            store,
            clock,
            service: ActionTokenService::new(deliveries, dyn_clock, "https://scan.test/t/"),
            courier: courier.principal(),
        }
    }

    impl Fixture {
        /// Order out for delivery plus its delivery in `status`, assigned to the courier
        async fn delivery_in(&self, status: DeliveryStatus) -> Delivery {
            let now = self.clock.now();
            let order = Order {
                id: Uuid::now_v7(),
                order_number: format!("ORD-TEST-{}", Uuid::new_v4().simple()),
                customer_id: Uuid::new_v4(),
                status: OrderStatus::OutForDelivery,
                total_amount: Decimal::ZERO,
                delivery_address: None,
                notes: None,
                items: vec![],
                created_at: now,
                updated_at: now,
            };
            let delivery = Delivery {
                id: Uuid::now_v7(),
                order_id: order.id,
                assigned_to_id: Some(self.courier.id),
                status,
                pickup_address: None,
                delivery_address: None,
                picked_up_at: None,
                delivered_at: None,
                created_at: now,
                updated_at: now,
            };

            let mut tx = self.store.begin().await.unwrap();
            tx.insert_order(&order).await.unwrap();
            tx.insert_delivery(&delivery).await.unwrap();
            tx.commit().await.unwrap();
            delivery
        }

        async fn issue(&self, target: TokenTarget, context: TokenContext, ttl_hours: i64) -> Result<IssuedToken, TokenError> {
            let mut uow = UnitOfWork::begin(&self.store).await.unwrap();
            let issued = self.service.issue(&mut uow, target, context, ttl_hours).await;
            if issued.is_ok() {
                uow.commit(self.clock.now()).await.unwrap();
            }
            issued
        }

        async fn redeem(&self, token: &str, actor: Option<&Principal>) -> Result<Redemption, TokenError> {
            let mut uow = UnitOfWork::begin(&self.store).await.unwrap();
            let result = self.service.redeem(&mut uow, token, actor).await;
            if result.is_ok() {
                uow.commit(self.clock.now()).await.unwrap();
            }
            result
        }

        async fn delivery_events(&self, delivery_id: Uuid) -> Vec<DeliveryStatusEvent> {
            let mut tx = self.store.begin().await.unwrap();
            tx.list_delivery_status_events(delivery_id).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_issue_validates_ttl_and_target() {
        let f = fixture().await;
        let delivery = f.delivery_in(DeliveryStatus::Assigned).await;

        let err = f
            .issue(TokenTarget::Delivery(delivery.id), TokenContext::Pickup, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = f
            .issue(TokenTarget::Order(Uuid::new_v4()), TokenContext::Track, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let issued = f
            .issue(TokenTarget::Delivery(delivery.id), TokenContext::Pickup, 2)
            .await
            .unwrap();
        assert_eq!(issued.payload, format!("https://scan.test/t/{}", issued.token));
        assert_eq!(issued.expires_at, f.clock.now() + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_pickup_scan_applies_once() {
        let f = fixture().await;
        let delivery = f.delivery_in(DeliveryStatus::Assigned).await;
        let issued = f
            .issue(TokenTarget::Delivery(delivery.id), TokenContext::Pickup, 1)
            .await
            .unwrap();

        let first = f.redeem(&issued.token, Some(&f.courier)).await.unwrap();
        assert!(first.outcome.changed);
        assert_eq!(first.outcome.state, ScannedStatus::Delivery(DeliveryStatus::PickedUp));

        let err = f.redeem(&issued.token, Some(&f.courier)).await.unwrap_err();
        assert!(matches!(err, TokenError::AlreadyUsed));
        assert_eq!(f.delivery_events(delivery.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let f = fixture().await;
        let delivery = f.delivery_in(DeliveryStatus::Assigned).await;
        let issued = f
            .issue(TokenTarget::Delivery(delivery.id), TokenContext::Pickup, 1)
            .await
            .unwrap();

        f.clock.advance(Duration::hours(1));
        assert!(f.redeem(&issued.token, None).await.is_ok());

        f.clock.advance(Duration::seconds(1));
        let err = f.redeem(&issued.token, Some(&f.courier)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
    }

    #[tokio::test]
    async fn test_anonymous_scan_is_read_only() {
        let f = fixture().await;
        let delivery = f.delivery_in(DeliveryStatus::Assigned).await;
        let issued = f
            .issue(TokenTarget::Order(delivery.order_id), TokenContext::Pickup, 1)
            .await
            .unwrap();

        let seen = f.redeem(&issued.token, None).await.unwrap();
        assert!(!seen.outcome.changed);
        assert_eq!(seen.outcome.subject_id, delivery.order_id);
        assert_eq!(seen.outcome.state, ScannedStatus::Order(OrderStatus::OutForDelivery));

        // The token is still good for the courier, resolved through the order
        let applied = f.redeem(&issued.token, Some(&f.courier)).await.unwrap();
        assert!(applied.outcome.changed);
        assert_eq!(applied.outcome.subject_id, delivery.id);
    }

    #[tokio::test]
    async fn test_track_token_never_used_up() {
        let f = fixture().await;
        let delivery = f.delivery_in(DeliveryStatus::InTransit).await;
        let issued = f
            .issue(TokenTarget::Delivery(delivery.id), TokenContext::Track, 1)
            .await
            .unwrap();

        for _ in 0..3 {
            let seen = f.redeem(&issued.token, Some(&f.courier)).await.unwrap();
            assert!(!seen.outcome.changed);
            assert_eq!(seen.outcome.state, ScannedStatus::Delivery(DeliveryStatus::InTransit));
        }
    }

    #[tokio::test]
    async fn test_scan_past_applicability_is_noop() {
        let f = fixture().await;
        let delivery = f.delivery_in(DeliveryStatus::InTransit).await;
        let issued = f
            .issue(TokenTarget::Delivery(delivery.id), TokenContext::Pickup, 1)
            .await
            .unwrap();

        let seen = f.redeem(&issued.token, Some(&f.courier)).await.unwrap();
        assert!(!seen.outcome.changed);
        assert_eq!(seen.outcome.state, ScannedStatus::Delivery(DeliveryStatus::InTransit));
        assert!(f.delivery_events(delivery.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_deliver_scan_before_pickup_is_rejected() {
        let f = fixture().await;
        let delivery = f.delivery_in(DeliveryStatus::Assigned).await;
        let issued = f
            .issue(TokenTarget::Delivery(delivery.id), TokenContext::Deliver, 1)
            .await
            .unwrap();

        let err = f.redeem(&issued.token, Some(&f.courier)).await.unwrap_err();
        assert!(matches!(err, TokenError::NotYetApplicable { .. }));
    }

    #[tokio::test]
    async fn test_other_actor_is_forbidden() {
        let f = fixture().await;
        let delivery = f.delivery_in(DeliveryStatus::Assigned).await;
        let issued = f
            .issue(TokenTarget::Delivery(delivery.id), TokenContext::Pickup, 1)
            .await
            .unwrap();

        let stranger = Principal::new(Uuid::new_v4(), Role::Delivery);
        let admin = Principal::new(Uuid::new_v4(), Role::Admin);
        for actor in [stranger, admin] {
            let err = f.redeem(&issued.token, Some(&actor)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
        }
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let f = fixture().await;
        let err = f.redeem("deadbeef", None).await.unwrap_err();
        assert!(matches!(err, TokenError::NotFound));
    }
}
