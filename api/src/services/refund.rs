//! Refund Proration Service
//!
//! A refund revokes the currency its charge granted, in proportion to the
//! refunded amount. The final refund of an order revokes whatever is left,
//! so a sequence of partial refunds revokes exactly the original grant.
//!
//! The refund is planned from one read of the order and applied in a second
//! transaction that re-locks the order. If another refund landed in between
//! and the running total would overshoot the order amount, the attempt fails
//! with `RefundConflict` and the retry runner plans again from fresh state.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{
    ChargeOrder, Currency, LedgerKind, OrderRef, OrderStatus, RefundLog, RefundSummary, Store,
    StoreTx,
};
use crate::error::EngineError;

use super::ledger;
use super::rank::RankLadder;
use super::retry::{run_with_retry, RetryPolicy};

/// 환불 요청
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub order_id: Uuid,
    /// 없으면 남은 환불 가능 금액 전체
    pub amount: Option<i64>,
    /// 결제사 환불 이벤트 ID (멱등 키)
    pub refund_event_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundOutcome {
    pub order_id: Uuid,
    /// 이미 처리된 환불 이벤트 (변경 없음)
    pub replayed: bool,
    pub amount: i64,
    pub revoked_coins: i64,
    pub revoked_miles: i64,
    pub status: OrderStatus,
    pub summary: RefundSummary,
}

impl RefundOutcome {
    fn replayed(order: &ChargeOrder, refund_event_id: &str) -> Self {
        let log = order
            .refund
            .logs
            .iter()
            .find(|log| log.refund_event_id == refund_event_id);
        Self {
            order_id: order.id,
            replayed: true,
            amount: log.map(|l| l.amount).unwrap_or(0),
            revoked_coins: log.map(|l| l.coins).unwrap_or(0),
            revoked_miles: log.map(|l| l.miles).unwrap_or(0),
            status: order.status,
            summary: order.refund.clone(),
        }
    }
}

/// 회수량 계산
///
/// 최종 환불이면 남은 지급분 전부, 아니면
/// `floor(total_granted * refund_amount / order_amount)`를 남은 지급분으로 제한.
pub fn revocation(
    total_granted: i64,
    already_revoked: i64,
    refund_amount: i64,
    order_amount: i64,
    final_refund: bool,
) -> i64 {
    let remaining = (total_granted - already_revoked).max(0);
    if final_refund {
        return remaining;
    }
    if order_amount <= 0 || refund_amount <= 0 {
        return 0;
    }
    let share = (total_granted as i128 * refund_amount as i128) / order_amount as i128;
    (share as i64).min(remaining)
}

/// 1차 읽기에서 확정한 환불 계획
#[derive(Debug, Clone, Copy)]
struct RefundPlan {
    amount: i64,
    /// 계획 시점의 누적 환불액
    observed_refunded: i64,
}

enum Planned {
    Replayed(RefundOutcome),
    Apply(RefundPlan),
}

pub struct RefundService {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl RefundService {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    #[tracing::instrument(
        name = "refund",
        skip_all,
        fields(order_id = %request.order_id, refund_event_id = %request.refund_event_id)
    )]
    pub async fn refund(&self, request: RefundRequest) -> Result<RefundOutcome, EngineError> {
        if request.refund_event_id.trim().is_empty() {
            return Err(EngineError::Validation("refund event id is required".into()));
        }
        if matches!(request.amount, Some(amount) if amount <= 0) {
            return Err(EngineError::Validation("refund amount must be positive".into()));
        }

        let request = &request;
        let outcome = run_with_retry(&self.retry, "refund", || async move {
            let plan = match self.plan(request).await? {
                Planned::Replayed(outcome) => return Ok(outcome),
                Planned::Apply(plan) => plan,
            };

            let mut tx = self.store.begin().await?;
            let outcome = self.apply(tx.as_mut(), request, plan).await?;
            if !outcome.replayed {
                tx.commit().await?;
            }
            Ok(outcome)
        })
        .await?;

        if outcome.replayed {
            tracing::info!("refund event already applied, returning existing summary");
        } else {
            tracing::info!(
                amount = outcome.amount,
                revoked_coins = outcome.revoked_coins,
                revoked_miles = outcome.revoked_miles,
                status = %outcome.status,
                "refund applied"
            );
        }
        Ok(outcome)
    }

    async fn plan(&self, request: &RefundRequest) -> Result<Planned, EngineError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .lock_charge_order(&OrderRef::Id(request.order_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {}", request.order_id)))?;

        if order.refund.contains_event(&request.refund_event_id) {
            return Ok(Planned::Replayed(RefundOutcome::replayed(
                &order,
                &request.refund_event_id,
            )));
        }
        if order.status != OrderStatus::Completed {
            return Err(EngineError::OrderNotRefundable {
                order_id: order.id,
                status: order.status,
            });
        }

        let refundable = order.amount - order.refund.refunded_amount;
        let amount = request.amount.unwrap_or(refundable);
        if amount <= 0 || amount > refundable {
            return Err(EngineError::Validation(format!(
                "refund amount {} exceeds refundable balance {}",
                amount, refundable
            )));
        }

        Ok(Planned::Apply(RefundPlan {
            amount,
            observed_refunded: order.refund.refunded_amount,
        }))
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        request: &RefundRequest,
        plan: RefundPlan,
    ) -> Result<RefundOutcome, EngineError> {
        let mut order = tx
            .lock_charge_order(&OrderRef::Id(request.order_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {}", request.order_id)))?;

        if order.refund.contains_event(&request.refund_event_id) {
            return Ok(RefundOutcome::replayed(&order, &request.refund_event_id));
        }

        let refunded_total = order.refund.refunded_amount + plan.amount;
        if order.refund.refunded_amount != plan.observed_refunded && refunded_total > order.amount {
            tracing::warn!(
                observed = plan.observed_refunded,
                current = order.refund.refunded_amount,
                "concurrent refund detected"
            );
            return Err(EngineError::RefundConflict { order_id: order.id });
        }
        if order.status != OrderStatus::Completed {
            return Err(EngineError::OrderNotRefundable {
                order_id: order.id,
                status: order.status,
            });
        }
        if refunded_total > order.amount {
            return Err(EngineError::Validation(format!(
                "refund amount {} exceeds refundable balance {}",
                plan.amount,
                order.amount - order.refund.refunded_amount
            )));
        }

        let final_refund = refunded_total == order.amount;
        let coins = revocation(
            order.granted_coins,
            order.refund.refunded_coins,
            plan.amount,
            order.amount,
            final_refund,
        );
        let miles = revocation(
            order.granted_miles,
            order.refund.refunded_miles,
            plan.amount,
            order.amount,
            final_refund,
        );

        let mut account = tx
            .lock_user_balance(order.user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", order.user_id)))?;

        // 이미 사용한 코인/마일은 회수 불가
        for (currency, required) in [(Currency::Coin, coins), (Currency::Mile, miles)] {
            let available = account.balance_of(currency);
            if available < required {
                return Err(EngineError::InsufficientBalance {
                    currency,
                    required,
                    available,
                });
            }
        }

        let description = format!("Refund {}", request.refund_event_id);
        if coins > 0 {
            ledger::post(
                tx,
                &mut account,
                Currency::Coin,
                -coins,
                LedgerKind::Refund,
                description.clone(),
                Some(order.id),
            )
            .await?;
        }
        if miles > 0 {
            ledger::post(
                tx,
                &mut account,
                Currency::Mile,
                -miles,
                LedgerKind::MileRefund,
                description,
                Some(order.id),
            )
            .await?;
        }

        // 랭크 재계산 (지급된 랭크 보너스는 회수하지 않음)
        let ladder = RankLadder::from_settings(tx.list_rank_settings().await?);
        account.cumulative_spend = (account.cumulative_spend - plan.amount).max(0);
        account.rank_tier = ladder.tier_for(account.cumulative_spend);
        tx.save_user_balance(&account).await?;

        order.refund.refunded_amount = refunded_total;
        order.refund.refunded_coins += coins;
        order.refund.refunded_miles += miles;
        order.refund.logs.push(RefundLog {
            refund_event_id: request.refund_event_id.clone(),
            amount: plan.amount,
            coins,
            miles,
            created_at: Utc::now(),
        });
        if final_refund {
            order.status = OrderStatus::Refunded;
        }
        tx.save_charge_order(&order).await?;

        Ok(RefundOutcome {
            order_id: order.id,
            replayed: false,
            amount: plan.amount,
            revoked_coins: coins,
            revoked_miles: miles,
            status: order.status,
            summary: order.refund,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, RankTier, UserBalance};

    #[test]
    fn test_revocation_partial_then_final() {
        let first = revocation(11_000, 0, 4_000, 10_000, false);
        assert_eq!(first, 4_400);

        let second = revocation(11_000, first, 6_000, 10_000, true);
        assert_eq!(second, 6_600);
        assert_eq!(first + second, 11_000);
    }

    #[test]
    fn test_revocation_has_no_rounding_leak() {
        // 3등분: floor 합계는 99, 최종 환불이 나머지를 회수
        let granted = 100;
        let a = revocation(granted, 0, 1, 3, false);
        let b = revocation(granted, a, 1, 3, false);
        let c = revocation(granted, a + b, 1, 3, true);
        assert_eq!((a, b, c), (33, 33, 34));
    }

    #[test]
    fn test_revocation_capped_at_remaining() {
        assert_eq!(revocation(100, 95, 50, 100, false), 5);
        assert_eq!(revocation(100, 100, 50, 100, true), 0);
        assert_eq!(revocation(0, 0, 50, 100, false), 0);
    }

    struct Fixture {
        store: MemoryStore,
        service: RefundService,
        user_id: Uuid,
        order_id: Uuid,
    }

    /// 완료된 10,000원 주문 (코인 11,000 / 마일 50 지급)
    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let order_id = Uuid::new_v4();

        let mut balance = UserBalance::new(user_id);
        balance.coin_balance = 11_000;
        balance.mile_balance = 50;
        balance.cumulative_spend = 10_000;
        balance.rank_tier = RankTier::Bronze;
        store.insert_user(balance).await;

        store
            .insert_order(ChargeOrder {
                id: order_id,
                user_id,
                plan_id: Uuid::new_v4(),
                external_payment_id: None,
                amount: 10_000,
                status: OrderStatus::Completed,
                granted_coins: 11_000,
                granted_miles: 50,
                refund: RefundSummary::default(),
                created_at: Utc::now(),
                completed_at: Some(Utc::now()),
            })
            .await;

        let service = RefundService::new(Arc::new(store.clone()), RetryPolicy::default());
        Fixture {
            store,
            service,
            user_id,
            order_id,
        }
    }

    fn request(f: &Fixture, amount: Option<i64>, event: &str) -> RefundRequest {
        RefundRequest {
            order_id: f.order_id,
            amount,
            refund_event_id: event.to_string(),
        }
    }

    #[tokio::test]
    async fn test_partial_then_final_refund() {
        let f = fixture().await;

        let first = f.service.refund(request(&f, Some(4_000), "re_1")).await.unwrap();
        assert_eq!(first.revoked_coins, 4_400);
        assert_eq!(first.revoked_miles, 20);
        assert_eq!(first.status, OrderStatus::Completed);

        let second = f.service.refund(request(&f, None, "re_2")).await.unwrap();
        assert_eq!(second.amount, 6_000);
        assert_eq!(second.revoked_coins, 6_600);
        assert_eq!(second.revoked_miles, 30);
        assert_eq!(second.status, OrderStatus::Refunded);
        assert_eq!(second.summary.refunded_coins, 11_000);
        assert_eq!(second.summary.logs.len(), 2);

        let account = f.store.user(f.user_id).await.unwrap();
        assert_eq!(account.coin_balance, 0);
        assert_eq!(account.mile_balance, 0);
        assert_eq!(account.cumulative_spend, 0);
        assert_eq!(account.rank_tier, RankTier::Beginner);

        let kinds: Vec<LedgerKind> = f
            .store
            .ledger(f.user_id, Currency::Mile)
            .await
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![LedgerKind::MileRefund, LedgerKind::MileRefund]);
    }

    #[tokio::test]
    async fn test_replayed_event_changes_nothing() {
        let f = fixture().await;

        let first = f.service.refund(request(&f, Some(4_000), "re_1")).await.unwrap();
        let replay = f.service.refund(request(&f, Some(4_000), "re_1")).await.unwrap();

        assert!(replay.replayed);
        assert_eq!(replay.revoked_coins, first.revoked_coins);
        assert_eq!(replay.summary, first.summary);
        assert_eq!(f.store.ledger(f.user_id, Currency::Coin).await.len(), 1);
        assert_eq!(f.store.user(f.user_id).await.unwrap().coin_balance, 6_600);
    }

    #[tokio::test]
    async fn test_amount_above_refundable_is_rejected() {
        let f = fixture().await;
        f.service.refund(request(&f, Some(9_000), "re_1")).await.unwrap();

        let result = f.service.refund(request(&f, Some(1_001), "re_2")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));

        let result = f.service.refund(request(&f, Some(0), "re_3")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));

        let result = f.service.refund(request(&f, None, " ")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_only_completed_orders_are_refundable() {
        let f = fixture().await;
        f.service.refund(request(&f, None, "re_1")).await.unwrap();

        let result = f.service.refund(request(&f, Some(1), "re_2")).await;
        assert!(matches!(
            result,
            Err(EngineError::OrderNotRefundable {
                status: OrderStatus::Refunded,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_spent_coins_block_refund() {
        let f = fixture().await;
        let mut account = f.store.user(f.user_id).await.unwrap();
        account.coin_balance = 1_000;
        f.store.insert_user(account).await;

        let result = f.service.refund(request(&f, Some(4_000), "re_1")).await;

        assert!(matches!(
            result,
            Err(EngineError::InsufficientBalance {
                currency: Currency::Coin,
                required: 4_400,
                available: 1_000
            })
        ));
        let order = f.store.order(f.order_id).await.unwrap();
        assert_eq!(order.refund, RefundSummary::default());
    }

    #[tokio::test]
    async fn test_concurrent_refund_is_a_conflict() {
        let f = fixture().await;

        // 6,000 환불을 계획한 뒤 다른 요청이 5,000을 먼저 반영한 상황
        let plan = RefundPlan {
            amount: 6_000,
            observed_refunded: 0,
        };
        let mut order = f.store.order(f.order_id).await.unwrap();
        order.refund.refunded_amount = 5_000;
        f.store.insert_order(order).await;

        let mut tx = f.store.begin().await.unwrap();
        let result = f
            .service
            .apply(tx.as_mut(), &request(&f, Some(6_000), "re_late"), plan)
            .await;

        assert!(matches!(result, Err(EngineError::RefundConflict { .. })));
        assert!(result.unwrap_err().is_retryable());
    }
}
