//! Charge Completion Service
//!
//! Applies a successful payment to the ledger exactly once. The order row is
//! locked first; an order that is already COMPLETED (or REFUNDED) is
//! reported back as `already_completed` without touching anything, so
//! webhook retries and client-side syncs can race freely.
//!
//! Return rates use the rank held *before* the charge; rank-up bonuses are
//! paid for every tier up to and including the one the charge reaches.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{
    ChargeOrder, Currency, LedgerKind, OrderRef, OrderStatus, RankBonusGrant, RankTier, Store,
    StoreTx, UserBalance,
};
use crate::error::EngineError;

use super::ledger;
use super::rank::RankLadder;
use super::retry::{run_with_retry, RetryPolicy};

/// 결제 완료 요청
#[derive(Debug, Clone)]
pub struct CompleteChargeRequest {
    pub order: OrderRef,
    pub plan_id: Uuid,
    pub user_id: Uuid,
}

/// 초대 보상 금액
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferralPolicy {
    pub inviter_coins: i64,
    pub invitee_coins: i64,
}

impl Default for ReferralPolicy {
    fn default() -> Self {
        Self {
            inviter_coins: 500,
            invitee_coins: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankBonusPayout {
    pub rank: RankTier,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeOutcome {
    pub order_id: Uuid,
    /// 이미 처리된 주문 (변경 없음)
    pub already_completed: bool,
    /// 충전 코인 + 플랜 보너스 + 랭크 환급 (환불 시 회수 대상)
    pub granted_coins: i64,
    pub granted_miles: i64,
    pub coin_return: i64,
    pub rank_bonuses: Vec<RankBonusPayout>,
    pub referral_paid: bool,
    pub coin_balance: i64,
    pub mile_balance: i64,
    pub cumulative_spend: i64,
    pub previous_rank: RankTier,
    pub rank: RankTier,
}

impl ChargeOutcome {
    fn unchanged(order: &ChargeOrder, account: &UserBalance) -> Self {
        Self {
            order_id: order.id,
            already_completed: true,
            granted_coins: order.granted_coins,
            granted_miles: order.granted_miles,
            coin_return: 0,
            rank_bonuses: Vec::new(),
            referral_paid: false,
            coin_balance: account.coin_balance,
            mile_balance: account.mile_balance,
            cumulative_spend: account.cumulative_spend,
            previous_rank: account.rank_tier,
            rank: account.rank_tier,
        }
    }
}

pub struct ChargeService {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    referral: ReferralPolicy,
}

impl ChargeService {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy, referral: ReferralPolicy) -> Self {
        Self {
            store,
            retry,
            referral,
        }
    }

    /// 결제 성공 반영 (멱등)
    #[tracing::instrument(
        name = "charge.complete",
        skip_all,
        fields(order = %request.order, user_id = %request.user_id)
    )]
    pub async fn complete_charge(
        &self,
        request: CompleteChargeRequest,
    ) -> Result<ChargeOutcome, EngineError> {
        let request = &request;
        let outcome =
            run_with_retry(&self.retry, "complete_charge", || self.try_complete(request)).await?;

        if outcome.already_completed {
            tracing::info!(order_id = %outcome.order_id, "charge already completed, nothing applied");
        } else {
            tracing::info!(
                order_id = %outcome.order_id,
                granted_coins = outcome.granted_coins,
                granted_miles = outcome.granted_miles,
                rank = %outcome.rank,
                rank_bonuses = outcome.rank_bonuses.len(),
                referral_paid = outcome.referral_paid,
                "charge completed"
            );
        }
        Ok(outcome)
    }

    async fn try_complete(
        &self,
        request: &CompleteChargeRequest,
    ) -> Result<ChargeOutcome, EngineError> {
        let mut tx = self.store.begin().await?;

        let mut order = tx
            .lock_charge_order(&request.order)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {}", request.order)))?;

        if order.user_id != request.user_id {
            return Err(EngineError::Validation(format!(
                "order {} does not belong to user {}",
                order.id, request.user_id
            )));
        }
        if order.plan_id != request.plan_id {
            return Err(EngineError::Validation(format!(
                "order {} was placed for a different plan",
                order.id
            )));
        }

        if matches!(order.status, OrderStatus::Completed | OrderStatus::Refunded) {
            let account = tx
                .find_user_balance(order.user_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("user {}", order.user_id)))?;
            return Ok(ChargeOutcome::unchanged(&order, &account));
        }

        let outcome = self.apply_charge(tx.as_mut(), &mut order).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn apply_charge(
        &self,
        tx: &mut dyn StoreTx,
        order: &mut ChargeOrder,
    ) -> Result<ChargeOutcome, EngineError> {
        let plan = tx
            .find_charge_plan(order.plan_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("plan {}", order.plan_id)))?;
        if plan.price != order.amount {
            return Err(EngineError::Validation(format!(
                "order amount {} does not match plan price {}",
                order.amount, plan.price
            )));
        }

        let ladder = RankLadder::from_settings(tx.list_rank_settings().await?);
        let mut account = tx
            .lock_user_balance(order.user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", order.user_id)))?;
        let first_charge = tx.count_completed_charges(order.user_id).await? == 0;

        // 환급률은 충전 전 랭크 기준
        let previous_rank = ladder.tier_for(account.cumulative_spend);
        let coin_return = ladder.coin_return(previous_rank, plan.coins);
        let miles = ladder.mile_return(previous_rank, plan.coins);
        let reference = Some(order.id);

        let credits = [
            (Currency::Coin, plan.coins, LedgerKind::Charge, format!("Charge {} coins", plan.coins)),
            (Currency::Coin, plan.bonus_coins, LedgerKind::Bonus, "Plan bonus".to_string()),
            (Currency::Coin, coin_return, LedgerKind::Bonus, format!("{} rank return", previous_rank)),
            (Currency::Mile, miles, LedgerKind::MileEarn, format!("{} rank miles", previous_rank)),
        ];
        for (currency, amount, kind, description) in credits {
            credit(tx, &mut account, currency, amount, kind, description, reference).await?;
        }

        account.cumulative_spend = account
            .cumulative_spend
            .checked_add(order.amount)
            .ok_or_else(|| EngineError::Validation("cumulative spend overflows".into()))?;
        let rank = ladder.tier_for(account.cumulative_spend);
        account.rank_tier = rank;

        let mut rank_bonuses = Vec::new();
        for setting in ladder.bonus_tiers(previous_rank, rank) {
            if setting.rank_up_bonus <= 0
                || tx.rank_bonus_granted(account.user_id, setting.rank).await?
            {
                continue;
            }
            tx.insert_rank_bonus_grant(&RankBonusGrant {
                user_id: account.user_id,
                rank: setting.rank,
                amount: setting.rank_up_bonus,
                reason: format!("Reached {}", setting.rank),
                created_at: Utc::now(),
            })
            .await?;
            credit(
                tx,
                &mut account,
                Currency::Coin,
                setting.rank_up_bonus,
                LedgerKind::RankBonus,
                format!("{} rank-up bonus", setting.rank),
                reference,
            )
            .await?;
            rank_bonuses.push(RankBonusPayout {
                rank: setting.rank,
                amount: setting.rank_up_bonus,
            });
        }

        let referral_paid = first_charge && self.pay_referral(tx, &mut account).await?;

        order.status = OrderStatus::Completed;
        order.granted_coins = plan.coins + plan.bonus_coins + coin_return;
        order.granted_miles = miles;
        order.completed_at = Some(Utc::now());
        tx.save_charge_order(order).await?;
        tx.save_user_balance(&account).await?;

        Ok(ChargeOutcome {
            order_id: order.id,
            already_completed: false,
            granted_coins: order.granted_coins,
            granted_miles: order.granted_miles,
            coin_return,
            rank_bonuses,
            referral_paid,
            coin_balance: account.coin_balance,
            mile_balance: account.mile_balance,
            cumulative_spend: account.cumulative_spend,
            previous_rank,
            rank,
        })
    }

    /// 첫 충전 시 초대 보상 (초대 링크당 1회)
    async fn pay_referral(
        &self,
        tx: &mut dyn StoreTx,
        invitee: &mut UserBalance,
    ) -> Result<bool, EngineError> {
        let invite = match tx.lock_invite_for_invitee(invitee.user_id).await? {
            Some(invite) if !invite.rewarded && invite.inviter_id != invitee.user_id => invite,
            _ => return Ok(false),
        };

        credit(
            tx,
            invitee,
            Currency::Coin,
            self.referral.invitee_coins,
            LedgerKind::Referral,
            "Referral reward (invited)",
            Some(invite.id),
        )
        .await?;

        match tx.lock_user_balance(invite.inviter_id).await? {
            Some(mut inviter) => {
                credit(
                    tx,
                    &mut inviter,
                    Currency::Coin,
                    self.referral.inviter_coins,
                    LedgerKind::Referral,
                    "Referral reward (inviter)",
                    Some(invite.id),
                )
                .await?;
                tx.save_user_balance(&inviter).await?;
            }
            None => tracing::warn!(
                inviter_id = %invite.inviter_id,
                "inviter has no account, inviter reward skipped"
            ),
        }

        tx.mark_invite_rewarded(invite.id, Utc::now()).await?;
        Ok(true)
    }

    /// 결제 실패/만료 반영. PENDING 주문만 FAILED로 전환.
    #[tracing::instrument(name = "charge.fail", skip_all, fields(order = %order))]
    pub async fn fail_charge(&self, order: OrderRef) -> Result<ChargeOrder, EngineError> {
        let order = &order;
        run_with_retry(&self.retry, "fail_charge", || async move {
            let mut tx = self.store.begin().await?;
            let mut current = tx
                .lock_charge_order(order)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("order {}", order)))?;

            if current.status != OrderStatus::Pending {
                tracing::debug!(status = %current.status, "order not pending, left unchanged");
                return Ok(current);
            }

            current.status = OrderStatus::Failed;
            tx.save_charge_order(&current).await?;
            tx.commit().await?;
            tracing::info!(order_id = %current.id, "charge marked failed");
            Ok(current)
        })
        .await
    }
}

/// 0이 아닌 금액만 원장에 기록
async fn credit(
    tx: &mut dyn StoreTx,
    account: &mut UserBalance,
    currency: Currency,
    amount: i64,
    kind: LedgerKind,
    description: impl Into<String>,
    reference_id: Option<Uuid>,
) -> Result<(), EngineError> {
    if amount > 0 {
        ledger::post(tx, account, currency, amount, kind, description, reference_id).await?;
    }
    Ok(())
}
