//! Draw Orchestrator
//!
//! One draw request is one serializable unit of work:
//!
//! ```text
//! lock pack ─▶ ACTIVE? ─▶ stock ≥ units? ─▶ per-user limit? ─▶ balance?
//!     │
//!     ▼
//! lock slots ─▶ for each unit: select ─▶ draw record ─▶ slot -1 ─▶ DRAW entry ─▶ owned item
//!     │
//!     ▼
//! pack stock -units (SOLD_OUT at 0) ─▶ save balance ─▶ commit
//! ```
//!
//! Any failure inside the loop drops the transaction, so a ten-unit batch is
//! all-or-nothing. Trial draws run the same selection against a local copy
//! of the counters and persist only their draw records.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{
    Currency, DrawRecord, LedgerKind, OwnedItem, Pack, PackStatus, Store, StoreTx, UserBalance,
};
use crate::error::{EngineError, ErrorCategory};
use crate::types::UnitCount;

use super::ledger;
use super::retry::{run_with_retry, RetryPolicy};
use super::selector::{
    select_last_unit, select_weighted, Candidate, SecureRandomSource, SelectorError,
};

/// 추첨 요청
#[derive(Debug, Clone)]
pub struct DrawRequest {
    pub pack_id: Uuid,
    pub units: UnitCount,
    /// 체험 추첨은 비로그인 허용
    pub user_id: Option<Uuid>,
    pub is_trial: bool,
}

/// 1개 단위 추첨 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrizeOutcome {
    pub draw_id: Uuid,
    pub slot_id: Uuid,
    pub prize_id: Uuid,
    /// 마지막 1개 보장으로 지급됨
    pub last_unit: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawOutcome {
    pub results: Vec<PrizeOutcome>,
    pub remaining_stock: i64,
    pub coins_spent: i64,
    pub new_balance: Option<i64>,
    pub is_trial: bool,
}

pub struct DrawService {
    store: Arc<dyn Store>,
    rng: Arc<dyn SecureRandomSource>,
    retry: RetryPolicy,
}

impl DrawService {
    pub fn new(
        store: Arc<dyn Store>,
        rng: Arc<dyn SecureRandomSource>,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, rng, retry }
    }

    /// 추첨 실행 (충돌 시 트랜잭션 전체 재시도)
    #[tracing::instrument(
        name = "draw",
        skip_all,
        fields(pack_id = %request.pack_id, units = request.units.get(), trial = request.is_trial)
    )]
    pub async fn draw(&self, request: DrawRequest) -> Result<DrawOutcome, EngineError> {
        if !request.is_trial && request.user_id.is_none() {
            return Err(EngineError::Validation(
                "a signed-in user is required for paid draws".into(),
            ));
        }

        let request = &request;
        let result = run_with_retry(&self.retry, "draw", || self.try_draw(request)).await;

        match &result {
            Ok(outcome) => tracing::info!(
                user_id = ?request.user_id,
                remaining_stock = outcome.remaining_stock,
                coins_spent = outcome.coins_spent,
                "draw committed"
            ),
            Err(err) if err.category() == ErrorCategory::Integrity => tracing::error!(
                user_id = ?request.user_id,
                error = %err,
                "draw aborted: inventory counters are inconsistent"
            ),
            Err(err) => tracing::debug!(error = %err, "draw rejected"),
        }
        result
    }

    async fn try_draw(&self, request: &DrawRequest) -> Result<DrawOutcome, EngineError> {
        let units = request.units.get();
        let mut tx = self.store.begin().await?;

        // 재고 읽기 전에 팩 row 잠금
        let pack = tx
            .lock_pack_for_update(request.pack_id)
            .await?
            .ok_or_else(|| EngineError::PackUnavailable {
                pack_id: request.pack_id,
                reason: "pack does not exist".into(),
            })?;

        if pack.status != PackStatus::Active {
            return Err(EngineError::PackUnavailable {
                pack_id: pack.id,
                reason: format!("status is {}", pack.status),
            });
        }

        if pack.remaining_stock < units {
            return Err(EngineError::InsufficientStock {
                requested: units,
                remaining: pack.remaining_stock,
            });
        }

        let mut account = if request.is_trial {
            None
        } else {
            let user_id = request
                .user_id
                .ok_or_else(|| EngineError::Validation("paid draw without a user".into()))?;
            Some(check_buyer(tx.as_mut(), &pack, user_id, units).await?)
        };

        let mut candidates: Vec<Candidate> = tx
            .lock_prize_slots(pack.id)
            .await?
            .into_iter()
            .map(|slot| Candidate {
                slot_id: slot.id,
                prize_id: slot.prize_id,
                weight: slot.weight,
                remaining: slot.remaining_quantity,
            })
            .collect();

        let unit_cost = if request.is_trial { 0 } else { pack.price_per_unit };
        let mut remaining_stock = pack.remaining_stock;
        let mut results = Vec::with_capacity(units as usize);

        for _ in 0..units {
            let (index, last_unit) = choose_slot(
                &candidates,
                pack.last_unit_prize_id,
                remaining_stock,
                self.rng.as_ref(),
            )?;
            let chosen = candidates[index].clone();

            let record = DrawRecord {
                id: Uuid::new_v4(),
                user_id: request.user_id,
                pack_id: pack.id,
                prize_slot_id: chosen.slot_id,
                prize_id: chosen.prize_id,
                coins_cost: unit_cost,
                is_trial: request.is_trial,
                created_at: Utc::now(),
            };
            tx.insert_draw_record(&record).await?;

            if let Some(account) = account.as_mut() {
                if tx.decrement_slot(chosen.slot_id).await?.is_none() {
                    return Err(EngineError::Integrity(format!(
                        "slot {} selected with no remaining quantity",
                        chosen.slot_id
                    )));
                }

                ledger::post(
                    tx.as_mut(),
                    account,
                    Currency::Coin,
                    -unit_cost,
                    LedgerKind::Draw,
                    format!("Draw from pack {}", pack.id),
                    Some(record.id),
                )
                .await?;

                tx.insert_owned_item(&OwnedItem {
                    id: Uuid::new_v4(),
                    user_id: account.user_id,
                    prize_id: chosen.prize_id,
                    draw_id: record.id,
                    created_at: record.created_at,
                })
                .await?;
            }

            candidates[index].remaining -= 1;
            remaining_stock -= 1;

            results.push(PrizeOutcome {
                draw_id: record.id,
                slot_id: chosen.slot_id,
                prize_id: chosen.prize_id,
                last_unit,
            });
        }

        if let Some(account) = account.as_ref() {
            let status = if remaining_stock == 0 {
                PackStatus::SoldOut
            } else {
                PackStatus::Active
            };
            tx.update_pack_stock(pack.id, remaining_stock, status).await?;
            tx.save_user_balance(account).await?;
        }

        tx.commit().await?;

        Ok(DrawOutcome {
            results,
            remaining_stock: if request.is_trial {
                pack.remaining_stock
            } else {
                remaining_stock
            },
            coins_spent: unit_cost * units,
            new_balance: account.map(|a| a.coin_balance),
            is_trial: request.is_trial,
        })
    }
}

/// 유료 추첨 사전 조건: 1인 한도, 잔액
async fn check_buyer(
    tx: &mut dyn StoreTx,
    pack: &Pack,
    user_id: Uuid,
    units: i64,
) -> Result<UserBalance, EngineError> {
    if let Some(limit) = pack.per_user_limit {
        let already_drawn = tx.count_user_draws(user_id, pack.id).await?;
        if already_drawn + units > limit {
            return Err(EngineError::UserLimitExceeded {
                limit,
                already_drawn,
                requested: units,
            });
        }
    }

    let account = tx
        .lock_user_balance(user_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))?;

    let cost = pack
        .price_per_unit
        .checked_mul(units)
        .ok_or_else(|| EngineError::Validation("draw cost overflows".into()))?;

    if account.coin_balance < cost {
        return Err(EngineError::InsufficientBalance {
            currency: Currency::Coin,
            required: cost,
            available: account.coin_balance,
        });
    }
    Ok(account)
}

/// 이번 단위의 슬롯 선택
///
/// 남은 재고가 정확히 1이면 마지막 1개 보장 상품을 강제 선택.
/// 그 전까지는 보장 상품 1개를 가중치 추첨에서 제외해 둠.
fn choose_slot(
    candidates: &[Candidate],
    last_unit_prize_id: Option<Uuid>,
    remaining_stock: i64,
    rng: &dyn SecureRandomSource,
) -> Result<(usize, bool), SelectorError> {
    match last_unit_prize_id {
        Some(prize_id) if remaining_stock == 1 => {
            Ok((select_last_unit(candidates, prize_id)?, true))
        }
        Some(prize_id) => {
            let mut reserved = candidates.to_vec();
            if let Some(slot) = reserved.iter_mut().find(|c| c.prize_id == prize_id) {
                slot.remaining -= 1;
            }
            Ok((select_weighted(&reserved, rng)?, false))
        }
        None => Ok((select_weighted(candidates, rng)?, false)),
    }
}
