//! Ledger Service
//!
//! Every balance change goes through `post`, which applies the delta to the
//! locked balance row and appends the matching ledger entry in the same
//! transaction. Replaying a user's entries in id order therefore reproduces
//! the stored balance, per currency.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::db::{Currency, LedgerEntry, LedgerKind, NewLedgerEntry, Store, StoreTx, UserBalance};
use crate::error::EngineError;

use super::retry::{run_with_retry, RetryPolicy};

/// 잔액 변경 + 원장 기록
///
/// 잔액이 음수가 되는 변경은 `InsufficientBalance`로 거부.
/// 호출자는 트랜잭션 종료 전에 `save_user_balance`로 잔액을 저장해야 함.
pub(crate) async fn post(
    tx: &mut dyn StoreTx,
    account: &mut UserBalance,
    currency: Currency,
    amount: i64,
    kind: LedgerKind,
    description: impl Into<String>,
    reference_id: Option<Uuid>,
) -> Result<LedgerEntry, EngineError> {
    let current = account.balance_of(currency);
    let resulting_balance = current
        .checked_add(amount)
        .ok_or_else(|| EngineError::Validation(format!("{} balance overflow", currency)))?;

    if resulting_balance < 0 {
        return Err(EngineError::InsufficientBalance {
            currency,
            required: -amount,
            available: current,
        });
    }

    account.set_balance(currency, resulting_balance);

    let entry = tx
        .append_ledger_entry(NewLedgerEntry {
            user_id: account.user_id,
            currency,
            amount,
            resulting_balance,
            kind,
            description: description.into(),
            reference_id,
        })
        .await?;

    Ok(entry)
}

/// 관리자 잔액 조정 요청
#[derive(Debug, Clone)]
pub struct AdminAdjustment {
    pub user_id: Uuid,
    pub currency: Currency,
    pub amount: i64,
    pub reason: String,
}

/// 원장 재생 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub user_id: Uuid,
    pub coin_balance: i64,
    pub coin_replayed: i64,
    pub mile_balance: i64,
    pub mile_replayed: i64,
    /// 각 항목의 resulting_balance가 누적합과 일치하는지
    pub snapshots_consistent: bool,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.snapshots_consistent
            && self.coin_balance == self.coin_replayed
            && self.mile_balance == self.mile_replayed
    }
}

pub struct LedgerService {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl LedgerService {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// 계정 생성 (이미 있으면 기존 잔액 반환)
    pub async fn open_account(&self, user_id: Uuid) -> Result<UserBalance, EngineError> {
        run_with_retry(&self.retry, "open_account", || async move {
            let mut tx = self.store.begin().await?;
            if let Some(existing) = tx.find_user_balance(user_id).await? {
                return Ok(existing);
            }
            let balance = UserBalance::new(user_id);
            tx.insert_user_balance(&balance).await?;
            tx.commit().await?;
            tracing::info!(%user_id, "account opened");
            Ok(balance)
        })
        .await
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<UserBalance, EngineError> {
        let mut tx = self.store.begin().await?;
        tx.find_user_balance(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        currency: Currency,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_ledger_entries(user_id, currency).await?)
    }

    /// 관리자 조정 (ADMIN_ADJUST / MILE_ADJUST)
    #[tracing::instrument(name = "ledger.admin_adjust", skip_all, fields(user_id = %adjustment.user_id))]
    pub async fn admin_adjust(&self, adjustment: AdminAdjustment) -> Result<LedgerEntry, EngineError> {
        if adjustment.amount == 0 {
            return Err(EngineError::Validation("adjustment amount must be non-zero".into()));
        }
        if adjustment.reason.trim().is_empty() {
            return Err(EngineError::Validation("adjustment reason is required".into()));
        }

        let kind = match adjustment.currency {
            Currency::Coin => LedgerKind::AdminAdjust,
            Currency::Mile => LedgerKind::MileAdjust,
        };

        let adjustment = &adjustment;
        let entry = run_with_retry(&self.retry, "admin_adjust", || async move {
            let mut tx = self.store.begin().await?;
            let mut account = tx
                .lock_user_balance(adjustment.user_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("user {}", adjustment.user_id)))?;

            let entry = post(
                tx.as_mut(),
                &mut account,
                adjustment.currency,
                adjustment.amount,
                kind,
                adjustment.reason.clone(),
                None,
            )
            .await?;

            tx.save_user_balance(&account).await?;
            tx.commit().await?;
            Ok(entry)
        })
        .await?;

        tracing::info!(
            currency = %adjustment.currency,
            amount = adjustment.amount,
            resulting_balance = entry.resulting_balance,
            "admin adjustment applied"
        );
        Ok(entry)
    }

    /// 원장 prefix-sum 재생으로 잔액 검증
    pub async fn audit(&self, user_id: Uuid) -> Result<LedgerAudit, EngineError> {
        let mut tx = self.store.begin().await?;
        let balance = tx
            .find_user_balance(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))?;

        let mut snapshots_consistent = true;
        let mut replay = |entries: Vec<LedgerEntry>| {
            let mut running = 0i64;
            for entry in entries {
                running += entry.amount;
                if entry.resulting_balance != running {
                    snapshots_consistent = false;
                }
            }
            running
        };

        let coin_replayed = replay(tx.list_ledger_entries(user_id, Currency::Coin).await?);
        let mile_replayed = replay(tx.list_ledger_entries(user_id, Currency::Mile).await?);

        let audit = LedgerAudit {
            user_id,
            coin_balance: balance.coin_balance,
            coin_replayed,
            mile_balance: balance.mile_balance,
            mile_replayed,
            snapshots_consistent,
        };

        if !audit.is_consistent() {
            tracing::error!(?audit, "ledger does not reproduce stored balance");
        }
        Ok(audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn service(store: &MemoryStore) -> LedgerService {
        LedgerService::new(Arc::new(store.clone()), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let store = MemoryStore::new();
        let ledger = service(&store);
        let user_id = Uuid::new_v4();

        let first = ledger.open_account(user_id).await.unwrap();
        let second = ledger.open_account(user_id).await.unwrap();

        assert_eq!(first.coin_balance, 0);
        assert_eq!(first.user_id, second.user_id);
    }

    #[tokio::test]
    async fn test_admin_adjust_and_audit() {
        let store = MemoryStore::new();
        let ledger = service(&store);
        let user_id = Uuid::new_v4();
        ledger.open_account(user_id).await.unwrap();

        let credit = AdminAdjustment {
            user_id,
            currency: Currency::Coin,
            amount: 1_000,
            reason: "support compensation".into(),
        };
        let entry = ledger.admin_adjust(credit).await.unwrap();
        assert_eq!(entry.kind, LedgerKind::AdminAdjust);
        assert_eq!(entry.resulting_balance, 1_000);

        ledger
            .admin_adjust(AdminAdjustment {
                user_id,
                currency: Currency::Mile,
                amount: 30,
                reason: "campaign".into(),
            })
            .await
            .unwrap();

        let audit = ledger.audit(user_id).await.unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.coin_replayed, 1_000);
        assert_eq!(audit.mile_replayed, 30);
    }

    #[tokio::test]
    async fn test_admin_adjust_cannot_go_negative() {
        let store = MemoryStore::new();
        let ledger = service(&store);
        let user_id = Uuid::new_v4();
        ledger.open_account(user_id).await.unwrap();

        let result = ledger
            .admin_adjust(AdminAdjustment {
                user_id,
                currency: Currency::Coin,
                amount: -1,
                reason: "clawback".into(),
            })
            .await;

        assert!(matches!(
            result,
            Err(EngineError::InsufficientBalance { required: 1, available: 0, .. })
        ));
        assert!(ledger.history(user_id, Currency::Coin).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admin_adjust_validation() {
        let store = MemoryStore::new();
        let ledger = service(&store);

        let result = ledger
            .admin_adjust(AdminAdjustment {
                user_id: Uuid::new_v4(),
                currency: Currency::Coin,
                amount: 0,
                reason: "noop".into(),
            })
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
