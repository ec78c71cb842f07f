//! In-memory Store
//!
//! Same contract as the PostgreSQL store, used by tests and by
//! `STORAGE_BACKEND=memory` for local development.
//!
//! A unit of work holds the store-wide async mutex for its whole lifetime and
//! mutates a private copy of the state; `commit()` swaps the copy in. That
//! makes every transaction trivially serializable, and dropping a transaction
//! discards its copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::StoreError;

use super::models::{
    ChargeOrder, ChargePlan, Currency, DrawRecord, InviteLink, LedgerEntry, NewLedgerEntry,
    OrderRef, OwnedItem, Pack, PackStatus, PrizeSlot, RankBonusGrant, RankSetting, RankTier,
    UserBalance,
};
use super::repository::{Store, StoreResult, StoreTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, UserBalance>,
    ledger: Vec<LedgerEntry>,
    next_ledger_id: i64,
    packs: HashMap<Uuid, Pack>,
    /// 삽입 순서 유지
    slots: Vec<PrizeSlot>,
    draws: Vec<DrawRecord>,
    owned_items: Vec<OwnedItem>,
    rank_settings: Vec<RankSetting>,
    rank_grants: Vec<RankBonusGrant>,
    plans: HashMap<Uuid, ChargePlan>,
    orders: HashMap<Uuid, ChargeOrder>,
    invites: Vec<InviteLink>,
}

/// 테스트/로컬 개발용 저장소
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    injected_conflicts: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 `count`번의 commit을 serialization conflict로 실패시킴
    pub fn fail_next_commits(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    // ============ Seeding ============

    pub async fn insert_user(&self, balance: UserBalance) {
        self.state.lock().await.users.insert(balance.user_id, balance);
    }

    /// 팩과 슬롯 등록 (슬롯 순서 = 로드 순서)
    pub async fn insert_pack(&self, pack: Pack, slots: Vec<PrizeSlot>) {
        let mut state = self.state.lock().await;
        state.packs.insert(pack.id, pack);
        state.slots.extend(slots);
    }

    pub async fn set_rank_settings(&self, settings: Vec<RankSetting>) {
        self.state.lock().await.rank_settings = settings;
    }

    pub async fn insert_plan(&self, plan: ChargePlan) {
        self.state.lock().await.plans.insert(plan.id, plan);
    }

    pub async fn insert_order(&self, order: ChargeOrder) {
        self.state.lock().await.orders.insert(order.id, order);
    }

    pub async fn insert_invite(&self, invite: InviteLink) {
        self.state.lock().await.invites.push(invite);
    }

    // ============ Inspection ============

    pub async fn user(&self, user_id: Uuid) -> Option<UserBalance> {
        self.state.lock().await.users.get(&user_id).cloned()
    }

    pub async fn pack(&self, pack_id: Uuid) -> Option<Pack> {
        self.state.lock().await.packs.get(&pack_id).cloned()
    }

    pub async fn slots(&self, pack_id: Uuid) -> Vec<PrizeSlot> {
        let state = self.state.lock().await;
        state.slots.iter().filter(|s| s.pack_id == pack_id).cloned().collect()
    }

    pub async fn draws(&self, pack_id: Uuid) -> Vec<DrawRecord> {
        let state = self.state.lock().await;
        state.draws.iter().filter(|d| d.pack_id == pack_id).cloned().collect()
    }

    pub async fn owned_items(&self, user_id: Uuid) -> Vec<OwnedItem> {
        let state = self.state.lock().await;
        state.owned_items.iter().filter(|i| i.user_id == user_id).cloned().collect()
    }

    pub async fn ledger(&self, user_id: Uuid, currency: Currency) -> Vec<LedgerEntry> {
        let state = self.state.lock().await;
        state
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id && e.currency == currency)
            .cloned()
            .collect()
    }

    pub async fn rank_grants(&self, user_id: Uuid) -> Vec<RankBonusGrant> {
        let state = self.state.lock().await;
        state.rank_grants.iter().filter(|g| g.user_id == user_id).cloned().collect()
    }

    pub async fn order(&self, order_id: Uuid) -> Option<ChargeOrder> {
        self.state.lock().await.orders.get(&order_id).cloned()
    }

    pub async fn invite(&self, invitee_id: Uuid) -> Option<InviteLink> {
        let state = self.state.lock().await;
        state.invites.iter().find(|i| i.invitee_id == invitee_id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            injected_conflicts: self.injected_conflicts.clone(),
        }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    injected_conflicts: Arc<AtomicU32>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_user_balance(&mut self, user_id: Uuid) -> StoreResult<Option<UserBalance>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn lock_user_balance(&mut self, user_id: Uuid) -> StoreResult<Option<UserBalance>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn insert_user_balance(&mut self, balance: &UserBalance) -> StoreResult<()> {
        if self.working.users.contains_key(&balance.user_id) {
            return Err(StoreError::UniqueViolation(format!(
                "user_balances {}",
                balance.user_id
            )));
        }
        self.working.users.insert(balance.user_id, balance.clone());
        Ok(())
    }

    async fn save_user_balance(&mut self, balance: &UserBalance) -> StoreResult<()> {
        let mut saved = balance.clone();
        saved.updated_at = Utc::now();
        self.working.users.insert(balance.user_id, saved);
        Ok(())
    }

    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> StoreResult<LedgerEntry> {
        self.working.next_ledger_id += 1;
        let stored = LedgerEntry {
            id: self.working.next_ledger_id,
            user_id: entry.user_id,
            currency: entry.currency,
            amount: entry.amount,
            resulting_balance: entry.resulting_balance,
            kind: entry.kind,
            description: entry.description,
            reference_id: entry.reference_id,
            created_at: Utc::now(),
        };
        self.working.ledger.push(stored.clone());
        Ok(stored)
    }

    async fn list_ledger_entries(
        &mut self,
        user_id: Uuid,
        currency: Currency,
    ) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .working
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id && e.currency == currency)
            .cloned()
            .collect())
    }

    async fn lock_pack_for_update(&mut self, pack_id: Uuid) -> StoreResult<Option<Pack>> {
        Ok(self.working.packs.get(&pack_id).cloned())
    }

    async fn lock_prize_slots(&mut self, pack_id: Uuid) -> StoreResult<Vec<PrizeSlot>> {
        let mut slots: Vec<PrizeSlot> = self
            .working
            .slots
            .iter()
            .filter(|s| s.pack_id == pack_id)
            .cloned()
            .collect();
        // stable sort: 같은 sort_order는 삽입 순서 유지
        slots.sort_by_key(|s| s.sort_order);
        Ok(slots)
    }

    async fn decrement_slot(&mut self, slot_id: Uuid) -> StoreResult<Option<i64>> {
        match self.working.slots.iter_mut().find(|s| s.id == slot_id) {
            Some(slot) if slot.remaining_quantity > 0 => {
                slot.remaining_quantity -= 1;
                Ok(Some(slot.remaining_quantity))
            }
            _ => Ok(None),
        }
    }

    async fn update_pack_stock(
        &mut self,
        pack_id: Uuid,
        remaining_stock: i64,
        status: PackStatus,
    ) -> StoreResult<()> {
        let pack = self
            .working
            .packs
            .get_mut(&pack_id)
            .ok_or_else(|| StoreError::Database(format!("pack {} missing", pack_id)))?;
        if remaining_stock < 0 || remaining_stock > pack.total_stock {
            return Err(StoreError::Database(format!(
                "remaining_stock {} out of range for pack {}",
                remaining_stock, pack_id
            )));
        }
        pack.remaining_stock = remaining_stock;
        pack.status = status;
        Ok(())
    }

    async fn count_user_draws(&mut self, user_id: Uuid, pack_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .working
            .draws
            .iter()
            .filter(|d| d.user_id == Some(user_id) && d.pack_id == pack_id && !d.is_trial)
            .count() as i64)
    }

    async fn insert_draw_record(&mut self, record: &DrawRecord) -> StoreResult<()> {
        self.working.draws.push(record.clone());
        Ok(())
    }

    async fn insert_owned_item(&mut self, item: &OwnedItem) -> StoreResult<()> {
        self.working.owned_items.push(item.clone());
        Ok(())
    }

    async fn list_rank_settings(&mut self) -> StoreResult<Vec<RankSetting>> {
        let mut settings = self.working.rank_settings.clone();
        settings.sort_by_key(|s| s.sort_order);
        Ok(settings)
    }

    async fn rank_bonus_granted(&mut self, user_id: Uuid, rank: RankTier) -> StoreResult<bool> {
        Ok(self
            .working
            .rank_grants
            .iter()
            .any(|g| g.user_id == user_id && g.rank == rank))
    }

    async fn insert_rank_bonus_grant(&mut self, grant: &RankBonusGrant) -> StoreResult<()> {
        if self.rank_bonus_granted(grant.user_id, grant.rank).await? {
            return Err(StoreError::UniqueViolation(format!(
                "rank_bonus_grants ({}, {})",
                grant.user_id, grant.rank
            )));
        }
        self.working.rank_grants.push(grant.clone());
        Ok(())
    }

    async fn find_charge_plan(&mut self, plan_id: Uuid) -> StoreResult<Option<ChargePlan>> {
        Ok(self.working.plans.get(&plan_id).cloned())
    }

    async fn lock_charge_order(&mut self, order: &OrderRef) -> StoreResult<Option<ChargeOrder>> {
        Ok(match order {
            OrderRef::Id(id) => self.working.orders.get(id).cloned(),
            OrderRef::ExternalPaymentId(external_id) => self
                .working
                .orders
                .values()
                .find(|o| o.external_payment_id.as_deref() == Some(external_id.as_str()))
                .cloned(),
        })
    }

    async fn save_charge_order(&mut self, order: &ChargeOrder) -> StoreResult<()> {
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn count_completed_charges(&mut self, user_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .working
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.completed_at.is_some())
            .count() as i64)
    }

    async fn lock_invite_for_invitee(&mut self, invitee_id: Uuid) -> StoreResult<Option<InviteLink>> {
        Ok(self
            .working
            .invites
            .iter()
            .find(|i| i.invitee_id == invitee_id)
            .cloned())
    }

    async fn mark_invite_rewarded(&mut self, invite_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(invite) = self.working.invites.iter_mut().find(|i| i.id == invite_id) {
            invite.rewarded = true;
            invite.rewarded_at = Some(at);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            mut guard,
            working,
            injected_conflicts,
        } = *self;

        let injected = injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::SerializationConflict(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_user_balance(&UserBalance::new(user_id)).await.unwrap();
            // commit 없이 drop
        }

        assert!(store.user(user_id).await.is_none());
    }

    #[tokio::test]
    async fn test_commit_applies_changes() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.insert_user_balance(&UserBalance::new(user_id)).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.user(user_id).await.is_some());
    }

    #[tokio::test]
    async fn test_injected_conflict_discards_changes() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let user_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.insert_user_balance(&UserBalance::new(user_id)).await.unwrap();
        let result = tx.commit().await;

        assert!(matches!(result, Err(StoreError::SerializationConflict(_))));
        assert!(store.user(user_id).await.is_none());

        // 두 번째 시도는 성공
        let mut tx = store.begin().await.unwrap();
        tx.insert_user_balance(&UserBalance::new(user_id)).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.user(user_id).await.is_some());
    }

    #[tokio::test]
    async fn test_decrement_slot_never_goes_negative() {
        let store = MemoryStore::new();
        let pack_id = Uuid::new_v4();
        let slot_id = Uuid::new_v4();
        store
            .insert_pack(
                Pack {
                    id: pack_id,
                    price_per_unit: 100,
                    total_stock: 1,
                    remaining_stock: 1,
                    status: PackStatus::Active,
                    per_user_limit: None,
                    last_unit_prize_id: None,
                },
                vec![PrizeSlot {
                    id: slot_id,
                    pack_id,
                    prize_id: Uuid::new_v4(),
                    weight: 1,
                    total_quantity: 1,
                    remaining_quantity: 1,
                    sort_order: 0,
                }],
            )
            .await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.decrement_slot(slot_id).await.unwrap(), Some(0));
        assert_eq!(tx.decrement_slot(slot_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_slots_load_in_sort_then_insertion_order() {
        let store = MemoryStore::new();
        let pack_id = Uuid::new_v4();
        let slots: Vec<PrizeSlot> = [1, 0, 1, 0]
            .into_iter()
            .map(|sort_order| PrizeSlot {
                id: Uuid::new_v4(),
                pack_id,
                prize_id: Uuid::new_v4(),
                weight: 1,
                total_quantity: 1,
                remaining_quantity: 1,
                sort_order,
            })
            .collect();
        let expected = vec![slots[1].id, slots[3].id, slots[0].id, slots[2].id];
        store
            .insert_pack(
                Pack {
                    id: pack_id,
                    price_per_unit: 100,
                    total_stock: 4,
                    remaining_stock: 4,
                    status: PackStatus::Active,
                    per_user_limit: None,
                    last_unit_prize_id: None,
                },
                slots,
            )
            .await;

        let mut tx = store.begin().await.unwrap();
        let loaded: Vec<Uuid> = tx
            .lock_prize_slots(pack_id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(loaded, expected);
    }
}
