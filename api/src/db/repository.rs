//! Repository Pattern Implementation
//!
//! 서비스 레이어는 저장소 구현을 모름. `Store::begin()`이 돌려주는 `StoreTx`
//! 하나가 SERIALIZABLE 트랜잭션 하나에 대응함.
//!
//! ```text
//! DrawService ──▶ Store::begin() ──▶ StoreTx ──▶ commit()
//!                     │
//!        ┌────────────┴────────────┐
//!        ▼                         ▼
//!   PgStore (sqlx)         MemoryStore (tests, local dev)
//! ```
//!
//! `commit()` 없이 drop된 `StoreTx`는 롤백됨. 요청 future가 취소되면
//! 트랜잭션도 함께 버려지므로 부분 반영이 남지 않음.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

use super::models::{
    ChargeOrder, ChargePlan, Currency, DrawRecord, InviteLink, LedgerEntry, NewLedgerEntry,
    OrderRef, OwnedItem, Pack, PackStatus, PrizeSlot, RankBonusGrant, RankSetting, RankTier,
    UserBalance,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// 트랜잭션 팩토리
#[async_trait]
pub trait Store: Send + Sync {
    /// SERIALIZABLE 트랜잭션 시작
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// 연결 상태 확인
    async fn health_check(&self) -> StoreResult<()>;
}

/// 하나의 트랜잭션 안에서 수행되는 저장소 연산
#[async_trait]
pub trait StoreTx: Send {
    // ============ Users / Ledger ============

    async fn find_user_balance(&mut self, user_id: Uuid) -> StoreResult<Option<UserBalance>>;

    /// 잔액 row 잠금 (SELECT ... FOR UPDATE)
    async fn lock_user_balance(&mut self, user_id: Uuid) -> StoreResult<Option<UserBalance>>;

    async fn insert_user_balance(&mut self, balance: &UserBalance) -> StoreResult<()>;

    async fn save_user_balance(&mut self, balance: &UserBalance) -> StoreResult<()>;

    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> StoreResult<LedgerEntry>;

    /// 생성 순서대로 반환
    async fn list_ledger_entries(
        &mut self,
        user_id: Uuid,
        currency: Currency,
    ) -> StoreResult<Vec<LedgerEntry>>;

    // ============ Packs ============

    /// 팩 row 잠금. 재고를 읽기 전에 반드시 먼저 호출.
    async fn lock_pack_for_update(&mut self, pack_id: Uuid) -> StoreResult<Option<Pack>>;

    /// 슬롯을 로드 순서대로 잠금
    async fn lock_prize_slots(&mut self, pack_id: Uuid) -> StoreResult<Vec<PrizeSlot>>;

    /// 남은 수량을 1 줄이고 새 값을 반환. 이미 0이면 `None`.
    async fn decrement_slot(&mut self, slot_id: Uuid) -> StoreResult<Option<i64>>;

    async fn update_pack_stock(
        &mut self,
        pack_id: Uuid,
        remaining_stock: i64,
        status: PackStatus,
    ) -> StoreResult<()>;

    /// 사용자의 (체험 제외) 추첨 횟수
    async fn count_user_draws(&mut self, user_id: Uuid, pack_id: Uuid) -> StoreResult<i64>;

    async fn insert_draw_record(&mut self, record: &DrawRecord) -> StoreResult<()>;

    async fn insert_owned_item(&mut self, item: &OwnedItem) -> StoreResult<()>;

    // ============ Rank ============

    async fn list_rank_settings(&mut self) -> StoreResult<Vec<RankSetting>>;

    async fn rank_bonus_granted(&mut self, user_id: Uuid, rank: RankTier) -> StoreResult<bool>;

    async fn insert_rank_bonus_grant(&mut self, grant: &RankBonusGrant) -> StoreResult<()>;

    // ============ Charges ============

    async fn find_charge_plan(&mut self, plan_id: Uuid) -> StoreResult<Option<ChargePlan>>;

    async fn lock_charge_order(&mut self, order: &OrderRef) -> StoreResult<Option<ChargeOrder>>;

    async fn save_charge_order(&mut self, order: &ChargeOrder) -> StoreResult<()>;

    async fn count_completed_charges(&mut self, user_id: Uuid) -> StoreResult<i64>;

    // ============ Referral ============

    async fn lock_invite_for_invitee(&mut self, invitee_id: Uuid) -> StoreResult<Option<InviteLink>>;

    async fn mark_invite_rewarded(&mut self, invite_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // ============ Lifecycle ============

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
