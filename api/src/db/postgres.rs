//! PostgreSQL Store
//!
//! `StoreTx` implementation over a `sqlx::Transaction`. Every unit of work
//! runs at SERIALIZABLE isolation; rows that are read-then-written are taken
//! with `SELECT ... FOR UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::StoreError;

use super::models::{
    ChargeOrder, ChargePlan, Currency, DrawRecord, InviteLink, LedgerEntry, NewLedgerEntry,
    OrderRef, OwnedItem, Pack, PackStatus, PrizeSlot, RankBonusGrant, RankSetting, RankTier,
    RefundSummary, UserBalance,
};
use super::repository::{Store, StoreResult, StoreTx};

/// PgPool 기반 Store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// ============ Row types ============

#[derive(FromRow)]
struct UserBalanceRow {
    user_id: Uuid,
    coin_balance: i64,
    mile_balance: i64,
    cumulative_spend: i64,
    rank_tier: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserBalanceRow> for UserBalance {
    type Error = StoreError;

    fn try_from(row: UserBalanceRow) -> Result<Self, Self::Error> {
        Ok(UserBalance {
            user_id: row.user_id,
            coin_balance: row.coin_balance,
            mile_balance: row.mile_balance,
            cumulative_spend: row.cumulative_spend,
            rank_tier: row.rank_tier.parse()?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct LedgerEntryRow {
    id: i64,
    user_id: Uuid,
    currency: String,
    amount: i64,
    resulting_balance: i64,
    kind: String,
    description: String,
    reference_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            currency: row.currency.parse()?,
            amount: row.amount,
            resulting_balance: row.resulting_balance,
            kind: row.kind.parse()?,
            description: row.description,
            reference_id: row.reference_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct PackRow {
    id: Uuid,
    price_per_unit: i64,
    total_stock: i64,
    remaining_stock: i64,
    status: String,
    per_user_limit: Option<i64>,
    last_unit_prize_id: Option<Uuid>,
}

impl TryFrom<PackRow> for Pack {
    type Error = StoreError;

    fn try_from(row: PackRow) -> Result<Self, Self::Error> {
        Ok(Pack {
            id: row.id,
            price_per_unit: row.price_per_unit,
            total_stock: row.total_stock,
            remaining_stock: row.remaining_stock,
            status: row.status.parse()?,
            per_user_limit: row.per_user_limit,
            last_unit_prize_id: row.last_unit_prize_id,
        })
    }
}

#[derive(FromRow)]
struct PrizeSlotRow {
    id: Uuid,
    pack_id: Uuid,
    prize_id: Uuid,
    weight: i64,
    total_quantity: i64,
    remaining_quantity: i64,
    sort_order: i32,
}

impl From<PrizeSlotRow> for PrizeSlot {
    fn from(row: PrizeSlotRow) -> Self {
        PrizeSlot {
            id: row.id,
            pack_id: row.pack_id,
            prize_id: row.prize_id,
            weight: row.weight,
            total_quantity: row.total_quantity,
            remaining_quantity: row.remaining_quantity,
            sort_order: row.sort_order,
        }
    }
}

#[derive(FromRow)]
struct RankSettingRow {
    rank: String,
    charge_threshold: i64,
    coin_return_bps: i64,
    mile_return_bps: i64,
    rank_up_bonus: i64,
    sort_order: i32,
}

impl TryFrom<RankSettingRow> for RankSetting {
    type Error = StoreError;

    fn try_from(row: RankSettingRow) -> Result<Self, Self::Error> {
        Ok(RankSetting {
            rank: row.rank.parse()?,
            charge_threshold: row.charge_threshold,
            coin_return_bps: row.coin_return_bps,
            mile_return_bps: row.mile_return_bps,
            rank_up_bonus: row.rank_up_bonus,
            sort_order: row.sort_order,
        })
    }
}

#[derive(FromRow)]
struct ChargeOrderRow {
    id: Uuid,
    user_id: Uuid,
    plan_id: Uuid,
    external_payment_id: Option<String>,
    amount: i64,
    status: String,
    granted_coins: i64,
    granted_miles: i64,
    refund: Json<RefundSummary>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ChargeOrderRow> for ChargeOrder {
    type Error = StoreError;

    fn try_from(row: ChargeOrderRow) -> Result<Self, Self::Error> {
        Ok(ChargeOrder {
            id: row.id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            external_payment_id: row.external_payment_id,
            amount: row.amount,
            status: row.status.parse()?,
            granted_coins: row.granted_coins,
            granted_miles: row.granted_miles,
            refund: row.refund.0,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

const USER_BALANCE_COLUMNS: &str =
    "user_id, coin_balance, mile_balance, cumulative_spend, rank_tier, updated_at";

const CHARGE_ORDER_COLUMNS: &str = "id, user_id, plan_id, external_payment_id, amount, status, \
     granted_coins, granted_miles, refund, created_at, completed_at";

#[async_trait]
impl StoreTx for PgTx {
    async fn find_user_balance(&mut self, user_id: Uuid) -> StoreResult<Option<UserBalance>> {
        let sql = format!("SELECT {USER_BALANCE_COLUMNS} FROM user_balances WHERE user_id = $1");
        sqlx::query_as::<_, UserBalanceRow>(&sql)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(UserBalance::try_from)
            .transpose()
    }

    async fn lock_user_balance(&mut self, user_id: Uuid) -> StoreResult<Option<UserBalance>> {
        let sql = format!(
            "SELECT {USER_BALANCE_COLUMNS} FROM user_balances WHERE user_id = $1 FOR UPDATE"
        );
        sqlx::query_as::<_, UserBalanceRow>(&sql)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(UserBalance::try_from)
            .transpose()
    }

    async fn insert_user_balance(&mut self, balance: &UserBalance) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_balances (
                user_id, coin_balance, mile_balance, cumulative_spend, rank_tier, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(balance.user_id)
        .bind(balance.coin_balance)
        .bind(balance.mile_balance)
        .bind(balance.cumulative_spend)
        .bind(balance.rank_tier.as_str())
        .bind(balance.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_user_balance(&mut self, balance: &UserBalance) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE user_balances SET
                coin_balance = $2,
                mile_balance = $3,
                cumulative_spend = $4,
                rank_tier = $5,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(balance.user_id)
        .bind(balance.coin_balance)
        .bind(balance.mile_balance)
        .bind(balance.cumulative_spend)
        .bind(balance.rank_tier.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> StoreResult<LedgerEntry> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            INSERT INTO ledger_entries (
                user_id, currency, amount, resulting_balance, kind, description, reference_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, currency, amount, resulting_balance, kind,
                      description, reference_id, created_at
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.currency.as_str())
        .bind(entry.amount)
        .bind(entry.resulting_balance)
        .bind(entry.kind.as_str())
        .bind(&entry.description)
        .bind(entry.reference_id)
        .fetch_one(&mut *self.tx)
        .await?;
        row.try_into()
    }

    async fn list_ledger_entries(
        &mut self,
        user_id: Uuid,
        currency: Currency,
    ) -> StoreResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT id, user_id, currency, amount, resulting_balance, kind,
                   description, reference_id, created_at
            FROM ledger_entries
            WHERE user_id = $1 AND currency = $2
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .bind(currency.as_str())
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }

    async fn lock_pack_for_update(&mut self, pack_id: Uuid) -> StoreResult<Option<Pack>> {
        sqlx::query_as::<_, PackRow>(
            r#"
            SELECT id, price_per_unit, total_stock, remaining_stock, status,
                   per_user_limit, last_unit_prize_id
            FROM packs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(pack_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Pack::try_from)
        .transpose()
    }

    async fn lock_prize_slots(&mut self, pack_id: Uuid) -> StoreResult<Vec<PrizeSlot>> {
        let rows = sqlx::query_as::<_, PrizeSlotRow>(
            r#"
            SELECT id, pack_id, prize_id, weight, total_quantity, remaining_quantity, sort_order
            FROM prize_slots
            WHERE pack_id = $1
            ORDER BY sort_order ASC, load_seq ASC
            FOR UPDATE
            "#,
        )
        .bind(pack_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(PrizeSlot::from).collect())
    }

    async fn decrement_slot(&mut self, slot_id: Uuid) -> StoreResult<Option<i64>> {
        let remaining: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE prize_slots
            SET remaining_quantity = remaining_quantity - 1
            WHERE id = $1 AND remaining_quantity > 0
            RETURNING remaining_quantity
            "#,
        )
        .bind(slot_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(remaining.map(|(r,)| r))
    }

    async fn update_pack_stock(
        &mut self,
        pack_id: Uuid,
        remaining_stock: i64,
        status: PackStatus,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE packs SET remaining_stock = $2, status = $3 WHERE id = $1")
            .bind(pack_id)
            .bind(remaining_stock)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn count_user_draws(&mut self, user_id: Uuid, pack_id: Uuid) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM draws WHERE user_id = $1 AND pack_id = $2 AND NOT is_trial",
        )
        .bind(user_id)
        .bind(pack_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn insert_draw_record(&mut self, record: &DrawRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO draws (
                id, user_id, pack_id, prize_slot_id, prize_id, coins_cost, is_trial, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.pack_id)
        .bind(record.prize_slot_id)
        .bind(record.prize_id)
        .bind(record.coins_cost)
        .bind(record.is_trial)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_owned_item(&mut self, item: &OwnedItem) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO owned_items (id, user_id, prize_id, draw_id, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(item.id)
        .bind(item.user_id)
        .bind(item.prize_id)
        .bind(item.draw_id)
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_rank_settings(&mut self) -> StoreResult<Vec<RankSetting>> {
        sqlx::query_as::<_, RankSettingRow>(
            r#"
            SELECT rank, charge_threshold, coin_return_bps, mile_return_bps,
                   rank_up_bonus, sort_order
            FROM rank_settings
            ORDER BY sort_order ASC
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(RankSetting::try_from)
        .collect()
    }

    async fn rank_bonus_granted(&mut self, user_id: Uuid, rank: RankTier) -> StoreResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM rank_bonus_grants WHERE user_id = $1 AND rank = $2)",
        )
        .bind(user_id)
        .bind(rank.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_rank_bonus_grant(&mut self, grant: &RankBonusGrant) -> StoreResult<()> {
        // PK (user_id, rank): 동시 지급 시 23505 -> 재시도
        sqlx::query(
            "INSERT INTO rank_bonus_grants (user_id, rank, amount, reason, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(grant.user_id)
        .bind(grant.rank.as_str())
        .bind(grant.amount)
        .bind(&grant.reason)
        .bind(grant.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_charge_plan(&mut self, plan_id: Uuid) -> StoreResult<Option<ChargePlan>> {
        let plan = sqlx::query_as::<_, ChargePlan>(
            "SELECT id, price, coins, bonus_coins FROM charge_plans WHERE id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(plan)
    }

    async fn lock_charge_order(&mut self, order: &OrderRef) -> StoreResult<Option<ChargeOrder>> {
        let row = match order {
            OrderRef::Id(id) => {
                let sql = format!(
                    "SELECT {CHARGE_ORDER_COLUMNS} FROM charge_orders WHERE id = $1 FOR UPDATE"
                );
                sqlx::query_as::<_, ChargeOrderRow>(&sql)
                    .bind(*id)
                    .fetch_optional(&mut *self.tx)
                    .await?
            }
            OrderRef::ExternalPaymentId(external_id) => {
                let sql = format!(
                    "SELECT {CHARGE_ORDER_COLUMNS} FROM charge_orders WHERE external_payment_id = $1 FOR UPDATE"
                );
                sqlx::query_as::<_, ChargeOrderRow>(&sql)
                    .bind(external_id)
                    .fetch_optional(&mut *self.tx)
                    .await?
            }
        };
        row.map(ChargeOrder::try_from).transpose()
    }

    async fn save_charge_order(&mut self, order: &ChargeOrder) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE charge_orders SET
                status = $2,
                granted_coins = $3,
                granted_miles = $4,
                refund = $5,
                completed_at = $6
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.granted_coins)
        .bind(order.granted_miles)
        .bind(Json(&order.refund))
        .bind(order.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn count_completed_charges(&mut self, user_id: Uuid) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM charge_orders WHERE user_id = $1 AND completed_at IS NOT NULL",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn lock_invite_for_invitee(&mut self, invitee_id: Uuid) -> StoreResult<Option<InviteLink>> {
        let invite = sqlx::query_as::<_, InviteLink>(
            r#"
            SELECT id, inviter_id, invitee_id, rewarded, rewarded_at
            FROM invite_links
            WHERE invitee_id = $1
            FOR UPDATE
            "#,
        )
        .bind(invitee_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(invite)
    }

    async fn mark_invite_rewarded(&mut self, invite_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE invite_links SET rewarded = TRUE, rewarded_at = $2 WHERE id = $1")
            .bind(invite_id)
            .bind(at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
