//! Database Models
//!
//! Rows owned by the draw engine: balances and their ledger, packs and prize
//! slots, draw records, rank settings, charge orders and invite links.
//! Enum columns are stored as upper-case TEXT.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::StoreError;

/// TEXT 컬럼 <-> enum 변환 매크로
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(StoreError::Decode(format!(
                        "unknown {} value: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

// ============ Ledger ============

/// 원장 통화
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Currency {
    Coin,
    Mile,
}

text_enum!(Currency { Coin => "COIN", Mile => "MILE" });

/// 원장 항목 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerKind {
    Charge,
    Draw,
    Refund,
    Bonus,
    AdminAdjust,
    RankBonus,
    Referral,
    MileEarn,
    MileRefund,
    MileAdjust,
}

text_enum!(LedgerKind {
    Charge => "CHARGE",
    Draw => "DRAW",
    Refund => "REFUND",
    Bonus => "BONUS",
    AdminAdjust => "ADMIN_ADJUST",
    RankBonus => "RANK_BONUS",
    Referral => "REFERRAL",
    MileEarn => "MILE_EARN",
    MileRefund => "MILE_REFUND",
    MileAdjust => "MILE_ADJUST",
});

/// 사용자 잔액
///
/// 원장 항목 추가와 같은 트랜잭션 안에서만 변경됨.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserBalance {
    pub user_id: Uuid,
    pub coin_balance: i64,
    pub mile_balance: i64,
    /// 누적 충전액 (환불 시에만 감소)
    pub cumulative_spend: i64,
    pub rank_tier: RankTier,
    pub updated_at: DateTime<Utc>,
}

impl UserBalance {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            coin_balance: 0,
            mile_balance: 0,
            cumulative_spend: 0,
            rank_tier: RankTier::Beginner,
            updated_at: Utc::now(),
        }
    }

    pub fn balance_of(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Coin => self.coin_balance,
            Currency::Mile => self.mile_balance,
        }
    }

    pub(crate) fn set_balance(&mut self, currency: Currency, value: i64) {
        match currency {
            Currency::Coin => self.coin_balance = value,
            Currency::Mile => self.mile_balance = value,
        }
    }
}

/// 원장 항목 (append-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// 생성 순서를 나타내는 단조 증가 id
    pub id: i64,
    pub user_id: Uuid,
    pub currency: Currency,
    pub amount: i64,
    pub resulting_balance: i64,
    pub kind: LedgerKind,
    pub description: String,
    pub reference_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// 원장 항목 생성 요청
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub currency: Currency,
    pub amount: i64,
    pub resulting_balance: i64,
    pub kind: LedgerKind,
    pub description: String,
    pub reference_id: Option<Uuid>,
}

// ============ Inventory ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackStatus {
    Draft,
    Active,
    Ended,
    SoldOut,
}

text_enum!(PackStatus {
    Draft => "DRAFT",
    Active => "ACTIVE",
    Ended => "ENDED",
    SoldOut => "SOLD_OUT",
});

/// 추첨 팩
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pack {
    pub id: Uuid,
    pub price_per_unit: i64,
    pub total_stock: i64,
    pub remaining_stock: i64,
    pub status: PackStatus,
    pub per_user_limit: Option<i64>,
    /// 마지막 1개에 보장되는 상품
    pub last_unit_prize_id: Option<Uuid>,
}

/// 팩 <-> 상품 슬롯
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrizeSlot {
    pub id: Uuid,
    pub pack_id: Uuid,
    pub prize_id: Uuid,
    pub weight: i64,
    pub total_quantity: i64,
    pub remaining_quantity: i64,
    /// 로드 순서 (선택 알고리즘의 순회 순서)
    pub sort_order: i32,
}

/// 추첨 기록 (1 unit = 1 row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrawRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub pack_id: Uuid,
    pub prize_slot_id: Uuid,
    pub prize_id: Uuid,
    pub coins_cost: i64,
    pub is_trial: bool,
    pub created_at: DateTime<Utc>,
}

/// 사용자 보유 상품
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub prize_id: Uuid,
    pub draw_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// ============ Rank ============

/// 랭크 (선언 순서 = 등급 순서)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RankTier {
    Beginner,
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

text_enum!(RankTier {
    Beginner => "BEGINNER",
    Bronze => "BRONZE",
    Silver => "SILVER",
    Gold => "GOLD",
    Platinum => "PLATINUM",
    Diamond => "DIAMOND",
});

/// 랭크 설정
///
/// 환급률은 basis point (1% = 100bp, 100% = 10000bp)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankSetting {
    pub rank: RankTier,
    pub charge_threshold: i64,
    pub coin_return_bps: i64,
    pub mile_return_bps: i64,
    pub rank_up_bonus: i64,
    pub sort_order: i32,
}

/// 랭크업 보너스 지급 기록 ((user_id, rank) 당 최대 1건)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankBonusGrant {
    pub user_id: Uuid,
    pub rank: RankTier,
    pub amount: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

// ============ Charges ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

text_enum!(OrderStatus {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Refunded => "REFUNDED",
});

/// 충전 플랜
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct ChargePlan {
    pub id: Uuid,
    pub price: i64,
    pub coins: i64,
    pub bonus_coins: i64,
}

/// 충전 주문
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub external_payment_id: Option<String>,
    /// 결제 금액
    pub amount: i64,
    pub status: OrderStatus,
    /// 이 충전으로 지급된 코인 (충전 + 보너스 + 랭크 환급)
    pub granted_coins: i64,
    pub granted_miles: i64,
    pub refund: RefundSummary,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 주문 조회 키 (주문 id 또는 PG사 결제 id)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    Id(Uuid),
    ExternalPaymentId(String),
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderRef::Id(id) => write!(f, "order {}", id),
            OrderRef::ExternalPaymentId(ext) => write!(f, "payment {}", ext),
        }
    }
}

/// 주문 메타데이터에 저장되는 환불 요약
///
/// API 응답과 `charge_orders.refund` JSONB 모두 camelCase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundSummary {
    pub refunded_amount: i64,
    pub refunded_coins: i64,
    pub refunded_miles: i64,
    pub logs: Vec<RefundLog>,
}

impl RefundSummary {
    pub fn contains_event(&self, refund_event_id: &str) -> bool {
        self.logs.iter().any(|log| log.refund_event_id == refund_event_id)
    }
}

/// PG사 환불 이벤트 1건
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundLog {
    pub refund_event_id: String,
    pub amount: i64,
    pub coins: i64,
    pub miles: i64,
    pub created_at: DateTime<Utc>,
}

// ============ Referral ============

/// 초대 링크 (초대자 -> 피초대자)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct InviteLink {
    pub id: Uuid,
    pub inviter_id: Uuid,
    pub invitee_id: Uuid,
    pub rewarded: bool,
    pub rewarded_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_parsing() {
        assert_eq!("SOLD_OUT".parse::<PackStatus>().unwrap(), PackStatus::SoldOut);
        assert_eq!(LedgerKind::MileRefund.as_str(), "MILE_REFUND");
        assert!("sold_out".parse::<PackStatus>().is_err());
    }

    #[test]
    fn test_rank_ordering() {
        assert!(RankTier::Beginner < RankTier::Bronze);
        assert!(RankTier::Gold < RankTier::Diamond);
    }

    #[test]
    fn test_refund_summary_event_lookup() {
        let mut summary = RefundSummary::default();
        assert!(!summary.contains_event("re_1"));
        summary.logs.push(RefundLog {
            refund_event_id: "re_1".into(),
            amount: 100,
            coins: 110,
            miles: 1,
            created_at: Utc::now(),
        });
        assert!(summary.contains_event("re_1"));
        assert!(!summary.contains_event("re_2"));
    }

    #[test]
    fn test_refund_summary_json_is_camel_case() {
        // charge_orders.refund 컬럼 기본값
        let stored = r#"{"refundedAmount":0,"refundedCoins":0,"refundedMiles":0,"logs":[]}"#;
        let summary: RefundSummary = serde_json::from_str(stored).unwrap();
        assert_eq!(summary, RefundSummary::default());

        let mut summary = RefundSummary {
            refunded_amount: 4_000,
            refunded_coins: 4_400,
            ..RefundSummary::default()
        };
        summary.logs.push(RefundLog {
            refund_event_id: "re_1".into(),
            amount: 4_000,
            coins: 4_400,
            miles: 0,
            created_at: Utc::now(),
        });
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["refundedAmount"], 4_000);
        assert_eq!(json["refundedCoins"], 4_400);
        assert_eq!(json["logs"][0]["refundEventId"], "re_1");
        assert!(json.get("refunded_amount").is_none());
    }
}
