//! Services Module
//!
//! 비즈니스 로직을 담당하는 서비스 레이어
//!
//! # Services
//! - `DrawService`: 팩 추첨 (재고 차감, 코인 차감, 마지막 1개 보장)
//! - `ChargeService`: 결제 완료 반영 (랭크 환급, 랭크업 보너스, 초대 보상)
//! - `RefundService`: 환불 비례 회수
//! - `LedgerService`: 계정, 잔액, 원장 조회와 관리자 조정
//!
//! 모든 서비스는 `Store` trait 뒤의 저장소만 사용하고, 트랜잭션 단위로
//! `run_with_retry`를 통해 실행됨.

mod charge;
mod draw;
mod ledger;
mod rank;
mod refund;
mod retry;
mod selector;

pub use charge::{
    ChargeOutcome, ChargeService, CompleteChargeRequest, RankBonusPayout, ReferralPolicy,
};
pub use draw::{DrawOutcome, DrawRequest, DrawService, PrizeOutcome};
pub use ledger::{AdminAdjustment, LedgerAudit, LedgerService};
pub use rank::{apply_bps, RankLadder};
pub use refund::{revocation, RefundOutcome, RefundRequest, RefundService};
pub use retry::{run_with_retry, RetryPolicy};
pub use selector::{
    select_last_unit, select_weighted, Candidate, OsRandom, SecureRandomSource, SeededRandom,
    SelectorError,
};
