//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크
//! - `/draws` - 팩 추첨
//! - `/charges/*` - 결제 완료/실패 반영
//! - `/refunds` - 환불
//! - `/users/:id/*` - 잔액, 원장 조회

pub mod balance;
pub mod charge;
pub mod draw;
pub mod health;
pub mod refund;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

/// 엔드포인트 라우터 (미들웨어는 바이너리에서 추가)
///
/// ```text
/// GET  /health                  - 서버 상태 확인
///
/// POST /draws                   - 팩 추첨 (x-user-id 헤더)
///
/// POST /charges/complete        - 결제 완료 반영 (멱등)
/// POST /charges/fail            - 결제 실패/만료 반영
/// POST /refunds                 - 환불 (refundEventId 멱등)
///
/// GET  /users/:id/balance       - 잔액 조회
/// GET  /users/:id/ledger        - 원장 조회 (?currency=COIN|MILE)
/// ```
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Draw
        .route("/draws", post(draw::draw))
        // Charges / refunds
        .route("/charges/complete", post(charge::complete_charge))
        .route("/charges/fail", post(charge::fail_charge))
        .route("/refunds", post(refund::refund))
        // Balance / ledger
        .route("/users/:id/balance", get(balance::get_balance))
        .route("/users/:id/ledger", get(balance::get_ledger))
        // 상태 주입
        .with_state(state)
}
