//! Blind-box Draw Engine API Library
//!
//! # Overview
//!
//! 랜덤박스(블라인드 박스) 추첨 거래 엔진. 코인으로 팩을 추첨하고,
//! 결제 완료와 환불을 원장에 반영함.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          API                             │
//! │                                                          │
//! │  ┌─────────┐   ┌──────────────────────────────────────┐  │
//! │  │ Routes  │──▶│ Services                             │  │
//! │  └─────────┘   │ Draw  Charge  Refund  Ledger         │  │
//! │                │ Selector  RankLadder  run_with_retry │  │
//! │                └──────────────────┬───────────────────┘  │
//! │                                   ▼                      │
//! │                ┌──────────────────────────────────────┐  │
//! │                │ db: Store / StoreTx                  │  │
//! │                │   PgStore (sqlx)   MemoryStore       │  │
//! │                └──────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: 추첨, 충전, 환불, 원장
//! - `db`: 저장소 trait과 구현
//! - `types`: 공통 타입 정의
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use blindbox_api::{config::Config, db::Database, services::OsRandom, AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::connect(&config.database_url).await?;
//!     let state = AppState::new(Arc::new(db.store()), Arc::new(OsRandom), config);
//!
//!     // ... 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;
pub mod types;


// Re-exports for convenience
pub use config::Config;
pub use db::Database;
pub use error::{ApiError, EngineError};

use db::Store;
use services::{ChargeService, DrawService, LedgerService, RefundService, SecureRandomSource};

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub draws: Arc<DrawService>,
    pub charges: Arc<ChargeService>,
    pub refunds: Arc<RefundService>,
    pub ledger: Arc<LedgerService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, rng: Arc<dyn SecureRandomSource>, config: Config) -> Self {
        let retry = config.retry.clone();
        Self {
            draws: Arc::new(DrawService::new(store.clone(), rng, retry.clone())),
            charges: Arc::new(ChargeService::new(
                store.clone(),
                retry.clone(),
                config.referral,
            )),
            refunds: Arc::new(RefundService::new(store.clone(), retry.clone())),
            ledger: Arc::new(LedgerService::new(store.clone(), retry)),
            store,
            config: Arc::new(config),
        }
    }
}
