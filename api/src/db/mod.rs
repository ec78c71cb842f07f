//! Database Module
//!
//! 저장소 계층. 서비스는 `Store` / `StoreTx` trait만 알고,
//! 구현은 PostgreSQL(`PgStore`)과 인메모리(`MemoryStore`) 두 가지.
//!
//! # Tables
//!
//! - `user_balances`, `ledger_entries`: 잔액과 append-only 원장
//! - `packs`, `prize_slots`, `draws`, `owned_items`: 재고와 추첨 기록
//! - `rank_settings`, `rank_bonus_grants`: 랭크 테이블과 1회성 보너스
//! - `charge_plans`, `charge_orders`, `invite_links`: 충전/환불/초대

mod memory;
mod models;
mod postgres;
mod repository;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;
pub use repository::{Store, StoreResult, StoreTx};

use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// PostgreSQL 연결 풀
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 20 (추첨 트래픽 기준)
    /// - min_connections: 1
    /// - acquire_timeout: 3초
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// 시드 데이터/관리 작업용 풀
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 트랜잭션 저장소
    pub fn store(&self) -> PgStore {
        PgStore::new(self.pool.clone())
    }
}
