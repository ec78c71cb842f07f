//! Blind-box Draw Engine API Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Client / Payment webhooks / Admin gateway            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                        │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Routes Layer                       ││
//! │  │  /health  /draws  /charges/*  /refunds  /users/:id/*    ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Services Layer                       ││
//! │  │  DrawService  ChargeService  RefundService  Ledger      ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Data Layer                         ││
//! │  │  PgStore (SERIALIZABLE, FOR UPDATE)   MemoryStore       ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::HeaderValue, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blindbox_api::{
    config::StorageBackend,
    db::{MemoryStore, Store},
    routes,
    services::OsRandom,
    AppState, Config, Database,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blindbox_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting blind-box draw engine API server");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!(
        environment = ?config.environment,
        storage = ?config.storage,
        max_attempts = config.retry.max_attempts,
        timeout_ms = config.retry.timeout.as_millis() as u64,
        "Configuration loaded"
    );

    // 저장소 구성
    let store: Arc<dyn Store> = match config.storage {
        StorageBackend::Postgres => {
            let db = Database::connect(&config.database_url).await?;
            tracing::info!("Database connected");

            db.run_migrations().await?;
            tracing::info!("Migrations completed");

            Arc::new(db.store())
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // 앱 상태 구성
    let port = config.port;
    let state = AppState::new(store, Arc::new(OsRandom), config);

    // 라우터 구성
    let app = create_router(state)?;

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// 라우터 생성
///
/// 엔드포인트는 `routes::router`, 여기서는 CORS와 요청 로깅만 추가.
fn create_router(state: AppState) -> anyhow::Result<Router> {
    // CORS 설정
    // 프로덕션에서는 ALLOWED_ORIGINS 도메인만 허용
    let cors = if state.config.is_production() {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!("ALLOWED_ORIGINS is empty; cross-origin requests will be rejected");
        }
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static(routes::draw::USER_ID_HEADER),
            ])
    } else {
        // 개발: localhost 허용
        CorsLayer::new()
            .allow_origin([
                "http://localhost:5173".parse::<HeaderValue>()?, // Vite dev server
                "http://localhost:3000".parse::<HeaderValue>()?, // Alternative
                "http://127.0.0.1:5173".parse::<HeaderValue>()?,
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Ok(routes::router(state)
        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}
