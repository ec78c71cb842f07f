//! Balance / Ledger Endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db::{Currency, LedgerEntry, UserBalance},
    error::ApiError,
    types::ApiResponse,
    AppState,
};

/// 원장 조회 파라미터
#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    /// COIN (기본) | MILE
    pub currency: Option<Currency>,
}

/// GET /users/:id/balance
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<UserBalance>>, ApiError> {
    let balance = state.ledger.balance(user_id).await?;
    Ok(Json(ApiResponse::success(balance)))
}

/// GET /users/:id/ledger?currency=COIN
///
/// 생성 순서대로 반환 (누적합 = 현재 잔액)
pub async fn get_ledger(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<ApiResponse<Vec<LedgerEntry>>>, ApiError> {
    let currency = query.currency.unwrap_or(Currency::Coin);
    let entries = state.ledger.history(user_id, currency).await?;
    Ok(Json(ApiResponse::success(entries)))
}
