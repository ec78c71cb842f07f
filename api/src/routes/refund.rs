//! Refund Endpoint

use axum::{extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    services::{RefundOutcome, RefundRequest},
    types::ApiResponse,
    AppState,
};

/// 환불 요청
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundBody {
    pub order_id: Uuid,
    /// 생략 시 남은 금액 전액
    pub amount: Option<i64>,
    /// 결제사 환불 ID
    pub refund_event_id: String,
}

/// POST /refunds
///
/// 같은 `refundEventId` 재요청은 `replayed: true`와 기존 요약을 반환.
pub async fn refund(
    State(state): State<AppState>,
    Json(body): Json<RefundBody>,
) -> Result<Json<ApiResponse<RefundOutcome>>, ApiError> {
    let outcome = state
        .refunds
        .refund(RefundRequest {
            order_id: body.order_id,
            amount: body.amount,
            refund_event_id: body.refund_event_id,
        })
        .await?;

    Ok(Json(ApiResponse::success(outcome)))
}
