//! Charge Endpoints
//!
//! 결제사 webhook과 클라이언트 동기화 요청이 함께 호출함.
//! 같은 주문에 대한 중복 호출은 `alreadyCompleted: true`로 응답.

use axum::{extract::State, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db::{ChargeOrder, OrderRef},
    error::ApiError,
    services::{ChargeOutcome, CompleteChargeRequest},
    types::ApiResponse,
    AppState,
};

// ============ Request Types ============

/// 주문 식별자: 내부 ID 또는 결제사 결제 ID 중 하나
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLocator {
    pub order_id: Option<Uuid>,
    pub external_payment_id: Option<String>,
}

impl OrderLocator {
    fn into_order_ref(self) -> Result<OrderRef, ApiError> {
        match (self.order_id, self.external_payment_id) {
            (Some(id), None) => Ok(OrderRef::Id(id)),
            (None, Some(external)) if !external.trim().is_empty() => {
                Ok(OrderRef::ExternalPaymentId(external))
            }
            _ => Err(ApiError::ValidationError(
                "exactly one of orderId or externalPaymentId is required".to_string(),
            )),
        }
    }
}

/// 결제 완료 요청
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteChargeBody {
    #[serde(flatten)]
    pub order: OrderLocator,
    pub plan_id: Uuid,
    pub user_id: Uuid,
}

// ============ Handlers ============

/// POST /charges/complete
pub async fn complete_charge(
    State(state): State<AppState>,
    Json(body): Json<CompleteChargeBody>,
) -> Result<Json<ApiResponse<ChargeOutcome>>, ApiError> {
    let outcome = state
        .charges
        .complete_charge(CompleteChargeRequest {
            order: body.order.into_order_ref()?,
            plan_id: body.plan_id,
            user_id: body.user_id,
        })
        .await?;

    Ok(Json(ApiResponse::success(outcome)))
}

/// POST /charges/fail
///
/// 결제 실패/만료 이벤트. PENDING 주문만 FAILED로 바뀜.
pub async fn fail_charge(
    State(state): State<AppState>,
    Json(body): Json<OrderLocator>,
) -> Result<Json<ApiResponse<ChargeOrder>>, ApiError> {
    let order = state.charges.fail_charge(body.into_order_ref()?).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_locator_requires_exactly_one() {
        let id = Uuid::new_v4();
        let by_id = OrderLocator {
            order_id: Some(id),
            external_payment_id: None,
        };
        assert!(matches!(by_id.into_order_ref(), Ok(OrderRef::Id(found)) if found == id));

        let both = OrderLocator {
            order_id: Some(id),
            external_payment_id: Some("pi_123".into()),
        };
        assert!(both.into_order_ref().is_err());

        let neither = OrderLocator {
            order_id: None,
            external_payment_id: None,
        };
        assert!(neither.into_order_ref().is_err());
    }
}
