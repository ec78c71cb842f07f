//! Draw Endpoint
//!
//! 인증은 앞단 게이트웨이가 처리하고, 확인된 사용자 ID를 `x-user-id`
//! 헤더로 전달함. 헤더가 없으면 체험 추첨만 가능.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    services::{DrawOutcome, DrawRequest},
    types::{ApiResponse, UnitCount},
    AppState,
};

pub const USER_ID_HEADER: &str = "x-user-id";

// ============ Request Types ============

/// 추첨 요청
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawBody {
    pub pack_id: Uuid,
    /// 1 또는 10
    pub units: UnitCount,
    #[serde(default)]
    pub is_trial: bool,
}

// ============ Handlers ============

/// POST /draws
///
/// # Request
///
/// ```json
/// { "packId": "…", "units": 10, "isTrial": false }
/// ```
///
/// # Errors
///
/// - 401: 로그인 없이 유료 추첨
/// - 409: PACK_UNAVAILABLE, INSUFFICIENT_STOCK, USER_LIMIT_EXCEEDED, INSUFFICIENT_BALANCE
/// - 503: 재시도 소진 또는 트랜잭션 타임아웃
pub async fn draw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DrawBody>,
) -> Result<Json<ApiResponse<DrawOutcome>>, ApiError> {
    let user_id = acting_user(&headers)?;
    if !body.is_trial && user_id.is_none() {
        return Err(ApiError::Unauthorized);
    }

    let outcome = state
        .draws
        .draw(DrawRequest {
            pack_id: body.pack_id,
            units: body.units,
            user_id,
            is_trial: body.is_trial,
        })
        .await?;

    Ok(Json(ApiResponse::success(outcome)))
}

// ============ Helpers ============

fn acting_user(headers: &HeaderMap) -> Result<Option<Uuid>, ApiError> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{} is not valid text", USER_ID_HEADER)))?;
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("{} must be a UUID", USER_ID_HEADER)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_acting_user_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(acting_user(&headers).unwrap(), None);

        let id = Uuid::new_v4();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(acting_user(&headers).unwrap(), Some(id));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(acting_user(&headers), Err(ApiError::BadRequest(_))));
    }
}
