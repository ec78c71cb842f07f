//! Error Handling Module
//!
//! Three layers of errors:
//!
//! - `StoreError`: persistence failures, classified so that serialization
//!   conflicts can be retried.
//! - `EngineError`: the draw/charge/refund taxonomy (validation,
//!   precondition, conflict, integrity).
//! - `ApiError`: HTTP mapping with proper status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Currency, OrderStatus};

// ============ Persistence ============

/// 저장소 계층 에러
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLSTATE 40001 / 40P01 - 트랜잭션 전체 재시도 대상
    #[error("Serialization conflict: {0}")]
    SerializationConflict(String),

    /// SQLSTATE 23505
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Failed to decode row: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") => {
                    return StoreError::SerializationConflict(db_err.message().to_string())
                }
                Some("23505") => return StoreError::UniqueViolation(db_err.message().to_string()),
                _ => {}
            }
        }
        StoreError::Database(err.to_string())
    }
}

// ============ Domain ============

/// 에러 분류 (재시도/로깅/응답 정책 결정용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Precondition,
    Conflict,
    Integrity,
    Internal,
}

/// 추첨/충전/환불 엔진 에러
#[derive(Debug, Error)]
pub enum EngineError {
    // ============ Validation ============
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    // ============ Precondition ============
    #[error("Pack {pack_id} is not available: {reason}")]
    PackUnavailable { pack_id: Uuid, reason: String },

    #[error("Insufficient stock: requested {requested}, remaining {remaining}")]
    InsufficientStock { requested: i64, remaining: i64 },

    #[error("Per-user limit exceeded: limit {limit}, already drawn {already_drawn}, requested {requested}")]
    UserLimitExceeded {
        limit: i64,
        already_drawn: i64,
        requested: i64,
    },

    #[error("Insufficient {currency} balance: required {required}, available {available}")]
    InsufficientBalance {
        currency: Currency,
        required: i64,
        available: i64,
    },

    #[error("Order {order_id} cannot be refunded in status {status}")]
    OrderNotRefundable { order_id: Uuid, status: OrderStatus },

    // ============ Conflict ============
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Concurrent refund on order {order_id}; retry against fresh state")]
    RefundConflict { order_id: Uuid },

    #[error("{operation} still conflicting after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: u32 },

    #[error("{operation} exceeded the {timeout_ms}ms transaction timeout")]
    Timeout { operation: String, timeout_ms: u64 },

    // ============ Integrity ============
    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Store(StoreError),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Validation(_) | EngineError::NotFound(_) => ErrorCategory::Validation,
            EngineError::PackUnavailable { .. }
            | EngineError::InsufficientStock { .. }
            | EngineError::UserLimitExceeded { .. }
            | EngineError::InsufficientBalance { .. }
            | EngineError::OrderNotRefundable { .. } => ErrorCategory::Precondition,
            EngineError::Conflict(_)
            | EngineError::RefundConflict { .. }
            | EngineError::RetriesExhausted { .. }
            | EngineError::Timeout { .. } => ErrorCategory::Conflict,
            EngineError::Integrity(_) => ErrorCategory::Integrity,
            EngineError::Store(_) => ErrorCategory::Internal,
        }
    }

    /// 트랜잭션을 처음부터 다시 실행해도 되는 에러인지
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict(_) | EngineError::RefundConflict { .. }
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SerializationConflict(msg) | StoreError::UniqueViolation(msg) => {
                EngineError::Conflict(msg)
            }
            other => EngineError::Store(other),
        }
    }
}

// ============ HTTP ============

/// API 에러 타입
///
/// 각 variant는 HTTP 상태 코드에 매핑됨.
/// 내부 정보(무결성 위반, DB 에러)는 클라이언트에 노출하지 않음.
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 400 Bad Request ============
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    // ============ 401 Unauthorized ============
    #[error("Authentication required")]
    Unauthorized,

    // ============ 404 Not Found ============
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ============ 409 Conflict ============
    #[error("Precondition failed: {message}")]
    PreconditionFailed { code: &'static str, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    // ============ 500 Internal Server Error ============
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    InternalError,

    // ============ 503 Service Unavailable ============
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// API 에러 응답 구조
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            // 4xx 클라이언트 에러
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            ApiError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Validation failed".to_string(),
                Some(msg.clone()),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
                None,
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", resource),
                None,
            ),
            ApiError::PreconditionFailed { code, message } => (
                StatusCode::CONFLICT,
                *code,
                message.clone(),
                None,
            ),
            ApiError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                "Request conflicted with a concurrent update".to_string(),
                Some(msg.clone()),
            ),

            // 5xx 서버 에러
            ApiError::DatabaseError(_) => {
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database error occurred".to_string(),
                    None,
                )
            }
            ApiError::InternalError => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(reason) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Service is busy, please retry".to_string(),
                Some(reason.clone()),
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// 엔진 에러를 ApiError로 변환
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::ValidationError(msg),
            EngineError::NotFound(what) => ApiError::NotFound(what),
            EngineError::PackUnavailable { .. } => ApiError::PreconditionFailed {
                code: "PACK_UNAVAILABLE",
                message: err.to_string(),
            },
            EngineError::InsufficientStock { .. } => ApiError::PreconditionFailed {
                code: "INSUFFICIENT_STOCK",
                message: err.to_string(),
            },
            EngineError::UserLimitExceeded { .. } => ApiError::PreconditionFailed {
                code: "USER_LIMIT_EXCEEDED",
                message: err.to_string(),
            },
            EngineError::InsufficientBalance { .. } => ApiError::PreconditionFailed {
                code: "INSUFFICIENT_BALANCE",
                message: err.to_string(),
            },
            EngineError::OrderNotRefundable { .. } => ApiError::PreconditionFailed {
                code: "ORDER_NOT_REFUNDABLE",
                message: err.to_string(),
            },
            EngineError::Conflict(_) | EngineError::RefundConflict { .. } => {
                ApiError::Conflict(err.to_string())
            }
            EngineError::RetriesExhausted { .. } | EngineError::Timeout { .. } => {
                ApiError::ServiceUnavailable(err.to_string())
            }
            EngineError::Integrity(ref detail) => {
                tracing::error!(detail = %detail, "integrity violation surfaced to caller");
                ApiError::InternalError
            }
            EngineError::Store(store) => ApiError::DatabaseError(store.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflicts_are_retryable() {
        let err: EngineError = StoreError::SerializationConflict("40001".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err: EngineError = StoreError::UniqueViolation("rank_bonus_grants".into()).into();
        assert!(err.is_retryable());

        let err: EngineError = StoreError::Database("connection reset".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_exhausted_retries_are_not_retried_again() {
        let err = EngineError::RetriesExhausted {
            operation: "draw".into(),
            attempts: 3,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_precondition_status_code() {
        let api: ApiError = EngineError::InsufficientStock {
            requested: 10,
            remaining: 3,
        }
        .into();
        let response = api.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_integrity_is_opaque() {
        let api: ApiError = EngineError::Integrity("last-unit slot exhausted".into()).into();
        assert!(matches!(api, ApiError::InternalError));
        assert_eq!(api.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
