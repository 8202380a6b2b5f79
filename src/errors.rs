use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::money::MoneyError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "kind": "over_return",
    "message": "Over-return: requested 3, available 1",
    "details": {"order_item_id": "550e8400-e29b-41d4-a716-446655440000", "requested": 3, "available": 1},
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    #[schema(example = "Conflict")]
    pub error: String,
    /// Machine-readable discriminator
    #[schema(example = "invalid_transition")]
    pub kind: String,
    /// Human-readable error description
    pub message: String,
    /// Structured context for errors the caller has to act on
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

/// Exchange step that failed after money already moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExchangeStage {
    CreateOrder,
    CompleteOrder,
    RecordExchange,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Barcode {code} has already been returned")]
    AlreadyReturned { code: String },

    #[error("Over-return: requested {requested}, available {available}")]
    OverReturn {
        order_item_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Over-allocation: requested {requested}, remaining {remaining}")]
    OverAllocation {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Exchange incomplete for return {return_case_id} at {stage}: {reason}")]
    ExchangeIncomplete {
        return_case_id: Uuid,
        refund_id: Uuid,
        new_order_id: Option<Uuid>,
        stage: ExchangeStage,
        reason: String,
    },

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("External service error: {0}")]
    ExternalServiceError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<MoneyError> for ServiceError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::Overflow => {
                ServiceError::ValidationError("amount is out of range".to_string())
            }
            other => ServiceError::ValidationError(other.to_string()),
        }
    }
}

impl ServiceError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::AlreadyReturned { .. } => "already_returned",
            Self::OverReturn { .. } => "over_return",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::OverAllocation { .. } => "over_allocation",
            Self::ExchangeIncomplete { .. } => "exchange_incomplete",
            Self::InternalError(_) => "internal_error",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::ExternalServiceError(_) => "external_service_error",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyReturned { .. }
            | Self::InvalidTransition(_)
            | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::OverReturn { .. } | Self::OverAllocation { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::ExchangeIncomplete { .. } => StatusCode::FAILED_DEPENDENCY,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }

    /// Structured context that lets a client tell "nothing happened" apart
    /// from "money moved, follow-up failed".
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::AlreadyReturned { code } => Some(json!({ "barcode": code })),
            Self::OverReturn {
                order_item_id,
                requested,
                available,
            } => Some(json!({
                "order_item_id": order_item_id,
                "requested": requested,
                "available": available,
            })),
            Self::OverAllocation {
                requested,
                remaining,
            } => Some(json!({ "requested": requested, "remaining": remaining })),
            Self::ExchangeIncomplete {
                return_case_id,
                refund_id,
                new_order_id,
                stage,
                ..
            } => Some(json!({
                "return_case_id": return_case_id,
                "refund_id": refund_id,
                "new_order_id": new_order_id,
                "stage": stage,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            kind: self.kind().to_string(),
            message: self.response_message(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.kind, "not_found");
    }

    #[test]
    fn domain_errors_map_to_status_codes() {
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::AlreadyReturned { code: "A".into() }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::OverReturn {
                order_item_id: Uuid::nil(),
                requested: 2,
                available: 1
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InvalidTransition("Cannot approve".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::OverAllocation {
                requested: dec!(10),
                remaining: dec!(5)
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::ExternalServiceError("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn exchange_incomplete_carries_refund_reference() {
        let return_case_id = Uuid::new_v4();
        let refund_id = Uuid::new_v4();
        let response = ServiceError::ExchangeIncomplete {
            return_case_id,
            refund_id,
            new_order_id: None,
            stage: ExchangeStage::CreateOrder,
            reason: "order service unavailable".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FAILED_DEPENDENCY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.kind, "exchange_incomplete");
        let details = payload.details.unwrap();
        assert_eq!(details["refund_id"], json!(refund_id));
        assert_eq!(details["return_case_id"], json!(return_case_id));
        assert_eq!(details["stage"], json!("create_order"));
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("sensitive".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("boom".into())).response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InvalidTransition("Cannot approve: quality check not passed".into())
                .response_message(),
            "Cannot approve: quality check not passed"
        );
    }

    #[test]
    fn money_errors_become_validation_errors() {
        let err: ServiceError = MoneyError::TooPrecise(dec!(1.001)).into();
        assert_eq!(err.kind(), "validation_error");

        let err: ServiceError = MoneyError::Overflow.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.response_message(), "Validation error: amount is out of range");
    }
}
