use crate::{
    entities::exchange_record,
    errors::ServiceError,
    handlers::{common::to_decimal, refunds::RefundRecordResponse, returns::ReturnSummary},
    services::exchanges::{ExchangeOutcome, ExchangeRequest, ResumeExchangeRequest},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct ExchangeRecordResponse {
    pub id: Uuid,
    pub return_id: Uuid,
    pub new_order_id: Uuid,
    pub new_order_number: String,
    pub currency: String,
    pub refund_amount: Decimal,
    pub new_order_total: Decimal,
    /// Positive when the customer is owed money, negative when they owe
    pub net_amount: Decimal,
    pub credit_applied: Decimal,
    pub credit_refund_id: Uuid,
    pub payout_refund_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<exchange_record::Model> for ExchangeRecordResponse {
    fn from(model: exchange_record::Model) -> Self {
        Self {
            id: model.id,
            return_id: model.return_case_id,
            new_order_id: model.new_order_id,
            new_order_number: model.new_order_number,
            currency: model.currency,
            refund_amount: to_decimal(model.refund_amount_minor),
            new_order_total: to_decimal(model.new_order_total_minor),
            net_amount: to_decimal(model.net_amount_minor),
            credit_applied: to_decimal(model.credit_applied_minor),
            credit_refund_id: model.credit_refund_id,
            payout_refund_id: model.payout_refund_id,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExchangeResponse {
    pub return_case: ReturnSummary,
    pub credit: RefundRecordResponse,
    pub payout: Option<RefundRecordResponse>,
    pub exchange: ExchangeRecordResponse,
}

impl From<ExchangeOutcome> for ExchangeResponse {
    fn from(outcome: ExchangeOutcome) -> Self {
        Self {
            return_case: outcome.case.into(),
            credit: outcome.credit.into(),
            payout: outcome.payout.map(Into::into),
            exchange: outcome.exchange.into(),
        }
    }
}

/// Return items and place a replacement order paid for by the refund
#[utoipa::path(
    post,
    path = "/api/v1/exchanges",
    request_body = ExchangeRequest,
    responses(
        (status = 201, description = "Exchange settled and linked", body = ExchangeResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Unit already returned", body = crate::errors::ErrorResponse),
        (status = 424, description = "Refund settled but the replacement order failed; resume to retry", body = crate::errors::ErrorResponse)
    ),
    tag = "Exchanges"
)]
pub async fn create_exchange(
    State(state): State<AppState>,
    Json(payload): Json<ExchangeRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.exchange_coordinator().run(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ExchangeResponse::from(outcome))),
    ))
}

/// Retry replacement order placement for a refunded exchange
#[utoipa::path(
    post,
    path = "/api/v1/exchanges/{return_id}/resume",
    params(("return_id" = Uuid, Path, description = "Return case ID")),
    request_body = ResumeExchangeRequest,
    responses(
        (status = 200, description = "Exchange linked", body = ExchangeResponse),
        (status = 400, description = "Already linked or not an exchange", body = crate::errors::ErrorResponse),
        (status = 409, description = "Return not refunded", body = crate::errors::ErrorResponse),
        (status = 424, description = "Replacement order failed again", body = crate::errors::ErrorResponse)
    ),
    tag = "Exchanges"
)]
pub async fn resume_exchange(
    State(state): State<AppState>,
    Path(return_id): Path<Uuid>,
    Json(payload): Json<ResumeExchangeRequest>,
) -> ApiResult<ExchangeResponse> {
    let outcome = state
        .exchange_coordinator()
        .resume(return_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}
