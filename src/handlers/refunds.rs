use crate::{
    entities::refund_record,
    errors::ServiceError,
    handlers::common::to_decimal,
    models::{RefundStatus, ReturnStatus},
    services::refunds::{AllocationRequest, Denomination, RefundBalance},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AllocateRefundRequest {
    pub return_id: Uuid,
    /// Amount per instrument: `cash`, `card`, `wallet:<name>` or a bare
    /// wallet name such as `gcash`
    #[serde(default)]
    pub amounts: BTreeMap<String, Decimal>,
    /// Cash drawer count; replaces the `cash` amount when present
    pub cash_denominations: Option<Vec<Denomination>>,
    /// `false` leaves the records pending for later settlement
    #[serde(default = "default_settle")]
    pub settle: bool,
    pub transaction_reference: Option<String>,
}

fn default_settle() -> bool {
    true
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SettleRefundRequest {
    pub transaction_reference: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundRecordResponse {
    pub id: Uuid,
    pub return_id: Uuid,
    pub method: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: RefundStatus,
    pub transaction_reference: Option<String>,
    #[schema(value_type = Option<Vec<Denomination>>)]
    pub denominations: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<refund_record::Model> for RefundRecordResponse {
    fn from(model: refund_record::Model) -> Self {
        Self {
            id: model.id,
            return_id: model.return_case_id,
            method: model.method,
            amount: to_decimal(model.amount_minor),
            currency: model.currency,
            status: model.status,
            transaction_reference: model.transaction_reference,
            denominations: model.denominations,
            created_at: model.created_at,
            processed_at: model.processed_at,
            completed_at: model.completed_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundBalanceResponse {
    pub total_refund_amount: Decimal,
    /// Sum of every record, settled or not
    pub allocated: Decimal,
    /// Sum of completed records
    pub settled: Decimal,
    /// `total_refund_amount - settled`
    pub remaining: Decimal,
    /// Amount that can still be allocated
    pub unallocated: Decimal,
}

impl TryFrom<&RefundBalance> for RefundBalanceResponse {
    type Error = ServiceError;

    fn try_from(balance: &RefundBalance) -> Result<Self, Self::Error> {
        Ok(Self {
            total_refund_amount: balance.total_refund.to_decimal(),
            allocated: balance.committed.to_decimal(),
            settled: balance.settled.to_decimal(),
            remaining: balance.remaining()?.to_decimal(),
            unallocated: balance.headroom()?.to_decimal(),
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundLedgerResponse {
    pub return_id: Uuid,
    pub return_status: ReturnStatus,
    pub currency: String,
    pub records: Vec<RefundRecordResponse>,
    pub balance: RefundBalanceResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundSettlementResponse {
    pub refund: RefundRecordResponse,
    pub return_status: ReturnStatus,
    pub balance: RefundBalanceResponse,
}

/// Allocate a completed return's refund across one or more instruments
#[utoipa::path(
    post,
    path = "/api/v1/refunds",
    request_body = AllocateRefundRequest,
    responses(
        (status = 201, description = "Refund records written", body = RefundLedgerResponse),
        (status = 400, description = "Invalid amounts", body = crate::errors::ErrorResponse),
        (status = 409, description = "Return not completed", body = crate::errors::ErrorResponse),
        (status = 422, description = "Allocation exceeds the remaining refund", body = crate::errors::ErrorResponse)
    ),
    tag = "Refunds"
)]
pub async fn allocate_refund(
    State(state): State<AppState>,
    Json(payload): Json<AllocateRefundRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state
        .refund_allocator()
        .allocate(AllocationRequest {
            return_id: payload.return_id,
            amounts: payload.amounts,
            cash_denominations: payload.cash_denominations,
            settle: payload.settle,
            transaction_reference: payload.transaction_reference,
        })
        .await?;

    let response = RefundLedgerResponse {
        return_id: result.case.id,
        return_status: result.case.status,
        currency: result.case.currency,
        balance: RefundBalanceResponse::try_from(&result.balance)?,
        records: result.records.into_iter().map(Into::into).collect(),
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// First settlement step of a pending refund
#[utoipa::path(
    post,
    path = "/api/v1/refunds/{id}/process",
    params(("id" = Uuid, Path, description = "Refund record ID")),
    request_body = SettleRefundRequest,
    responses(
        (status = 200, description = "Refund processed", body = RefundRecordResponse),
        (status = 404, description = "Refund not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Refund already completed", body = crate::errors::ErrorResponse)
    ),
    tag = "Refunds"
)]
pub async fn process_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<SettleRefundRequest>>,
) -> ApiResult<RefundRecordResponse> {
    let Json(payload) = payload.unwrap_or_default();
    let record = state
        .refund_allocator()
        .process(id, payload.transaction_reference)
        .await?;
    Ok(Json(ApiResponse::success(record.into())))
}

/// Final settlement step; refunds the case once nothing remains
#[utoipa::path(
    post,
    path = "/api/v1/refunds/{id}/complete",
    params(("id" = Uuid, Path, description = "Refund record ID")),
    request_body = SettleRefundRequest,
    responses(
        (status = 200, description = "Refund completed", body = RefundSettlementResponse),
        (status = 404, description = "Refund not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Refund still pending", body = crate::errors::ErrorResponse)
    ),
    tag = "Refunds"
)]
pub async fn complete_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<SettleRefundRequest>>,
) -> ApiResult<RefundSettlementResponse> {
    let Json(payload) = payload.unwrap_or_default();
    let settlement = state
        .refund_allocator()
        .complete(id, payload.transaction_reference)
        .await?;
    Ok(Json(ApiResponse::success(RefundSettlementResponse {
        balance: RefundBalanceResponse::try_from(&settlement.balance)?,
        return_status: settlement.case.status,
        refund: settlement.record.into(),
    })))
}

/// Refund records of a return case and what is left to settle
#[utoipa::path(
    get,
    path = "/api/v1/returns/{id}/refunds",
    params(("id" = Uuid, Path, description = "Return case ID")),
    responses(
        (status = 200, description = "Refund ledger", body = RefundLedgerResponse),
        (status = 404, description = "Return case not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Refunds"
)]
pub async fn list_return_refunds(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<RefundLedgerResponse> {
    let ledger = state.refund_allocator().list(id).await?;
    Ok(Json(ApiResponse::success(RefundLedgerResponse {
        return_id: ledger.case.id,
        return_status: ledger.case.status,
        currency: ledger.case.currency,
        balance: RefundBalanceResponse::try_from(&ledger.balance)?,
        records: ledger.records.into_iter().map(Into::into).collect(),
    })))
}
