use crate::{
    commands::returns::{
        approve_return_command::ApproveReturnCommand,
        complete_return_command::CompleteReturnCommand,
        create_return_command::{InitiateReturnCommand, ReturnItemRequest},
        process_return_command::ProcessReturnCommand,
        reject_return_command::RejectReturnCommand,
        restock_returned_items_command::RestockReturnedItemsCommand,
        update_return_command::UpdateReturnCommand,
    },
    entities::return_case,
    errors::ServiceError,
    handlers::{
        common::{to_decimal, to_decimal_opt, total_pages, PaginationParams},
        exchanges::ExchangeRecordResponse,
    },
    models::{ReturnStatus, ReturnType},
    services::{
        inventory_reconciler::RestoreOutcome,
        returns::{ReturnCaseDetail, ReturnItemDetail, ReturnListFilter},
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Default, IntoParams, ToSchema)]
pub struct ReturnListQuery {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size
    pub limit: Option<u64>,
    /// Optional status filter (case-insensitive)
    pub status: Option<String>,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnSummary {
    pub id: Uuid,
    pub return_number: String,
    pub order_id: Uuid,
    pub order_number: String,
    pub status: ReturnStatus,
    pub return_type: ReturnType,
    pub reason: String,
    pub currency: String,
    pub total_return_value: Decimal,
    pub total_refund_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<return_case::Model> for ReturnSummary {
    fn from(model: return_case::Model) -> Self {
        Self {
            id: model.id,
            return_number: model.return_number,
            order_id: model.order_id,
            order_number: model.order_number,
            status: model.status,
            return_type: model.return_type,
            reason: model.reason,
            currency: model.currency,
            total_return_value: to_decimal(model.total_return_value_minor),
            total_refund_amount: to_decimal_opt(model.total_refund_amount_minor),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnItemResponse {
    pub id: Uuid,
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity_returned: i32,
    pub unit_price: Decimal,
    pub batch_id: Option<Uuid>,
    pub reason: Option<String>,
    /// Unit codes consumed by this item
    pub barcodes: Vec<String>,
}

impl From<ReturnItemDetail> for ReturnItemResponse {
    fn from(detail: ReturnItemDetail) -> Self {
        let item = detail.item;
        Self {
            id: item.id,
            order_item_id: item.order_item_id,
            product_id: item.product_id,
            product_name: item.product_name,
            quantity_returned: item.quantity_returned,
            unit_price: to_decimal(item.unit_price_minor),
            batch_id: item.batch_id,
            reason: item.reason,
            barcodes: detail.barcodes,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnCaseResponse {
    pub id: Uuid,
    pub return_number: String,
    pub order_id: Uuid,
    pub order_number: String,
    pub status: ReturnStatus,
    pub return_type: ReturnType,
    pub reason: String,
    pub currency: String,
    pub total_return_value: Decimal,
    pub total_refund_amount: Option<Decimal>,
    pub processing_fee: Option<Decimal>,
    pub quality_check_passed: Option<bool>,
    pub quality_check_notes: Option<String>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    /// Set when the order's own barcodes were unusable and synthetic codes
    /// were issued instead
    pub degraded_barcodes: bool,
    pub inventory_restored: bool,
    pub inventory_warnings: Vec<String>,
    pub items: Vec<ReturnItemResponse>,
    pub exchange: Option<ExchangeRecordResponse>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl From<ReturnCaseDetail> for ReturnCaseResponse {
    fn from(detail: ReturnCaseDetail) -> Self {
        let case = detail.case;
        let inventory_warnings = case.warnings();
        Self {
            id: case.id,
            return_number: case.return_number,
            order_id: case.order_id,
            order_number: case.order_number,
            status: case.status,
            return_type: case.return_type,
            reason: case.reason,
            currency: case.currency,
            total_return_value: to_decimal(case.total_return_value_minor),
            total_refund_amount: to_decimal_opt(case.total_refund_amount_minor),
            processing_fee: to_decimal_opt(case.processing_fee_minor),
            quality_check_passed: case.quality_check_passed,
            quality_check_notes: case.quality_check_notes,
            notes: case.notes,
            rejection_reason: case.rejection_reason,
            degraded_barcodes: case.degraded_barcodes,
            inventory_restored: case.inventory_restored_at.is_some(),
            inventory_warnings,
            items: detail.items.into_iter().map(Into::into).collect(),
            exchange: detail.exchange.map(Into::into),
            version: case.version,
            created_at: case.created_at,
            updated_at: case.updated_at,
            approved_at: case.approved_at,
            rejected_at: case.rejected_at,
            processed_at: case.processed_at,
            completed_at: case.completed_at,
            refunded_at: case.refunded_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateReturnRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, message = "Reason cannot be empty"))]
    pub return_reason: String,
    pub return_type: ReturnType,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<ReturnItemRequest>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateReturnRequest {
    pub quality_check_passed: Option<bool>,
    pub quality_check_notes: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ApproveReturnRequest {
    /// Defaults to the full refundable value less the processing fee
    pub total_refund_amount: Option<Decimal>,
    pub processing_fee: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RejectReturnRequest {
    #[validate(length(min = 1, message = "Rejection reason cannot be empty"))]
    pub rejection_reason: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProcessReturnRequest {
    #[serde(default)]
    pub restore_inventory: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RestockResponse {
    pub return_case: ReturnCaseResponse,
    pub outcome: RestoreOutcome,
}

/// List return cases, newest first
#[utoipa::path(
    get,
    path = "/api/v1/returns",
    params(ReturnListQuery),
    responses(
        (status = 200, description = "Return cases returned"),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn list_returns(
    State(state): State<AppState>,
    Query(query): Query<ReturnListQuery>,
) -> ApiResult<PaginatedResponse<ReturnSummary>> {
    let (page, limit) = PaginationParams {
        page: query.page,
        limit: query.limit,
    }
    .resolve(&state.config);
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ReturnStatus>)
        .transpose()
        .map_err(ServiceError::ValidationError)?;

    let (records, total) = state
        .return_service()
        .list_returns(ReturnListFilter {
            page,
            limit,
            status,
            order_id: query.order_id,
        })
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: records.into_iter().map(ReturnSummary::from).collect(),
        total,
        page,
        limit,
        total_pages: total_pages(total, limit),
    })))
}

/// Fetch one return case with its items
#[utoipa::path(
    get,
    path = "/api/v1/returns/{id}",
    params(("id" = Uuid, Path, description = "Return case ID")),
    responses(
        (status = 200, description = "Return case returned", body = ReturnCaseResponse),
        (status = 404, description = "Return case not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn get_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ReturnCaseResponse> {
    let detail = state.return_service().get_return(id).await?;
    Ok(Json(ApiResponse::success(detail.into())))
}

/// Open a return case against a completed order
#[utoipa::path(
    post,
    path = "/api/v1/returns",
    request_body = CreateReturnRequest,
    responses(
        (status = 201, description = "Return case opened", body = ReturnCaseResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order or order line not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Unit already returned", body = crate::errors::ErrorResponse),
        (status = 422, description = "Quantity exceeds eligible units", body = crate::errors::ErrorResponse),
        (status = 502, description = "Order service unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn create_return(
    State(state): State<AppState>,
    Json(payload): Json<CreateReturnRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;

    let command = InitiateReturnCommand {
        order_id: payload.order_id,
        return_type: payload.return_type,
        reason: payload.return_reason,
        items: payload.items,
        notes: payload.notes,
    };

    let created = state.return_service().create_return(command).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ReturnCaseResponse::from(created))),
    ))
}

/// Record a quality check and/or notes
#[utoipa::path(
    patch,
    path = "/api/v1/returns/{id}",
    params(("id" = Uuid, Path, description = "Return case ID")),
    request_body = UpdateReturnRequest,
    responses(
        (status = 200, description = "Return case updated", body = ReturnCaseResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Quality check outside pending", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn update_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateReturnRequest>,
) -> ApiResult<ReturnCaseResponse> {
    let command = UpdateReturnCommand {
        return_id: id,
        quality_check_passed: payload.quality_check_passed,
        quality_check_notes: payload.quality_check_notes,
        notes: payload.notes,
    };
    let updated = state.return_service().update_return(command).await?;
    Ok(Json(ApiResponse::success(updated.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/returns/{id}/approve",
    params(("id" = Uuid, Path, description = "Return case ID")),
    request_body = ApproveReturnRequest,
    responses(
        (status = 200, description = "Return approved", body = ReturnCaseResponse),
        (status = 400, description = "Refund terms out of range", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal transition", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn approve_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ApproveReturnRequest>>,
) -> ApiResult<ReturnCaseResponse> {
    let Json(payload) = payload.unwrap_or_default();
    let command = ApproveReturnCommand {
        return_id: id,
        total_refund_amount: payload.total_refund_amount,
        processing_fee: payload.processing_fee,
    };
    let updated = state.return_service().approve_return(command).await?;
    Ok(Json(ApiResponse::success(updated.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/returns/{id}/reject",
    params(("id" = Uuid, Path, description = "Return case ID")),
    request_body = RejectReturnRequest,
    responses(
        (status = 200, description = "Return rejected", body = ReturnCaseResponse),
        (status = 409, description = "Illegal transition", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn reject_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectReturnRequest>,
) -> ApiResult<ReturnCaseResponse> {
    payload.validate()?;
    let command = RejectReturnCommand {
        return_id: id,
        reason: payload.rejection_reason,
    };
    let updated = state.return_service().reject_return(command).await?;
    Ok(Json(ApiResponse::success(updated.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/returns/{id}/process",
    params(("id" = Uuid, Path, description = "Return case ID")),
    request_body = ProcessReturnRequest,
    responses(
        (status = 200, description = "Return processed", body = ReturnCaseResponse),
        (status = 409, description = "Illegal transition", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn process_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ProcessReturnRequest>>,
) -> ApiResult<ReturnCaseResponse> {
    let Json(payload) = payload.unwrap_or_default();
    let command = ProcessReturnCommand {
        return_id: id,
        restore_inventory: payload.restore_inventory,
    };
    let updated = state.return_service().process_return(command).await?;
    Ok(Json(ApiResponse::success(updated.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/returns/{id}/complete",
    params(("id" = Uuid, Path, description = "Return case ID")),
    responses(
        (status = 200, description = "Return completed", body = ReturnCaseResponse),
        (status = 409, description = "Illegal transition", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn complete_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ReturnCaseResponse> {
    let updated = state
        .return_service()
        .complete_return(CompleteReturnCommand { return_id: id })
        .await?;
    Ok(Json(ApiResponse::success(updated.into())))
}

/// Re-run the inventory restore for a processed case; a no-op once stock
/// was restored
#[utoipa::path(
    post,
    path = "/api/v1/returns/{id}/restock",
    params(("id" = Uuid, Path, description = "Return case ID")),
    responses(
        (status = 200, description = "Restore outcome", body = RestockResponse),
        (status = 409, description = "Return not processed yet", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
pub async fn restock_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<RestockResponse> {
    let (detail, outcome) = state
        .return_service()
        .restock_returned_items(RestockReturnedItemsCommand { return_id: id })
        .await?;
    Ok(Json(ApiResponse::success(RestockResponse {
        return_case: detail.into(),
        outcome,
    })))
}
