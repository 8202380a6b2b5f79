use crate::{
    entities::return_unit, models::BarcodeKind, ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnUnitResponse {
    pub code: String,
    pub kind: BarcodeKind,
    pub order_item_id: Uuid,
    pub unit_index: i32,
    pub returned: bool,
    pub return_id: Option<Uuid>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl From<return_unit::Model> for ReturnUnitResponse {
    fn from(model: return_unit::Model) -> Self {
        Self {
            code: model.code,
            kind: model.kind,
            order_item_id: model.order_item_id,
            unit_index: model.unit_index,
            returned: model.returned,
            return_id: model.return_case_id,
            returned_at: model.returned_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderUnitsResponse {
    pub order_id: Uuid,
    pub total_units: usize,
    pub returned_units: usize,
    pub units: Vec<ReturnUnitResponse>,
}

/// Barcode ledger of an order the engine has seen
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/units",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Unit ledger returned", body = OrderUnitsResponse),
        (status = 404, description = "Order not registered", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn list_order_units(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderUnitsResponse> {
    let units = state.return_service().order_units(id).await?;
    let returned_units = units.iter().filter(|u| u.returned).count();

    Ok(Json(ApiResponse::success(OrderUnitsResponse {
        order_id: id,
        total_units: units.len(),
        returned_units,
        units: units.into_iter().map(Into::into).collect(),
    })))
}
