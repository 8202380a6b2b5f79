use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Returns Engine API",
        version = "0.1.0",
        description = r#"
# Returns Engine

Return, refund and exchange reconciliation for completed retail orders.

## Features

- **Unit ledger**: every unit of a completed order carries a barcode and can be returned at most once
- **Return cases**: `pending -> approved -> processed -> completed -> refunded`, with rejection from pending or approved
- **Refund allocation**: split a case's refund across cash, card and wallets, settled at once or in two steps
- **Exchanges**: refund into a credit that pays for a replacement order, with resume after partial failure

## Money

Amounts are decimal strings in major units (`"12.50"`). One currency per case.

## Error Handling

Failures carry a machine-readable `kind`:

```json
{
  "error": "Conflict",
  "kind": "already_returned",
  "message": "Barcode ORD-1-A has already been returned",
  "details": {"barcode": "ORD-1-A"},
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `limit` (clamped to the configured maximum).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Returns", description = "Return case lifecycle endpoints"),
        (name = "Refunds", description = "Refund allocation and settlement endpoints"),
        (name = "Exchanges", description = "Exchange settlement endpoints"),
        (name = "Orders", description = "Order unit ledger endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Returns
        crate::handlers::returns::list_returns,
        crate::handlers::returns::get_return,
        crate::handlers::returns::create_return,
        crate::handlers::returns::update_return,
        crate::handlers::returns::approve_return,
        crate::handlers::returns::reject_return,
        crate::handlers::returns::process_return,
        crate::handlers::returns::complete_return,
        crate::handlers::returns::restock_return,

        // Refunds
        crate::handlers::refunds::allocate_refund,
        crate::handlers::refunds::process_refund,
        crate::handlers::refunds::complete_refund,
        crate::handlers::refunds::list_return_refunds,

        // Exchanges
        crate::handlers::exchanges::create_exchange,
        crate::handlers::exchanges::resume_exchange,

        // Orders
        crate::handlers::orders::list_order_units,

        // Health
        crate::handlers::health::api_status,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,
            crate::handlers::common::PaginationParams,

            // Domain enums
            crate::models::ReturnStatus,
            crate::models::ReturnType,
            crate::models::RefundStatus,
            crate::models::BarcodeKind,

            // Return types
            crate::handlers::returns::ReturnSummary,
            crate::handlers::returns::ReturnCaseResponse,
            crate::handlers::returns::ReturnItemResponse,
            crate::handlers::returns::CreateReturnRequest,
            crate::handlers::returns::UpdateReturnRequest,
            crate::handlers::returns::ApproveReturnRequest,
            crate::handlers::returns::RejectReturnRequest,
            crate::handlers::returns::ProcessReturnRequest,
            crate::handlers::returns::RestockResponse,
            crate::commands::returns::create_return_command::ReturnItemRequest,
            crate::services::inventory_reconciler::RestoreOutcome,

            // Refund types
            crate::handlers::refunds::AllocateRefundRequest,
            crate::handlers::refunds::SettleRefundRequest,
            crate::handlers::refunds::RefundRecordResponse,
            crate::handlers::refunds::RefundBalanceResponse,
            crate::handlers::refunds::RefundLedgerResponse,
            crate::handlers::refunds::RefundSettlementResponse,
            crate::services::refunds::Denomination,

            // Exchange types
            crate::handlers::exchanges::ExchangeResponse,
            crate::handlers::exchanges::ExchangeRecordResponse,
            crate::services::exchanges::ExchangeRequest,
            crate::services::exchanges::ResumeExchangeRequest,
            crate::services::order_gateway::ReplacementItem,
            crate::errors::ExchangeStage,

            // Order types
            crate::handlers::orders::OrderUnitsResponse,
            crate::handlers::orders::ReturnUnitResponse,

            // Health types
            crate::handlers::health::StatusResponse,
            crate::handlers::health::HealthResponse,
            crate::handlers::health::ComponentHealth,
            crate::handlers::health::ComponentStatus,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
