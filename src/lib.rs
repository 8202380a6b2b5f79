//! Returns Engine Library
//!
//! Return, refund and exchange reconciliation for retail orders: a per-unit
//! return ledger, the return case lifecycle, refund allocation across
//! payment instruments and exchange settlement against replacement orders.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod logging;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::commands::CommandContext;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Builds the handler state around an already wired command context.
    pub fn new(config: config::AppConfig, ctx: CommandContext) -> Self {
        Self {
            db: ctx.db_pool.clone(),
            event_sender: ctx.event_sender.as_ref().clone(),
            services: handlers::AppServices::new(ctx),
            config,
        }
    }

    pub fn return_service(&self) -> Arc<services::returns::ReturnService> {
        self.services.returns.clone()
    }

    pub fn refund_allocator(&self) -> Arc<services::refunds::RefundAllocator> {
        self.services.refunds.clone()
    }

    pub fn exchange_coordinator(&self) -> Arc<services::exchanges::ExchangeCoordinator> {
        self.services.exchanges.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes served under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    let returns = Router::new()
        .route(
            "/returns",
            get(handlers::returns::list_returns).post(handlers::returns::create_return),
        )
        .route(
            "/returns/:id",
            get(handlers::returns::get_return).patch(handlers::returns::update_return),
        )
        .route("/returns/:id/approve", post(handlers::returns::approve_return))
        .route("/returns/:id/reject", post(handlers::returns::reject_return))
        .route("/returns/:id/process", post(handlers::returns::process_return))
        .route("/returns/:id/complete", post(handlers::returns::complete_return))
        .route("/returns/:id/restock", post(handlers::returns::restock_return))
        .route(
            "/returns/:id/refunds",
            get(handlers::refunds::list_return_refunds),
        );

    let refunds = Router::new()
        .route("/refunds", post(handlers::refunds::allocate_refund))
        .route("/refunds/:id/process", post(handlers::refunds::process_refund))
        .route("/refunds/:id/complete", post(handlers::refunds::complete_refund));

    let exchanges = Router::new()
        .route("/exchanges", post(handlers::exchanges::create_exchange))
        .route(
            "/exchanges/:return_id/resume",
            post(handlers::exchanges::resume_exchange),
        );

    let orders = Router::new().route(
        "/orders/:id/units",
        get(handlers::orders::list_order_units),
    );

    Router::new()
        .route("/status", get(handlers::health::api_status))
        .route("/health", get(handlers::health::health_check))
        .merge(returns)
        .merge(refunds)
        .merge(exchanges)
        .merge(orders)
}

/// Full application router: v1 API, Swagger UI, HTTP tracing and request ids.
///
/// Transport concerns that depend on deployment (CORS, compression,
/// timeouts) are layered on by the binary.
pub fn build_router(state: AppState) -> Router {
    Router::<AppState>::new()
        .route("/", get(|| async { "returns-engine up" }))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
