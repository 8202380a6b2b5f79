use std::{net::SocketAddr, sync::Arc};

use http::HeaderValue;
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{error, info, warn};

use returns_engine as engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = engine::config::load_config()?;
    engine::config::init_tracing(cfg.log_level(), cfg.log_json);
    engine::handlers::health::init_start_time();

    // Init DB
    let db_pool = engine::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        engine::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_sender, event_rx) = engine::events::EventSender::channel(cfg.event_channel_capacity);
    tokio::spawn(engine::events::process_events(event_rx));

    // Money-movement audit stream
    let audit = engine::logging::AuditLog::new(engine::logging::setup_logger(
        engine::logging::LoggerConfig {
            use_color: cfg.audit_log_color,
            ..Default::default()
        },
    ));

    let orders = engine::services::order_gateway::HttpOrderGateway::new(
        cfg.order_service_url.clone(),
        cfg.order_service_timeout(),
    )?;
    info!(url = %cfg.order_service_url, "Order service gateway configured");

    let ctx = engine::commands::CommandContext {
        db_pool: db_arc.clone(),
        event_sender: Arc::new(event_sender),
        orders: Arc::new(orders),
        locks: engine::services::order_locks::OrderLocks::new(),
        ledger: engine::services::barcode_ledger::BarcodeLedger::new(),
        reconciler: engine::services::inventory_reconciler::InventoryReconciler::new(),
        audit,
        settings: engine::commands::EngineSettings {
            currency: cfg.currency()?,
            return_number_prefix: cfg.return_number_prefix.clone(),
        },
    };
    let app_state = engine::AppState::new(cfg.clone(), ctx);

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        return Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".into());
    };

    let app = engine::build_router(app_state)
        .layer(TimeoutLayer::new(cfg.request_timeout()))
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("returns-engine listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Ok(pool) = Arc::try_unwrap(db_arc) {
        engine::db::close_pool(pool).await?;
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
