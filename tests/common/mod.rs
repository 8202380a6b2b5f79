#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use returns_engine::{
    commands::{CommandContext, EngineSettings},
    config::AppConfig,
    db,
    entities::inventory_batch,
    errors::ServiceError,
    events::{self, EventSender},
    logging::AuditLog,
    models::Currency,
    services::{
        barcode_ledger::BarcodeLedger,
        inventory_reconciler::InventoryReconciler,
        order_gateway::{
            OrderGateway, OrderLineSnapshot, OrderSnapshot, PlacedOrder, ReplacementOrderRequest,
        },
        order_locks::OrderLocks,
    },
    AppState,
};

/// In-memory stand-in for the order subsystem.
#[derive(Default)]
pub struct FakeOrderGateway {
    orders: DashMap<Uuid, OrderSnapshot>,
    placed: Mutex<Vec<ReplacementOrderRequest>>,
    completed: Mutex<Vec<Uuid>>,
    fail_create: AtomicBool,
    fail_complete: AtomicBool,
    fetches: AtomicUsize,
}

impl FakeOrderGateway {
    pub fn insert(&self, order: OrderSnapshot) {
        self.orders.insert(order.id, order);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_complete(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn placed(&self) -> Vec<ReplacementOrderRequest> {
        self.placed.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<Uuid> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderGateway for FakeOrderGateway {
    async fn fetch_order(&self, order_id: Uuid) -> Result<OrderSnapshot, ServiceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.orders
            .get(&order_id)
            .map(|o| o.clone())
            .ok_or_else(|| ServiceError::not_found("Order", order_id))
    }

    async fn create_order(
        &self,
        request: &ReplacementOrderRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "order service unavailable".into(),
            ));
        }
        let mut placed = self.placed.lock().unwrap();
        placed.push(request.clone());
        let total_amount = request
            .items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.quantity))
            .sum();
        Ok(PlacedOrder {
            id: Uuid::new_v4(),
            order_number: format!("EX-{:04}", placed.len()),
            total_amount,
        })
    }

    async fn complete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "order completion timed out".into(),
            ));
        }
        self.completed.lock().unwrap().push(order_id);
        Ok(())
    }
}

/// One line of a seeded order: quantity, unit price and optional real barcodes.
pub struct LineSpec {
    pub quantity: u32,
    pub unit_price: Decimal,
    pub barcodes: Option<Vec<String>>,
}

pub fn line(quantity: u32, unit_price: Decimal) -> LineSpec {
    LineSpec {
        quantity,
        unit_price,
        barcodes: None,
    }
}

pub fn scanned_line(unit_price: Decimal, barcodes: &[&str]) -> LineSpec {
    LineSpec {
        quantity: barcodes.len() as u32,
        unit_price,
        barcodes: Some(barcodes.iter().map(|c| c.to_string()).collect()),
    }
}

/// Helper harness for spinning up an application state backed by a temporary SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub ctx: CommandContext,
    pub orders: Arc<FakeOrderGateway>,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let orders = Arc::new(FakeOrderGateway::default());
        Self::build(orders.clone(), orders).await
    }

    /// Same as [`TestApp::new`] but with a caller-provided order gateway.
    pub async fn with_gateway(gateway: Arc<dyn OrderGateway>) -> Self {
        Self::build(gateway, Arc::new(FakeOrderGateway::default())).await
    }

    async fn build(gateway: Arc<dyn OrderGateway>, fake: Arc<FakeOrderGateway>) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("returns_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let ctx = CommandContext {
            db_pool: Arc::new(pool),
            event_sender: Arc::new(event_sender),
            orders: gateway,
            locks: OrderLocks::new(),
            ledger: BarcodeLedger::new(),
            reconciler: InventoryReconciler::new(),
            audit: AuditLog::discard(),
            settings: EngineSettings {
                currency: Currency::new("USD").unwrap(),
                return_number_prefix: "RET".to_string(),
            },
        };
        let state = AppState::new(cfg, ctx.clone());
        let router = returns_engine::build_router(state.clone());

        Self {
            router,
            state,
            ctx,
            orders: fake,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Registers a completed order with the fake order service. Every line
    /// gets its own stock batch holding `stock` units.
    pub async fn seed_order(&self, lines: Vec<LineSpec>, paid: Decimal, stock: i32) -> OrderSnapshot {
        let id = Uuid::new_v4();
        let order_number = format!("ORD-{}", &id.simple().to_string()[..8].to_uppercase());
        let mut items = Vec::with_capacity(lines.len());
        for wanted in lines {
            let product_id = Uuid::new_v4();
            let batch_id = self.seed_batch(product_id, stock).await;
            items.push(OrderLineSnapshot {
                id: Uuid::new_v4(),
                product_id,
                product_name: format!("Product {}", items.len() + 1),
                quantity: wanted.quantity,
                unit_price: wanted.unit_price,
                batch_id: Some(batch_id),
                barcodes: wanted.barcodes,
            });
        }
        let order = OrderSnapshot {
            id,
            order_number,
            currency: Some("USD".to_string()),
            status: Some("completed".to_string()),
            items,
            paid_amount: paid,
            outstanding_amount: Decimal::ZERO,
        };
        self.orders.insert(order.clone());
        order
    }

    pub async fn seed_batch(&self, product_id: Uuid, quantity: i32) -> Uuid {
        let now = Utc::now();
        let batch = inventory_batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            quantity_available: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.ctx.db_pool.as_ref())
        .await
        .expect("seed inventory batch");
        batch.id
    }

    pub async fn batch_quantity(&self, batch_id: Uuid) -> i32 {
        inventory_batch::Entity::find_by_id(batch_id)
            .one(self.ctx.db_pool.as_ref())
            .await
            .expect("load batch")
            .expect("batch exists")
            .quantity_available
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Send a request against the router.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends a request and decodes the JSON body.
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.request(method, uri, body).await;
        let status = response.status();
        (status, response_json(response).await)
    }

    /// Opens a return over the given `(order line index, quantity)` pairs and
    /// returns the `data` payload.
    pub async fn open_return(&self, order: &OrderSnapshot, picks: &[(usize, u32)]) -> Value {
        let items: Vec<Value> = picks
            .iter()
            .map(|(idx, qty)| json!({"order_item_id": order.items[*idx].id, "quantity": qty}))
            .collect();
        let (status, body) = self
            .send(
                Method::POST,
                "/api/v1/returns",
                Some(json!({
                    "order_id": order.id,
                    "return_reason": "Customer changed their mind",
                    "return_type": "unwanted",
                    "items": items,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "open return failed: {}", body);
        body["data"].clone()
    }

    /// Quality check, approve, process and complete.
    pub async fn drive_to_completed(&self, return_id: &str, approve: Value) -> Value {
        let (status, body) = self
            .send(
                Method::PATCH,
                &format!("/api/v1/returns/{}", return_id),
                Some(json!({"quality_check_passed": true, "quality_check_notes": "sealed"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "quality check failed: {}", body);

        let (status, body) = self
            .send(
                Method::POST,
                &format!("/api/v1/returns/{}/approve", return_id),
                Some(approve),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "approve failed: {}", body);

        let (status, body) = self
            .send(
                Method::POST,
                &format!("/api/v1/returns/{}/process", return_id),
                Some(json!({"restore_inventory": true})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "process failed: {}", body);

        let (status, body) = self
            .send(
                Method::POST,
                &format!("/api/v1/returns/{}/complete", return_id),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "complete failed: {}", body);
        body["data"].clone()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json response")
}

/// Decimal field rendered by the API, e.g. `"10.00"`.
pub fn money(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected decimal string, got {}", value))
        .parse()
        .expect("decimal")
}
