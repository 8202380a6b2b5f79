mod common;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use common::{line, money, TestApp};
use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

use returns_engine::{
    errors::ServiceError,
    services::order_gateway::{
        OrderGateway, OrderLineSnapshot, OrderSnapshot, PlacedOrder, ReplacementOrderRequest,
    },
};

mock! {
    pub Orders {}

    #[async_trait]
    impl OrderGateway for Orders {
        async fn fetch_order(&self, order_id: Uuid) -> Result<OrderSnapshot, ServiceError>;
        async fn create_order(
            &self,
            request: &ReplacementOrderRequest,
        ) -> Result<PlacedOrder, ServiceError>;
        async fn complete_order(&self, order_id: Uuid) -> Result<(), ServiceError>;
    }
}

fn exchange_body(order: &OrderSnapshot, replacement_price: Decimal) -> Value {
    json!({
        "order_id": order.id,
        "return_type": "wrong_item",
        "return_reason": "Wrong size",
        "items": [{"order_item_id": order.items[0].id, "quantity": 2}],
        "replacement_items": [{
            "product_id": Uuid::new_v4(),
            "product_name": "Same shoe, size 42",
            "quantity": 1,
            "unit_price": replacement_price.to_string(),
        }],
        "payout_method": "card",
    })
}

async fn seeded(app: &TestApp) -> OrderSnapshot {
    app.seed_order(vec![line(3, dec!(500.00)), line(1, dec!(1000.00))], dec!(2500.00), 5)
        .await
}

#[tokio::test]
async fn refund_above_new_order_pays_out_the_difference() {
    let app = TestApp::new().await;
    let order = seeded(&app).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/exchanges",
            Some(exchange_body(&order, dec!(650.00))),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let data = &body["data"];
    assert_eq!(data["return_case"]["status"], "refunded");
    assert_eq!(money(&data["exchange"]["refund_amount"]), dec!(1000.00));
    assert_eq!(money(&data["exchange"]["new_order_total"]), dec!(650.00));
    assert_eq!(money(&data["exchange"]["net_amount"]), dec!(350.00));
    assert_eq!(money(&data["exchange"]["credit_applied"]), dec!(650.00));
    assert_eq!(data["credit"]["method"], "exchange_credit");
    assert_eq!(money(&data["credit"]["amount"]), dec!(650.00));
    assert_eq!(data["payout"]["method"], "card");
    assert_eq!(data["payout"]["status"], "completed");
    assert_eq!(money(&data["payout"]["amount"]), dec!(350.00));

    let placed = app.orders.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].original_order_id, order.id);
    assert_eq!(placed[0].exchange_credit, dec!(1000.00));
    assert_eq!(app.orders.completed().len(), 1);

    let return_id = data["return_case"]["id"].as_str().unwrap();
    let (_, ledger) = app
        .send(Method::GET, &format!("/api/v1/returns/{}/refunds", return_id), None)
        .await;
    assert_eq!(money(&ledger["data"]["balance"]["settled"]), dec!(1000.00));
    assert_eq!(money(&ledger["data"]["balance"]["remaining"]), dec!(0));

    let (_, case) = app
        .send(Method::GET, &format!("/api/v1/returns/{}", return_id), None)
        .await;
    assert_eq!(
        case["data"]["exchange"]["new_order_id"],
        data["exchange"]["new_order_id"]
    );
    assert_eq!(case["data"]["inventory_restored"], true);
    assert_eq!(app.batch_quantity(order.items[0].batch_id.unwrap()).await, 7);
}

#[tokio::test]
async fn new_order_above_refund_leaves_a_balance_owed() {
    let app = TestApp::new().await;
    let order = seeded(&app).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/exchanges",
            Some(exchange_body(&order, dec!(1200.00))),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let data = &body["data"];
    assert_eq!(money(&data["exchange"]["net_amount"]), dec!(-200.00));
    assert_eq!(money(&data["exchange"]["credit_applied"]), dec!(1000.00));
    assert!(data["payout"].is_null());
    assert!(data["exchange"]["payout_refund_id"].is_null());
    assert_eq!(money(&data["credit"]["amount"]), dec!(1000.00));
}

#[tokio::test]
async fn failed_order_placement_keeps_the_refund_and_can_resume() {
    let app = TestApp::new().await;
    let order = seeded(&app).await;
    app.orders.fail_create(true);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/exchanges",
            Some(exchange_body(&order, dec!(650.00))),
        )
        .await;
    assert_eq!(status, StatusCode::FAILED_DEPENDENCY, "{}", body);
    assert_eq!(body["kind"], "exchange_incomplete");
    assert_eq!(body["details"]["stage"], "create_order");
    assert!(body["details"]["new_order_id"].is_null());
    let return_id = body["details"]["return_case_id"].as_str().unwrap().to_string();
    let refund_id = body["details"]["refund_id"].clone();

    let (_, ledger) = app
        .send(Method::GET, &format!("/api/v1/returns/{}/refunds", return_id), None)
        .await;
    assert_eq!(ledger["data"]["return_status"], "refunded");
    let records = ledger["data"]["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], refund_id);
    assert_eq!(records[0]["method"], "exchange_credit");

    app.orders.fail_create(false);
    let resume = json!({
        "replacement_items": [{"product_id": Uuid::new_v4(), "quantity": 1, "unit_price": "650.00"}],
    });
    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/exchanges/{}/resume", return_id),
            Some(resume.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["credit"]["id"], refund_id);
    assert_eq!(money(&body["data"]["exchange"]["net_amount"]), dec!(350.00));
    assert_eq!(body["data"]["payout"]["method"], "cash");

    let (_, ledger) = app
        .send(Method::GET, &format!("/api/v1/returns/{}/refunds", return_id), None)
        .await;
    assert_eq!(ledger["data"]["records"].as_array().unwrap().len(), 2);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/exchanges/{}/resume", return_id),
            Some(resume),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
    assert_eq!(app.orders.placed().len(), 1);
}

#[tokio::test]
async fn failed_order_completion_reports_the_new_order() {
    let app = TestApp::new().await;
    let order = seeded(&app).await;
    app.orders.fail_complete(true);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/exchanges",
            Some(exchange_body(&order, dec!(650.00))),
        )
        .await;
    assert_eq!(status, StatusCode::FAILED_DEPENDENCY);
    assert_eq!(body["details"]["stage"], "complete_order");
    assert!(body["details"]["new_order_id"].is_string());

    let placed = app.orders.placed();
    assert_eq!(placed.len(), 1);
    assert!(placed[0].reference.starts_with("RET-"));
}

#[tokio::test]
async fn resume_requires_a_refunded_exchange() {
    let app = TestApp::new().await;
    let order = seeded(&app).await;
    let case = app.open_return(&order, &[(0, 1)]).await;
    let resume = json!({
        "replacement_items": [{"product_id": Uuid::new_v4(), "quantity": 1, "unit_price": "10.00"}],
    });

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/exchanges/{}/resume", case["id"].as_str().unwrap()),
            Some(resume.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_transition");

    let refunded = app.open_return(&order, &[(1, 1)]).await;
    let id = refunded["id"].as_str().unwrap().to_string();
    app.drive_to_completed(&id, json!({})).await;
    app.send(
        Method::POST,
        "/api/v1/refunds",
        Some(json!({"return_id": id, "amounts": {"cash": "1000.00"}})),
    )
    .await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/exchanges/{}/resume", id),
            Some(resume),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
}

#[tokio::test]
async fn exchange_over_already_returned_units_moves_no_money() {
    let app = TestApp::new().await;
    let order = seeded(&app).await;
    app.open_return(&order, &[(0, 2)]).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/exchanges",
            Some(exchange_body(&order, dec!(650.00))),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "over_return");
    assert!(app.orders.placed().is_empty());
}

#[tokio::test]
async fn gateway_failure_never_reaches_order_completion() {
    let order = OrderSnapshot {
        id: Uuid::new_v4(),
        order_number: "ORD-MOCK".to_string(),
        currency: Some("USD".to_string()),
        status: Some("completed".to_string()),
        items: vec![OrderLineSnapshot {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Lamp".to_string(),
            quantity: 2,
            unit_price: dec!(20.00),
            batch_id: None,
            barcodes: None,
        }],
        paid_amount: dec!(40.00),
        outstanding_amount: Decimal::ZERO,
    };

    let mut gateway = MockOrders::new();
    let snapshot = order.clone();
    gateway
        .expect_fetch_order()
        .returning(move |_| Ok(snapshot.clone()));
    gateway
        .expect_create_order()
        .withf(|request| request.exchange_credit == dec!(40.00))
        .times(1)
        .returning(|_| Err(ServiceError::ExternalServiceError("timeout".into())));
    gateway.expect_complete_order().never();

    let app = TestApp::with_gateway(Arc::new(gateway)).await;
    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/exchanges",
            Some(exchange_body(&order, dec!(15.00))),
        )
        .await;

    assert_eq!(status, StatusCode::FAILED_DEPENDENCY, "{}", body);
    assert_eq!(body["details"]["stage"], "create_order");

    let return_id = body["details"]["return_case_id"].as_str().unwrap();
    let (_, case) = app
        .send(Method::GET, &format!("/api/v1/returns/{}", return_id), None)
        .await;
    assert_eq!(case["data"]["status"], "refunded");
    assert!(case["data"]["exchange"].is_null());
    assert_eq!(case["data"]["inventory_warnings"].as_array().unwrap().len(), 1);
}
