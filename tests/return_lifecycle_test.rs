mod common;

use axum::http::{Method, StatusCode};
use common::{line, money, scanned_line, TestApp};
use futures::future::join_all;
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn return_value_is_quantity_times_unit_price() {
    let app = TestApp::new().await;
    let order = app
        .seed_order(vec![line(3, dec!(500.00)), line(1, dec!(1000.00))], dec!(2500.00), 10)
        .await;

    let case = app.open_return(&order, &[(0, 2)]).await;

    assert_eq!(case["status"], "pending");
    assert_eq!(money(&case["total_return_value"]), dec!(1000.00));
    assert!(case["total_refund_amount"].is_null());
    assert_eq!(case["degraded_barcodes"], true);
    assert_eq!(case["items"].as_array().unwrap().len(), 1);
    assert_eq!(case["items"][0]["quantity_returned"], 2);
    assert_eq!(case["items"][0]["barcodes"].as_array().unwrap().len(), 2);
    assert!(case["return_number"].as_str().unwrap().starts_with("RET-"));
}

#[tokio::test]
async fn full_lifecycle_restores_stock_and_caps_refund() {
    let app = TestApp::new().await;
    let order = app
        .seed_order(vec![line(3, dec!(500.00)), line(1, dec!(1000.00))], dec!(2500.00), 10)
        .await;
    let batch = order.items[0].batch_id.unwrap();

    let case = app.open_return(&order, &[(0, 2)]).await;
    let id = case["id"].as_str().unwrap().to_string();

    let completed = app.drive_to_completed(&id, json!({})).await;
    assert_eq!(completed["status"], "completed");
    assert_eq!(money(&completed["total_refund_amount"]), dec!(1000.00));
    assert_eq!(money(&completed["processing_fee"]), dec!(0));
    assert_eq!(completed["inventory_restored"], true);
    assert!(completed["completed_at"].is_string());
    assert_eq!(app.batch_quantity(batch).await, 12);
    assert!(app.ctx.locks.is_empty());
}

#[tokio::test]
async fn refund_is_capped_by_amount_paid() {
    let app = TestApp::new().await;
    let partly_paid = app
        .seed_order(vec![line(3, dec!(500.00)), line(1, dec!(1000.00))], dec!(1500.00), 10)
        .await;
    let barely_paid = app
        .seed_order(vec![line(3, dec!(500.00)), line(1, dec!(1000.00))], dec!(400.00), 10)
        .await;

    let first = app.open_return(&partly_paid, &[(0, 2)]).await;
    let first = app
        .drive_to_completed(first["id"].as_str().unwrap(), json!({}))
        .await;
    assert_eq!(money(&first["total_refund_amount"]), dec!(1000.00));

    let second = app.open_return(&barely_paid, &[(0, 2)]).await;
    let second = app
        .drive_to_completed(second["id"].as_str().unwrap(), json!({}))
        .await;
    assert_eq!(money(&second["total_refund_amount"]), dec!(400.00));
}

#[tokio::test]
async fn cases_on_one_order_share_the_amount_paid() {
    let app = TestApp::new().await;
    let order = app
        .seed_order(vec![line(3, dec!(500.00)), line(1, dec!(1000.00))], dec!(400.00), 10)
        .await;

    let first = app.open_return(&order, &[(0, 1)]).await;
    let second = app.open_return(&order, &[(1, 1)]).await;

    let first = app
        .drive_to_completed(first["id"].as_str().unwrap(), json!({}))
        .await;
    assert_eq!(money(&first["total_refund_amount"]), dec!(400.00));

    let second = app
        .drive_to_completed(second["id"].as_str().unwrap(), json!({}))
        .await;
    assert_eq!(second["status"], "completed");
    assert_eq!(money(&second["total_refund_amount"]), dec!(0));
}

#[tokio::test]
async fn rejected_cases_do_not_hold_back_the_amount_paid() {
    let app = TestApp::new().await;
    let order = app
        .seed_order(vec![line(3, dec!(500.00)), line(1, dec!(1000.00))], dec!(400.00), 10)
        .await;

    let rejected = app.open_return(&order, &[(0, 1)]).await;
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/v1/returns/{}/reject", rejected["id"].as_str().unwrap()),
            Some(json!({"rejection_reason": "Outside return window"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let kept = app.open_return(&order, &[(1, 1)]).await;
    let kept = app
        .drive_to_completed(kept["id"].as_str().unwrap(), json!({}))
        .await;
    assert_eq!(money(&kept["total_refund_amount"]), dec!(400.00));
}

#[tokio::test]
async fn out_of_range_refund_amount_is_a_validation_error() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(1, dec!(20.00))], dec!(20.00), 0).await;
    let case = app.open_return(&order, &[(0, 1)]).await;
    let id = case["id"].as_str().unwrap();

    app.send(
        Method::PATCH,
        &format!("/api/v1/returns/{}", id),
        Some(json!({"quality_check_passed": true})),
    )
    .await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/returns/{}/approve", id),
            Some(json!({"total_refund_amount": "79228162514264337593543950335"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert_eq!(body["kind"], "validation_error");

    let (_, body) = app
        .send(Method::GET, &format!("/api/v1/returns/{}", id), None)
        .await;
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["total_refund_amount"].is_null());
}

#[tokio::test]
async fn processing_fee_and_explicit_amount_are_applied_at_approval() {
    let app = TestApp::new().await;
    let order = app
        .seed_order(vec![line(2, dec!(50.00))], dec!(100.00), 5)
        .await;
    let case = app.open_return(&order, &[(0, 2)]).await;
    let id = case["id"].as_str().unwrap();

    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/returns/{}", id),
            Some(json!({"quality_check_passed": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/returns/{}/approve", id),
            Some(json!({"total_refund_amount": "150.00"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/returns/{}/approve", id),
            Some(json!({"total_refund_amount": "80.00", "processing_fee": "5.00"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(money(&body["data"]["total_refund_amount"]), dec!(75.00));
    assert_eq!(money(&body["data"]["processing_fee"]), dec!(5.00));
}

#[tokio::test]
async fn approval_requires_a_passed_quality_check() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(1, dec!(20.00))], dec!(20.00), 0).await;
    let case = app.open_return(&order, &[(0, 1)]).await;
    let id = case["id"].as_str().unwrap();

    let (status, body) = app
        .send(Method::POST, &format!("/api/v1/returns/{}/approve", id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_transition");

    app.send(
        Method::PATCH,
        &format!("/api/v1/returns/{}", id),
        Some(json!({"quality_check_passed": false, "quality_check_notes": "scratched"})),
    )
    .await;
    let (status, _) = app
        .send(Method::POST, &format!("/api/v1/returns/{}/approve", id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = app
        .send(Method::GET, &format!("/api/v1/returns/{}", id), None)
        .await;
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["quality_check_passed"], false);
}

#[tokio::test]
async fn illegal_transitions_leave_the_case_untouched() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(2, dec!(10.00))], dec!(20.00), 0).await;
    let case = app.open_return(&order, &[(0, 1)]).await;
    let id = case["id"].as_str().unwrap();

    for action in ["process", "complete"] {
        let (status, body) = app
            .send(Method::POST, &format!("/api/v1/returns/{}/{}", id, action), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "{} from pending", action);
        assert_eq!(body["kind"], "invalid_transition");
    }

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/returns/{}/reject", id),
            Some(json!({"rejection_reason": "Outside return window"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["rejection_reason"], "Outside return window");

    for action in ["approve", "process", "complete"] {
        let (status, _) = app
            .send(Method::POST, &format!("/api/v1/returns/{}/{}", id, action), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "{} from rejected", action);
    }
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/v1/returns/{}/reject", id),
            Some(json!({"rejection_reason": "again"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = app
        .send(Method::GET, &format!("/api/v1/returns/{}", id), None)
        .await;
    assert_eq!(body["data"]["status"], "rejected");
    assert!(body["data"]["approved_at"].is_null());
}

#[tokio::test]
async fn reject_requires_a_reason() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(1, dec!(10.00))], dec!(10.00), 0).await;
    let case = app.open_return(&order, &[(0, 1)]).await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/returns/{}/reject", case["id"].as_str().unwrap()),
            Some(json!({"rejection_reason": ""})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
}

#[tokio::test]
async fn returned_units_never_exceed_ordered_quantity() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(3, dec!(5.00))], dec!(15.00), 0).await;

    app.open_return(&order, &[(0, 2)]).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/returns",
            Some(json!({
                "order_id": order.id,
                "return_reason": "Second thoughts",
                "return_type": "unwanted",
                "items": [{"order_item_id": order.items[0].id, "quantity": 2}],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "over_return");
    assert_eq!(body["details"]["requested"], 2);
    assert_eq!(body["details"]["available"], 1);

    app.open_return(&order, &[(0, 1)]).await;

    let (status, body) = app
        .send(Method::GET, &format!("/api/v1/orders/{}/units", order.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_units"], 3);
    assert_eq!(body["data"]["returned_units"], 3);
}

#[tokio::test]
async fn a_barcode_can_be_returned_only_once() {
    let app = TestApp::new().await;
    let order = app
        .seed_order(
            vec![scanned_line(dec!(12.00), &["SKU-A-1", "SKU-A-2"])],
            dec!(24.00),
            0,
        )
        .await;

    let body = json!({
        "order_id": order.id,
        "return_reason": "Defective",
        "return_type": "defective",
        "items": [{"order_item_id": order.items[0].id, "quantity": 1, "barcodes": ["SKU-A-1"]}],
    });
    let (status, first) = app
        .send(Method::POST, "/api/v1/returns", Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["data"]["degraded_barcodes"], false);
    assert_eq!(first["data"]["items"][0]["barcodes"], json!(["SKU-A-1"]));

    let (status, second) = app.send(Method::POST, "/api/v1/returns", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(second["kind"], "already_returned");
    assert_eq!(second["details"]["barcode"], "SKU-A-1");

    let (_, units) = app
        .send(Method::GET, &format!("/api/v1/orders/{}/units", order.id), None)
        .await;
    let units = units["data"]["units"].as_array().unwrap().clone();
    let returned: Vec<_> = units
        .iter()
        .filter(|u| u["returned"] == true)
        .map(|u| u["code"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(returned, vec!["SKU-A-1".to_string()]);
    assert!(units.iter().all(|u| u["kind"] == "real"));
}

#[tokio::test]
async fn unknown_barcode_is_not_found() {
    let app = TestApp::new().await;
    let order = app
        .seed_order(vec![scanned_line(dec!(12.00), &["SKU-B-1"])], dec!(12.00), 0)
        .await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/returns",
            Some(json!({
                "order_id": order.id,
                "return_reason": "Defective",
                "return_type": "defective",
                "items": [{"order_item_id": order.items[0].id, "quantity": 1, "barcodes": ["NOPE"]}],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn duplicate_real_barcodes_fall_back_to_synthetic_codes() {
    let app = TestApp::new().await;
    let order = app
        .seed_order(vec![scanned_line(dec!(8.00), &["DUP", "DUP"])], dec!(16.00), 0)
        .await;

    let case = app.open_return(&order, &[(0, 1)]).await;
    assert_eq!(case["degraded_barcodes"], true);

    let (_, units) = app
        .send(Method::GET, &format!("/api/v1/orders/{}/units", order.id), None)
        .await;
    let units = units["data"]["units"].as_array().unwrap().clone();
    assert_eq!(units.len(), 2);
    for unit in &units {
        assert_eq!(unit["kind"], "synthetic");
        assert!(unit["code"]
            .as_str()
            .unwrap()
            .starts_with(&format!("{}-{}-", order.order_number, order.items[0].product_id)));
    }
}

#[tokio::test]
async fn concurrent_returns_of_the_same_units_cannot_both_succeed() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(2, dec!(30.00))], dec!(60.00), 0).await;

    let body = json!({
        "order_id": order.id,
        "return_reason": "Too small",
        "return_type": "wrong_item",
        "items": [{"order_item_id": order.items[0].id, "quantity": 2}],
    });
    let (a, b) = tokio::join!(
        app.send(Method::POST, "/api/v1/returns", Some(body.clone())),
        app.send(Method::POST, "/api/v1/returns", Some(body)),
    );

    let mut statuses = vec![a.0, b.0];
    statuses.sort();
    assert_eq!(
        statuses,
        vec![StatusCode::CREATED, StatusCode::UNPROCESSABLE_ENTITY]
    );

    let (_, list) = app
        .send(
            Method::GET,
            &format!("/api/v1/returns?order_id={}", order.id),
            None,
        )
        .await;
    assert_eq!(list["data"]["total"], 1);
}

#[tokio::test]
async fn parallel_single_unit_returns_stop_at_the_ordered_quantity() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(5, dec!(12.00))], dec!(60.00), 0).await;

    let body = json!({
        "order_id": order.id,
        "return_reason": "Duplicate shipment",
        "return_type": "other",
        "items": [{"order_item_id": order.items[0].id, "quantity": 1}],
    });
    let results = join_all(
        (0..8).map(|_| app.send(Method::POST, "/api/v1/returns", Some(body.clone()))),
    )
    .await;

    let created = results
        .iter()
        .filter(|(status, _)| *status == StatusCode::CREATED)
        .count();
    assert_eq!(created, 5);
    assert!(results
        .iter()
        .filter(|(status, _)| *status != StatusCode::CREATED)
        .all(|(status, body)| *status == StatusCode::UNPROCESSABLE_ENTITY
            && body["kind"] == "over_return"));

    let (_, units) = app
        .send(Method::GET, &format!("/api/v1/orders/{}/units", order.id), None)
        .await;
    assert_eq!(units["data"]["total_units"], 5);
    assert_eq!(units["data"]["returned_units"], 5);
}

#[tokio::test]
async fn order_must_be_completed_to_open_a_return() {
    let app = TestApp::new().await;
    let mut order = app.seed_order(vec![line(1, dec!(10.00))], dec!(10.00), 0).await;
    order.status = Some("processing".to_string());
    app.orders.insert(order.clone());

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/returns",
            Some(json!({
                "order_id": order.id,
                "return_reason": "Changed mind",
                "return_type": "unwanted",
                "items": [{"order_item_id": order.items[0].id, "quantity": 1}],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert_eq!(body["kind"], "validation_error");
}

#[tokio::test]
async fn restock_after_processing_without_inventory_is_idempotent() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(4, dec!(9.99))], dec!(39.96), 1).await;
    let batch = order.items[0].batch_id.unwrap();
    let case = app.open_return(&order, &[(0, 3)]).await;
    let id = case["id"].as_str().unwrap();

    app.send(
        Method::PATCH,
        &format!("/api/v1/returns/{}", id),
        Some(json!({"quality_check_passed": true})),
    )
    .await;
    app.send(Method::POST, &format!("/api/v1/returns/{}/approve", id), None)
        .await;
    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/returns/{}/process", id),
            Some(json!({"restore_inventory": false})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["inventory_restored"], false);
    assert_eq!(app.batch_quantity(batch).await, 1);

    let (status, body) = app
        .send(Method::POST, &format!("/api/v1/returns/{}/restock", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"]["performed"], true);
    assert_eq!(body["data"]["outcome"]["units_restored"], 3);
    assert_eq!(app.batch_quantity(batch).await, 4);

    let (status, body) = app
        .send(Method::POST, &format!("/api/v1/returns/{}/restock", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"]["performed"], false);
    assert_eq!(app.batch_quantity(batch).await, 4);
}

#[tokio::test]
async fn missing_batch_becomes_a_warning() {
    let app = TestApp::new().await;
    let mut order = app.seed_order(vec![line(1, dec!(10.00))], dec!(10.00), 0).await;
    order.items[0].batch_id = Some(uuid::Uuid::new_v4());
    app.orders.insert(order.clone());

    let case = app.open_return(&order, &[(0, 1)]).await;
    let completed = app
        .drive_to_completed(case["id"].as_str().unwrap(), json!({}))
        .await;

    assert_eq!(completed["status"], "completed");
    assert_eq!(completed["inventory_restored"], true);
    let warnings = completed["inventory_warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn notes_can_be_updated_after_approval_but_quality_cannot() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(1, dec!(10.00))], dec!(10.00), 0).await;
    let case = app.open_return(&order, &[(0, 1)]).await;
    let id = case["id"].as_str().unwrap();

    app.send(
        Method::PATCH,
        &format!("/api/v1/returns/{}", id),
        Some(json!({"quality_check_passed": true})),
    )
    .await;
    app.send(Method::POST, &format!("/api/v1/returns/{}/approve", id), None)
        .await;

    let (status, body) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/returns/{}", id),
            Some(json!({"notes": "customer called"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["notes"], "customer called");

    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/returns/{}", id),
            Some(json!({"quality_check_passed": false})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn list_filters_by_status() {
    let app = TestApp::new().await;
    let order = app.seed_order(vec![line(3, dec!(10.00))], dec!(30.00), 0).await;
    let first = app.open_return(&order, &[(0, 1)]).await;
    app.open_return(&order, &[(0, 1)]).await;
    app.send(
        Method::POST,
        &format!("/api/v1/returns/{}/reject", first["id"].as_str().unwrap()),
        Some(json!({"rejection_reason": "Used"})),
    )
    .await;

    let (status, body) = app
        .send(Method::GET, "/api/v1/returns?status=PENDING", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["status"], "pending");

    let (status, body) = app
        .send(Method::GET, "/api/v1/returns?status=shipped", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
}
