//! Client side of the order subsystem.
//!
//! The engine never owns orders. It reads a completed order once to snapshot
//! its lines, asks for the amount already paid when a return is approved, and
//! places replacement orders for exchanges.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{errors::ServiceError, tracing::with_metrics};

/// Order as reported by the order subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: Uuid,
    pub order_number: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub items: Vec<OrderLineSnapshot>,
    pub paid_amount: Decimal,
    #[serde(default)]
    pub outstanding_amount: Decimal,
}

impl OrderSnapshot {
    /// Orders without a reported status are treated as completed.
    pub fn is_completed(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("completed"))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineSnapshot {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub batch_id: Option<Uuid>,
    /// Per-unit barcodes, when the order subsystem tracks them.
    #[serde(default)]
    pub barcodes: Option<Vec<String>>,
}

/// Line of a replacement order placed for an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReplacementItem {
    pub product_id: Uuid,
    #[serde(default)]
    pub product_name: Option<String>,
    pub quantity: u32,
    #[schema(value_type = String, example = "49.99")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementOrderRequest {
    pub original_order_id: Uuid,
    /// Idempotency reference; the return number of the exchanged case.
    pub reference: String,
    pub currency: String,
    pub items: Vec<ReplacementItem>,
    /// Credit from the returned goods applied towards the new order.
    pub exchange_credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub id: Uuid,
    pub order_number: String,
    pub total_amount: Decimal,
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn fetch_order(&self, order_id: Uuid) -> Result<OrderSnapshot, ServiceError>;

    async fn create_order(
        &self,
        request: &ReplacementOrderRequest,
    ) -> Result<PlacedOrder, ServiceError>;

    async fn complete_order(&self, order_id: Uuid) -> Result<(), ServiceError>;
}

/// [`OrderGateway`] backed by the order subsystem's REST API.
#[derive(Clone)]
pub struct HttpOrderGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(
        response: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(%status, what, body = %body, "Order service returned an error");
        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!("{} not found", what)));
        }
        Err(ServiceError::ExternalServiceError(format!(
            "order service responded {} for {}",
            status, what
        )))
    }

    fn transport_error(what: &str, err: reqwest::Error) -> ServiceError {
        warn!(what, error = %err, "Order service request failed");
        ServiceError::ExternalServiceError(format!("order service unreachable for {}: {}", what, err))
    }

    async fn get_order(&self, order_id: Uuid) -> Result<OrderSnapshot, ServiceError> {
        let what = format!("order {}", order_id);
        let response = self
            .client
            .get(self.url(&format!("/orders/{}", order_id)))
            .send()
            .await
            .map_err(|e| Self::transport_error(&what, e))?;
        let response = Self::check(response, &what).await?;
        let order = response
            .json::<OrderSnapshot>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("invalid {} payload: {}", what, e)))?;
        debug!(order_number = %order.order_number, items = order.items.len(), "Fetched order");
        Ok(order)
    }

    async fn post_order(
        &self,
        request: &ReplacementOrderRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        let what = format!("replacement order {}", request.reference);
        let response = self
            .client
            .post(self.url("/orders"))
            .header("Idempotency-Key", &request.reference)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::transport_error(&what, e))?;
        let response = Self::check(response, &what).await?;
        response
            .json::<PlacedOrder>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("invalid {} payload: {}", what, e)))
    }

    async fn post_complete(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let what = format!("order {}", order_id);
        let response = self
            .client
            .post(self.url(&format!("/orders/{}/complete", order_id)))
            .send()
            .await
            .map_err(|e| Self::transport_error(&what, e))?;
        Self::check(response, &what).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderGateway for HttpOrderGateway {
    #[instrument(skip(self))]
    async fn fetch_order(&self, order_id: Uuid) -> Result<OrderSnapshot, ServiceError> {
        with_metrics("order_gateway_fetch", move || self.get_order(order_id)).await
    }

    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn create_order(
        &self,
        request: &ReplacementOrderRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        with_metrics("order_gateway_create", move || self.post_order(request)).await
    }

    #[instrument(skip(self))]
    async fn complete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        with_metrics("order_gateway_complete", move || self.post_complete(order_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> HttpOrderGateway {
        HttpOrderGateway::new(format!("{}/api/v1/", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn fetches_and_decodes_order() {
        let server = MockServer::start().await;
        let order_id = Uuid::new_v4();
        let item_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/api/v1/orders/{}", order_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": order_id,
                "order_number": "ORD-1001",
                "items": [{
                    "id": item_id,
                    "product_id": product_id,
                    "product_name": "Widget",
                    "quantity": 2,
                    "unit_price": "500.00"
                }],
                "paid_amount": "1000.00"
            })))
            .mount(&server)
            .await;

        let order = gateway(&server).fetch_order(order_id).await.unwrap();
        assert_eq!(order.order_number, "ORD-1001");
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.items[0].unit_price, dec!(500.00));
        assert!(order.items[0].barcodes.is_none());
        assert_eq!(order.outstanding_amount, Decimal::ZERO);
        assert!(order.is_completed());
    }

    #[tokio::test]
    async fn missing_order_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = gateway(&server).fetch_order(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_order_sends_idempotency_reference() {
        let server = MockServer::start().await;
        let new_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/api/v1/orders"))
            .and(header("Idempotency-Key", "RET-20240101-ABCDEF12"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": new_id,
                "order_number": "ORD-2002",
                "total_amount": "300.00"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let placed = gateway(&server)
            .create_order(&ReplacementOrderRequest {
                original_order_id: Uuid::new_v4(),
                reference: "RET-20240101-ABCDEF12".into(),
                currency: "USD".into(),
                items: vec![ReplacementItem {
                    product_id: Uuid::new_v4(),
                    product_name: None,
                    quantity: 1,
                    unit_price: dec!(300.00),
                }],
                exchange_credit: dec!(400.00),
            })
            .await
            .unwrap();
        assert_eq!(placed.id, new_id);
        assert_eq!(placed.total_amount, dec!(300.00));
    }

    #[tokio::test]
    async fn server_error_maps_to_external_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = gateway(&server).complete_order(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::ExternalServiceError(_)));
    }
}
