use crate::{
    commands::{returns::validate_not_blank, Command, CommandContext, OrderTxn},
    entities::{order_line, return_case, return_case_item, return_unit},
    errors::ServiceError,
    events::Event,
    models::{BarcodeKind, Currency, Money, ReturnStatus, ReturnType},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::generate_return_number;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ReturnItemRequest {
    pub order_item_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: u32,
    #[serde(default)]
    pub reason: Option<String>,
    /// Specific unit barcodes being returned. Units are picked automatically
    /// when omitted.
    #[serde(default)]
    pub barcodes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InitiateReturnCommand {
    pub order_id: Uuid,
    pub return_type: ReturnType,
    #[validate(custom = "validate_not_blank")]
    pub reason: String,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<ReturnItemRequest>,
    pub notes: Option<String>,
}

/// Case row, stored items and the unit codes consumed per item.
#[derive(Debug, Clone)]
pub struct InitiateReturnResult {
    pub case: return_case::Model,
    pub items: Vec<(return_case_item::Model, Vec<String>)>,
}

#[async_trait::async_trait]
impl Command for InitiateReturnCommand {
    type Result = InitiateReturnResult;

    #[instrument(skip(self, ctx), fields(order_id = %self.order_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        self.validate_request()?;

        let db = ctx.db_pool.as_ref();
        let snapshot = if ctx.ledger.lines(db, self.order_id).await?.is_empty() {
            Some(ctx.orders.fetch_order(self.order_id).await?)
        } else {
            None
        };

        let scope = OrderTxn::begin(ctx, self.order_id).await?;
        if let Some(order) = &snapshot {
            ctx.ledger
                .register(&scope.txn, order, &ctx.settings.currency)
                .await?;
        }
        let lines = ctx.ledger.lines(&scope.txn, self.order_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::not_found("Order", self.order_id));
        }

        let result = self.create_case(ctx, &scope, &lines).await?;
        scope.commit().await?;

        self.log_and_trigger_event(ctx, &result).await;
        Ok(result)
    }
}

impl InitiateReturnCommand {
    fn validate_request(&self) -> Result<(), ServiceError> {
        self.validate().map_err(|e| {
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            ServiceError::ValidationError(msg)
        })?;

        let mut seen_items = HashSet::new();
        for item in &self.items {
            item.validate()?;
            if !seen_items.insert(item.order_item_id) {
                return Err(ServiceError::ValidationError(format!(
                    "order item {} listed more than once",
                    item.order_item_id
                )));
            }
            if let Some(codes) = &item.barcodes {
                if codes.len() != item.quantity as usize {
                    return Err(ServiceError::ValidationError(format!(
                        "order item {}: {} barcodes given for quantity {}",
                        item.order_item_id,
                        codes.len(),
                        item.quantity
                    )));
                }
                let unique: HashSet<&str> = codes.iter().map(|c| c.trim()).collect();
                if unique.len() != codes.len() {
                    return Err(ServiceError::ValidationError(format!(
                        "order item {}: duplicate barcodes",
                        item.order_item_id
                    )));
                }
            }
        }
        Ok(())
    }

    async fn pick_units(
        &self,
        ctx: &CommandContext,
        scope: &OrderTxn,
        item: &ReturnItemRequest,
    ) -> Result<Vec<return_unit::Model>, ServiceError> {
        let Some(codes) = &item.barcodes else {
            return ctx
                .ledger
                .select_units(&scope.txn, item.order_item_id, item.quantity)
                .await;
        };

        ctx.ledger
            .ensure_eligible(&scope.txn, item.order_item_id, item.quantity)
            .await?;
        let mut units = Vec::with_capacity(codes.len());
        for code in codes {
            let (unit, _) = ctx
                .ledger
                .resolve(&scope.txn, self.order_id, code.trim())
                .await?;
            if unit.order_item_id != item.order_item_id {
                return Err(ServiceError::ValidationError(format!(
                    "barcode {} belongs to order item {}, not {}",
                    unit.code, unit.order_item_id, item.order_item_id
                )));
            }
            if unit.returned {
                return Err(ServiceError::AlreadyReturned { code: unit.code });
            }
            units.push(unit);
        }
        Ok(units)
    }

    async fn create_case(
        &self,
        ctx: &CommandContext,
        scope: &OrderTxn,
        lines: &[order_line::Model],
    ) -> Result<InitiateReturnResult, ServiceError> {
        let currency = Currency::new(&lines[0].currency)?;
        let case_id = Uuid::new_v4();
        let now = Utc::now();

        let mut planned = Vec::with_capacity(self.items.len());
        let mut total = Money::zero(currency.clone());
        for item in &self.items {
            let line = lines
                .iter()
                .find(|l| l.id == item.order_item_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "order item {} not in order {}",
                        item.order_item_id, self.order_id
                    ))
                })?;
            let units = self.pick_units(ctx, scope, item).await?;
            let line_value = Money::from_minor(line.unit_price_minor, currency.clone())
                .times(item.quantity)?;
            total = total.checked_add(&line_value)?;
            planned.push((item, line, units));
        }

        let degraded = planned
            .iter()
            .flat_map(|(_, _, units)| units.iter())
            .any(|u| u.kind == BarcodeKind::Synthetic);

        let case = return_case::ActiveModel {
            id: Set(case_id),
            return_number: Set(generate_return_number(
                &ctx.settings.return_number_prefix,
                now,
            )),
            order_id: Set(self.order_id),
            order_number: Set(lines[0].order_number.clone()),
            status: Set(ReturnStatus::Pending),
            return_type: Set(self.return_type),
            reason: Set(self.reason.trim().to_string()),
            currency: Set(currency.to_string()),
            total_return_value_minor: Set(total.minor_units()),
            total_refund_amount_minor: Set(None),
            processing_fee_minor: Set(None),
            quality_check_passed: Set(None),
            quality_check_notes: Set(None),
            notes: Set(self.notes.clone()),
            rejection_reason: Set(None),
            degraded_barcodes: Set(degraded),
            inventory_warnings: Set(serde_json::json!([])),
            inventory_restored_at: Set(None),
            version: Set(1),
            created_at: Set(now),
            quality_checked_at: Set(None),
            approved_at: Set(None),
            rejected_at: Set(None),
            processed_at: Set(None),
            completed_at: Set(None),
            refunded_at: Set(None),
            ..Default::default()
        }
        .insert(&scope.txn)
        .await?;

        let mut items = Vec::with_capacity(planned.len());
        for (request, line, units) in planned {
            let stored = return_case_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                return_case_id: Set(case_id),
                order_item_id: Set(line.id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name.clone()),
                quantity_returned: Set(request.quantity as i32),
                unit_price_minor: Set(line.unit_price_minor),
                batch_id: Set(line.batch_id),
                reason: Set(request.reason.clone()),
            }
            .insert(&scope.txn)
            .await?;

            let mut codes = Vec::with_capacity(units.len());
            for unit in units {
                ctx.ledger
                    .mark_returned(&scope.txn, self.order_id, &unit.code, case_id)
                    .await?;
                codes.push(unit.code);
            }
            items.push((stored, codes));
        }

        Ok(InitiateReturnResult { case, items })
    }

    async fn log_and_trigger_event(&self, ctx: &CommandContext, result: &InitiateReturnResult) {
        let case = &result.case;
        metrics::counter!(
            "returns_engine_returns_opened_total",
            1,
            "degraded" => if case.degraded_barcodes { "true" } else { "false" }
        );
        info!(
            return_id = %case.id,
            return_number = %case.return_number,
            total_return_value_minor = case.total_return_value_minor,
            degraded_barcodes = case.degraded_barcodes,
            "Return case opened"
        );
        ctx.event_sender
            .publish(Event::ReturnOpened {
                return_id: case.id,
                order_id: case.order_id,
                return_number: case.return_number.clone(),
                degraded_barcodes: case.degraded_barcodes,
            })
            .await;
    }
}
