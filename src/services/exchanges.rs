//! Exchange saga.
//!
//! Steps: open return, pass quality check, approve, process, complete, settle
//! the full refund as exchange credit, place the replacement order, complete
//! it, then link both sides with an `ExchangeRecord`. Every finished step is
//! published as an event. A failure after the credit is settled is reported
//! as `ExchangeIncomplete` and the refund is never re-created; `resume` picks
//! up at order placement.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    commands::{
        load_case,
        returns::{
            approve_return_command::ApproveReturnCommand,
            complete_return_command::CompleteReturnCommand,
            create_return_command::{InitiateReturnCommand, ReturnItemRequest},
            process_return_command::ProcessReturnCommand,
            update_return_command::UpdateReturnCommand,
        },
        returns::validate_not_blank,
        Command, CommandContext,
    },
    entities::{exchange_record, refund_record, return_case},
    errors::{ExchangeStage, ServiceError},
    events::Event,
    models::{Currency, Money, RefundMethod, ReturnStatus, ReturnType},
    services::{
        order_gateway::{PlacedOrder, ReplacementItem, ReplacementOrderRequest},
        refunds::{records_for, RefundAllocator},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ExchangeRequest {
    pub order_id: Uuid,
    pub return_type: ReturnType,
    #[validate(custom = "validate_not_blank")]
    pub return_reason: String,
    #[validate(length(min = 1, message = "At least one returned item is required"))]
    pub items: Vec<ReturnItemRequest>,
    #[validate(length(min = 1, message = "At least one replacement item is required"))]
    pub replacement_items: Vec<ReplacementItem>,
    /// Instrument for paying out a positive net amount. Defaults to cash.
    #[serde(default)]
    pub payout_method: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub processing_fee: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResumeExchangeRequest {
    #[validate(length(min = 1, message = "At least one replacement item is required"))]
    pub replacement_items: Vec<ReplacementItem>,
    #[serde(default)]
    pub payout_method: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub case: return_case::Model,
    pub credit: refund_record::Model,
    pub payout: Option<refund_record::Model>,
    pub exchange: exchange_record::Model,
}

#[derive(Clone)]
pub struct ExchangeCoordinator {
    ctx: CommandContext,
    refunds: RefundAllocator,
}

impl ExchangeCoordinator {
    pub fn new(ctx: CommandContext, refunds: RefundAllocator) -> Self {
        Self { ctx, refunds }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn run(&self, request: ExchangeRequest) -> Result<ExchangeOutcome, ServiceError> {
        request.validate()?;
        let payout_method = parse_payout_method(request.payout_method.as_deref())?;
        validate_replacement_items(&request.replacement_items)?;

        let opened = InitiateReturnCommand {
            order_id: request.order_id,
            return_type: request.return_type,
            reason: request.return_reason.clone(),
            items: request.items.clone(),
            notes: request.notes.clone(),
        }
        .execute(&self.ctx)
        .await?;
        let return_id = opened.case.id;
        self.step(return_id, "return_opened").await;

        UpdateReturnCommand {
            return_id,
            quality_check_passed: Some(true),
            quality_check_notes: Some("exchange".to_string()),
            notes: None,
        }
        .execute(&self.ctx)
        .await?;
        self.step(return_id, "quality_checked").await;

        ApproveReturnCommand {
            return_id,
            total_refund_amount: None,
            processing_fee: request.processing_fee,
        }
        .execute(&self.ctx)
        .await?;
        self.step(return_id, "approved").await;

        ProcessReturnCommand {
            return_id,
            restore_inventory: true,
        }
        .execute(&self.ctx)
        .await?;
        self.step(return_id, "processed").await;

        CompleteReturnCommand { return_id }.execute(&self.ctx).await?;
        self.step(return_id, "completed").await;

        let (case, credit) = self.refunds.allocate_exchange_credit(return_id).await?;
        self.step(return_id, "refund_settled").await;

        self.place_and_link(case, credit, &request.replacement_items, &payout_method)
            .await
    }

    /// Re-runs order placement for a refunded exchange case that has no
    /// linked replacement order yet.
    #[instrument(skip(self, request))]
    pub async fn resume(
        &self,
        return_id: Uuid,
        request: ResumeExchangeRequest,
    ) -> Result<ExchangeOutcome, ServiceError> {
        request.validate()?;
        let payout_method = parse_payout_method(request.payout_method.as_deref())?;
        validate_replacement_items(&request.replacement_items)?;

        let db = self.ctx.db_pool.as_ref();
        let case = load_case(db, return_id).await?;
        if case.status != ReturnStatus::Refunded {
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot resume exchange: return is {}",
                case.status
            )));
        }
        if let Some(existing) = find_exchange(db, return_id).await? {
            return Err(ServiceError::ValidationError(format!(
                "return {} is already linked to order {}",
                return_id, existing.new_order_number
            )));
        }
        let credit = records_for(db, return_id)
            .await?
            .into_iter()
            .find(|r| r.method == RefundMethod::ExchangeCredit.to_string())
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("return {} is not an exchange", return_id))
            })?;

        info!(return_number = %case.return_number, "Resuming exchange");
        self.place_and_link(case, credit, &request.replacement_items, &payout_method)
            .await
    }

    pub async fn find(
        &self,
        return_id: Uuid,
    ) -> Result<Option<exchange_record::Model>, ServiceError> {
        find_exchange(self.ctx.db_pool.as_ref(), return_id).await
    }

    async fn place_and_link(
        &self,
        case: return_case::Model,
        credit: refund_record::Model,
        items: &[ReplacementItem],
        payout_method: &RefundMethod,
    ) -> Result<ExchangeOutcome, ServiceError> {
        let request = ReplacementOrderRequest {
            original_order_id: case.order_id,
            reference: case.return_number.clone(),
            currency: case.currency.clone(),
            items: items.to_vec(),
            exchange_credit: Decimal::new(
                credit.amount_minor,
                crate::models::money::MINOR_UNIT_SCALE,
            ),
        };

        let placed = match self.ctx.orders.create_order(&request).await {
            Ok(placed) => placed,
            Err(e) => {
                return Err(self
                    .incomplete(&case, &credit, None, ExchangeStage::CreateOrder, e)
                    .await)
            }
        };
        self.step(case.id, "order_created").await;

        if let Err(e) = self.ctx.orders.complete_order(placed.id).await {
            return Err(self
                .incomplete(&case, &credit, Some(placed.id), ExchangeStage::CompleteOrder, e)
                .await);
        }
        self.step(case.id, "order_completed").await;

        match self.record_exchange(&case, &credit, &placed, payout_method).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self
                .incomplete(&case, &credit, Some(placed.id), ExchangeStage::RecordExchange, e)
                .await),
        }
    }

    async fn record_exchange(
        &self,
        case: &return_case::Model,
        credit: &refund_record::Model,
        placed: &PlacedOrder,
        payout_method: &RefundMethod,
    ) -> Result<ExchangeOutcome, ServiceError> {
        let (scope, case) = self.ctx.lock_case(case.id).await?;
        if find_exchange(&scope.txn, case.id).await?.is_some() {
            return Err(ServiceError::ValidationError(format!(
                "return {} is already linked to a replacement order",
                case.id
            )));
        }
        let credit = refund_record::Entity::find_by_id(credit.id)
            .one(&scope.txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Refund", credit.id))?;

        let currency = Currency::new(&case.currency)?;
        let refund = Money::from_minor(credit.amount_minor, currency.clone());
        let new_total = Money::non_negative(placed.total_amount, currency)?;
        let terms = exchange_terms(&refund, &new_total)?;

        let payout = self
            .refunds
            .settle_exchange_credit(&scope.txn, &case, &credit, &terms.applied, payout_method)
            .await?;

        let exchange = exchange_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            return_case_id: Set(case.id),
            new_order_id: Set(placed.id),
            new_order_number: Set(placed.order_number.clone()),
            currency: Set(case.currency.clone()),
            refund_amount_minor: Set(refund.minor_units()),
            new_order_total_minor: Set(new_total.minor_units()),
            net_amount_minor: Set(terms.net.minor_units()),
            credit_applied_minor: Set(terms.applied.minor_units()),
            credit_refund_id: Set(credit.id),
            payout_refund_id: Set(payout.as_ref().map(|p| p.id)),
            created_at: Set(Utc::now()),
        }
        .insert(&scope.txn)
        .await?;
        let credit = refund_record::Entity::find_by_id(credit.id)
            .one(&scope.txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Refund", credit.id))?;
        scope.commit().await?;

        metrics::counter!(
            "returns_engine_exchanges_total",
            1,
            "net" => if terms.net.is_positive() { "owed_to_customer" } else if terms.net.is_negative() { "owed_by_customer" } else { "even" }
        );
        self.ctx.audit.exchange_linked(
            case.id,
            &placed.id.to_string(),
            terms.net.to_decimal(),
            &case.currency,
        );
        info!(
            return_id = %case.id,
            new_order_id = %placed.id,
            net = %terms.net,
            "Exchange linked"
        );
        self.ctx
            .event_sender
            .publish(Event::ExchangeLinked {
                return_id: case.id,
                new_order_id: placed.id,
                net_amount: terms.net.to_decimal(),
            })
            .await;

        Ok(ExchangeOutcome {
            case,
            credit,
            payout,
            exchange,
        })
    }

    async fn step(&self, return_id: Uuid, step: &str) {
        info!(%return_id, step, "Exchange step completed");
        self.ctx
            .event_sender
            .publish(Event::ExchangeStepCompleted {
                return_id,
                step: step.to_string(),
            })
            .await;
    }

    async fn incomplete(
        &self,
        case: &return_case::Model,
        credit: &refund_record::Model,
        new_order_id: Option<Uuid>,
        stage: ExchangeStage,
        cause: ServiceError,
    ) -> ServiceError {
        error!(
            return_id = %case.id,
            refund_id = %credit.id,
            stage = %stage,
            error = %cause,
            "Exchange incomplete after refund settlement"
        );
        metrics::counter!("returns_engine_exchange_failures_total", 1, "stage" => stage.to_string());
        self.ctx
            .event_sender
            .publish(Event::ExchangeFailed {
                return_id: case.id,
                refund_id: credit.id,
                stage: stage.to_string(),
                reason: cause.to_string(),
            })
            .await;
        ServiceError::ExchangeIncomplete {
            return_case_id: case.id,
            refund_id: credit.id,
            new_order_id,
            stage,
            reason: cause.to_string(),
        }
    }
}

/// Netting of an exchange credit against the replacement order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeTerms {
    /// `refund - new_order_total`; positive is owed to the customer.
    pub net: Money,
    /// Credit consumed by the replacement order.
    pub applied: Money,
}

pub fn exchange_terms(refund: &Money, new_order_total: &Money) -> Result<ExchangeTerms, ServiceError> {
    Ok(ExchangeTerms {
        net: refund.checked_sub(new_order_total)?,
        applied: refund.min(new_order_total)?,
    })
}

fn parse_payout_method(raw: Option<&str>) -> Result<RefundMethod, ServiceError> {
    let method = match raw {
        Some(raw) => raw.parse().map_err(ServiceError::ValidationError)?,
        None => RefundMethod::Cash,
    };
    if method.is_exchange_credit() {
        return Err(ServiceError::ValidationError(
            "payout method must be a real instrument".to_string(),
        ));
    }
    Ok(method)
}

fn validate_replacement_items(items: &[ReplacementItem]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "At least one replacement item is required".to_string(),
        ));
    }
    for item in items {
        if item.quantity == 0 {
            return Err(ServiceError::ValidationError(format!(
                "replacement item {} has zero quantity",
                item.product_id
            )));
        }
        if item.unit_price.is_sign_negative() && !item.unit_price.is_zero() {
            return Err(ServiceError::ValidationError(format!(
                "replacement item {} has a negative price",
                item.product_id
            )));
        }
    }
    Ok(())
}

async fn find_exchange<C: ConnectionTrait>(
    db: &C,
    return_id: Uuid,
) -> Result<Option<exchange_record::Model>, ServiceError> {
    Ok(exchange_record::Entity::find()
        .filter(exchange_record::Column::ReturnCaseId.eq(return_id))
        .one(db)
        .await?)
}
