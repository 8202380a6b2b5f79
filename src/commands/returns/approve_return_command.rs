use crate::{
    commands::{load_case, record_transition, transition, update_case, Command, CommandContext},
    entities::return_case,
    errors::ServiceError,
    events::Event,
    models::{Currency, Money, ReturnAction, ReturnStatus},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApproveReturnCommand {
    pub return_id: Uuid,
    /// Explicit refund amount; defaults to the full return value.
    pub total_refund_amount: Option<Decimal>,
    pub processing_fee: Option<Decimal>,
}

/// Refund figures fixed at approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundTerms {
    pub cap: Money,
    pub fee: Money,
    pub total_refund: Money,
}

/// `min(return value, paid)`, optionally lowered by an explicit amount, then
/// reduced by the processing fee.
pub fn refund_terms(
    total_return_value: &Money,
    amount_paid: &Money,
    requested: Option<&Money>,
    processing_fee: Option<&Money>,
) -> Result<RefundTerms, ServiceError> {
    let cap = total_return_value.min(amount_paid)?.floor_zero();
    let base = match requested {
        Some(amount) => {
            if amount.compare(&cap)? == Ordering::Greater {
                return Err(ServiceError::ValidationError(format!(
                    "refund amount {} exceeds refundable amount {}",
                    amount, cap
                )));
            }
            amount.clone()
        }
        None => cap.clone(),
    };
    let fee = processing_fee
        .cloned()
        .unwrap_or_else(|| Money::zero(cap.currency().clone()));
    if fee.compare(&base)? == Ordering::Greater {
        return Err(ServiceError::ValidationError(format!(
            "processing fee {} exceeds refundable amount {}",
            fee, base
        )));
    }
    let total_refund = base.checked_sub(&fee)?.floor_zero();
    Ok(RefundTerms {
        cap,
        fee,
        total_refund,
    })
}

/// Refund amounts fixed on the order's other live cases. Rejected cases
/// never pay out and pending ones have no amount yet.
async fn approved_on_other_cases<C: ConnectionTrait>(
    db: &C,
    case: &return_case::Model,
    currency: &Currency,
) -> Result<Money, ServiceError> {
    let others = return_case::Entity::find()
        .filter(return_case::Column::OrderId.eq(case.order_id))
        .filter(return_case::Column::Id.ne(case.id))
        .filter(return_case::Column::Status.ne(ReturnStatus::Rejected))
        .filter(return_case::Column::TotalRefundAmountMinor.is_not_null())
        .all(db)
        .await?;
    let amounts = others
        .iter()
        .filter_map(|other| other.total_refund_amount_minor)
        .map(|minor| Money::from_minor(minor, currency.clone()))
        .collect::<Vec<_>>();
    Ok(Money::sum(amounts.iter(), currency.clone())?)
}

#[async_trait::async_trait]
impl Command for ApproveReturnCommand {
    type Result = return_case::Model;

    #[instrument(skip(self, ctx), fields(return_id = %self.return_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let current = load_case(ctx.db_pool.as_ref(), self.return_id).await?;
        Self::check_approvable(&current)?;

        let order = ctx.orders.fetch_order(current.order_id).await?;
        let currency = Currency::new(&current.currency)?;
        if let Some(code) = order.currency.as_deref() {
            if Currency::new(code)? != currency {
                return Err(ServiceError::ValidationError(format!(
                    "order currency {} does not match return currency {}",
                    code, currency
                )));
            }
        }
        let paid = Money::non_negative(order.paid_amount, currency.clone())?;
        let requested = self
            .total_refund_amount
            .map(|a| Money::non_negative(a, currency.clone()))
            .transpose()?;
        let fee = self
            .processing_fee
            .map(|a| Money::non_negative(a, currency.clone()))
            .transpose()?;

        let (scope, case) = ctx.lock_case(self.return_id).await?;
        let next = Self::check_approvable(&case)?;

        let committed = approved_on_other_cases(&scope.txn, &case, &currency).await?;
        let unrefunded = paid.checked_sub(&committed)?.floor_zero();
        let value = Money::from_minor(case.total_return_value_minor, currency);
        let terms = refund_terms(&value, &unrefunded, requested.as_ref(), fee.as_ref())?;

        let changes = return_case::ActiveModel {
            status: Set(next),
            total_refund_amount_minor: Set(Some(terms.total_refund.minor_units())),
            processing_fee_minor: Set(Some(terms.fee.minor_units())),
            approved_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        let updated = update_case(&scope.txn, &case, changes).await?;
        scope.commit().await?;

        record_transition(case.status, updated.status);
        info!(
            total_refund = %terms.total_refund,
            cap = %terms.cap,
            fee = %terms.fee,
            already_committed = %committed,
            "Return approved"
        );
        ctx.event_sender
            .publish(Event::ReturnApproved {
                return_id: updated.id,
                total_refund_amount: terms.total_refund.to_decimal(),
            })
            .await;
        Ok(updated)
    }
}

impl ApproveReturnCommand {
    fn check_approvable(case: &return_case::Model) -> Result<ReturnStatus, ServiceError> {
        let next = transition(case, ReturnAction::Approve)?;
        if case.quality_check_passed != Some(true) {
            return Err(ServiceError::InvalidTransition(
                "Cannot approve: quality check not passed".to_string(),
            ));
        }
        Ok(next)
    }
}
