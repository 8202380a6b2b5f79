//! Refund allocation across payment instruments.
//!
//! A completed return case has a fixed `total_refund_amount`. Allocations
//! split it into refund records (one per instrument). Records that are not
//! yet completed still count against the allocatable headroom, so deferred
//! settlements can never over-commit the case.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    commands::{load_case, record_transition, transition, update_case, CommandContext},
    entities::{refund_record, return_case},
    errors::ServiceError,
    events::Event,
    models::{Currency, Money, RefundMethod, RefundStatus, ReturnAction, ReturnStatus},
};

/// One line of a cash drawer count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Denomination {
    #[schema(value_type = String, example = "100.00")]
    pub face_value: Decimal,
    pub count: u32,
}

/// Sums a denomination count into a cash amount.
pub fn denomination_total(
    denominations: &[Denomination],
    currency: &Currency,
) -> Result<Money, ServiceError> {
    let mut total = Money::zero(currency.clone());
    for d in denominations {
        let face = Money::non_negative(d.face_value, currency.clone())?;
        if !face.is_positive() {
            return Err(ServiceError::ValidationError(
                "denomination face value must be positive".to_string(),
            ));
        }
        total = total.checked_add(&face.times(d.count)?)?;
    }
    Ok(total)
}

#[derive(Debug, Clone, Default)]
pub struct AllocationRequest {
    pub return_id: Uuid,
    /// Amount per instrument: `cash`, `card`, `wallet:<name>` or a bare
    /// wallet name.
    pub amounts: BTreeMap<String, Decimal>,
    /// Replaces any direct `cash` figure when present.
    pub cash_denominations: Option<Vec<Denomination>>,
    /// Create completed records right away; `false` leaves them pending.
    pub settle: bool,
    pub transaction_reference: Option<String>,
}

/// A refund record about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRefund {
    pub method: RefundMethod,
    pub amount: Money,
    pub denominations: Option<Vec<Denomination>>,
}

/// Turns the requested amounts into refund lines. Zero amounts are dropped.
pub fn plan_refunds(
    amounts: &BTreeMap<String, Decimal>,
    cash_denominations: Option<&[Denomination]>,
    currency: &Currency,
) -> Result<Vec<PlannedRefund>, ServiceError> {
    let mut seen = BTreeSet::new();
    let mut planned = Vec::with_capacity(amounts.len() + 1);

    for (key, amount) in amounts {
        let method: RefundMethod = key.parse().map_err(ServiceError::ValidationError)?;
        if method.is_exchange_credit() {
            return Err(ServiceError::ValidationError(
                "exchange_credit is only issued by exchanges".to_string(),
            ));
        }
        if !seen.insert(method.clone()) {
            return Err(ServiceError::ValidationError(format!(
                "refund method {} given more than once",
                method
            )));
        }
        if method == RefundMethod::Cash && cash_denominations.is_some() {
            continue;
        }
        let amount = Money::non_negative(*amount, currency.clone())?;
        planned.push(PlannedRefund {
            method,
            amount,
            denominations: None,
        });
    }

    if let Some(denominations) = cash_denominations {
        planned.push(PlannedRefund {
            method: RefundMethod::Cash,
            amount: denomination_total(denominations, currency)?,
            denominations: Some(denominations.to_vec()),
        });
    }

    planned.retain(|p| !p.amount.is_zero());
    Ok(planned)
}

/// Money position of one return case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundBalance {
    pub total_refund: Money,
    /// Every record regardless of status.
    pub committed: Money,
    /// Completed records only.
    pub settled: Money,
}

impl RefundBalance {
    pub fn from_records(
        total_refund: Money,
        records: &[refund_record::Model],
    ) -> Result<Self, ServiceError> {
        let currency = total_refund.currency().clone();
        let mut committed = Money::zero(currency.clone());
        let mut settled = Money::zero(currency.clone());
        for record in records {
            let amount = Money::from_minor(record.amount_minor, Currency::new(&record.currency)?);
            committed = committed.checked_add(&amount)?;
            if record.status == RefundStatus::Completed {
                settled = settled.checked_add(&amount)?;
            }
        }
        Ok(Self {
            total_refund,
            committed,
            settled,
        })
    }

    /// `total_refund - settled`.
    pub fn remaining(&self) -> Result<Money, ServiceError> {
        Ok(self.total_refund.checked_sub(&self.settled)?.floor_zero())
    }

    /// What may still be allocated: `total_refund - committed`.
    pub fn headroom(&self) -> Result<Money, ServiceError> {
        Ok(self.total_refund.checked_sub(&self.committed)?.floor_zero())
    }

    /// Rejects `requested` when it does not fit in the headroom.
    pub fn check_allocation(&self, requested: &Money) -> Result<(), ServiceError> {
        let headroom = self.headroom()?;
        if requested.compare(&headroom)? == Ordering::Greater {
            return Err(ServiceError::OverAllocation {
                requested: requested.to_decimal(),
                remaining: headroom.to_decimal(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AllocationResult {
    pub case: return_case::Model,
    pub records: Vec<refund_record::Model>,
    pub balance: RefundBalance,
}

#[derive(Debug, Clone)]
pub struct RefundSettlement {
    pub record: refund_record::Model,
    pub case: return_case::Model,
    pub balance: RefundBalance,
}

#[derive(Debug, Clone)]
pub struct RefundLedger {
    pub case: return_case::Model,
    pub records: Vec<refund_record::Model>,
    pub balance: RefundBalance,
}

#[derive(Clone)]
pub struct RefundAllocator {
    ctx: CommandContext,
}

impl RefundAllocator {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, request), fields(return_id = %request.return_id))]
    pub async fn allocate(
        &self,
        request: AllocationRequest,
    ) -> Result<AllocationResult, ServiceError> {
        let (scope, case) = self.ctx.lock_case(request.return_id).await?;
        transition(&case, ReturnAction::AllocateRefund)?;
        let currency = Currency::new(&case.currency)?;

        let planned = plan_refunds(
            &request.amounts,
            request.cash_denominations.as_deref(),
            &currency,
        )?;
        let records = records_for(&scope.txn, case.id).await?;
        let balance = RefundBalance::from_records(total_refund(&case)?, &records)?;
        if planned.is_empty() && !balance.headroom()?.is_zero() {
            return Err(ServiceError::ValidationError(
                "at least one positive refund amount is required".to_string(),
            ));
        }

        let result = self
            .write_allocation(
                &scope.txn,
                &case,
                planned,
                request.settle,
                request.transaction_reference.as_deref(),
            )
            .await?;
        scope.commit().await?;

        self.after_allocation(&case, &result).await;
        Ok(result)
    }

    /// Moves a pending record to processed. Already processed records are
    /// returned unchanged.
    #[instrument(skip(self))]
    pub async fn process(
        &self,
        refund_id: Uuid,
        transaction_reference: Option<String>,
    ) -> Result<refund_record::Model, ServiceError> {
        let return_id = self.find_record(self.ctx.db_pool.as_ref(), refund_id).await?.return_case_id;
        let (scope, case) = self.ctx.lock_case(return_id).await?;
        let record = self.find_record(&scope.txn, refund_id).await?;

        match record.status {
            RefundStatus::Processed => return Ok(record),
            RefundStatus::Completed => {
                return Err(ServiceError::InvalidTransition(
                    "Cannot process refund: refund is completed".to_string(),
                ))
            }
            RefundStatus::Pending => {}
        }

        let now = Utc::now();
        let mut active: refund_record::ActiveModel = record.clone().into();
        active.status = Set(RefundStatus::Processed);
        active.processed_at = Set(Some(now));
        active.updated_at = Set(now);
        if let Some(reference) = &transaction_reference {
            active.transaction_reference = Set(Some(reference.clone()));
        }
        let updated = active.update(&scope.txn).await?;
        scope.commit().await?;

        self.ctx.audit.refund_status_changed(
            case.id,
            updated.id,
            record.status.as_str(),
            updated.status.as_str(),
            updated.transaction_reference.as_deref(),
        );
        self.ctx
            .event_sender
            .publish(Event::RefundStatusChanged {
                return_id: case.id,
                refund_id: updated.id,
                status: updated.status.as_str().to_string(),
            })
            .await;
        Ok(updated)
    }

    /// Moves a processed record to completed and settles the case once
    /// nothing remains. Completing an already completed record is a no-op.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        refund_id: Uuid,
        transaction_reference: Option<String>,
    ) -> Result<RefundSettlement, ServiceError> {
        let return_id = self.find_record(self.ctx.db_pool.as_ref(), refund_id).await?.return_case_id;
        let (scope, case) = self.ctx.lock_case(return_id).await?;
        let record = self.find_record(&scope.txn, refund_id).await?;

        match record.status {
            RefundStatus::Completed => {
                let records = records_for(&scope.txn, case.id).await?;
                let balance = RefundBalance::from_records(total_refund(&case)?, &records)?;
                return Ok(RefundSettlement {
                    record,
                    case,
                    balance,
                });
            }
            RefundStatus::Pending => {
                return Err(ServiceError::InvalidTransition(
                    "Cannot complete refund: refund is pending".to_string(),
                ))
            }
            RefundStatus::Processed => {}
        }

        let now = Utc::now();
        let mut active: refund_record::ActiveModel = record.clone().into();
        active.status = Set(RefundStatus::Completed);
        active.completed_at = Set(Some(now));
        active.updated_at = Set(now);
        if let Some(reference) = &transaction_reference {
            active.transaction_reference = Set(Some(reference.clone()));
        }
        let updated = active.update(&scope.txn).await?;

        let records = records_for(&scope.txn, case.id).await?;
        let balance = RefundBalance::from_records(total_refund(&case)?, &records)?;
        let settled_case = self.settle_if_done(&scope.txn, &case, &balance).await?;
        scope.commit().await?;

        record_refund_volume(&updated);
        self.ctx.audit.refund_status_changed(
            case.id,
            updated.id,
            record.status.as_str(),
            updated.status.as_str(),
            updated.transaction_reference.as_deref(),
        );
        self.ctx
            .event_sender
            .publish(Event::RefundStatusChanged {
                return_id: case.id,
                refund_id: updated.id,
                status: updated.status.as_str().to_string(),
            })
            .await;
        let case = match settled_case {
            Some(refunded) => {
                self.announce_refunded(&refunded).await;
                refunded
            }
            None => case,
        };

        Ok(RefundSettlement {
            record: updated,
            case,
            balance,
        })
    }

    #[instrument(skip(self))]
    pub async fn list(&self, return_id: Uuid) -> Result<RefundLedger, ServiceError> {
        let db = self.ctx.db_pool.as_ref();
        let case = load_case(db, return_id).await?;
        let records = records_for(db, case.id).await?;
        let balance = RefundBalance::from_records(total_refund(&case)?, &records)?;
        Ok(RefundLedger {
            case,
            records,
            balance,
        })
    }

    pub async fn remaining(&self, return_id: Uuid) -> Result<Money, ServiceError> {
        self.list(return_id).await?.balance.remaining()
    }

    /// Converts the whole unallocated refund of a completed case into one
    /// settled exchange credit record.
    #[instrument(skip(self))]
    pub async fn allocate_exchange_credit(
        &self,
        return_id: Uuid,
    ) -> Result<(return_case::Model, refund_record::Model), ServiceError> {
        let (scope, case) = self.ctx.lock_case(return_id).await?;
        transition(&case, ReturnAction::AllocateRefund)?;

        let records = records_for(&scope.txn, case.id).await?;
        if !records.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "return case {} already has refund records",
                case.id
            )));
        }
        let balance = RefundBalance::from_records(total_refund(&case)?, &records)?;
        let planned = vec![PlannedRefund {
            method: RefundMethod::ExchangeCredit,
            amount: balance.headroom()?,
            denominations: None,
        }];

        let result = self
            .write_allocation(&scope.txn, &case, planned, true, Some(case.return_number.as_str()))
            .await?;
        scope.commit().await?;

        self.after_allocation(&case, &result).await;
        let credit = result.records.into_iter().next().ok_or_else(|| {
            ServiceError::InternalError("exchange credit record was not written".to_string())
        })?;
        Ok((result.case, credit))
    }

    /// Splits an exchange credit into the part consumed by the replacement
    /// order and a settled payout through `payout_method`. The case total is
    /// unchanged. Returns the payout record when one was needed.
    pub async fn settle_exchange_credit<C: ConnectionTrait>(
        &self,
        db: &C,
        case: &return_case::Model,
        credit: &refund_record::Model,
        applied: &Money,
        payout_method: &RefundMethod,
    ) -> Result<Option<refund_record::Model>, ServiceError> {
        if payout_method.is_exchange_credit() {
            return Err(ServiceError::ValidationError(
                "payout method must be a real instrument".to_string(),
            ));
        }
        let credit_amount = Money::from_minor(credit.amount_minor, Currency::new(&credit.currency)?);
        let payout = credit_amount.checked_sub(applied)?;
        if payout.is_negative() {
            return Err(ServiceError::ValidationError(format!(
                "applied credit {} exceeds exchange credit {}",
                applied, credit_amount
            )));
        }
        if payout.is_zero() {
            return Ok(None);
        }

        let now = Utc::now();
        let mut active: refund_record::ActiveModel = credit.clone().into();
        active.amount_minor = Set(applied.minor_units());
        active.updated_at = Set(now);
        active.update(db).await?;

        let payout_record = refund_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            return_case_id: Set(case.id),
            method: Set(payout_method.to_string()),
            amount_minor: Set(payout.minor_units()),
            currency: Set(payout.currency().to_string()),
            status: Set(RefundStatus::Completed),
            transaction_reference: Set(Some(format!("exchange:{}", case.return_number))),
            denominations: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            processed_at: Set(Some(now)),
            completed_at: Set(Some(now)),
        }
        .insert(db)
        .await?;

        record_refund_volume(&payout_record);
        self.ctx.audit.exchange_credit_split(
            case.id,
            credit.id,
            applied.to_decimal(),
            payout_record.id,
            payout.to_decimal(),
            &payout_record.method,
        );
        Ok(Some(payout_record))
    }

    async fn find_record<C: ConnectionTrait>(
        &self,
        db: &C,
        refund_id: Uuid,
    ) -> Result<refund_record::Model, ServiceError> {
        refund_record::Entity::find_by_id(refund_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Refund", refund_id))
    }

    async fn write_allocation<C: ConnectionTrait>(
        &self,
        db: &C,
        case: &return_case::Model,
        planned: Vec<PlannedRefund>,
        settle: bool,
        transaction_reference: Option<&str>,
    ) -> Result<AllocationResult, ServiceError> {
        let currency = Currency::new(&case.currency)?;
        let existing = records_for(db, case.id).await?;
        let balance = RefundBalance::from_records(total_refund(case)?, &existing)?;
        let requested = Money::sum(planned.iter().map(|p| &p.amount), currency)?;
        balance.check_allocation(&requested)?;

        let now = Utc::now();
        let mut records = Vec::with_capacity(planned.len());
        for plan in planned {
            let denominations = plan
                .denominations
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| ServiceError::InternalError(e.to_string()))?;
            let record = refund_record::ActiveModel {
                id: Set(Uuid::new_v4()),
                return_case_id: Set(case.id),
                method: Set(plan.method.to_string()),
                amount_minor: Set(plan.amount.minor_units()),
                currency: Set(plan.amount.currency().to_string()),
                status: Set(if settle {
                    RefundStatus::Completed
                } else {
                    RefundStatus::Pending
                }),
                transaction_reference: Set(transaction_reference.map(str::to_string)),
                denominations: Set(denominations),
                created_at: Set(now),
                updated_at: Set(now),
                processed_at: Set(settle.then_some(now)),
                completed_at: Set(settle.then_some(now)),
            }
            .insert(db)
            .await?;
            records.push(record);
        }

        let all = records_for(db, case.id).await?;
        let balance = RefundBalance::from_records(total_refund(case)?, &all)?;
        let case = self
            .settle_if_done(db, case, &balance)
            .await?
            .unwrap_or_else(|| case.clone());

        Ok(AllocationResult {
            case,
            records,
            balance,
        })
    }

    /// Moves a completed case to refunded once nothing remains to be paid.
    async fn settle_if_done<C: ConnectionTrait>(
        &self,
        db: &C,
        case: &return_case::Model,
        balance: &RefundBalance,
    ) -> Result<Option<return_case::Model>, ServiceError> {
        if case.status != ReturnStatus::Completed || !balance.remaining()?.is_zero() {
            return Ok(None);
        }
        let next = transition(case, ReturnAction::SettleRefund)?;
        let changes = return_case::ActiveModel {
            status: Set(next),
            refunded_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        let updated = update_case(db, case, changes).await?;
        record_transition(case.status, updated.status);
        Ok(Some(updated))
    }

    async fn after_allocation(&self, before: &return_case::Model, result: &AllocationResult) {
        let mut total = Decimal::ZERO;
        for record in &result.records {
            let amount = Decimal::new(record.amount_minor, crate::models::money::MINOR_UNIT_SCALE);
            total += amount;
            if record.status == RefundStatus::Completed {
                record_refund_volume(record);
            }
            self.ctx.audit.refund_recorded(
                record.return_case_id,
                record.id,
                &record.method,
                amount,
                &record.currency,
                record.status.as_str(),
            );
        }
        info!(
            return_id = %result.case.id,
            records = result.records.len(),
            amount = %total,
            "Refund allocated"
        );
        self.ctx
            .event_sender
            .publish(Event::RefundAllocated {
                return_id: result.case.id,
                refund_ids: result.records.iter().map(|r| r.id).collect(),
                amount: total,
            })
            .await;
        if before.status != result.case.status {
            self.announce_refunded(&result.case).await;
        }
    }

    async fn announce_refunded(&self, case: &return_case::Model) {
        let total = Decimal::new(
            case.total_refund_amount_minor.unwrap_or(0),
            crate::models::money::MINOR_UNIT_SCALE,
        );
        self.ctx
            .audit
            .return_refunded(case.id, total, &case.currency);
        info!(return_id = %case.id, total = %total, "Return fully refunded");
        self.ctx
            .event_sender
            .publish(Event::ReturnRefunded { return_id: case.id })
            .await;
    }
}

pub(crate) async fn records_for<C: ConnectionTrait>(
    db: &C,
    return_id: Uuid,
) -> Result<Vec<refund_record::Model>, ServiceError> {
    Ok(refund_record::Entity::find()
        .filter(refund_record::Column::ReturnCaseId.eq(return_id))
        .order_by_asc(refund_record::Column::CreatedAt)
        .order_by_asc(refund_record::Column::Id)
        .all(db)
        .await?)
}

fn total_refund(case: &return_case::Model) -> Result<Money, ServiceError> {
    let currency = Currency::new(&case.currency)?;
    match case.total_refund_amount_minor {
        Some(minor) => Ok(Money::from_minor(minor, currency)),
        None => {
            warn!(return_id = %case.id, "Return case has no approved refund amount");
            Ok(Money::zero(currency))
        }
    }
}

fn record_refund_volume(record: &refund_record::Model) {
    let method = match record.method.parse::<RefundMethod>() {
        Ok(RefundMethod::Wallet(_)) => "wallet",
        Ok(RefundMethod::Cash) => "cash",
        Ok(RefundMethod::Card) => "card",
        Ok(RefundMethod::ExchangeCredit) => "exchange_credit",
        Err(_) => "unknown",
    };
    metrics::counter!(
        "returns_engine_refunded_minor_units_total",
        record.amount_minor.max(0) as u64,
        "method" => method
    );
}
