use crate::{
    db::{advisory_xact_lock, DbPool},
    entities::return_case,
    errors::ServiceError,
    events::EventSender,
    logging::AuditLog,
    models::{Currency, ReturnAction, ReturnStatus},
    services::{
        barcode_ledger::BarcodeLedger, inventory_reconciler::InventoryReconciler,
        order_gateway::OrderGateway, order_locks::{OrderGuard, OrderLocks},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

pub mod returns;

/// Engine-wide settings commands need at execution time.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub currency: Currency,
    pub return_number_prefix: String,
}

/// Everything a command needs to run.
#[derive(Clone)]
pub struct CommandContext {
    pub db_pool: Arc<DbPool>,
    pub event_sender: Arc<EventSender>,
    pub orders: Arc<dyn OrderGateway>,
    pub locks: OrderLocks,
    pub ledger: BarcodeLedger,
    pub reconciler: InventoryReconciler,
    pub audit: AuditLog,
    pub settings: EngineSettings,
}

/// Command trait for implementing the Command Pattern
///
/// A command encapsulates all the logic of one business operation so it can
/// be validated, executed and produce events.
#[async_trait]
pub trait Command: Send + Sync {
    /// The return type of the command when executed successfully
    type Result;

    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError>;
}

/// A database transaction opened while holding the per-order lock.
///
/// The in-process guard is released only after the transaction finished.
pub struct OrderTxn {
    pub txn: DatabaseTransaction,
    _guard: OrderGuard,
}

impl OrderTxn {
    pub async fn begin(ctx: &CommandContext, order_id: Uuid) -> Result<Self, ServiceError> {
        let guard = ctx.locks.acquire(order_id).await;
        let txn = ctx.db_pool.begin().await?;
        advisory_xact_lock(&txn, order_id).await?;
        Ok(Self { txn, _guard: guard })
    }

    pub async fn commit(self) -> Result<(), ServiceError> {
        self.txn.commit().await?;
        metrics::counter!("returns_engine_db_transactions_total", 1, "outcome" => "commit");
        Ok(())
    }
}

impl CommandContext {
    /// Locks the order owning `return_id` and re-reads the case inside the
    /// new transaction.
    pub async fn lock_case(
        &self,
        return_id: Uuid,
    ) -> Result<(OrderTxn, return_case::Model), ServiceError> {
        let order_id = load_case(self.db_pool.as_ref(), return_id).await?.order_id;
        let scope = OrderTxn::begin(self, order_id).await?;
        let case = load_case(&scope.txn, return_id).await?;
        Ok((scope, case))
    }
}

pub async fn load_case<C: ConnectionTrait>(
    db: &C,
    return_id: Uuid,
) -> Result<return_case::Model, ServiceError> {
    return_case::Entity::find_by_id(return_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Return case", return_id))
}

/// Checks `action` against the case's current status.
pub fn transition(
    case: &return_case::Model,
    action: ReturnAction,
) -> Result<ReturnStatus, ServiceError> {
    case.status
        .apply(action)
        .map_err(ServiceError::InvalidTransition)
}

/// Writes `changes` only if nobody bumped the case version since `case` was
/// read, then returns the stored row.
pub async fn update_case<C: ConnectionTrait>(
    db: &C,
    case: &return_case::Model,
    mut changes: return_case::ActiveModel,
) -> Result<return_case::Model, ServiceError> {
    changes.version = Set(case.version + 1);
    changes.updated_at = Set(Utc::now());

    let result = return_case::Entity::update_many()
        .set(changes)
        .filter(return_case::Column::Id.eq(case.id))
        .filter(return_case::Column::Version.eq(case.version))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(case.id));
    }
    load_case(db, case.id).await
}

pub fn record_transition(from: ReturnStatus, to: ReturnStatus) {
    metrics::counter!(
        "returns_engine_transitions_total",
        1,
        "from" => from.as_str(),
        "to" => to.as_str()
    );
}
