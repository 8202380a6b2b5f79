use crate::{
    commands::{
        load_case,
        returns::{
            approve_return_command::ApproveReturnCommand,
            complete_return_command::CompleteReturnCommand,
            create_return_command::InitiateReturnCommand,
            process_return_command::ProcessReturnCommand,
            reject_return_command::RejectReturnCommand,
            restock_returned_items_command::RestockReturnedItemsCommand,
            update_return_command::UpdateReturnCommand,
        },
        Command, CommandContext,
    },
    entities::{exchange_record, return_case, return_case_item, return_unit},
    errors::ServiceError,
    models::ReturnStatus,
    services::inventory_reconciler::RestoreOutcome,
};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

/// A return case together with its items, the unit codes each item consumed
/// and the linked exchange, if any.
#[derive(Debug, Clone)]
pub struct ReturnCaseDetail {
    pub case: return_case::Model,
    pub items: Vec<ReturnItemDetail>,
    pub exchange: Option<exchange_record::Model>,
}

#[derive(Debug, Clone)]
pub struct ReturnItemDetail {
    pub item: return_case_item::Model,
    pub barcodes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReturnListFilter {
    pub page: u64,
    pub limit: u64,
    pub status: Option<ReturnStatus>,
    pub order_id: Option<Uuid>,
}

/// Service for managing return cases
#[derive(Clone)]
pub struct ReturnService {
    ctx: CommandContext,
}

impl ReturnService {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }

    /// Opens a return case against a completed order
    #[instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn create_return(
        &self,
        command: InitiateReturnCommand,
    ) -> Result<ReturnCaseDetail, ServiceError> {
        let created = command.execute(&self.ctx).await?;
        Ok(ReturnCaseDetail {
            case: created.case,
            items: created
                .items
                .into_iter()
                .map(|(item, barcodes)| ReturnItemDetail { item, barcodes })
                .collect(),
            exchange: None,
        })
    }

    /// Records a quality check and/or notes
    #[instrument(skip(self, command), fields(return_id = %command.return_id))]
    pub async fn update_return(
        &self,
        command: UpdateReturnCommand,
    ) -> Result<ReturnCaseDetail, ServiceError> {
        let case = command.execute(&self.ctx).await?;
        self.detail(case).await
    }

    #[instrument(skip(self, command), fields(return_id = %command.return_id))]
    pub async fn approve_return(
        &self,
        command: ApproveReturnCommand,
    ) -> Result<ReturnCaseDetail, ServiceError> {
        let case = command.execute(&self.ctx).await?;
        self.detail(case).await
    }

    #[instrument(skip(self, command), fields(return_id = %command.return_id))]
    pub async fn reject_return(
        &self,
        command: RejectReturnCommand,
    ) -> Result<ReturnCaseDetail, ServiceError> {
        let case = command.execute(&self.ctx).await?;
        self.detail(case).await
    }

    #[instrument(skip(self, command), fields(return_id = %command.return_id))]
    pub async fn process_return(
        &self,
        command: ProcessReturnCommand,
    ) -> Result<ReturnCaseDetail, ServiceError> {
        let case = command.execute(&self.ctx).await?;
        self.detail(case).await
    }

    #[instrument(skip(self, command), fields(return_id = %command.return_id))]
    pub async fn complete_return(
        &self,
        command: CompleteReturnCommand,
    ) -> Result<ReturnCaseDetail, ServiceError> {
        let case = command.execute(&self.ctx).await?;
        self.detail(case).await
    }

    #[instrument(skip(self, command), fields(return_id = %command.return_id))]
    pub async fn restock_returned_items(
        &self,
        command: RestockReturnedItemsCommand,
    ) -> Result<(ReturnCaseDetail, RestoreOutcome), ServiceError> {
        let result = command.execute(&self.ctx).await?;
        Ok((self.detail(result.case).await?, result.outcome))
    }

    #[instrument(skip(self))]
    pub async fn get_return(&self, id: Uuid) -> Result<ReturnCaseDetail, ServiceError> {
        let case = load_case(self.ctx.db_pool.as_ref(), id).await?;
        self.detail(case).await
    }

    /// Lists return cases, newest first
    #[instrument(skip(self))]
    pub async fn list_returns(
        &self,
        filter: ReturnListFilter,
    ) -> Result<(Vec<return_case::Model>, u64), ServiceError> {
        let db = self.ctx.db_pool.as_ref();

        let mut query = return_case::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(return_case::Column::Status.eq(status));
        }
        if let Some(order_id) = filter.order_id {
            query = query.filter(return_case::Column::OrderId.eq(order_id));
        }

        let paginator = query
            .order_by_desc(return_case::Column::CreatedAt)
            .order_by_desc(return_case::Column::Id)
            .paginate(db, filter.limit.max(1));
        let total = paginator.num_items().await?;
        let returns = paginator.fetch_page(filter.page.max(1) - 1).await?;

        Ok((returns, total))
    }

    /// Unit ledger of an order that has been registered with the engine
    #[instrument(skip(self))]
    pub async fn order_units(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<return_unit::Model>, ServiceError> {
        let units = self
            .ctx
            .ledger
            .units(self.ctx.db_pool.as_ref(), order_id)
            .await?;
        if units.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "order {} has no registered units",
                order_id
            )));
        }
        Ok(units)
    }

    async fn detail(&self, case: return_case::Model) -> Result<ReturnCaseDetail, ServiceError> {
        load_detail(self.ctx.db_pool.as_ref(), case).await
    }
}

pub(crate) async fn load_detail<C: ConnectionTrait>(
    db: &C,
    case: return_case::Model,
) -> Result<ReturnCaseDetail, ServiceError> {
    let items = return_case_item::Entity::find()
        .filter(return_case_item::Column::ReturnCaseId.eq(case.id))
        .order_by_asc(return_case_item::Column::OrderItemId)
        .all(db)
        .await?;

    let mut codes: HashMap<Uuid, Vec<String>> = HashMap::new();
    for unit in return_unit::Entity::find()
        .filter(return_unit::Column::ReturnCaseId.eq(case.id))
        .order_by_asc(return_unit::Column::UnitIndex)
        .all(db)
        .await?
    {
        codes.entry(unit.order_item_id).or_default().push(unit.code);
    }

    let exchange = exchange_record::Entity::find()
        .filter(exchange_record::Column::ReturnCaseId.eq(case.id))
        .one(db)
        .await?;

    Ok(ReturnCaseDetail {
        items: items
            .into_iter()
            .map(|item| ReturnItemDetail {
                barcodes: codes.remove(&item.order_item_id).unwrap_or_default(),
                item,
            })
            .collect(),
        case,
        exchange,
    })
}
