use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_ledger_tables::Migration),
            Box::new(m20240601_000002_create_return_case_tables::Migration),
            Box::new(m20240601_000003_create_settlement_tables::Migration),
            Box::new(m20240601_000004_create_inventory_batches_table::Migration),
        ]
    }
}

mod m20240601_000001_create_ledger_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_ledger_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLines::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderLines::OrderNumber).string().not_null())
                        .col(ColumnDef::new(OrderLines::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderLines::ProductName).string().not_null())
                        .col(
                            ColumnDef::new(OrderLines::QuantityOrdered)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderLines::UnitPriceMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLines::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(OrderLines::BatchId).uuid().null())
                        .col(
                            ColumnDef::new(OrderLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_lines_order_id")
                        .table(OrderLines::Table)
                        .col(OrderLines::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ReturnUnits::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReturnUnits::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnUnits::OrderId).uuid().not_null())
                        .col(ColumnDef::new(ReturnUnits::OrderItemId).uuid().not_null())
                        .col(ColumnDef::new(ReturnUnits::Code).string().not_null())
                        .col(ColumnDef::new(ReturnUnits::Kind).string_len(16).not_null())
                        .col(ColumnDef::new(ReturnUnits::UnitIndex).integer().not_null())
                        .col(
                            ColumnDef::new(ReturnUnits::Returned)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(ReturnUnits::ReturnCaseId).uuid().null())
                        .col(
                            ColumnDef::new(ReturnUnits::ReturnedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReturnUnits::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_return_units_order_item_id")
                                .from(ReturnUnits::Table, ReturnUnits::OrderItemId)
                                .to(OrderLines::Table, OrderLines::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_units_order_code")
                        .table(ReturnUnits::Table)
                        .col(ReturnUnits::OrderId)
                        .col(ReturnUnits::Code)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_units_order_item_id")
                        .table(ReturnUnits::Table)
                        .col(ReturnUnits::OrderItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReturnUnits::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderLines::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderLines {
        Table,
        Id,
        OrderId,
        OrderNumber,
        ProductId,
        ProductName,
        QuantityOrdered,
        UnitPriceMinor,
        Currency,
        BatchId,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum ReturnUnits {
        Table,
        Id,
        OrderId,
        OrderItemId,
        Code,
        Kind,
        UnitIndex,
        Returned,
        ReturnCaseId,
        ReturnedAt,
        CreatedAt,
    }
}

mod m20240601_000002_create_return_case_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_return_case_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ReturnCases::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReturnCases::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::ReturnNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(ReturnCases::OrderId).uuid().not_null())
                        .col(ColumnDef::new(ReturnCases::OrderNumber).string().not_null())
                        .col(ColumnDef::new(ReturnCases::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(ReturnCases::ReturnType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnCases::Reason).string().not_null())
                        .col(ColumnDef::new(ReturnCases::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(ReturnCases::TotalReturnValueMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::TotalRefundAmountMinor)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::ProcessingFeeMinor)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::QualityCheckPassed)
                                .boolean()
                                .null(),
                        )
                        .col(ColumnDef::new(ReturnCases::QualityCheckNotes).text().null())
                        .col(ColumnDef::new(ReturnCases::Notes).text().null())
                        .col(ColumnDef::new(ReturnCases::RejectionReason).text().null())
                        .col(
                            ColumnDef::new(ReturnCases::DegradedBarcodes)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(ReturnCases::InventoryWarnings).json().not_null())
                        .col(
                            ColumnDef::new(ReturnCases::InventoryRestoredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::QualityCheckedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::ApprovedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::RejectedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::ProcessedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCases::RefundedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_cases_order_id")
                        .table(ReturnCases::Table)
                        .col(ReturnCases::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_cases_status")
                        .table(ReturnCases::Table)
                        .col(ReturnCases::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ReturnCaseItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReturnCaseItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCaseItems::ReturnCaseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCaseItems::OrderItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnCaseItems::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(ReturnCaseItems::ProductName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCaseItems::QuantityReturned)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnCaseItems::UnitPriceMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnCaseItems::BatchId).uuid().null())
                        .col(ColumnDef::new(ReturnCaseItems::Reason).text().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_return_case_items_return_case_id")
                                .from(ReturnCaseItems::Table, ReturnCaseItems::ReturnCaseId)
                                .to(ReturnCases::Table, ReturnCases::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_case_items_return_case_id")
                        .table(ReturnCaseItems::Table)
                        .col(ReturnCaseItems::ReturnCaseId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReturnCaseItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ReturnCases::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum ReturnCases {
        Table,
        Id,
        ReturnNumber,
        OrderId,
        OrderNumber,
        Status,
        ReturnType,
        Reason,
        Currency,
        TotalReturnValueMinor,
        TotalRefundAmountMinor,
        ProcessingFeeMinor,
        QualityCheckPassed,
        QualityCheckNotes,
        Notes,
        RejectionReason,
        DegradedBarcodes,
        InventoryWarnings,
        InventoryRestoredAt,
        Version,
        CreatedAt,
        UpdatedAt,
        QualityCheckedAt,
        ApprovedAt,
        RejectedAt,
        ProcessedAt,
        CompletedAt,
        RefundedAt,
    }

    #[derive(DeriveIden)]
    enum ReturnCaseItems {
        Table,
        Id,
        ReturnCaseId,
        OrderItemId,
        ProductId,
        ProductName,
        QuantityReturned,
        UnitPriceMinor,
        BatchId,
        Reason,
    }
}

mod m20240601_000003_create_settlement_tables {
    use super::m20240601_000002_create_return_case_tables::ReturnCases;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_settlement_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RefundRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RefundRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RefundRecords::ReturnCaseId).uuid().not_null())
                        .col(ColumnDef::new(RefundRecords::Method).string_len(64).not_null())
                        .col(
                            ColumnDef::new(RefundRecords::AmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RefundRecords::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(RefundRecords::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(RefundRecords::TransactionReference)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(RefundRecords::Denominations).json().null())
                        .col(
                            ColumnDef::new(RefundRecords::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RefundRecords::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RefundRecords::ProcessedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RefundRecords::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_refund_records_return_case_id")
                                .from(RefundRecords::Table, RefundRecords::ReturnCaseId)
                                .to(ReturnCases::Table, ReturnCases::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_refund_records_return_case_id")
                        .table(RefundRecords::Table)
                        .col(RefundRecords::ReturnCaseId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ExchangeRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ExchangeRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ExchangeRecords::ReturnCaseId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(ExchangeRecords::NewOrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(ExchangeRecords::NewOrderNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ExchangeRecords::Currency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ExchangeRecords::RefundAmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ExchangeRecords::NewOrderTotalMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ExchangeRecords::NetAmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ExchangeRecords::CreditAppliedMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ExchangeRecords::CreditRefundId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ExchangeRecords::PayoutRefundId).uuid().null())
                        .col(
                            ColumnDef::new(ExchangeRecords::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_exchange_records_return_case_id")
                                .from(ExchangeRecords::Table, ExchangeRecords::ReturnCaseId)
                                .to(ReturnCases::Table, ReturnCases::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ExchangeRecords::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RefundRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RefundRecords {
        Table,
        Id,
        ReturnCaseId,
        Method,
        AmountMinor,
        Currency,
        Status,
        TransactionReference,
        Denominations,
        CreatedAt,
        UpdatedAt,
        ProcessedAt,
        CompletedAt,
    }

    #[derive(DeriveIden)]
    enum ExchangeRecords {
        Table,
        Id,
        ReturnCaseId,
        NewOrderId,
        NewOrderNumber,
        Currency,
        RefundAmountMinor,
        NewOrderTotalMinor,
        NetAmountMinor,
        CreditAppliedMinor,
        CreditRefundId,
        PayoutRefundId,
        CreatedAt,
    }
}

mod m20240601_000004_create_inventory_batches_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_inventory_batches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryBatches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryBatches::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryBatches::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryBatches::QuantityAvailable)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_batches_product_id")
                        .table(InventoryBatches::Table)
                        .col(InventoryBatches::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryBatches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryBatches {
        Table,
        Id,
        ProductId,
        QuantityAvailable,
        CreatedAt,
        UpdatedAt,
    }
}

/// Database migration CLI runner
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(5)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
