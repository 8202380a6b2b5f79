//! Per-unit return ledger.
//!
//! Every unit of every order line gets one row in `return_units`. Units carry
//! the barcode reported by the order subsystem, or a synthetic identifier when
//! the real mapping is unavailable, and a `returned` flag that flips exactly
//! once.

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{order_line, return_unit},
    errors::ServiceError,
    models::{BarcodeKind, Currency, Money},
    services::order_gateway::{OrderLineSnapshot, OrderSnapshot},
};

/// Synthetic identifier for the `index`-th unit (1-based) of `product_id` in an order.
pub fn synthetic_code(order_number: &str, product_id: Uuid, index: u32) -> String {
    format!("{}-{}-{}", order_number, product_id, index)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BarcodeLedger;

impl BarcodeLedger {
    pub fn new() -> Self {
        Self
    }

    /// Snapshots the order lines and units of `order` the first time it is
    /// seen. Later calls return the stored snapshot unchanged.
    #[instrument(skip(self, db, order), fields(order_id = %order.id))]
    pub async fn register<C: ConnectionTrait>(
        &self,
        db: &C,
        order: &OrderSnapshot,
        default_currency: &Currency,
    ) -> Result<Vec<order_line::Model>, ServiceError> {
        let existing = self.lines(db, order.id).await?;
        if !existing.is_empty() {
            debug!("Order already registered in ledger");
            return Ok(existing);
        }

        if !order.is_completed() {
            return Err(ServiceError::ValidationError(format!(
                "order {} is not completed",
                order.order_number
            )));
        }
        if order.items.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "order {} has no items",
                order.order_number
            )));
        }

        let currency = match order.currency.as_deref() {
            Some(code) => Currency::new(code)?,
            None => default_currency.clone(),
        };

        let now = Utc::now();
        let mut seen_codes: HashSet<String> = HashSet::new();
        let mut per_product: HashMap<Uuid, u32> = HashMap::new();
        let mut lines = Vec::with_capacity(order.items.len());
        let mut units = Vec::new();
        let mut synthetic_lines = 0usize;

        for item in &order.items {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                ServiceError::ValidationError(format!("quantity too large on item {}", item.id))
            })?;
            let unit_price = Money::non_negative(item.unit_price, currency.clone())?;

            lines.push(order_line::ActiveModel {
                id: Set(item.id),
                order_id: Set(order.id),
                order_number: Set(order.order_number.clone()),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                quantity_ordered: Set(quantity),
                unit_price_minor: Set(unit_price.minor_units()),
                currency: Set(currency.to_string()),
                batch_id: Set(item.batch_id),
                created_at: Set(now),
            });

            let real = usable_barcodes(item, &seen_codes);
            let kind = if real.is_some() {
                BarcodeKind::Real
            } else {
                synthetic_lines += 1;
                BarcodeKind::Synthetic
            };

            for unit_index in 1..=item.quantity {
                let code = match &real {
                    Some(codes) => codes[(unit_index - 1) as usize].clone(),
                    None => {
                        let counter = per_product.entry(item.product_id).or_insert(0);
                        *counter += 1;
                        synthetic_code(&order.order_number, item.product_id, *counter)
                    }
                };
                seen_codes.insert(code.clone());
                units.push(return_unit::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order.id),
                    order_item_id: Set(item.id),
                    code: Set(code),
                    kind: Set(kind),
                    unit_index: Set(unit_index as i32),
                    returned: Set(false),
                    return_case_id: Set(None),
                    returned_at: Set(None),
                    created_at: Set(now),
                });
            }
        }

        order_line::Entity::insert_many(lines).exec(db).await?;
        if !units.is_empty() {
            let unit_count = units.len();
            return_unit::Entity::insert_many(units).exec(db).await?;
            metrics::counter!("returns_engine_ledger_units_registered_total", unit_count as u64);
        }

        if synthetic_lines > 0 {
            warn!(
                order_number = %order.order_number,
                synthetic_lines,
                "Order registered with synthetic barcodes"
            );
        }
        info!(order_number = %order.order_number, "Order registered in return ledger");

        self.lines(db, order.id).await
    }

    /// Looks up the unit carrying `code` on `order_id` together with its line.
    #[instrument(skip(self, db))]
    pub async fn resolve<C: ConnectionTrait>(
        &self,
        db: &C,
        order_id: Uuid,
        code: &str,
    ) -> Result<(return_unit::Model, order_line::Model), ServiceError> {
        let found = return_unit::Entity::find()
            .filter(return_unit::Column::OrderId.eq(order_id))
            .filter(return_unit::Column::Code.eq(code))
            .find_also_related(order_line::Entity)
            .one(db)
            .await?;

        match found {
            Some((unit, Some(line))) => Ok((unit, line)),
            _ => Err(ServiceError::NotFound(format!(
                "barcode {} not in order {}",
                code, order_id
            ))),
        }
    }

    /// Flips a unit to returned. Exactly one concurrent caller wins; every
    /// other caller gets `AlreadyReturned`.
    #[instrument(skip(self, db))]
    pub async fn mark_returned<C: ConnectionTrait>(
        &self,
        db: &C,
        order_id: Uuid,
        code: &str,
        return_case_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = return_unit::Entity::update_many()
            .col_expr(return_unit::Column::Returned, Expr::value(true))
            .col_expr(
                return_unit::Column::ReturnCaseId,
                Expr::value(Some(return_case_id)),
            )
            .col_expr(return_unit::Column::ReturnedAt, Expr::value(Some(Utc::now())))
            .filter(return_unit::Column::OrderId.eq(order_id))
            .filter(return_unit::Column::Code.eq(code))
            .filter(return_unit::Column::Returned.eq(false))
            .exec(db)
            .await?;

        if result.rows_affected == 1 {
            return Ok(());
        }

        let exists = return_unit::Entity::find()
            .filter(return_unit::Column::OrderId.eq(order_id))
            .filter(return_unit::Column::Code.eq(code))
            .count(db)
            .await?
            > 0;
        if exists {
            Err(ServiceError::AlreadyReturned {
                code: code.to_string(),
            })
        } else {
            Err(ServiceError::NotFound(format!(
                "barcode {} not in order {}",
                code, order_id
            )))
        }
    }

    /// Units of the line that can still be returned. Never negative.
    pub async fn eligible_count<C: ConnectionTrait>(
        &self,
        db: &C,
        order_item_id: Uuid,
    ) -> Result<u32, ServiceError> {
        let line = order_line::Entity::find_by_id(order_item_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("order item", order_item_id))?;
        let returned = return_unit::Entity::find()
            .filter(return_unit::Column::OrderItemId.eq(order_item_id))
            .filter(return_unit::Column::Returned.eq(true))
            .count(db)
            .await?;
        let ordered = u64::try_from(line.quantity_ordered).unwrap_or(0);
        Ok(ordered.saturating_sub(returned) as u32)
    }

    /// Fails with `OverReturn` when fewer than `requested` units remain.
    pub async fn ensure_eligible<C: ConnectionTrait>(
        &self,
        db: &C,
        order_item_id: Uuid,
        requested: u32,
    ) -> Result<u32, ServiceError> {
        let available = self.eligible_count(db, order_item_id).await?;
        if requested > available {
            return Err(ServiceError::OverReturn {
                order_item_id,
                requested,
                available,
            });
        }
        Ok(available)
    }

    /// Picks the lowest-index unreturned units of a line.
    pub async fn select_units<C: ConnectionTrait>(
        &self,
        db: &C,
        order_item_id: Uuid,
        quantity: u32,
    ) -> Result<Vec<return_unit::Model>, ServiceError> {
        let available = self.ensure_eligible(db, order_item_id, quantity).await?;
        let units = return_unit::Entity::find()
            .filter(return_unit::Column::OrderItemId.eq(order_item_id))
            .filter(return_unit::Column::Returned.eq(false))
            .order_by_asc(return_unit::Column::UnitIndex)
            .limit(u64::from(quantity))
            .all(db)
            .await?;
        if units.len() < quantity as usize {
            return Err(ServiceError::OverReturn {
                order_item_id,
                requested: quantity,
                available: available.min(units.len() as u32),
            });
        }
        Ok(units)
    }

    pub async fn units<C: ConnectionTrait>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<Vec<return_unit::Model>, ServiceError> {
        Ok(return_unit::Entity::find()
            .filter(return_unit::Column::OrderId.eq(order_id))
            .order_by_asc(return_unit::Column::OrderItemId)
            .order_by_asc(return_unit::Column::UnitIndex)
            .all(db)
            .await?)
    }

    pub async fn lines<C: ConnectionTrait>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<Vec<order_line::Model>, ServiceError> {
        Ok(order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::CreatedAt)
            .order_by_asc(order_line::Column::Id)
            .all(db)
            .await?)
    }
}

/// Real barcodes are trusted only when there is exactly one non-blank code
/// per unit and none repeats within the order.
fn usable_barcodes(item: &OrderLineSnapshot, seen: &HashSet<String>) -> Option<Vec<String>> {
    let codes = item.barcodes.as_ref()?;
    if codes.len() != item.quantity as usize {
        return None;
    }
    let mut local = HashSet::new();
    let mut trimmed = Vec::with_capacity(codes.len());
    for code in codes {
        let code = code.trim();
        if code.is_empty() || seen.contains(code) || !local.insert(code.to_string()) {
            return None;
        }
        trimmed.push(code.to_string());
    }
    Some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn order(barcodes: Option<Vec<String>>) -> OrderSnapshot {
        OrderSnapshot {
            id: Uuid::new_v4(),
            order_number: "ORD-1".into(),
            currency: None,
            status: Some("completed".into()),
            items: vec![
                OrderLineSnapshot {
                    id: Uuid::new_v4(),
                    product_id: Uuid::new_v4(),
                    product_name: "Mug".into(),
                    quantity: 3,
                    unit_price: dec!(5.00),
                    batch_id: None,
                    barcodes,
                },
                OrderLineSnapshot {
                    id: Uuid::new_v4(),
                    product_id: Uuid::new_v4(),
                    product_name: "Kettle".into(),
                    quantity: 1,
                    unit_price: dec!(10.00),
                    batch_id: None,
                    barcodes: None,
                },
            ],
            paid_amount: dec!(25.00),
            outstanding_amount: dec!(0),
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_and_mints_synthetic_codes() {
        let db = memory_pool().await;
        let ledger = BarcodeLedger::new();
        let order = order(None);

        let lines = ledger.register(&db, &order, &usd()).await.unwrap();
        assert_eq!(lines.len(), 2);
        let again = ledger.register(&db, &order, &usd()).await.unwrap();
        assert_eq!(again.len(), 2);

        let units = ledger.units(&db, order.id).await.unwrap();
        assert_eq!(units.len(), 4);
        assert!(units.iter().all(|u| u.kind == BarcodeKind::Synthetic));
        let mug = order.items[0].product_id;
        assert!(units
            .iter()
            .any(|u| u.code == synthetic_code("ORD-1", mug, 3)));
        assert_eq!(lines[0].unit_price_minor + lines[1].unit_price_minor, 1500);
    }

    #[tokio::test]
    async fn real_barcodes_used_when_complete() {
        let db = memory_pool().await;
        let ledger = BarcodeLedger::new();
        let order = order(Some(vec!["A1".into(), "A2".into(), "A3".into()]));
        ledger.register(&db, &order, &usd()).await.unwrap();

        let (unit, line) = ledger.resolve(&db, order.id, "A2").await.unwrap();
        assert_eq!(unit.kind, BarcodeKind::Real);
        assert_eq!(unit.unit_index, 2);
        assert_eq!(line.id, order.items[0].id);
    }

    #[tokio::test]
    async fn incomplete_barcode_list_degrades_to_synthetic() {
        let db = memory_pool().await;
        let ledger = BarcodeLedger::new();
        let order = order(Some(vec!["A1".into(), "A1".into(), "A3".into()]));
        ledger.register(&db, &order, &usd()).await.unwrap();

        assert_matches!(
            ledger.resolve(&db, order.id, "A1").await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn mark_returned_flips_once() {
        let db = memory_pool().await;
        let ledger = BarcodeLedger::new();
        let order = order(Some(vec!["A1".into(), "A2".into(), "A3".into()]));
        ledger.register(&db, &order, &usd()).await.unwrap();
        let case_id = Uuid::new_v4();

        ledger.mark_returned(&db, order.id, "A1", case_id).await.unwrap();
        for _ in 0..3 {
            assert_matches!(
                ledger.mark_returned(&db, order.id, "A1", case_id).await,
                Err(ServiceError::AlreadyReturned { code }) if code == "A1"
            );
        }
        assert_matches!(
            ledger.mark_returned(&db, order.id, "ZZZ", case_id).await,
            Err(ServiceError::NotFound(_))
        );
        assert_eq!(
            ledger.eligible_count(&db, order.items[0].id).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn select_units_prefers_lowest_index_and_guards_quantity() {
        let db = memory_pool().await;
        let ledger = BarcodeLedger::new();
        let order = order(Some(vec!["A1".into(), "A2".into(), "A3".into()]));
        ledger.register(&db, &order, &usd()).await.unwrap();
        ledger
            .mark_returned(&db, order.id, "A1", Uuid::new_v4())
            .await
            .unwrap();

        let units = ledger.select_units(&db, order.items[0].id, 2).await.unwrap();
        let codes: Vec<_> = units.iter().map(|u| u.code.as_str()).collect();
        assert_eq!(codes, vec!["A2", "A3"]);

        assert_matches!(
            ledger.select_units(&db, order.items[0].id, 3).await,
            Err(ServiceError::OverReturn { requested: 3, available: 2, .. })
        );
    }

    #[tokio::test]
    async fn rejects_orders_that_are_not_completed() {
        let db = memory_pool().await;
        let mut order = order(None);
        order.status = Some("processing".into());
        assert_matches!(
            BarcodeLedger::new().register(&db, &order, &usd()).await,
            Err(ServiceError::ValidationError(_))
        );
    }
}
