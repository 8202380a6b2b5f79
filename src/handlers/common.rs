use crate::{config::AppConfig, models::money::MINOR_UNIT_SCALE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Minor units to a major-unit decimal (`1250` -> `12.50`).
pub fn to_decimal(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

pub fn to_decimal_opt(minor: Option<i64>) -> Option<Decimal> {
    minor.map(to_decimal)
}

/// Pagination parameters for list operations
#[derive(Debug, Default, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct PaginationParams {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size
    pub limit: Option<u64>,
}

impl PaginationParams {
    /// Page and page size clamped to the configured bounds.
    pub fn resolve(&self, config: &AppConfig) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(config.api_default_page_size)
            .clamp(1, config.api_max_page_size.max(1));
        (page, limit)
    }
}

pub fn total_pages(total: u64, limit: u64) -> u64 {
    if limit == 0 {
        return 0;
    }
    (total + limit - 1) / limit
}
