pub mod approve_return_command;
pub mod complete_return_command;
pub mod create_return_command;
pub mod process_return_command;
pub mod reject_return_command;
pub mod restock_returned_items_command;
pub mod update_return_command;

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use uuid::Uuid;
use validator::ValidationError;

/// Display number of a return case: `{prefix}-{YYYYMMDD}-{8 hex}`.
pub fn generate_return_number(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    format!("{}-{}-{}", prefix, now.format("%Y%m%d"), suffix)
}

pub(crate) fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some(Cow::from("must not be blank"));
        return Err(err);
    }
    Ok(())
}
