pub mod money;
pub mod status;

pub use money::{Currency, Money, MoneyError};
pub use status::{BarcodeKind, RefundMethod, RefundStatus, ReturnAction, ReturnStatus, ReturnType};
