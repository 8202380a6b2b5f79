pub mod exchange_record;
pub mod inventory_batch;
pub mod order_line;
pub mod refund_record;
pub mod return_case;
pub mod return_case_item;
pub mod return_unit;
