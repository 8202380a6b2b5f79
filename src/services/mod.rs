// Return ledger and lifecycle
pub mod barcode_ledger;
pub mod returns;

// Money movement
pub mod exchanges;
pub mod refunds;

// Stock bookkeeping
pub mod inventory_reconciler;

// Order subsystem collaborator
pub mod order_gateway;
pub mod order_locks;
