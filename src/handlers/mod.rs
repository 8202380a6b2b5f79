pub mod common;
pub mod exchanges;
pub mod health;
pub mod orders;
pub mod refunds;
pub mod returns;

use crate::{
    commands::CommandContext,
    services::{exchanges::ExchangeCoordinator, refunds::RefundAllocator, returns::ReturnService},
};
use std::sync::Arc;

pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub returns: Arc<ReturnService>,
    pub refunds: Arc<RefundAllocator>,
    pub exchanges: Arc<ExchangeCoordinator>,
}

impl AppServices {
    /// Builds every service on top of one shared command context.
    pub fn new(ctx: CommandContext) -> Self {
        let refunds = RefundAllocator::new(ctx.clone());
        let exchanges = ExchangeCoordinator::new(ctx.clone(), refunds.clone());
        Self {
            returns: Arc::new(ReturnService::new(ctx)),
            refunds: Arc::new(refunds),
            exchanges: Arc::new(exchanges),
        }
    }
}
