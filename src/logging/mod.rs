//! Money-movement audit trail.
//!
//! Request and service logs go through `tracing`. Every allocation,
//! settlement step and exchange credit split is additionally written to a
//! dedicated `slog` logger so the audit stream can be routed and retained
//! independently of application logs.

use rust_decimal::Decimal;
use slog::{o, Discard, Drain, Logger};
use slog_async::Async;
use slog_term::{FullFormat, PlainDecorator, TermDecorator};
use uuid::Uuid;

/// Configuration for setting up the logger
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub async_buffer_size: usize,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            async_buffer_size: 1024,
            use_color: false,
        }
    }
}

/// Sets up a logger with configurable options
pub fn setup_logger(config: LoggerConfig) -> Logger {
    let drain = if config.use_color {
        let decorator = TermDecorator::new().force_color().build();
        let drain = FullFormat::new(decorator).build().fuse();
        Async::new(drain)
            .chan_size(config.async_buffer_size)
            .build()
            .fuse()
    } else {
        let decorator = PlainDecorator::new(std::io::stdout());
        let drain = FullFormat::new(decorator).build().fuse();
        Async::new(drain)
            .chan_size(config.async_buffer_size)
            .build()
            .fuse()
    };

    Logger::root(
        drain,
        o!("version" => env!("CARGO_PKG_VERSION"), "stream" => "audit"),
    )
}

/// Structured audit log for refunds and exchanges.
#[derive(Clone)]
pub struct AuditLog {
    logger: Logger,
}

impl AuditLog {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Audit log that drops every record.
    pub fn discard() -> Self {
        Self::new(Logger::root(Discard, o!()))
    }

    fn request_id() -> String {
        crate::tracing::current_request_id()
            .map(|rid| rid.0)
            .unwrap_or_default()
    }

    pub fn refund_recorded(
        &self,
        return_case_id: Uuid,
        refund_id: Uuid,
        method: &str,
        amount: Decimal,
        currency: &str,
        status: &str,
    ) {
        slog::info!(
            self.logger,
            "refund recorded";
            "return_case_id" => %return_case_id,
            "refund_id" => %refund_id,
            "method" => method,
            "amount" => %amount,
            "currency" => currency,
            "status" => status,
            "request_id" => Self::request_id(),
        );
    }

    pub fn refund_status_changed(
        &self,
        return_case_id: Uuid,
        refund_id: Uuid,
        from: &str,
        to: &str,
        transaction_reference: Option<&str>,
    ) {
        slog::info!(
            self.logger,
            "refund status changed";
            "return_case_id" => %return_case_id,
            "refund_id" => %refund_id,
            "from" => from,
            "to" => to,
            "transaction_reference" => transaction_reference.unwrap_or(""),
            "request_id" => Self::request_id(),
        );
    }

    pub fn return_refunded(&self, return_case_id: Uuid, total: Decimal, currency: &str) {
        slog::info!(
            self.logger,
            "return fully refunded";
            "return_case_id" => %return_case_id,
            "total" => %total,
            "currency" => currency,
            "request_id" => Self::request_id(),
        );
    }

    pub fn exchange_credit_split(
        &self,
        return_case_id: Uuid,
        credit_refund_id: Uuid,
        applied: Decimal,
        payout_refund_id: Uuid,
        payout: Decimal,
        payout_method: &str,
    ) {
        slog::info!(
            self.logger,
            "exchange credit split";
            "return_case_id" => %return_case_id,
            "credit_refund_id" => %credit_refund_id,
            "applied" => %applied,
            "payout_refund_id" => %payout_refund_id,
            "payout" => %payout,
            "payout_method" => payout_method,
            "request_id" => Self::request_id(),
        );
    }

    pub fn exchange_linked(
        &self,
        return_case_id: Uuid,
        new_order_id: &str,
        net_amount: Decimal,
        currency: &str,
    ) {
        slog::info!(
            self.logger,
            "exchange linked";
            "return_case_id" => %return_case_id,
            "new_order_id" => new_order_id,
            "net_amount" => %net_amount,
            "currency" => currency,
            "request_id" => Self::request_id(),
        );
    }
}
