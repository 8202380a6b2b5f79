use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Lifecycle of a return case.
///
/// `pending -> approved -> processed -> completed -> refunded`, with
/// `pending -> rejected` and `approved -> rejected` as terminal exits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "processed")]
    Processed,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Processed => "processed",
            Self::Completed => "completed",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Refunded)
    }

    /// Computes the status reached by applying `action`, or the display
    /// reason the action is illegal from this status.
    pub fn apply(self, action: ReturnAction) -> Result<ReturnStatus, String> {
        let next = match (self, action) {
            (Self::Pending, ReturnAction::RecordQualityCheck) => Self::Pending,
            (Self::Pending, ReturnAction::Approve) => Self::Approved,
            (Self::Pending | Self::Approved, ReturnAction::Reject) => Self::Rejected,
            (Self::Approved, ReturnAction::Process) => Self::Processed,
            (Self::Processed, ReturnAction::Complete) => Self::Completed,
            (Self::Completed, ReturnAction::AllocateRefund) => Self::Completed,
            (Self::Completed, ReturnAction::SettleRefund) => Self::Refunded,
            (
                Self::Processed | Self::Completed | Self::Refunded,
                ReturnAction::RestoreInventory,
            ) => self,
            (status, action) => {
                return Err(format!("Cannot {}: return is {}", action.verb(), status));
            }
        };
        Ok(next)
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReturnStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "processed" => Ok(Self::Processed),
            "completed" => Ok(Self::Completed),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown return status '{}'", other)),
        }
    }
}

/// Operations that drive a return case through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnAction {
    RecordQualityCheck,
    Approve,
    Reject,
    Process,
    Complete,
    AllocateRefund,
    SettleRefund,
    RestoreInventory,
}

impl ReturnAction {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::RecordQualityCheck => "record quality check",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Process => "process",
            Self::Complete => "complete",
            Self::AllocateRefund => "allocate refund",
            Self::SettleRefund => "settle refund",
            Self::RestoreInventory => "restore inventory",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ReturnType {
    #[sea_orm(string_value = "defective")]
    Defective,
    #[sea_orm(string_value = "damaged")]
    Damaged,
    #[sea_orm(string_value = "wrong_item")]
    WrongItem,
    #[sea_orm(string_value = "unwanted")]
    Unwanted,
    #[sea_orm(string_value = "other")]
    Other,
}

/// Settlement progress of a single refund record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processed")]
    Processed,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Completed => "completed",
        }
    }
}

/// Whether a unit identifier came from the order subsystem or was minted locally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum BarcodeKind {
    #[sea_orm(string_value = "real")]
    Real,
    #[sea_orm(string_value = "synthetic")]
    Synthetic,
}

/// Instrument a refund is paid through.
///
/// Stored as text: `cash`, `card`, `exchange_credit` or `wallet:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefundMethod {
    Cash,
    Card,
    Wallet(String),
    ExchangeCredit,
}

impl RefundMethod {
    pub fn is_exchange_credit(&self) -> bool {
        matches!(self, Self::ExchangeCredit)
    }
}

impl fmt::Display for RefundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cash => f.write_str("cash"),
            Self::Card => f.write_str("card"),
            Self::Wallet(name) => write!(f, "wallet:{}", name),
            Self::ExchangeCredit => f.write_str("exchange_credit"),
        }
    }
}

impl FromStr for RefundMethod {
    type Err = String;

    /// Accepts `cash`, `card`, `exchange_credit`, `wallet:<name>` and bare
    /// wallet names such as `gcash` or `paymaya`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" => Err("refund method must not be empty".to_string()),
            "cash" => Ok(Self::Cash),
            "card" => Ok(Self::Card),
            "exchange_credit" => Ok(Self::ExchangeCredit),
            other => {
                let name = other.strip_prefix("wallet:").unwrap_or(other);
                if name.is_empty()
                    || !name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return Err(format!("invalid refund method '{}'", s));
                }
                Ok(Self::Wallet(name.to_string()))
            }
        }
    }
}

impl Serialize for RefundMethod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RefundMethod {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
