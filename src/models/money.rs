use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Number of fractional digits carried by every supported currency.
pub const MINOR_UNIT_SCALE: u32 = 2;

const MINOR_UNITS_PER_MAJOR: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("invalid currency code '{0}'")]
    InvalidCurrency(String),

    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("amount {0} has more than {MINOR_UNIT_SCALE} fractional digits")]
    TooPrecise(Decimal),

    #[error("amount {0} must not be negative")]
    Negative(Decimal),

    #[error("amount overflow")]
    Overflow,
}

/// ISO-4217 style three letter currency code, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let trimmed = code.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monetary amount stored as integer minor units.
///
/// Every amount that is compared or summed inside the engine goes through
/// this type. Arithmetic between different currencies is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Money {
    minor: i64,
    currency: Currency,
}

impl Money {
    pub fn from_minor(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::from_minor(0, currency)
    }

    /// Converts a decimal amount in major units (`12.50`) into minor units.
    pub fn from_decimal(amount: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        if amount.normalize().scale() > MINOR_UNIT_SCALE {
            return Err(MoneyError::TooPrecise(amount));
        }
        let minor = amount
            .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
            .ok_or(MoneyError::Overflow)?
            .trunc()
            .to_i64()
            .ok_or(MoneyError::Overflow)?;
        Ok(Self { minor, currency })
    }

    /// Same as [`Money::from_decimal`] but rejects negative input.
    pub fn non_negative(amount: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(MoneyError::Negative(amount));
        }
        Self::from_decimal(amount, currency)
    }

    pub fn minor_units(&self) -> i64 {
        self.minor
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor, MINOR_UNIT_SCALE)
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    pub fn is_negative(&self) -> bool {
        self.minor < 0
    }

    fn same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        let minor = self
            .minor
            .checked_add(other.minor)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::from_minor(minor, self.currency.clone()))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        let minor = self
            .minor
            .checked_sub(other.minor)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::from_minor(minor, self.currency.clone()))
    }

    pub fn times(&self, quantity: u32) -> Result<Money, MoneyError> {
        let minor = self
            .minor
            .checked_mul(i64::from(quantity))
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::from_minor(minor, self.currency.clone()))
    }

    pub fn compare(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.same_currency(other)?;
        Ok(self.minor.cmp(&other.minor))
    }

    pub fn min(&self, other: &Money) -> Result<Money, MoneyError> {
        Ok(match self.compare(other)? {
            Ordering::Greater => other.clone(),
            _ => self.clone(),
        })
    }

    /// Clamps negative amounts to zero.
    pub fn floor_zero(self) -> Money {
        if self.minor < 0 {
            Money::zero(self.currency)
        } else {
            self
        }
    }

    pub fn sum<'a, I>(amounts: I, currency: Currency) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = &'a Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(currency), |acc, amount| acc.checked_add(amount))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal(), self.currency)
    }
}
