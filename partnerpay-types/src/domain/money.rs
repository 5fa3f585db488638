//! Type-safe monetary value with embedded currency.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::DomainError;

/// Smallest accepted amount in minor units (0.01).
pub const MIN_AMOUNT: i64 = 1;

/// Largest accepted amount in minor units (100,000.00).
pub const MAX_AMOUNT: i64 = 10_000_000;

/// Currencies currently active for partners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    INR,
    THB,
}

impl Currency {
    /// Every active currency, in allow-list order.
    pub const ALL: [Currency; 5] = [
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::INR,
        Currency::THB,
    ];

    /// Returns the ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::INR => "INR",
            Currency::THB => "THB",
        }
    }

    /// Returns the currency symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::INR => "₹",
            Currency::THB => "฿",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| DomainError::UnsupportedCurrency(s.to_string()))
    }
}

/// Exact amount of money in the smallest unit of its currency.
///
/// Always within `MIN_AMOUNT..=MAX_AMOUNT`. Arithmetic never mutates in place;
/// it returns a new value or an error when the result would leave that range
/// or mix currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    /// Creates a new Money value.
    pub fn new(amount: i64, currency: Currency) -> Result<Self, DomainError> {
        if !(MIN_AMOUNT..=MAX_AMOUNT).contains(&amount) {
            return Err(DomainError::AmountOutOfRange { amount });
        }
        Ok(Self { amount, currency })
    }

    /// Creates a Money value from a raw currency code.
    pub fn parse(amount: i64, currency_code: &str) -> Result<Self, DomainError> {
        let currency = currency_code.parse()?;
        Self::new(amount, currency)
    }

    /// Returns the amount in smallest currency unit.
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Returns the currency.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Sum of two same-currency values.
    pub fn add(&self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(&other)?;
        Money::new(self.amount + other.amount, self.currency)
    }

    /// Difference of two same-currency values. Never clamps.
    pub fn subtract(&self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(&other)?;
        if self.amount < other.amount {
            return Err(DomainError::NegativeResult {
                minuend: self.amount,
                subtrahend: other.amount,
            });
        }
        Money::new(self.amount - other.amount, self.currency)
    }

    /// Strict comparison; mixing currencies is an error, not `false`.
    pub fn is_greater_than(&self, other: &Money) -> Result<bool, DomainError> {
        self.ensure_same_currency(other)?;
        Ok(self.amount > other.amount)
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                expected: self.currency,
                got: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let major = self.amount / 100;
        let minor = self.amount % 100;
        write!(f, "{}{}.{:02}", self.currency.symbol(), major, minor)
    }
}
