//! Money and currency types

use crate::error::{INVALID_AMOUNT, PaymentError, PaymentResult};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currencies accepted at the counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    IDR,
    SGD,
    MYR,
    USD,
}

impl Currency {
    /// Get currency code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::IDR => "IDR",
            Self::SGD => "SGD",
            Self::MYR => "MYR",
            Self::USD => "USD",
        }
    }

    /// Get currency symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::IDR => "Rp",
            Self::SGD => "S$",
            Self::MYR => "RM",
            Self::USD => "$",
        }
    }

    /// Decimal places carried by the minor unit.
    ///
    /// Rupiah is settled in whole units by the gateway, so it carries none.
    pub fn decimals(&self) -> u32 {
        match self {
            Self::IDR => 0,
            _ => 2,
        }
    }

    /// Parse from string
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_uppercase().as_str() {
            "IDR" => Some(Self::IDR),
            "SGD" => Some(Self::SGD),
            "MYR" => Some(Self::MYR),
            "USD" => Some(Self::USD),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Money amount with currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the smallest currency unit
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Money {
    /// Create a new money amount from smallest unit
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Create a rupiah amount
    pub fn idr(amount: i64) -> Self {
        Self::new(amount, Currency::IDR)
    }

    /// Create from a decimal amount.
    ///
    /// Returns `None` when the value has more precision than the currency
    /// carries or does not fit in the minor unit.
    pub fn from_decimal(amount: Decimal, currency: Currency) -> Option<Self> {
        let multiplier = Decimal::from(10i64.pow(currency.decimals()));
        let scaled = amount.checked_mul(multiplier)?;
        if !scaled.fract().is_zero() {
            return None;
        }
        scaled.to_i64().map(|amount| Self { amount, currency })
    }

    /// Parse a gateway amount string such as `"500000.00"`
    pub fn parse(value: &str, currency: Currency) -> PaymentResult<Self> {
        let decimal = Decimal::from_str(value.trim()).map_err(|e| {
            PaymentError::invalid(INVALID_AMOUNT, format!("unparseable amount {value:?}: {e}"))
        })?;
        Self::from_decimal(decimal, currency).ok_or_else(|| {
            PaymentError::invalid(
                INVALID_AMOUNT,
                format!("amount {value:?} does not fit {currency}"),
            )
        })
    }

    /// Get amount as decimal
    pub fn to_decimal(&self) -> Decimal {
        let divisor = Decimal::from(10i64.pow(self.currency.decimals()));
        Decimal::from(self.amount) / divisor
    }

    /// Format for display
    pub fn format(&self) -> String {
        format!(
            "{}{:.prec$}",
            self.currency.symbol(),
            self.to_decimal(),
            prec = self.currency.decimals() as usize
        )
    }

    /// Check if strictly positive
    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}
