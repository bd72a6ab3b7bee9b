//! Exact monetary amounts in minor units.
//!
//! Every amount in the reconciliation core is an integer count of minor units
//! (cents) paired with an ISO-4217 currency code. Provider APIs report decimal
//! strings ("75.00"); [`Money::parse_decimal`] converts those exactly, and no
//! code path ever touches floating point, so there is no rounding drift
//! between what a provider captured and what the ledger records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of decimal digits in a minor unit (both integrated providers quote
/// two-decimal currency strings).
pub const MINOR_UNIT_EXPONENT: u32 = 2;

const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// An ISO-4217 currency code (three uppercase ASCII letters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Currency([u8; 3]);

impl Currency {
    /// The US dollar, the platform's default settlement currency.
    pub const USD: Self = Self(*b"USD");

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Validated as ASCII uppercase on construction.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(Error::InvalidCurrency {
                message: format!("expected three uppercase letters, got '{s}'"),
            });
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }
}

impl Serialize for Currency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An exact monetary amount: minor units plus currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units (cents). Never negative for ledger amounts.
    minor_units: i64,
    /// ISO-4217 currency code.
    currency: Currency,
}

impl Money {
    /// Returns a zero amount in the given currency.
    #[must_use]
    pub const fn zero(currency: Currency) -> Self {
        Self {
            minor_units: 0,
            currency,
        }
    }

    /// Creates an amount from minor units.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAmount`] if `minor_units` is negative; the
    /// ledger records payments, not refunds.
    pub fn from_minor_units(minor_units: i64, currency: Currency) -> Result<Self> {
        if minor_units < 0 {
            return Err(Error::InvalidAmount {
                message: format!("amount must not be negative, got {minor_units}"),
            });
        }
        Ok(Self {
            minor_units,
            currency,
        })
    }

    /// Parses a provider-reported decimal string ("75.00", "50", "0.99").
    ///
    /// Parsing is exact: at most [`MINOR_UNIT_EXPONENT`] fraction digits are
    /// accepted and the result is checked integer arithmetic, so a provider
    /// amount survives the round trip unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAmount`] for empty/negative/non-numeric input,
    /// more than two fraction digits, or overflow.
    pub fn parse_decimal(value: &str, currency: Currency) -> Result<Self> {
        let invalid = |message: String| Error::InvalidAmount { message };

        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(invalid("amount string is empty".to_string()));
        }
        if trimmed.starts_with('-') {
            return Err(invalid(format!("amount must not be negative: '{trimmed}'")));
        }

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid(format!("malformed amount: '{trimmed}'")));
        }
        if fraction.len() > MINOR_UNIT_EXPONENT as usize {
            return Err(invalid(format!(
                "more than {MINOR_UNIT_EXPONENT} fraction digits: '{trimmed}'"
            )));
        }

        let digits = |s: &str| -> Result<i64> {
            if s.is_empty() {
                return Ok(0);
            }
            if !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(format!("malformed amount: '{trimmed}'")));
            }
            s.parse::<i64>()
                .map_err(|e| invalid(format!("amount out of range '{trimmed}': {e}")))
        };

        let whole = digits(whole)?;
        let mut fraction_units = digits(fraction)?;
        // "5" and "50" in the fraction position mean 50 minor units.
        for _ in fraction.len()..MINOR_UNIT_EXPONENT as usize {
            fraction_units *= 10;
        }

        let minor_units = whole
            .checked_mul(MINOR_UNITS_PER_MAJOR)
            .and_then(|n| n.checked_add(fraction_units))
            .ok_or_else(|| invalid(format!("amount out of range: '{trimmed}'")))?;

        Self::from_minor_units(minor_units, currency)
    }

    /// Returns the amount in minor units.
    #[must_use]
    pub const fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// Returns the currency.
    #[must_use]
    pub const fn currency(&self) -> Currency {
        self.currency
    }

    /// Renders the amount as the provider-style decimal string ("75.00").
    #[must_use]
    pub fn to_decimal_string(&self) -> String {
        format!(
            "{}.{:02}",
            self.minor_units / MINOR_UNITS_PER_MAJOR,
            self.minor_units % MINOR_UNITS_PER_MAJOR
        )
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}
