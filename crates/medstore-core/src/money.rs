//! # Money Module
//!
//! Provides the `Money` type for prices and purchase totals.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  Purchase total check with REAL columns:                                │
//! │    3 × 0.10 = 0.30000000000000004  vs claimed 0.30  → mismatch         │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    3 × 10 cents = 30 cents, compared exactly                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Forms submit prices as decimal text ("12.50"); [`Money::parse`] is the only
//! way in from text, and `Display` the only way back out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use crate::error::ValidationError;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// Serialized as a bare integer, so `{"price_cents": 1250}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(transparent))]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero.
    pub const ZERO: Money = Money(0);

    /// Creates a Money value from cents.
    ///
    /// ## Example
    /// ```rust
    /// use medstore_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// `self + rhs`, or `None` on overflow.
    pub const fn checked_add(self, rhs: Money) -> Option<Money> {
        match self.0.checked_add(rhs.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Price of `quantity` units, or `None` on overflow.
    ///
    /// ## Example
    /// ```rust
    /// use medstore_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(250).checked_mul(3), Some(Money::from_cents(750)));
    /// assert_eq!(Money::from_cents(1250).checked_mul(i64::MAX / 100), None);
    /// ```
    pub const fn checked_mul(self, quantity: i64) -> Option<Money> {
        match self.0.checked_mul(quantity) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Absolute difference between two amounts.
    pub fn abs_diff(self, other: Money) -> Money {
        Money((self.0 - other.0).abs())
    }

    /// Parses a decimal amount such as `"12.5"`, `"12.50"` or `"12"`.
    ///
    /// ## Rules
    /// - Optional leading `-`
    /// - At most two fractional digits
    /// - No currency symbols, no thousands separators
    ///
    /// ## Example
    /// ```rust
    /// use medstore_core::money::Money;
    ///
    /// assert_eq!(Money::parse("12.5").unwrap().cents(), 1250);
    /// assert!(Money::parse("1.234").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Money, ValidationError> {
        let invalid = |reason: &str| ValidationError::invalid_format("amount", reason);

        let text = input.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (major, minor) = digits.split_once('.').unwrap_or((digits, ""));

        if major.is_empty() && minor.is_empty() {
            return Err(invalid("empty amount"));
        }
        if !major.chars().all(|c| c.is_ascii_digit()) || !minor.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid("expected a decimal number"));
        }
        if minor.len() > 2 {
            return Err(invalid("at most two decimal places"));
        }

        let major_value: i64 = if major.is_empty() {
            0
        } else {
            major.parse().map_err(|_| invalid("amount too large"))?
        };
        let minor_value: i64 = match minor.len() {
            0 => 0,
            1 => minor.parse::<i64>().map_err(|_| invalid("bad fraction"))? * 10,
            _ => minor.parse::<i64>().map_err(|_| invalid("bad fraction"))?,
        };

        let cents = major_value
            .checked_mul(100)
            .and_then(|c| c.checked_add(minor_value))
            .ok_or_else(|| invalid("amount too large"))?;

        Ok(Money(if negative { -cents } else { cents }))
    }
}

// =============================================================================
// Display
// =============================================================================

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}


// =============================================================================
// Unit Tests
// =============================================================================
