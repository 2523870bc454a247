//! Fixed-point money amounts.
//!
//! Amounts are stored as an integer count of minor units (cents), so pool
//! exhaustion is an exact comparison against zero and the conservation
//! invariant holds without epsilon tolerances.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Money amount in minor units (cents).
///
/// Signed so that corrupted store rows (negative balances) remain
/// representable and can be reported by the integrity validator.
///
/// # Example
///
/// ```
/// use money_age_core::Money;
///
/// let salary = Money::from_major(2_500);
/// let rent = Money::from_cents(120_050);
/// assert_eq!((salary - rent).cents(), 129_950);
/// assert_eq!(rent.to_string(), "1200.50");
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates an amount from minor units
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates an amount from whole major units
    #[must_use]
    pub const fn from_major(units: i64) -> Self {
        Self(units * 100)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Checks if this amount is zero
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checks if this amount is strictly positive
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Checks if this amount is strictly negative
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Returns the smaller of two amounts
    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }

    /// Amount as a floating point number of major units, for display and
    /// reporting only.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_major_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
