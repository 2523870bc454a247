//! Pool selection strategies.
//!
//! A strategy decides how an expense is split across the open pools. All
//! variants see the open pools oldest-first (ordered by income date, then
//! insertion order) and return one allocation per pool, so ties always
//! resolve the same way and the allocations never exceed a pool's balance.

use crate::Money;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How expenses draw from open resource pools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionStrategy {
    /// Oldest income is spent first
    #[default]
    Fifo,
    /// Newest income is spent first
    Lifo,
    /// Every open pool contributes in proportion to its remaining balance
    Proportional,
}

impl ConsumptionStrategy {
    /// Stable lowercase name, as used in configuration
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::Lifo => "lifo",
            Self::Proportional => "proportional",
        }
    }

    /// Splits `amount` across pools with the given remaining balances.
    ///
    /// `remaining` is ordered oldest-first. The returned vector has the
    /// same length; entry `i` is what pool `i` contributes. The total is
    /// `min(amount, Σ remaining)`; the caller treats the rest as uncovered.
    #[must_use]
    pub fn allocate(self, remaining: &[Money], amount: Money) -> Vec<Money> {
        let mut allocations = vec![Money::ZERO; remaining.len()];
        if !amount.is_positive() {
            return allocations;
        }

        match self {
            Self::Fifo => drain_in_order(remaining, amount, 0..remaining.len(), &mut allocations),
            Self::Lifo => {
                drain_in_order(remaining, amount, (0..remaining.len()).rev(), &mut allocations);
            }
            Self::Proportional => split_proportionally(remaining, amount, &mut allocations),
        }
        allocations
    }
}

fn drain_in_order(
    remaining: &[Money],
    amount: Money,
    order: impl Iterator<Item = usize>,
    allocations: &mut [Money],
) {
    let mut left = amount;
    for i in order {
        if left.is_zero() {
            break;
        }
        if !remaining[i].is_positive() {
            continue;
        }
        let take = left.min(remaining[i]);
        allocations[i] = take;
        left -= take;
    }
}

fn split_proportionally(remaining: &[Money], amount: Money, allocations: &mut [Money]) {
    let total: i128 = remaining
        .iter()
        .filter(|r| r.is_positive())
        .map(|r| i128::from(r.cents()))
        .sum();
    if total == 0 {
        return;
    }
    if i128::from(amount.cents()) >= total {
        for (slot, r) in allocations.iter_mut().zip(remaining) {
            if r.is_positive() {
                *slot = *r;
            }
        }
        return;
    }

    // Floor shares lose less than one cent per pool, and each pool keeps at
    // least one cent above its share, so one pass hands out the leftover.
    let mut assigned = 0_i64;
    for (slot, r) in allocations.iter_mut().zip(remaining) {
        if r.is_positive() {
            let share = i128::from(amount.cents()) * i128::from(r.cents()) / total;
            let share = i64::try_from(share).unwrap_or(0);
            *slot = Money::from_cents(share);
            assigned += share;
        }
    }
    let mut leftover = amount.cents() - assigned;
    for (slot, r) in allocations.iter_mut().zip(remaining) {
        if leftover == 0 {
            break;
        }
        if *slot < *r {
            *slot += Money::from_cents(1);
            leftover -= 1;
        }
    }
}

impl fmt::Display for ConsumptionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown strategy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown consumption strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for ConsumptionStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "lifo" => Ok(Self::Lifo),
            "proportional" | "weighted_average" | "weighted-average" => Ok(Self::Proportional),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(values: &[i64]) -> Vec<Money> {
        values.iter().copied().map(Money::from_cents).collect()
    }

    #[test]
    fn fifo_drains_oldest_first() {
        let got = ConsumptionStrategy::Fifo.allocate(&cents(&[5_000, 5_000]), Money::from_cents(7_000));
        assert_eq!(got, cents(&[5_000, 2_000]));
    }

    #[test]
    fn lifo_drains_newest_first() {
        let got = ConsumptionStrategy::Lifo.allocate(&cents(&[5_000, 5_000]), Money::from_cents(7_000));
        assert_eq!(got, cents(&[2_000, 5_000]));
    }

    #[test]
    fn allocation_is_capped_by_available_funds() {
        for strategy in [
            ConsumptionStrategy::Fifo,
            ConsumptionStrategy::Lifo,
            ConsumptionStrategy::Proportional,
        ] {
            let got = strategy.allocate(&cents(&[3_000]), Money::from_cents(10_000));
            assert_eq!(got, cents(&[3_000]), "{strategy}");
        }
    }

    #[test]
    fn proportional_split_hands_leftover_cents_to_oldest() {
        // 100 cents over three equal pools: 33 each, oldest gets the spare cent.
        let got = ConsumptionStrategy::Proportional.allocate(&cents(&[300, 300, 300]), Money::from_cents(100));
        assert_eq!(got, cents(&[34, 33, 33]));
        assert_eq!(got.iter().sum::<Money>(), Money::from_cents(100));
    }

    #[test]
    fn zero_amount_allocates_nothing() {
        let got = ConsumptionStrategy::Fifo.allocate(&cents(&[300]), Money::ZERO);
        assert_eq!(got, cents(&[0]));
    }

    #[test]
    fn parses_configuration_names() {
        assert_eq!("FIFO".parse::<ConsumptionStrategy>(), Ok(ConsumptionStrategy::Fifo));
        assert_eq!("weighted_average".parse::<ConsumptionStrategy>(), Ok(ConsumptionStrategy::Proportional));
        assert!("random".parse::<ConsumptionStrategy>().is_err());
    }
}
