//! Money age health classification.
//!
//! Thresholds are in days and default to 30 and 60.

use crate::Money;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Share of classified expenses above which a level dominates the overall
/// verdict.
const DOMINANT_SHARE: f64 = 0.3;

/// Health band of a money age value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    /// Money age below the health threshold
    Health,
    /// Money age between the health and warning thresholds
    Warning,
    /// Money age at or above the warning threshold
    Danger,
}

impl HealthLevel {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day thresholds separating the health bands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Ages strictly below this are [`HealthLevel::Health`]
    pub health_days: u32,
    /// Ages strictly below this (and not healthy) are [`HealthLevel::Warning`]
    pub warning_days: u32,
}

impl HealthThresholds {
    /// Creates thresholds; `health_days` should not exceed `warning_days`
    #[must_use]
    pub const fn new(health_days: u32, warning_days: u32) -> Self {
        Self {
            health_days,
            warning_days,
        }
    }

    /// Classifies a money age in days.
    #[must_use]
    pub fn classify(&self, money_age: f64) -> HealthLevel {
        if money_age < f64::from(self.health_days) {
            HealthLevel::Health
        } else if money_age < f64::from(self.warning_days) {
            HealthLevel::Warning
        } else {
            HealthLevel::Danger
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::new(30, 60)
    }
}

/// Expenses falling in one health band.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    /// Number of expenses
    pub count: usize,
    /// Total they spent
    pub total_amount: Money,
    /// Mean of their money ages, in days
    pub average_money_age: f64,
}

impl LevelStats {
    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, amount: Money, money_age: f64) {
        self.count += 1;
        self.total_amount += amount;
        self.average_money_age += (money_age - self.average_money_age) / self.count as f64;
    }
}

/// Expenses per health band: how many, how much, and how old.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthDistribution {
    /// Expenses in the health band
    pub health: LevelStats,
    /// Expenses in the warning band
    pub warning: LevelStats,
    /// Expenses in the danger band
    pub danger: LevelStats,
}

impl HealthDistribution {
    /// Adds one classified expense
    pub fn record(&mut self, level: HealthLevel, amount: Money, money_age: f64) {
        self.level_mut(level).record(amount, money_age);
    }

    /// Statistics of one band
    #[must_use]
    pub const fn level(&self, level: HealthLevel) -> &LevelStats {
        match level {
            HealthLevel::Health => &self.health,
            HealthLevel::Warning => &self.warning,
            HealthLevel::Danger => &self.danger,
        }
    }

    fn level_mut(&mut self, level: HealthLevel) -> &mut LevelStats {
        match level {
            HealthLevel::Health => &mut self.health,
            HealthLevel::Warning => &mut self.warning,
            HealthLevel::Danger => &mut self.danger,
        }
    }

    /// Number of classified expenses
    #[must_use]
    pub const fn total(&self) -> usize {
        self.health.count + self.warning.count + self.danger.count
    }

    /// Fraction of expenses in `level`, from 0 to 1 (0 when empty)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn share(&self, level: HealthLevel) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.level(level).count as f64 / total as f64
    }

    /// Overall verdict: danger if more than 30% of expenses are in danger,
    /// otherwise warning if more than 30% are in warning, otherwise health.
    #[must_use]
    pub fn overall(&self) -> HealthLevel {
        if self.share(HealthLevel::Danger) > DOMINANT_SHARE {
            HealthLevel::Danger
        } else if self.share(HealthLevel::Warning) > DOMINANT_SHARE {
            HealthLevel::Warning
        } else {
            HealthLevel::Health
        }
    }
}

impl FromIterator<(HealthLevel, Money, f64)> for HealthDistribution {
    fn from_iter<I: IntoIterator<Item = (HealthLevel, Money, f64)>>(iter: I) -> Self {
        let mut distribution = Self::default();
        for (level, amount, money_age) in iter {
            distribution.record(level, amount, money_age);
        }
        distribution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_uses_exclusive_upper_bounds() {
        let t = HealthThresholds::default();
        assert_eq!(t.classify(0.0), HealthLevel::Health);
        assert_eq!(t.classify(29.9), HealthLevel::Health);
        assert_eq!(t.classify(30.0), HealthLevel::Warning);
        assert_eq!(t.classify(59.0), HealthLevel::Warning);
        assert_eq!(t.classify(60.0), HealthLevel::Danger);
    }

    fn levels(levels: &[HealthLevel]) -> HealthDistribution {
        levels
            .iter()
            .map(|level| (*level, Money::from_major(10), 0.0))
            .collect()
    }

    #[test]
    fn overall_level_follows_dominant_share() {
        let empty = HealthDistribution::default();
        assert_eq!(empty.overall(), HealthLevel::Health);

        let mostly_fine = levels(&[
            HealthLevel::Health,
            HealthLevel::Health,
            HealthLevel::Health,
            HealthLevel::Danger,
        ]);
        assert_eq!(mostly_fine.overall(), HealthLevel::Health);

        let stretched = levels(&[HealthLevel::Health, HealthLevel::Warning]);
        assert_eq!(stretched.overall(), HealthLevel::Warning);

        let critical = levels(&[
            HealthLevel::Warning,
            HealthLevel::Warning,
            HealthLevel::Danger,
            HealthLevel::Danger,
        ]);
        assert_eq!(critical.overall(), HealthLevel::Danger);
    }

    #[test]
    fn bands_track_amount_and_mean_age() {
        let t = HealthThresholds::default();
        let distribution: HealthDistribution = [(70.0, 100), (90.0, 300), (12.0, 50)]
            .into_iter()
            .map(|(age, major)| (t.classify(age), Money::from_major(major), age))
            .collect();

        let danger = distribution.level(HealthLevel::Danger);
        assert_eq!(danger.count, 2);
        assert_eq!(danger.total_amount, Money::from_major(400));
        assert!((danger.average_money_age - 80.0).abs() < 1e-9);
        assert_eq!(distribution.health.count, 1);
        assert_eq!(distribution.warning, LevelStats::default());
        assert!((distribution.share(HealthLevel::Danger) - 2.0 / 3.0).abs() < 1e-9);
    }
}
