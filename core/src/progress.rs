//! Rebuild stages and progress records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of a rebuild run.
///
/// Stages only move forward in declaration order (`Cleaning` may be
/// skipped); `Failed` is reachable from any non-terminal stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStage {
    /// Validating configuration and acquiring the rebuild slot
    Preparing,
    /// Eagerly wiping stored pools and consumptions
    Cleaning,
    /// Loading transactions from the source
    Loading,
    /// Opening pools for incomes
    ProcessingIncomes,
    /// Spending expenses against pools
    ProcessingExpenses,
    /// Computing aggregate statistics
    Calculating,
    /// Persisting pools, consumptions and per-transaction ages
    Saving,
    /// Run finished successfully
    Completed,
    /// Run aborted by an error or cancellation
    Failed,
}

impl RebuildStage {
    /// Human readable description of the stage
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Preparing => "Preparing rebuild",
            Self::Cleaning => "Removing existing money age data",
            Self::Loading => "Loading transactions",
            Self::ProcessingIncomes => "Creating resource pools from incomes",
            Self::ProcessingExpenses => "Consuming resource pools for expenses",
            Self::Calculating => "Calculating money age statistics",
            Self::Saving => "Saving money age data",
            Self::Completed => "Rebuild completed",
            Self::Failed => "Rebuild failed",
        }
    }

    /// Whether the run is over
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a run in this stage may move to `next`.
    ///
    /// # Example
    ///
    /// ```
    /// use money_age_core::RebuildStage;
    ///
    /// assert!(RebuildStage::Preparing.can_advance_to(RebuildStage::Loading));
    /// assert!(RebuildStage::Saving.can_advance_to(RebuildStage::Failed));
    /// assert!(!RebuildStage::Saving.can_advance_to(RebuildStage::Loading));
    /// assert!(!RebuildStage::Completed.can_advance_to(RebuildStage::Failed));
    /// ```
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next > self
    }
}

impl fmt::Display for RebuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Progress of a running rebuild, emitted at stage boundaries and at least
/// once per batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildProgress {
    /// Items processed so far (incomes + expenses)
    pub current: usize,
    /// Items to process in total
    pub total: usize,
    /// Current stage
    pub stage: RebuildStage,
    /// Description of the current stage
    pub stage_description: String,
    /// Incomes turned into pools so far
    pub processed_incomes: usize,
    /// Expenses processed so far
    pub processed_expenses: usize,
}

impl RebuildProgress {
    /// Builds a progress record for `stage`
    #[must_use]
    pub fn new(
        stage: RebuildStage,
        total: usize,
        processed_incomes: usize,
        processed_expenses: usize,
    ) -> Self {
        Self {
            current: processed_incomes + processed_expenses,
            total,
            stage,
            stage_description: stage.description().to_string(),
            processed_incomes,
            processed_expenses,
        }
    }

    /// Completed fraction in `0.0..=1.0` (1.0 when there is nothing to do)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.current as f64 / self.total as f64).min(1.0)
        }
    }
}
