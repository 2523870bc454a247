//! Configuration for rebuild runs and the money age service.
//!
//! Two layers:
//!
//! - [`RebuildConfig`]: one run's scope and behaviour (date range, ledger,
//!   account, strategy, batch size, cleanup mode)
//! - [`MoneyAgeConfig`]: service-wide defaults, loadable from `MONEY_AGE_*`
//!   environment variables
//!
//! # Example
//!
//! ```no_run
//! use money_age_runtime::config::{MoneyAgeConfig, RebuildConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = MoneyAgeConfig::from_env()?;
//!
//! let run = service.rebuild_config().with_batch_size(500);
//! run.validate()?;
//! # Ok(())
//! # }
//! ```

use money_age_core::{
    AccountId, ConsumptionStrategy, DateRange, DateTime, HealthThresholds, LedgerId,
    TransactionFilter, Utc,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Default number of transactions processed between progress reports
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default capacity of the progress broadcast channel
pub const DEFAULT_PROGRESS_CAPACITY: usize = 64;

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable present but not valid unicode
    #[error("Environment variable {0} is not valid unicode")]
    EnvVar(String),

    /// Value could not be parsed
    #[error("Failed to parse {key}={value}: {reason}")]
    Parse {
        /// Variable or field name
        key: String,
        /// Raw value
        value: String,
        /// Parser message
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Scope and behaviour of one rebuild run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildConfig {
    /// Transactions dated inside this range are rebuilt
    pub date_range: DateRange,
    /// Restrict to one ledger
    pub ledger_id: Option<LedgerId>,
    /// Restrict to one account
    pub account_id: Option<AccountId>,
    /// Pool selection strategy
    pub strategy: ConsumptionStrategy,
    /// Transactions processed between progress reports and cancellation checks
    pub batch_size: usize,
    /// Replace existing pools and consumptions in scope.
    ///
    /// When false the run resumes from stored data: pools dated before the
    /// range are re-opened and the draws of expenses outside the scope are
    /// replayed before the expenses in scope are recomputed.
    pub clean_before_rebuild: bool,
    /// Wipe during the cleaning stage instead of inside the save unit.
    ///
    /// A run that fails after an eager wipe leaves the scope empty until
    /// the next successful rebuild.
    pub eager_cleanup: bool,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            date_range: DateRange::all(),
            ledger_id: None,
            account_id: None,
            strategy: ConsumptionStrategy::Fifo,
            batch_size: DEFAULT_BATCH_SIZE,
            clean_before_rebuild: true,
            eager_cleanup: false,
        }
    }
}

impl RebuildConfig {
    /// Incremental run: transactions dated `since` or later, existing data kept
    #[must_use]
    pub fn incremental_since(since: DateTime<Utc>) -> Self {
        Self {
            date_range: DateRange::since(since),
            clean_before_rebuild: false,
            ..Self::default()
        }
    }

    /// Set the date range
    #[must_use]
    pub const fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    /// Restrict to one ledger
    #[must_use]
    pub const fn with_ledger(mut self, ledger_id: LedgerId) -> Self {
        self.ledger_id = Some(ledger_id);
        self
    }

    /// Restrict to one account
    #[must_use]
    pub const fn with_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    /// Set the pool selection strategy
    #[must_use]
    pub const fn with_strategy(mut self, strategy: ConsumptionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the batch size
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable or disable replacing existing data in scope
    #[must_use]
    pub const fn with_clean_before_rebuild(mut self, clean: bool) -> Self {
        self.clean_before_rebuild = clean;
        self
    }

    /// Enable or disable the eager wipe
    #[must_use]
    pub const fn with_eager_cleanup(mut self, eager: bool) -> Self {
        self.eager_cleanup = eager;
        self
    }

    /// Filter selecting the transactions, pools and consumptions in scope
    #[must_use]
    pub const fn scope(&self) -> TransactionFilter {
        TransactionFilter {
            date_range: self.date_range,
            ledger_id: self.ledger_id,
            account_id: self.account_id,
        }
    }

    /// Whether the wipe happens in the cleaning stage
    #[must_use]
    pub const fn cleans_eagerly(&self) -> bool {
        self.clean_before_rebuild && self.eager_cleanup
    }

    /// Whether the run starts from the pools and draws already stored
    #[must_use]
    pub const fn resumes_from_store(&self) -> bool {
        !self.clean_before_rebuild
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the batch size is zero, the
    /// date range ends before it starts, or a run that resumes from stored
    /// data has an end date.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.date_range.start, self.date_range.end) {
            if end < start {
                return Err(ConfigError::Validation(format!(
                    "date range ends ({end}) before it starts ({start})"
                )));
            }
        }
        if self.resumes_from_store() && self.date_range.end.is_some() {
            return Err(ConfigError::Validation(
                "a rebuild that keeps existing data cannot have an end date".to_string(),
            ));
        }
        Ok(())
    }
}

/// Service-wide money age configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAgeConfig {
    /// Batch size used when a run does not set its own
    pub batch_size: usize,
    /// Capacity of the progress broadcast channel
    pub progress_capacity: usize,
    /// Health classification thresholds
    pub thresholds: HealthThresholds,
    /// Default pool selection strategy
    pub strategy: ConsumptionStrategy,
}

impl Default for MoneyAgeConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
            thresholds: HealthThresholds::default(),
            strategy: ConsumptionStrategy::Fifo,
        }
    }
}

impl MoneyAgeConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Reads `MONEY_AGE_BATCH_SIZE`, `MONEY_AGE_PROGRESS_CAPACITY`,
    /// `MONEY_AGE_HEALTH_DAYS`, `MONEY_AGE_WARNING_DAYS` and
    /// `MONEY_AGE_STRATEGY`.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be read or parsed, or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| match std::env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::EnvVar(key.to_string())),
        })
    }

    /// Load from an arbitrary key lookup (environment, file, test map).
    ///
    /// # Errors
    ///
    /// Same as [`MoneyAgeConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<Option<String>, ConfigError>,
    {
        let defaults = Self::default();
        let config = Self {
            batch_size: parse_var(&lookup, "MONEY_AGE_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            progress_capacity: parse_var(&lookup, "MONEY_AGE_PROGRESS_CAPACITY")?
                .unwrap_or(defaults.progress_capacity),
            thresholds: HealthThresholds::new(
                parse_var(&lookup, "MONEY_AGE_HEALTH_DAYS")?
                    .unwrap_or(defaults.thresholds.health_days),
                parse_var(&lookup, "MONEY_AGE_WARNING_DAYS")?
                    .unwrap_or(defaults.thresholds.warning_days),
            ),
            strategy: parse_var(&lookup, "MONEY_AGE_STRATEGY")?.unwrap_or(defaults.strategy),
        };
        config.validate()?;
        Ok(config)
    }

    /// A full-rebuild [`RebuildConfig`] using these defaults
    #[must_use]
    pub fn rebuild_config(&self) -> RebuildConfig {
        RebuildConfig::default()
            .with_batch_size(self.batch_size)
            .with_strategy(self.strategy)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on a zero batch size or channel
    /// capacity, or when the health threshold is not below the warning one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.progress_capacity == 0 {
            return Err(ConfigError::Validation(
                "progress_capacity must be greater than 0".to_string(),
            ));
        }
        if self.thresholds.health_days >= self.thresholds.warning_days {
            return Err(ConfigError::Validation(format!(
                "health_days ({}) must be less than warning_days ({})",
                self.thresholds.health_days, self.thresholds.warning_days
            )));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Result<Option<String>, ConfigError>,
{
    let Some(raw) = lookup(key)? else {
        return Ok(None);
    };
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|e: T::Err| ConfigError::Parse {
        key: key.to_string(),
        value: raw.clone(),
        reason: e.to_string(),
    })
}
