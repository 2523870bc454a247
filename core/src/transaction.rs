//! Source transactions and the filters used to select them.

use crate::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from a UUID
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use uuid_id;

uuid_id!(
    /// Unique identifier for a ledger transaction
    TransactionId
);
uuid_id!(
    /// Unique identifier for a ledger (book)
    LedgerId
);
uuid_id!(
    /// Unique identifier for an account within a ledger
    AccountId
);

/// Kind of a ledger transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Money entering the user's accounts; creates a resource pool
    Income,
    /// Money leaving the user's accounts; consumes resource pools
    Expense,
    /// Movement between the user's own accounts; ignored by money age
    Transfer,
}

/// A ledger transaction as delivered by the transaction source.
///
/// `sequence` is the insertion order within the source and breaks ties
/// between transactions recorded at the same instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier
    pub id: TransactionId,
    /// Income, expense or transfer
    pub kind: TransactionKind,
    /// Absolute amount of the transaction
    pub amount: Money,
    /// When the transaction happened (millisecond precision)
    pub date: DateTime<Utc>,
    /// Ledger the transaction belongs to
    pub ledger_id: LedgerId,
    /// Account the transaction was booked against
    pub account_id: AccountId,
    /// Insertion order within the source
    pub sequence: u64,
}

impl Transaction {
    /// Creates a transaction with a fresh identifier.
    #[must_use]
    pub fn new(
        kind: TransactionKind,
        amount: Money,
        date: DateTime<Utc>,
        ledger_id: LedgerId,
        account_id: AccountId,
        sequence: u64,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            kind,
            amount,
            date,
            ledger_id,
            account_id,
            sequence,
        }
    }

    /// Chronological ordering key: `(date, insertion order)`.
    #[must_use]
    pub const fn ordering_key(&self) -> (DateTime<Utc>, u64) {
        (self.date, self.sequence)
    }

    /// Whether this transaction is an income
    #[must_use]
    pub const fn is_income(&self) -> bool {
        matches!(self.kind, TransactionKind::Income)
    }

    /// Whether this transaction is an expense
    #[must_use]
    pub const fn is_expense(&self) -> bool {
        matches!(self.kind, TransactionKind::Expense)
    }
}

/// Inclusive date range. Either bound may be open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Earliest included instant
    pub start: Option<DateTime<Utc>>,
    /// Latest included instant
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Range covering all time
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Range starting at `start` with no upper bound
    #[must_use]
    pub const fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Range between two instants, both inclusive
    #[must_use]
    pub const fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Whether `at` falls inside the range
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| at >= start) && self.end.is_none_or(|end| at <= end)
    }

    /// Whether the range is unbounded on both sides
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Selection of transactions (and of the pools/consumptions derived from
/// them) by date range, ledger and account.
///
/// The same filter scopes loading, store wipes and queries, so a rebuild
/// replaces exactly the rows it recomputes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Date range on the transaction (or pool creation / consumption) date
    pub date_range: DateRange,
    /// Restrict to one ledger
    pub ledger_id: Option<LedgerId>,
    /// Restrict to one account
    pub account_id: Option<AccountId>,
}

impl TransactionFilter {
    /// Filter matching everything
    #[must_use]
    pub const fn all() -> Self {
        Self {
            date_range: DateRange::all(),
            ledger_id: None,
            account_id: None,
        }
    }

    /// Restrict to a single ledger
    #[must_use]
    pub const fn with_ledger(mut self, ledger_id: LedgerId) -> Self {
        self.ledger_id = Some(ledger_id);
        self
    }

    /// Restrict to a single account
    #[must_use]
    pub const fn with_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    /// Restrict to a date range
    #[must_use]
    pub const fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    /// Matches a record by its ledger, account and date
    #[must_use]
    pub fn matches_parts(
        &self,
        ledger_id: LedgerId,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> bool {
        self.ledger_id.is_none_or(|l| l == ledger_id)
            && self.account_id.is_none_or(|a| a == account_id)
            && self.date_range.contains(at)
    }

    /// Whether a transaction falls inside this filter
    #[must_use]
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.matches_parts(tx.ledger_id, tx.account_id, tx.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).single().unwrap_or_default()
    }

    #[test]
    fn date_range_bounds_are_inclusive() {
        let range = DateRange::between(day(5), day(10));
        assert!(range.contains(day(5)));
        assert!(range.contains(day(10)));
        assert!(!range.contains(day(4)));
        assert!(!range.contains(day(11)));
        assert!(DateRange::since(day(5)).contains(day(30)));
        assert!(DateRange::all().is_unbounded());
    }

    #[test]
    fn filter_checks_ledger_and_account() {
        let ledger = LedgerId::new();
        let account = AccountId::new();
        let tx = Transaction::new(
            TransactionKind::Expense,
            Money::from_major(10),
            day(3),
            ledger,
            account,
            0,
        );

        assert!(TransactionFilter::all().matches(&tx));
        assert!(TransactionFilter::all().with_ledger(ledger).matches(&tx));
        assert!(!TransactionFilter::all().with_ledger(LedgerId::new()).matches(&tx));
        assert!(!TransactionFilter::all().with_account(AccountId::new()).matches(&tx));
        assert!(
            !TransactionFilter::all()
                .with_date_range(DateRange::since(day(4)))
                .matches(&tx)
        );
    }
}
