//! Core types and data structures for the reconciliation engine

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Direction of a ledger transaction from the business's point of view
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Money coming into the business (invoices, interest, refunds received)
    Income,
    /// Money leaving the business (bills, fees, refunds issued)
    Expense,
}

impl Direction {
    /// Apply this direction's sign to an amount
    /// Income keeps the magnitude positive, Expense negates it
    pub fn signed(&self, amount: &BigDecimal) -> BigDecimal {
        match self {
            Direction::Income => amount.abs(),
            Direction::Expense => -amount.abs(),
        }
    }

    /// Check whether a signed amount agrees with this direction
    /// Zero agrees with neither direction
    pub fn agrees_with(&self, signed: &BigDecimal) -> bool {
        match self {
            Direction::Income => *signed > BigDecimal::from(0),
            Direction::Expense => *signed < BigDecimal::from(0),
        }
    }
}

/// Side of a bank transaction as reported by the bank
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BankTxSide {
    /// Money left the bank account
    Debit,
    /// Money arrived in the bank account
    Credit,
}

impl BankTxSide {
    /// Convert an unsigned bank amount into its signed form
    /// Debits become negative, credits become positive
    pub fn signed(&self, amount: &BigDecimal) -> BigDecimal {
        match self {
            BankTxSide::Debit => -amount.abs(),
            BankTxSide::Credit => amount.abs(),
        }
    }
}

/// Settlement status of a bank transaction
///
/// The upstream feed owns this vocabulary; statuses we do not recognize are
/// preserved verbatim in `Other` rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BankTxStatus {
    /// Settled and final
    Completed,
    /// Reported but not yet settled
    Pending,
    /// Rejected by the bank
    Declined,
    /// Any status this crate does not model
    Other(String),
}

/// Read-only view of an internal ledger transaction
///
/// The accounting subsystem owns these records; reconciliation only reads
/// them through [`crate::traits::LedgerReader`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Unique identifier owned by the accounting subsystem
    pub id: String,
    /// Whether this transaction represents income or an expense
    pub direction: Direction,
    /// Unsigned monetary amount
    pub amount: BigDecimal,
    /// Lifecycle status string owned by the accounting subsystem
    pub status: String,
}

impl LedgerTransaction {
    /// Create a new ledger transaction view
    pub fn new(id: String, direction: Direction, amount: BigDecimal, status: String) -> Self {
        Self {
            id,
            direction,
            amount,
            status,
        }
    }

    /// The signed amount this transaction expects to see at the bank
    pub fn expected_signed_amount(&self) -> BigDecimal {
        self.direction.signed(&self.amount)
    }
}

/// Locally cached copy of a transaction from the external bank feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    /// Natural key assigned by the bank
    pub external_id: String,
    /// Unsigned monetary amount
    pub amount: BigDecimal,
    /// Debit or credit as reported by the bank
    pub side: BankTxSide,
    /// When the transaction settled
    pub settled_at: NaiveDateTime,
    /// Settlement status
    pub status: BankTxStatus,
    /// Counterparty or descriptor line from the bank
    pub label: String,
    /// Optional bank reference number
    pub reference: Option<String>,
    /// Optional free-text note
    pub note: Option<String>,
    /// Optional link to the bank's own record
    pub url: Option<String>,
}

impl BankTransaction {
    /// Create a new bank transaction with the optional metadata left empty
    pub fn new(
        external_id: String,
        amount: BigDecimal,
        side: BankTxSide,
        settled_at: NaiveDateTime,
        status: BankTxStatus,
        label: String,
    ) -> Self {
        Self {
            external_id,
            amount,
            side,
            settled_at,
            status,
            label,
            reference: None,
            note: None,
            url: None,
        }
    }

    /// The signed amount of this transaction (debits negative, credits positive)
    pub fn signed_amount(&self) -> BigDecimal {
        self.side.signed(&self.amount)
    }
}

/// Allocation of part of a bank transaction to a ledger transaction
///
/// Links are the join records of reconciliation. A ledger transaction may be
/// covered by several links and a bank transaction may be split across
/// several ledger transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Unique identifier for the link
    pub id: String,
    /// Ledger transaction this allocation belongs to
    pub ledger_tx_id: String,
    /// Bank transaction the amount is drawn from
    pub bank_tx_external_id: String,
    /// Signed amount allocated (negative for expenses, positive for income)
    pub allocated_amount: BigDecimal,
    /// When the link was created
    pub created_at: NaiveDateTime,
    /// Operator or process that created the link
    pub created_by: String,
}

impl Link {
    /// Create a new link, validating the allocation sign against the owning
    /// ledger transaction's direction
    ///
    /// A zero amount or a sign that disagrees with the direction is rejected
    /// here so an ill-formed record can never be constructed.
    pub fn new(
        ledger_tx_id: String,
        direction: Direction,
        bank_tx_external_id: String,
        allocated_amount: BigDecimal,
        created_by: String,
        created_at: NaiveDateTime,
    ) -> ReconResult<Self> {
        if allocated_amount == BigDecimal::from(0) {
            return Err(ReconError::Validation(
                "Allocation amount cannot be zero".to_string(),
            ));
        }

        if !direction.agrees_with(&allocated_amount) {
            let expected = match direction {
                Direction::Income => "positive",
                Direction::Expense => "negative",
            };
            return Err(ReconError::Validation(format!(
                "{:?} allocation must be {}, got {}",
                direction, expected, allocated_amount
            )));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            ledger_tx_id,
            bank_tx_external_id,
            allocated_amount,
            created_at,
            created_by,
        })
    }
}

/// Filter for querying cached bank transactions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankTxFilter {
    /// Only return transactions with this status
    pub status: Option<BankTxStatus>,
    /// Only return transactions settled at or after this instant
    pub settled_after: Option<NaiveDateTime>,
    /// Only return transactions settled at or before this instant
    pub settled_before: Option<NaiveDateTime>,
}

impl BankTxFilter {
    /// Filter matching only completed transactions
    pub fn completed() -> Self {
        Self {
            status: Some(BankTxStatus::Completed),
            ..Self::default()
        }
    }

    /// Check whether a cached transaction passes this filter
    pub fn matches(&self, tx: &BankTransaction) -> bool {
        if let Some(status) = &self.status {
            if &tx.status != status {
                return false;
            }
        }
        if let Some(after) = &self.settled_after {
            if tx.settled_at < *after {
                return false;
            }
        }
        if let Some(before) = &self.settled_before {
            if tx.settled_at > *before {
                return false;
            }
        }
        true
    }
}

/// Derived reconciliation state of a ledger transaction
///
/// Never stored; always recomputed from the links on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconciliationState {
    /// No links exist
    Unlinked,
    /// Links exist but the allocated total does not match the expected amount
    PartiallyAllocated,
    /// Allocated total matches the expected signed amount within tolerance
    FullyReconciled,
}

/// Errors that can occur in the reconciliation system
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Ledger transaction not found: {0}")]
    LedgerTxNotFound(String),
    #[error("Bank transaction not found: {0}")]
    BankTxNotFound(String),
    #[error("Link not found: {0}")]
    LinkNotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("External service error: {0}")]
    ExternalService(String),
}

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;
