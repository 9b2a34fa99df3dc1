//! Traits for storage abstraction and external integrations

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

use crate::types::*;

/// Read-only access to the accounting subsystem's transactions
///
/// Reconciliation never writes ledger transactions; it only needs to look
/// them up by id. Any backend (PostgreSQL, a service client, in-memory)
/// can sit behind this trait.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Get a ledger transaction by ID
    async fn get_ledger_transaction(&self, id: &str) -> ReconResult<Option<LedgerTransaction>>;
}

/// Storage abstraction for link records
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Persist a new link
    ///
    /// `bank_tx_amount` is the unsigned amount of the referenced bank
    /// transaction. Implementations must reject the insert, atomically with
    /// the capacity read, when the new link would push the sum of absolute
    /// allocated amounts over it. SQL backends do this inside a serializable
    /// transaction; the rejection surfaces as a validation error.
    async fn insert_link(&mut self, link: &Link, bank_tx_amount: &BigDecimal) -> ReconResult<()>;

    /// Delete a link by ID, returning whether one existed
    async fn delete_link(&mut self, link_id: &str) -> ReconResult<bool>;

    /// Get all links for a ledger transaction, most recent bank settlement first
    async fn links_for_ledger_tx(&self, ledger_tx_id: &str) -> ReconResult<Vec<Link>>;

    /// Get all links drawing from a bank transaction
    async fn links_for_bank_tx(&self, external_id: &str) -> ReconResult<Vec<Link>>;

    /// Get all links drawing from any of the given bank transactions in one query
    async fn links_for_bank_txs(&self, external_ids: &[String]) -> ReconResult<Vec<Link>>;

    /// Distinct IDs of ledger transactions that have at least one link
    async fn linked_ledger_tx_ids(&self) -> ReconResult<Vec<String>>;
}

/// Storage abstraction for the local bank feed cache
///
/// Holds the cached copy of the upstream feed plus the watermark of the
/// last successful sync.
#[async_trait]
pub trait BankFeedStore: Send + Sync {
    /// Insert or replace a cached bank transaction by its external ID
    async fn upsert_bank_tx(&mut self, tx: &BankTransaction) -> ReconResult<()>;

    /// Get a cached bank transaction by its external ID
    async fn get_bank_tx(&self, external_id: &str) -> ReconResult<Option<BankTransaction>>;

    /// List cached bank transactions matching a filter, settled most recent first
    async fn cached_bank_txs(&self, filter: &BankTxFilter) -> ReconResult<Vec<BankTransaction>>;

    /// When the last successful sync completed, if any
    async fn last_sync(&self) -> ReconResult<Option<NaiveDateTime>>;

    /// Record the completion time of a successful sync
    async fn set_last_sync(&mut self, at: NaiveDateTime) -> ReconResult<()>;
}

/// Connection to the external bank feed
///
/// Implementations wrap whatever API the bank exposes. They are expected to
/// enforce their own request timeouts; the engine retries a bounded number
/// of times but never waits on a hung call.
#[async_trait]
pub trait BankFeedClient: Send + Sync {
    /// Fetch transactions from the upstream feed
    ///
    /// `since` is an incremental hint: implementations may return only
    /// transactions at or after it, or any superset. The cache deduplicates
    /// by external ID either way.
    async fn fetch_transactions(
        &mut self,
        since: Option<NaiveDateTime>,
    ) -> ReconResult<Vec<BankTransaction>>;

    /// Check that the upstream feed is reachable
    async fn test_connection(&self) -> ReconResult<()>;
}
