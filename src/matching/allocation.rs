//! Link record management and per-bank-transaction allocation accounting

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::traits::*;
use crate::types::*;

/// Allocation state of a single bank transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTxAllocation {
    /// Sum of absolute allocated amounts across all links
    pub allocated: BigDecimal,
    /// Unallocated remainder of the bank transaction's amount
    pub available: BigDecimal,
    /// The links drawing from this bank transaction
    pub links: Vec<Link>,
}

/// Link summary for one bank transaction in a batched query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankTxLinkSummary {
    /// Whether any link draws from this bank transaction
    pub is_linked: bool,
    /// Distinct ledger transactions allocated from it
    pub linked_ledger_tx_ids: Vec<String>,
    /// IDs of the individual links
    pub link_ids: Vec<String>,
    /// Sum of absolute allocated amounts
    pub allocated: BigDecimal,
}

/// Manager for the link records joining ledger and bank transactions
pub struct AllocationLedger<S: LinkStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: LinkStore> AllocationLedger<S> {
    /// Create a new allocation ledger
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a new allocation ledger with a custom clock
    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create and persist a link allocating part of a bank transaction to a
    /// ledger transaction
    ///
    /// Only record-level validation happens here: the sign check in
    /// [`Link::new`] and the store's atomic capacity guard. Business
    /// validation of a whole allocation batch belongs to the validator.
    pub async fn create_link(
        &mut self,
        ledger_tx: &LedgerTransaction,
        bank_tx: &BankTransaction,
        allocated_amount: BigDecimal,
        actor_id: &str,
    ) -> ReconResult<Link> {
        let link = Link::new(
            ledger_tx.id.clone(),
            ledger_tx.direction.clone(),
            bank_tx.external_id.clone(),
            allocated_amount,
            actor_id.to_string(),
            self.clock.now(),
        )?;

        self.store.insert_link(&link, &bank_tx.amount).await?;

        info!(
            link_id = %link.id,
            ledger_tx_id = %link.ledger_tx_id,
            bank_tx_external_id = %link.bank_tx_external_id,
            allocated = %link.allocated_amount,
            "allocation link created"
        );

        Ok(link)
    }

    /// Delete a link by ID, returning whether one existed
    pub async fn delete_link(&mut self, link_id: &str) -> ReconResult<bool> {
        let deleted = self.store.delete_link(link_id).await?;
        if deleted {
            info!(link_id, "allocation link deleted");
        }
        Ok(deleted)
    }

    /// Get all links for a ledger transaction, most recent bank settlement first
    pub async fn links_for_ledger_tx(&self, ledger_tx_id: &str) -> ReconResult<Vec<Link>> {
        self.store.links_for_ledger_tx(ledger_tx_id).await
    }

    /// Distinct IDs of ledger transactions that have at least one link
    pub async fn linked_ledger_tx_ids(&self) -> ReconResult<Vec<String>> {
        self.store.linked_ledger_tx_ids().await
    }

    /// Sum of absolute amounts already allocated from a bank transaction
    pub async fn allocated_total(&self, external_id: &str) -> ReconResult<BigDecimal> {
        let links = self.store.links_for_bank_tx(external_id).await?;
        Ok(links.iter().map(|l| l.allocated_amount.abs()).sum())
    }

    /// Full allocation state of a bank transaction
    pub async fn allocation_for_bank_tx(
        &self,
        bank_tx: &BankTransaction,
    ) -> ReconResult<BankTxAllocation> {
        let links = self.store.links_for_bank_tx(&bank_tx.external_id).await?;
        let allocated: BigDecimal = links.iter().map(|l| l.allocated_amount.abs()).sum();
        let available = &bank_tx.amount - &allocated;

        Ok(BankTxAllocation {
            allocated,
            available,
            links,
        })
    }

    /// Link summaries for many bank transactions in one storage query
    ///
    /// Every requested ID gets an entry; IDs without links come back with an
    /// empty default summary. This feeds candidate search, which needs link
    /// status for a whole page of bank transactions at once.
    pub async fn links_for_many_bank_tx(
        &self,
        external_ids: &[String],
    ) -> ReconResult<HashMap<String, BankTxLinkSummary>> {
        let links = self.store.links_for_bank_txs(external_ids).await?;

        let mut summaries: HashMap<String, BankTxLinkSummary> = external_ids
            .iter()
            .map(|id| (id.clone(), BankTxLinkSummary::default()))
            .collect();

        for link in links {
            if let Some(summary) = summaries.get_mut(&link.bank_tx_external_id) {
                summary.is_linked = true;
                if !summary.linked_ledger_tx_ids.contains(&link.ledger_tx_id) {
                    summary.linked_ledger_tx_ids.push(link.ledger_tx_id.clone());
                }
                summary.link_ids.push(link.id.clone());
                summary.allocated = &summary.allocated + link.allocated_amount.abs();
            }
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MemoryStore;
    use chrono::NaiveDate;

    fn dt(day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn expense(id: &str, amount: i64) -> LedgerTransaction {
        LedgerTransaction::new(
            id.to_string(),
            Direction::Expense,
            BigDecimal::from(amount),
            "approved".to_string(),
        )
    }

    fn debit_tx(id: &str, amount: i64) -> BankTransaction {
        BankTransaction::new(
            id.to_string(),
            BigDecimal::from(amount),
            BankTxSide::Debit,
            dt(1),
            BankTxStatus::Completed,
            format!("payment {}", id),
        )
    }

    #[tokio::test]
    async fn storage_guard_rejects_over_allocation() {
        let store = MemoryStore::new();
        let mut ledger = AllocationLedger::new(store);

        let tx_a = expense("lt-1", 80);
        let tx_b = expense("lt-2", 40);
        let bank = debit_tx("bt-1", 100);

        ledger
            .create_link(&tx_a, &bank, BigDecimal::from(-80), "op-1")
            .await
            .unwrap();

        // 80 of 100 taken, another 40 must not fit
        let result = ledger
            .create_link(&tx_b, &bank, BigDecimal::from(-40), "op-1")
            .await;
        assert!(matches!(result, Err(ReconError::Validation(_))));

        let allocation = ledger.allocation_for_bank_tx(&bank).await.unwrap();
        assert_eq!(allocation.allocated, BigDecimal::from(80));
        assert_eq!(allocation.available, BigDecimal::from(20));
        assert_eq!(allocation.links.len(), 1);
    }

    #[tokio::test]
    async fn batched_summaries_cover_every_requested_id() {
        let store = MemoryStore::new();
        let mut ledger = AllocationLedger::new(store);

        let tx = expense("lt-1", 50);
        let bank = debit_tx("bt-1", 100);
        let link = ledger
            .create_link(&tx, &bank, BigDecimal::from(-50), "op-1")
            .await
            .unwrap();

        let ids = vec!["bt-1".to_string(), "bt-2".to_string()];
        let summaries = ledger.links_for_many_bank_tx(&ids).await.unwrap();

        let linked = &summaries["bt-1"];
        assert!(linked.is_linked);
        assert_eq!(linked.linked_ledger_tx_ids, vec!["lt-1".to_string()]);
        assert_eq!(linked.link_ids, vec![link.id.clone()]);
        assert_eq!(linked.allocated, BigDecimal::from(50));

        let unlinked = &summaries["bt-2"];
        assert!(!unlinked.is_linked);
        assert!(unlinked.link_ids.is_empty());
    }
}
