//! Orchestrator coordinating cache, allocation ledger, and validator

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ReconcilerConfig;
use crate::matching::{
    auto_allocate, AllocationCandidate, AllocationLedger, BankFeedCache, BatchValidation,
    Discrepancy, ProposedAllocation, ReconciliationValidator, SyncOutcome, ValidationStatus,
};
use crate::traits::*;
use crate::types::*;

/// One bank transaction offered for linking, enriched with allocation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// The cached bank transaction
    pub bank_tx: BankTransaction,
    /// Its signed amount (debits negative, credits positive)
    pub signed_amount: BigDecimal,
    /// Whether the sign agrees with the ledger transaction's direction
    pub direction_matches: bool,
    /// Sum of absolute amounts already allocated from it
    pub allocated: BigDecimal,
    /// Unallocated remainder of its amount
    pub available: BigDecimal,
    /// Whether any link already draws from it
    pub is_linked: bool,
    /// Ledger transactions it is already allocated to
    pub linked_ledger_tx_ids: Vec<String>,
}

/// Result of a candidate search for one ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSearch {
    /// The ledger transaction being reconciled
    pub ledger_tx: LedgerTransaction,
    /// Signed amount it expects
    pub expected_amount: BigDecimal,
    /// Expected amount minus what existing links already allocate
    pub remaining_needed: BigDecimal,
    /// How the cache satisfied the implicit refresh
    pub sync: SyncOutcome,
    /// Candidates ordered by settlement, most recent first
    pub candidates: Vec<MatchCandidate>,
}

/// Caller's selection of one bank transaction to draw from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSelection {
    /// External ID of the cached bank transaction
    pub bank_tx_external_id: String,
    /// Explicit signed amount, or None to let the engine auto-allocate
    pub amount: Option<BigDecimal>,
}

/// Outcome of a commit attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// Full validation payload, including the complete error list
    pub validation: BatchValidation,
    /// Links persisted by this commit
    pub created: Vec<Link>,
    /// Per-item persistence failures for links that did not make it
    pub errors: Vec<String>,
    /// Reconciliation state after the commit (or the unchanged state when
    /// validation failed)
    pub state: ReconciliationState,
}

/// Facade coordinating the reconciliation workflow
///
/// Owns a bank feed cache, an allocation ledger, and a validator over
/// cloned storage handles, and exposes the operations a reconciliation UI
/// or job runner needs.
pub struct MatchingOrchestrator<L, S, F, C>
where
    L: LedgerReader,
    S: LinkStore,
    F: BankFeedStore,
    C: BankFeedClient,
{
    ledger: L,
    cache: BankFeedCache<F, C>,
    allocations: AllocationLedger<S>,
    validator: ReconciliationValidator<L, S>,
    config: ReconcilerConfig,
}

impl<L, S, F, C> MatchingOrchestrator<L, S, F, C>
where
    L: LedgerReader + Clone,
    S: LinkStore + Clone,
    F: BankFeedStore,
    C: BankFeedClient,
{
    /// Create an orchestrator with the default configuration and system clock
    pub fn new(ledger: L, link_store: S, feed_store: F, feed_client: C) -> Self {
        Self::with_config(
            ledger,
            link_store,
            feed_store,
            feed_client,
            ReconcilerConfig::default(),
            Arc::new(SystemClock),
        )
    }

    /// Create an orchestrator with custom configuration and clock
    pub fn with_config(
        ledger: L,
        link_store: S,
        feed_store: F,
        feed_client: C,
        config: ReconcilerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: BankFeedCache::with_config(feed_store, feed_client, config.clone(), clock.clone()),
            allocations: AllocationLedger::with_clock(link_store.clone(), clock),
            validator: ReconciliationValidator::with_tolerance(
                ledger.clone(),
                link_store,
                config.match_tolerance.clone(),
            ),
            ledger,
            config,
        }
    }

    /// Search the cached bank feed for linking candidates
    ///
    /// Triggers a throttled cache refresh, then enriches every cached
    /// completed bank transaction with its signed amount, direction match,
    /// allocation availability, and link status. Direction-mismatched
    /// candidates are excluded unless the configuration says otherwise;
    /// the validator re-checks direction on commit regardless.
    pub async fn search_candidates(&mut self, ledger_tx_id: &str) -> ReconResult<CandidateSearch> {
        let ledger_tx = self.get_ledger_tx_required(ledger_tx_id).await?;
        let sync = self.cache.auto_sync().await?;

        let cached = self.cache.get_cached(&BankTxFilter::completed()).await?;
        let ids: Vec<String> = cached.iter().map(|tx| tx.external_id.clone()).collect();
        let summaries = self.allocations.links_for_many_bank_tx(&ids).await?;

        let existing = self.allocations.links_for_ledger_tx(ledger_tx_id).await?;
        let existing_total: BigDecimal = existing.iter().map(|l| &l.allocated_amount).sum();
        let expected = ledger_tx.expected_signed_amount();
        let remaining_needed = &expected - &existing_total;

        let mut candidates = Vec::new();
        for bank_tx in cached {
            let signed_amount = bank_tx.signed_amount();
            let direction_matches = ledger_tx.direction.agrees_with(&signed_amount);

            if !direction_matches && !self.config.include_direction_mismatched {
                continue;
            }

            let summary = summaries
                .get(&bank_tx.external_id)
                .cloned()
                .unwrap_or_default();
            let available = &bank_tx.amount - &summary.allocated;

            candidates.push(MatchCandidate {
                signed_amount,
                direction_matches,
                allocated: summary.allocated,
                available,
                is_linked: summary.is_linked,
                linked_ledger_tx_ids: summary.linked_ledger_tx_ids,
                bank_tx,
            });
        }

        debug!(
            ledger_tx_id,
            candidates = candidates.len(),
            "candidate search complete"
        );

        Ok(CandidateSearch {
            ledger_tx,
            expected_amount: expected,
            remaining_needed,
            sync,
            candidates,
        })
    }

    /// Validate and persist a set of link selections
    ///
    /// Selections without an explicit amount are filled by the greedy
    /// auto-allocator from whatever the explicit amounts leave uncovered.
    /// The whole batch is validated first; an invalid batch returns the
    /// complete error payload with zero side effects. A valid batch is
    /// persisted link by link, and a per-item storage failure is collected
    /// without rolling back the links that made it.
    pub async fn commit_links(
        &mut self,
        ledger_tx_id: &str,
        selections: &[LinkSelection],
        actor_id: &str,
    ) -> ReconResult<CommitOutcome> {
        let ledger_tx = self.get_ledger_tx_required(ledger_tx_id).await?;

        // Resolve selections against the cache; unknown IDs become
        // validation errors rather than aborting the whole call
        let mut resolution_errors = Vec::new();
        let mut resolved: Vec<(BankTransaction, Option<BigDecimal>)> = Vec::new();
        for selection in selections {
            match self.cache.get_bank_tx(&selection.bank_tx_external_id).await? {
                Some(bank_tx) => resolved.push((bank_tx, selection.amount.clone())),
                None => resolution_errors.push(format!(
                    "{}: bank transaction is not in the cache",
                    selection.bank_tx_external_id
                )),
            }
        }

        let existing = self.allocations.links_for_ledger_tx(ledger_tx_id).await?;
        let existing_total: BigDecimal = existing.iter().map(|l| &l.allocated_amount).sum();
        let expected = ledger_tx.expected_signed_amount();

        let explicit_total: BigDecimal = resolved
            .iter()
            .filter_map(|(_, amount)| amount.as_ref())
            .sum();
        let remaining = &expected - &existing_total - &explicit_total;
        // A remainder whose sign disagrees with the direction means the
        // need is already met (or overshot); the auto-allocator gets zero
        let remaining_for_auto = if ledger_tx.direction.agrees_with(&remaining) {
            remaining
        } else {
            BigDecimal::from(0)
        };

        let ids: Vec<String> = resolved.iter().map(|(tx, _)| tx.external_id.clone()).collect();
        let summaries = self.allocations.links_for_many_bank_tx(&ids).await?;

        let mut auto_candidates = Vec::new();
        for (bank_tx, amount) in &resolved {
            if amount.is_none() {
                let allocated = summaries
                    .get(&bank_tx.external_id)
                    .map(|s| s.allocated.clone())
                    .unwrap_or_default();
                auto_candidates.push(AllocationCandidate {
                    available: &bank_tx.amount - &allocated,
                    bank_tx: bank_tx.clone(),
                });
            }
        }

        let auto_proposals = auto_allocate(
            ledger_tx.direction.clone(),
            &remaining_for_auto,
            &auto_candidates,
        );

        // Merge explicit and auto-allocated amounts back into selection order
        let mut auto_iter = auto_proposals.into_iter();
        let mut proposed = Vec::with_capacity(resolved.len());
        for (bank_tx, amount) in resolved {
            match amount {
                Some(amount) => proposed.push(ProposedAllocation { bank_tx, amount }),
                None => {
                    if let Some(proposal) = auto_iter.next() {
                        proposed.push(proposal);
                    }
                }
            }
        }

        let mut validation = self
            .validator
            .validate_allocation_batch(&ledger_tx, &proposed)
            .await?;
        if !resolution_errors.is_empty() {
            resolution_errors.extend(validation.errors);
            validation.errors = resolution_errors;
            validation.is_valid = false;
        }

        if !validation.is_valid {
            debug!(
                ledger_tx_id,
                errors = validation.errors.len(),
                "allocation batch rejected"
            );
            let status = self.validator.validation_status(&ledger_tx).await?;
            return Ok(CommitOutcome {
                validation,
                created: Vec::new(),
                errors: Vec::new(),
                state: status.state,
            });
        }

        let mut created = Vec::new();
        let mut errors = Vec::new();
        for proposal in &proposed {
            match self
                .allocations
                .create_link(&ledger_tx, &proposal.bank_tx, proposal.amount.clone(), actor_id)
                .await
            {
                Ok(link) => created.push(link),
                Err(err) => {
                    warn!(
                        bank_tx_external_id = %proposal.bank_tx.external_id,
                        error = %err,
                        "link persistence failed"
                    );
                    errors.push(format!("{}: {}", proposal.bank_tx.external_id, err));
                }
            }
        }

        let status = self.validator.validation_status(&ledger_tx).await?;
        info!(
            ledger_tx_id,
            created = created.len(),
            failed = errors.len(),
            state = ?status.state,
            "allocation commit finished"
        );

        Ok(CommitOutcome {
            validation,
            created,
            errors,
            state: status.state,
        })
    }

    /// Delete a link without re-validating the remaining allocation
    ///
    /// Unlinking is never blocked; consistency is re-checked lazily by
    /// `find_discrepancies` or the next commit.
    pub async fn remove_link(&mut self, link_id: &str) -> ReconResult<()> {
        if self.allocations.delete_link(link_id).await? {
            Ok(())
        } else {
            Err(ReconError::LinkNotFound(link_id.to_string()))
        }
    }

    /// Reconciliation state and totals of one ledger transaction
    pub async fn get_validation_status(&self, ledger_tx_id: &str) -> ReconResult<ValidationStatus> {
        let ledger_tx = self.get_ledger_tx_required(ledger_tx_id).await?;
        self.validator.validation_status(&ledger_tx).await
    }

    /// Scan every linked ledger transaction for allocation mismatches
    pub async fn find_discrepancies(&self) -> ReconResult<Vec<Discrepancy>> {
        self.validator.find_discrepancies().await
    }

    /// Force a bank feed refresh regardless of the throttle
    pub async fn sync_bank_feed(&mut self) -> ReconResult<usize> {
        self.cache.sync().await
    }

    /// Check that the upstream bank feed is reachable
    pub async fn test_feed_connection(&self) -> ReconResult<()> {
        self.cache.test_connection().await
    }

    async fn get_ledger_tx_required(&self, ledger_tx_id: &str) -> ReconResult<LedgerTransaction> {
        self.ledger
            .get_ledger_transaction(ledger_tx_id)
            .await?
            .ok_or_else(|| ReconError::LedgerTxNotFound(ledger_tx_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{MemoryStore, ScriptedBankFeed};
    use chrono::NaiveDate;

    fn dt(day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn bank_tx(id: &str, amount: i64, side: BankTxSide) -> BankTransaction {
        BankTransaction::new(
            id.to_string(),
            BigDecimal::from(amount),
            side,
            dt(1),
            BankTxStatus::Completed,
            format!("bank row {}", id),
        )
    }

    #[tokio::test]
    async fn search_hides_direction_mismatched_candidates_by_default() {
        let store = MemoryStore::new();
        store.put_ledger_transaction(LedgerTransaction::new(
            "lt-1".to_string(),
            Direction::Expense,
            BigDecimal::from(150),
            "approved".to_string(),
        ));

        let mut feed = ScriptedBankFeed::new();
        feed.push_batch(vec![
            bank_tx("bt-debit", 150, BankTxSide::Debit),
            bank_tx("bt-credit", 99, BankTxSide::Credit),
        ]);

        let mut orchestrator =
            MatchingOrchestrator::new(store.clone(), store.clone(), store.clone(), feed);

        let search = orchestrator.search_candidates("lt-1").await.unwrap();
        assert_eq!(search.candidates.len(), 1);
        assert_eq!(search.candidates[0].bank_tx.external_id, "bt-debit");
        assert!(search.candidates[0].direction_matches);

        // The same store with the flag on shows the mismatched row too
        let config = ReconcilerConfig {
            include_direction_mismatched: true,
            ..ReconcilerConfig::default()
        };
        let mut permissive = MatchingOrchestrator::with_config(
            store.clone(),
            store.clone(),
            store,
            ScriptedBankFeed::new(),
            config,
            Arc::new(SystemClock),
        );

        let search = permissive.search_candidates("lt-1").await.unwrap();
        assert_eq!(search.candidates.len(), 2);
        let mismatched = search
            .candidates
            .iter()
            .find(|c| c.bank_tx.external_id == "bt-credit")
            .unwrap();
        assert!(!mismatched.direction_matches);
    }

    #[tokio::test]
    async fn search_for_unknown_ledger_tx_is_not_found() {
        let store = MemoryStore::new();
        let mut orchestrator = MatchingOrchestrator::new(
            store.clone(),
            store.clone(),
            store,
            ScriptedBankFeed::new(),
        );

        let result = orchestrator.search_candidates("missing").await;
        assert!(matches!(result, Err(ReconError::LedgerTxNotFound(_))));
    }
}
