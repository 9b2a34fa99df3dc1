//! Direction, capacity, and batch validation of allocations

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::matching::AllocationLedger;
use crate::traits::*;
use crate::types::*;

/// Convert an unsigned bank amount into its signed form
/// Debits become negative, credits become positive
pub fn to_signed(amount: &BigDecimal, side: BankTxSide) -> BigDecimal {
    side.signed(amount)
}

/// Result of checking a signed amount against a ledger direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionCheck {
    /// Whether the sign agrees with the direction
    pub is_valid: bool,
    /// Explanation when it does not
    pub message: Option<String>,
}

/// Check that a signed bank amount agrees with a ledger transaction's direction
///
/// Expenses require a negative signed amount, income requires positive. Zero
/// satisfies neither. Returns a value rather than an error so batch
/// validation can collect every failure.
pub fn validate_direction(direction: Direction, signed_amount: &BigDecimal) -> DirectionCheck {
    if direction.agrees_with(signed_amount) {
        return DirectionCheck {
            is_valid: true,
            message: None,
        };
    }

    let expected = match direction {
        Direction::Income => "a positive (credit) amount",
        Direction::Expense => "a negative (debit) amount",
    };

    DirectionCheck {
        is_valid: false,
        message: Some(format!(
            "{:?} transactions must be matched against {}, got {}",
            direction, expected, signed_amount
        )),
    }
}

/// A bank transaction offered to the automatic allocator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationCandidate {
    /// The cached bank transaction
    pub bank_tx: BankTransaction,
    /// Unallocated remainder of its amount
    pub available: BigDecimal,
}

/// A proposed amount to draw from one bank transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAllocation {
    /// The cached bank transaction the amount is drawn from
    pub bank_tx: BankTransaction,
    /// Signed amount to allocate
    pub amount: BigDecimal,
}

/// Greedily split a needed amount across candidates in caller-supplied order
///
/// Each direction-matching candidate is proposed min(remaining, available),
/// decrementing the remainder. Direction-mismatched candidates receive an
/// explicit zero proposal so batch validation reports a wrong-direction
/// error for them instead of silently skipping. Candidates reached after
/// the remainder is exhausted also receive zero, keeping proposals one to
/// one with candidates.
pub fn auto_allocate(
    direction: Direction,
    remaining_needed: &BigDecimal,
    candidates: &[AllocationCandidate],
) -> Vec<ProposedAllocation> {
    let zero = BigDecimal::from(0);
    let mut remaining = remaining_needed.abs();
    let mut proposals = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let matches = direction.agrees_with(&candidate.bank_tx.signed_amount());

        if !matches || remaining == zero || candidate.available <= zero {
            proposals.push(ProposedAllocation {
                bank_tx: candidate.bank_tx.clone(),
                amount: zero.clone(),
            });
            continue;
        }

        let take = if candidate.available < remaining {
            candidate.available.clone()
        } else {
            remaining.clone()
        };
        remaining = &remaining - &take;

        proposals.push(ProposedAllocation {
            bank_tx: candidate.bank_tx.clone(),
            amount: direction.signed(&take),
        });
    }

    proposals
}

/// Result of a single capacity check against one bank transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityCheck {
    /// Whether the requested amount fits
    pub can_link: bool,
    /// Unallocated remainder of the bank transaction's amount
    pub available: BigDecimal,
    /// How far the request overshoots, when it does not fit
    pub shortfall: Option<BigDecimal>,
    /// Explanation when the request does not fit
    pub message: Option<String>,
}

/// Totals of an allocation batch against its ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSummary {
    /// Signed amount the ledger transaction expects
    pub expected: BigDecimal,
    /// Signed total of existing plus proposed allocations
    pub actual: BigDecimal,
    /// expected minus actual
    pub difference: BigDecimal,
}

/// Outcome of validating a whole allocation batch
///
/// Every check runs for every item; `errors` carries the complete set in
/// one round trip instead of failing on the first problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchValidation {
    /// Whether the batch may be committed
    pub is_valid: bool,
    /// Blocking problems, one entry per failed check
    pub errors: Vec<String>,
    /// Non-blocking observations worth surfacing to the operator
    pub warnings: Vec<String>,
    /// Batch totals
    pub summary: AllocationSummary,
}

/// Reconciliation summary of a single ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatus {
    /// The ledger transaction examined
    pub ledger_tx_id: String,
    /// Derived reconciliation state
    pub state: ReconciliationState,
    /// Signed amount the ledger transaction expects
    pub expected: BigDecimal,
    /// Signed total currently allocated
    pub actual: BigDecimal,
    /// expected minus actual
    pub difference: BigDecimal,
    /// Number of links currently attached
    pub link_count: usize,
}

/// A ledger transaction whose links no longer add up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// The affected ledger transaction
    pub ledger_tx: LedgerTransaction,
    /// Signed amount it expects
    pub expected_amount: BigDecimal,
    /// Signed total its links actually allocate
    pub actual_allocated: BigDecimal,
    /// expected minus actual
    pub difference: BigDecimal,
    /// Links whose sign disagrees with the transaction's direction
    pub direction_issues: Vec<String>,
}

fn derive_state(
    link_count: usize,
    difference: &BigDecimal,
    tolerance: &BigDecimal,
) -> ReconciliationState {
    if link_count == 0 {
        ReconciliationState::Unlinked
    } else if difference.abs() <= *tolerance {
        ReconciliationState::FullyReconciled
    } else {
        ReconciliationState::PartiallyAllocated
    }
}

/// Validator for allocation batches and fleet-wide consistency
pub struct ReconciliationValidator<L: LedgerReader, S: LinkStore> {
    ledger: L,
    allocations: AllocationLedger<S>,
    tolerance: BigDecimal,
}

impl<L: LedgerReader, S: LinkStore> ReconciliationValidator<L, S> {
    /// Create a validator requiring exact amount matches
    pub fn new(ledger: L, link_store: S) -> Self {
        Self::with_tolerance(ledger, link_store, BigDecimal::from(0))
    }

    /// Create a validator with a custom match tolerance
    pub fn with_tolerance(ledger: L, link_store: S, tolerance: BigDecimal) -> Self {
        Self {
            ledger,
            allocations: AllocationLedger::new(link_store),
            tolerance,
        }
    }

    /// Check whether a requested allocation fits a bank transaction's
    /// unallocated remainder
    pub async fn check_capacity(
        &self,
        bank_tx: &BankTransaction,
        requested: &BigDecimal,
    ) -> ReconResult<CapacityCheck> {
        let allocated = self
            .allocations
            .allocated_total(&bank_tx.external_id)
            .await?;
        let available = &bank_tx.amount - &allocated;
        let requested_magnitude = requested.abs();

        if requested_magnitude > available {
            let shortfall = &requested_magnitude - &available;
            let message = format!(
                "Bank transaction {} has {} available, requested {} (short by {})",
                bank_tx.external_id, available, requested_magnitude, shortfall
            );
            return Ok(CapacityCheck {
                can_link: false,
                available,
                shortfall: Some(shortfall),
                message: Some(message),
            });
        }

        Ok(CapacityCheck {
            can_link: true,
            available,
            shortfall: None,
            message: None,
        })
    }

    /// Validate a whole allocation batch against its ledger transaction
    ///
    /// Runs direction, positivity, and capacity checks for every item
    /// without short-circuiting, then checks the combined total of existing
    /// and proposed allocations against the expected signed amount. Capacity
    /// accounting includes earlier proposals in the same batch, so selecting
    /// the same bank transaction twice cannot slip past the per-item checks.
    pub async fn validate_allocation_batch(
        &self,
        ledger_tx: &LedgerTransaction,
        proposed: &[ProposedAllocation],
    ) -> ReconResult<BatchValidation> {
        let zero = BigDecimal::from(0);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let ids: Vec<String> = proposed
            .iter()
            .map(|p| p.bank_tx.external_id.clone())
            .collect();
        let summaries = self.allocations.links_for_many_bank_tx(&ids).await?;

        let mut in_batch: HashMap<String, BigDecimal> = HashMap::new();

        for proposal in proposed {
            let bank_tx = &proposal.bank_tx;
            let external_id = &bank_tx.external_id;

            let direction_check =
                validate_direction(ledger_tx.direction.clone(), &bank_tx.signed_amount());
            if let Some(message) = direction_check.message {
                errors.push(format!("{}: {}", external_id, message));
            }

            if proposal.amount == zero {
                errors.push(format!("{}: allocation amount cannot be zero", external_id));
            } else if !ledger_tx.direction.agrees_with(&proposal.amount) {
                let expected_sign = match ledger_tx.direction {
                    Direction::Income => "positive",
                    Direction::Expense => "negative",
                };
                errors.push(format!(
                    "{}: {:?} allocation must be {}, got {}",
                    external_id, ledger_tx.direction, expected_sign, proposal.amount
                ));
            }

            let already_stored = summaries
                .get(external_id)
                .map(|s| s.allocated.clone())
                .unwrap_or_else(|| zero.clone());
            let already_in_batch = in_batch
                .get(external_id)
                .cloned()
                .unwrap_or_else(|| zero.clone());
            let available = &bank_tx.amount - &already_stored - &already_in_batch;
            let magnitude = proposal.amount.abs();

            if magnitude > available {
                errors.push(format!(
                    "{}: requested {} exceeds the {} still available",
                    external_id, magnitude, available
                ));
            }
            in_batch.insert(external_id.clone(), &already_in_batch + &magnitude);

            if bank_tx.status != BankTxStatus::Completed {
                warnings.push(format!(
                    "{}: bank transaction is not completed ({:?})",
                    external_id, bank_tx.status
                ));
            }
            if let Some(summary) = summaries.get(external_id) {
                if summary
                    .linked_ledger_tx_ids
                    .iter()
                    .any(|id| id != &ledger_tx.id)
                {
                    warnings.push(format!(
                        "{}: bank transaction is already allocated to other ledger transactions",
                        external_id
                    ));
                }
            }
        }

        let existing = self.allocations.links_for_ledger_tx(&ledger_tx.id).await?;
        let existing_total: BigDecimal = existing.iter().map(|l| &l.allocated_amount).sum();
        let proposed_total: BigDecimal = proposed.iter().map(|p| &p.amount).sum();
        let actual = &existing_total + &proposed_total;
        let expected = ledger_tx.expected_signed_amount();
        let difference = &expected - &actual;

        if difference.abs() > self.tolerance {
            errors.push(format!(
                "Allocated total {} does not match expected {} (difference {})",
                actual, expected, difference
            ));
        }

        Ok(BatchValidation {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            summary: AllocationSummary {
                expected,
                actual,
                difference,
            },
        })
    }

    /// Reconciliation state and totals of one ledger transaction
    pub async fn validation_status(
        &self,
        ledger_tx: &LedgerTransaction,
    ) -> ReconResult<ValidationStatus> {
        let links = self.allocations.links_for_ledger_tx(&ledger_tx.id).await?;
        let actual: BigDecimal = links.iter().map(|l| &l.allocated_amount).sum();
        let expected = ledger_tx.expected_signed_amount();
        let difference = &expected - &actual;
        let state = derive_state(links.len(), &difference, &self.tolerance);

        Ok(ValidationStatus {
            ledger_tx_id: ledger_tx.id.clone(),
            state,
            expected,
            actual,
            difference,
            link_count: links.len(),
        })
    }

    /// Scan every linked ledger transaction for allocation mismatches
    ///
    /// Recomputes the allocation sum and per-link sign consistency for each
    /// ledger transaction that has at least one link, returning one entry
    /// per transaction whose total is off by more than the tolerance or
    /// that carries a wrong-signed link. Links whose ledger transaction no
    /// longer resolves are logged and skipped; their lifecycle belongs to
    /// the accounting subsystem.
    pub async fn find_discrepancies(&self) -> ReconResult<Vec<Discrepancy>> {
        let mut discrepancies = Vec::new();

        for id in self.allocations.linked_ledger_tx_ids().await? {
            let ledger_tx = match self.ledger.get_ledger_transaction(&id).await? {
                Some(tx) => tx,
                None => {
                    warn!(
                        ledger_tx_id = %id,
                        "links reference a ledger transaction that no longer exists"
                    );
                    continue;
                }
            };

            let links = self.allocations.links_for_ledger_tx(&id).await?;
            let actual: BigDecimal = links.iter().map(|l| &l.allocated_amount).sum();
            let expected = ledger_tx.expected_signed_amount();
            let difference = &expected - &actual;

            let mut direction_issues = Vec::new();
            for link in &links {
                if !ledger_tx.direction.agrees_with(&link.allocated_amount) {
                    direction_issues.push(format!(
                        "Link {} allocates {} against a {:?} transaction",
                        link.id, link.allocated_amount, ledger_tx.direction
                    ));
                }
            }

            if difference.abs() > self.tolerance || !direction_issues.is_empty() {
                discrepancies.push(Discrepancy {
                    ledger_tx,
                    expected_amount: expected,
                    actual_allocated: actual,
                    difference,
                    direction_issues,
                });
            }
        }

        Ok(discrepancies)
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

    fn ledger_tx(id: &str, direction: Direction, amount: i64) -> LedgerTransaction {
        LedgerTransaction::new(
            id.to_string(),
            direction,
            BigDecimal::from(amount),
            "approved".to_string(),
        )
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

    #[test]
    fn to_signed_negates_debits_and_keeps_credits_positive() {
        let amount = BigDecimal::from(150);
        assert_eq!(
            to_signed(&amount, BankTxSide::Debit),
            BigDecimal::from(-150)
        );
        assert_eq!(
            to_signed(&amount, BankTxSide::Credit),
            BigDecimal::from(150)
        );

        // Already-negative upstream amounts are normalized through abs
        let negative = BigDecimal::from(-75);
        assert_eq!(
            to_signed(&negative, BankTxSide::Debit),
            BigDecimal::from(-75)
        );
        assert_eq!(
            to_signed(&negative, BankTxSide::Credit),
            BigDecimal::from(75)
        );
    }

    #[test]
    fn validate_direction_matrix() {
        let negative = BigDecimal::from(-100);
        let positive = BigDecimal::from(100);
        let zero = BigDecimal::from(0);

        assert!(validate_direction(Direction::Expense, &negative).is_valid);
        assert!(validate_direction(Direction::Income, &positive).is_valid);

        let wrong = validate_direction(Direction::Income, &negative);
        assert!(!wrong.is_valid);
        assert!(wrong.message.unwrap().contains("Income"));

        assert!(!validate_direction(Direction::Expense, &positive).is_valid);
        assert!(!validate_direction(Direction::Expense, &zero).is_valid);
        assert!(!validate_direction(Direction::Income, &zero).is_valid);
    }

    #[test]
    fn auto_allocate_splits_greedily_in_order() {
        let candidates = vec![
            AllocationCandidate {
                bank_tx: bank_tx("bt-1", 100, BankTxSide::Debit),
                available: BigDecimal::from(100),
            },
            AllocationCandidate {
                bank_tx: bank_tx("bt-2", 80, BankTxSide::Debit),
                available: BigDecimal::from(80),
            },
        ];

        let proposals = auto_allocate(Direction::Expense, &BigDecimal::from(-150), &candidates);

        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].amount, BigDecimal::from(-100));
        assert_eq!(proposals[1].amount, BigDecimal::from(-50));
    }

    #[test]
    fn auto_allocate_gives_mismatched_candidates_zero() {
        let candidates = vec![
            AllocationCandidate {
                bank_tx: bank_tx("bt-credit", 500, BankTxSide::Credit),
                available: BigDecimal::from(500),
            },
            AllocationCandidate {
                bank_tx: bank_tx("bt-debit", 150, BankTxSide::Debit),
                available: BigDecimal::from(150),
            },
        ];

        let proposals = auto_allocate(Direction::Expense, &BigDecimal::from(-150), &candidates);

        assert_eq!(proposals[0].amount, BigDecimal::from(0));
        assert_eq!(proposals[1].amount, BigDecimal::from(-150));
    }

    #[test]
    fn auto_allocate_zeroes_candidates_after_the_need_is_met() {
        let candidates = vec![
            AllocationCandidate {
                bank_tx: bank_tx("bt-1", 200, BankTxSide::Debit),
                available: BigDecimal::from(200),
            },
            AllocationCandidate {
                bank_tx: bank_tx("bt-2", 50, BankTxSide::Debit),
                available: BigDecimal::from(50),
            },
        ];

        let proposals = auto_allocate(Direction::Expense, &BigDecimal::from(-200), &candidates);

        assert_eq!(proposals[0].amount, BigDecimal::from(-200));
        assert_eq!(proposals[1].amount, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn check_capacity_reports_exact_shortfall() {
        let store = MemoryStore::new();
        let mut allocations = AllocationLedger::new(store.clone());

        let spent = ledger_tx("lt-0", Direction::Expense, 80);
        let bank = bank_tx("bt-1", 100, BankTxSide::Debit);
        allocations
            .create_link(&spent, &bank, BigDecimal::from(-80), "op-1")
            .await
            .unwrap();

        let validator = ReconciliationValidator::new(store.clone(), store);
        let check = validator
            .check_capacity(&bank, &BigDecimal::from(-30))
            .await
            .unwrap();

        assert!(!check.can_link);
        assert_eq!(check.available, BigDecimal::from(20));
        assert_eq!(check.shortfall, Some(BigDecimal::from(10)));
        assert!(check.message.unwrap().contains("bt-1"));
    }

    #[tokio::test]
    async fn batch_rejects_duplicate_selection_past_capacity() {
        let store = MemoryStore::new();
        let validator = ReconciliationValidator::new(store.clone(), store);

        let tx = ledger_tx("lt-1", Direction::Expense, 160);
        let bank = bank_tx("bt-1", 100, BankTxSide::Debit);

        // Two proposals draw 160 from a 100 bank transaction
        let proposals = vec![
            ProposedAllocation {
                bank_tx: bank.clone(),
                amount: BigDecimal::from(-100),
            },
            ProposedAllocation {
                bank_tx: bank,
                amount: BigDecimal::from(-60),
            },
        ];

        let result = validator
            .validate_allocation_batch(&tx, &proposals)
            .await
            .unwrap();

        assert!(!result.is_valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("exceeds the") && e.contains("bt-1")));
    }

    #[tokio::test]
    async fn batch_collects_every_error_without_short_circuiting() {
        let store = MemoryStore::new();
        let validator = ReconciliationValidator::new(store.clone(), store);

        let tx = ledger_tx("lt-1", Direction::Expense, 150);
        let proposals = vec![
            // Wrong direction and wrong sign
            ProposedAllocation {
                bank_tx: bank_tx("bt-credit", 150, BankTxSide::Credit),
                amount: BigDecimal::from(150),
            },
            // Zero amount
            ProposedAllocation {
                bank_tx: bank_tx("bt-zero", 40, BankTxSide::Debit),
                amount: BigDecimal::from(0),
            },
        ];

        let result = validator
            .validate_allocation_batch(&tx, &proposals)
            .await
            .unwrap();

        assert!(!result.is_valid);
        // Direction, sign, zero amount, and total mismatch all reported at once
        assert!(result.errors.len() >= 3);
        assert_eq!(result.summary.expected, BigDecimal::from(-150));
    }
}
