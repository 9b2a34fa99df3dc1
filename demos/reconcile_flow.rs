//! End-to-end reconciliation walkthrough

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use reconcile_core::utils::{MemoryStore, ScriptedBankFeed};
use reconcile_core::{
    BankTransaction, BankTxSide, BankTxStatus, Direction, LedgerTransaction, LinkSelection,
    MatchingOrchestrator,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🏦 Reconcile Core - Matching Walkthrough\n");

    // The in-memory store plays every backend role here; in production the
    // accounting subsystem owns the ledger records
    let store = MemoryStore::new();
    store.put_ledger_transaction(LedgerTransaction::new(
        "bill-1042".to_string(),
        Direction::Expense,
        BigDecimal::from(1500),
        "approved".to_string(),
    ));

    // The scripted feed stands in for the bank's API
    let mut feed = ScriptedBankFeed::new();
    feed.push_batch(vec![
        BankTransaction::new(
            "stmt-900".to_string(),
            BigDecimal::from(900),
            BankTxSide::Debit,
            NaiveDate::from_ymd_opt(2024, 1, 12)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap(),
            BankTxStatus::Completed,
            "ACME SUPPLIES PART 1/2".to_string(),
        ),
        BankTransaction::new(
            "stmt-600".to_string(),
            BigDecimal::from(600),
            BankTxSide::Debit,
            NaiveDate::from_ymd_opt(2024, 1, 14)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap(),
            BankTxStatus::Completed,
            "ACME SUPPLIES PART 2/2".to_string(),
        ),
        BankTransaction::new(
            "stmt-250".to_string(),
            BigDecimal::from(250),
            BankTxSide::Credit,
            NaiveDate::from_ymd_opt(2024, 1, 13)
                .unwrap()
                .and_hms_opt(16, 45, 0)
                .unwrap(),
            BankTxStatus::Completed,
            "CUSTOMER REFUND".to_string(),
        ),
    ]);

    let mut orchestrator =
        MatchingOrchestrator::new(store.clone(), store.clone(), store.clone(), feed);

    // 1. Pull the bank feed into the local cache
    println!("📥 Syncing the bank feed...");
    let upserted = orchestrator.sync_bank_feed().await?;
    println!("  ✓ Cached {} bank transactions\n", upserted);

    // 2. Search candidates for the unpaid bill
    println!("🔎 Searching candidates for bill-1042 (expense of 1500)...");
    let search = orchestrator.search_candidates("bill-1042").await?;
    println!("  Expected amount: {}", search.expected_amount);
    println!("  Still needed:    {}", search.remaining_needed);
    for candidate in &search.candidates {
        println!(
            "  - {} {:>8}  {} ({} available)",
            candidate.bank_tx.external_id,
            candidate.signed_amount,
            candidate.bank_tx.label,
            candidate.available
        );
    }
    println!("  (the 250 credit is hidden: wrong direction for an expense)\n");

    // 3. Commit one explicit split and let auto-allocation fill the rest
    println!("🔗 Committing links...");
    let outcome = orchestrator
        .commit_links(
            "bill-1042",
            &[
                LinkSelection {
                    bank_tx_external_id: "stmt-900".to_string(),
                    amount: Some(BigDecimal::from(-900)),
                },
                LinkSelection {
                    bank_tx_external_id: "stmt-600".to_string(),
                    amount: None,
                },
            ],
            "demo",
        )
        .await?;

    if outcome.validation.is_valid {
        for link in &outcome.created {
            println!(
                "  ✓ {} <- {} for {}",
                link.ledger_tx_id, link.bank_tx_external_id, link.allocated_amount
            );
        }
    } else {
        println!("  ❌ Batch rejected:");
        for error in &outcome.validation.errors {
            println!("    - {}", error);
        }
    }
    println!("  State: {:?}\n", outcome.state);

    // 4. Inspect the reconciliation status
    let status = orchestrator.get_validation_status("bill-1042").await?;
    println!("📋 Status of bill-1042:");
    println!("  Expected:   {}", status.expected);
    println!("  Allocated:  {}", status.actual);
    println!("  Difference: {}", status.difference);
    println!("  Links:      {}", status.link_count);
    println!("  State:      {:?}\n", status.state);

    // 5. Remove one link and watch the state degrade
    println!("✂️  Removing the second link...");
    orchestrator.remove_link(&outcome.created[1].id).await?;
    let status = orchestrator.get_validation_status("bill-1042").await?;
    println!(
        "  State after removal: {:?} ({} still uncovered)",
        status.state, status.difference
    );

    println!("\n🎉 Example completed successfully!");
    Ok(())
}
