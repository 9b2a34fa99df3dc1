//! Fleet-wide discrepancy scanning example

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use reconcile_core::utils::{MemoryStore, ScriptedBankFeed};
use reconcile_core::{
    AllocationLedger, BankTransaction, BankTxSide, BankTxStatus, Direction, LedgerTransaction,
    LinkSelection, MatchingOrchestrator,
};

fn settled(day: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 2, day)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🕵️ Reconcile Core - Discrepancy Scan\n");

    let store = MemoryStore::new();
    store.put_ledger_transaction(LedgerTransaction::new(
        "inv-2001".to_string(),
        Direction::Income,
        BigDecimal::from(2400),
        "approved".to_string(),
    ));
    store.put_ledger_transaction(LedgerTransaction::new(
        "bill-2002".to_string(),
        Direction::Expense,
        BigDecimal::from(780),
        "approved".to_string(),
    ));
    store.put_ledger_transaction(LedgerTransaction::new(
        "bill-2003".to_string(),
        Direction::Expense,
        BigDecimal::from(120),
        "approved".to_string(),
    ));

    let mut feed = ScriptedBankFeed::new();
    feed.push_batch(vec![
        BankTransaction::new(
            "stmt-a".to_string(),
            BigDecimal::from(2400),
            BankTxSide::Credit,
            settled(3),
            BankTxStatus::Completed,
            "CLIENT PAYMENT INV 2001".to_string(),
        ),
        BankTransaction::new(
            "stmt-b".to_string(),
            BigDecimal::from(700),
            BankTxSide::Debit,
            settled(5),
            BankTxStatus::Completed,
            "OFFICE LEASE FEB".to_string(),
        ),
    ]);

    let mut orchestrator =
        MatchingOrchestrator::new(store.clone(), store.clone(), store.clone(), feed);
    orchestrator.sync_bank_feed().await?;

    // 1. Reconcile the invoice cleanly through the batch API
    println!("🔗 Linking inv-2001 to its client payment...");
    let outcome = orchestrator
        .commit_links(
            "inv-2001",
            &[LinkSelection {
                bank_tx_external_id: "stmt-a".to_string(),
                amount: None,
            }],
            "demo",
        )
        .await?;
    println!("  ✓ State: {:?}\n", outcome.state);

    // 2. Import a stale allocation below the batch API, the way a legacy
    // migration would: 700 linked against a 780 bill
    println!("📦 Importing a legacy link for bill-2002 (700 of 780)...");
    let mut allocations = AllocationLedger::new(store.clone());
    let bill = LedgerTransaction::new(
        "bill-2002".to_string(),
        Direction::Expense,
        BigDecimal::from(780),
        "approved".to_string(),
    );
    let lease_row = BankTransaction::new(
        "stmt-b".to_string(),
        BigDecimal::from(700),
        BankTxSide::Debit,
        settled(5),
        BankTxStatus::Completed,
        "OFFICE LEASE FEB".to_string(),
    );
    allocations
        .create_link(&bill, &lease_row, BigDecimal::from(-700), "migration")
        .await?;
    println!("  ✓ Link written without batch validation\n");

    // 3. Scan the whole fleet
    println!("🔍 Scanning for discrepancies...");
    let discrepancies = orchestrator.find_discrepancies().await?;
    if discrepancies.is_empty() {
        println!("  ✅ Every linked transaction adds up");
    } else {
        for discrepancy in &discrepancies {
            println!(
                "  ❌ {}: expected {}, allocated {} (off by {})",
                discrepancy.ledger_tx.id,
                discrepancy.expected_amount,
                discrepancy.actual_allocated,
                discrepancy.difference
            );
            for issue in &discrepancy.direction_issues {
                println!("     - {}", issue);
            }
        }
    }
    println!();

    // 4. Contrast the three per-transaction states
    println!("📋 Per-transaction states:");
    for id in ["inv-2001", "bill-2002", "bill-2003"] {
        let status = orchestrator.get_validation_status(id).await?;
        println!(
            "  {} -> {:?} ({} of {} allocated across {} links)",
            id, status.state, status.actual, status.expected, status.link_count
        );
    }
    println!("  (bill-2003 has no links, so the scan never visits it)");

    println!("\n🎉 Example completed successfully!");
    Ok(())
}
