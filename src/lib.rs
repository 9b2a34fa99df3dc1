//! # Reconcile Core
//!
//! A bank feed reconciliation library providing candidate matching, partial
//! allocation of bank transactions across ledger transactions, batch
//! validation, and discrepancy detection.
//!
//! ## Features
//!
//! - **Throttled feed caching**: local copy of the upstream bank feed with
//!   idempotent sync and stale-cache fallback
//! - **Partial allocation**: many-to-many links splitting one bank
//!   transaction across several ledger transactions and vice versa
//! - **Batch validation**: direction, positivity, capacity, and total checks
//!   reported as one complete error list per round trip
//! - **Auto-allocation**: greedy splitting of a needed amount across
//!   selected candidates
//! - **Discrepancy scanning**: fleet-wide detection of ledger transactions
//!   whose links no longer add up
//! - **Storage abstraction**: database-agnostic design with trait-based
//!   storage and an injectable clock
//!
//! ## Quick Start
//!
//! ```rust
//! use reconcile_core::{LinkSelection, MatchingOrchestrator, ReconcilerConfig};
//! use bigdecimal::BigDecimal;
//!
//! // Wire the orchestrator over your own storage and bank client
//! // implementations of the traits in `reconcile_core::traits`:
//! // let mut orchestrator = MatchingOrchestrator::new(ledger, links, feed, client);
//! // let search = orchestrator.search_candidates("ledger-tx-1").await?;
//! ```

pub mod clock;
pub mod config;
pub mod matching;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use clock::*;
pub use config::*;
pub use matching::*;
pub use traits::*;
pub use types::*;
