//! Engine configuration

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// Tunable knobs for the reconciliation engine
///
/// Installations that only ever feed exact decimal amounts can leave the
/// tolerance at its default of exactly zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Largest |expected - allocated| still counted as fully reconciled
    pub match_tolerance: BigDecimal,
    /// Minimum seconds between upstream syncs triggered by auto-sync
    pub auto_sync_threshold_secs: i64,
    /// Additional fetch attempts after a failed upstream call
    pub fetch_retries: u32,
    /// Include direction-mismatched bank transactions in candidate search results
    pub include_direction_mismatched: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            match_tolerance: BigDecimal::from(0),
            auto_sync_threshold_secs: 300,
            fetch_retries: 2,
            include_direction_mismatched: false,
        }
    }
}

impl ReconcilerConfig {
    /// The auto-sync threshold as a duration
    pub fn auto_sync_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.auto_sync_threshold_secs)
    }
}
