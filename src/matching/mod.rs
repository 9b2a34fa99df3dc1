//! Matching module containing the bank feed cache, allocation ledger,
//! reconciliation validation, and the orchestrator tying them together

pub mod allocation;
pub mod cache;
pub mod orchestrator;
pub mod validator;

pub use allocation::*;
pub use cache::*;
pub use orchestrator::*;
pub use validator::*;
