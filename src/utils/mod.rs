//! Utility modules

pub mod feed_client;
pub mod memory_store;

pub use feed_client::*;
pub use memory_store::*;
