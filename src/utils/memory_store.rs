//! In-memory storage implementation for testing

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::traits::*;
use crate::types::*;

/// In-memory implementation of every storage trait, for testing and development
///
/// Clones share the underlying state, so one instance can serve as ledger
/// reader, link store, and feed store at once.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    ledger_txs: Arc<RwLock<HashMap<String, LedgerTransaction>>>,
    bank_txs: Arc<RwLock<HashMap<String, BankTransaction>>>,
    links: Arc<RwLock<HashMap<String, Link>>>,
    watermark: Arc<RwLock<Option<NaiveDateTime>>>,
    fail_next_insert: Arc<RwLock<Option<String>>>,
}

impl MemoryStore {
    /// Create a new memory store instance
    pub fn new() -> Self {
        Self {
            ledger_txs: Arc::new(RwLock::new(HashMap::new())),
            bank_txs: Arc::new(RwLock::new(HashMap::new())),
            links: Arc::new(RwLock::new(HashMap::new())),
            watermark: Arc::new(RwLock::new(None)),
            fail_next_insert: Arc::new(RwLock::new(None)),
        }
    }

    /// Seed a ledger transaction (the accounting subsystem's job in production)
    pub fn put_ledger_transaction(&self, tx: LedgerTransaction) {
        self.ledger_txs.write().unwrap().insert(tx.id.clone(), tx);
    }

    /// Make the next link insert against the given bank transaction fail
    /// with a storage error (useful for partial-persistence tests)
    pub fn fail_next_insert(&self, bank_tx_external_id: &str) {
        *self.fail_next_insert.write().unwrap() = Some(bank_tx_external_id.to_string());
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.ledger_txs.write().unwrap().clear();
        self.bank_txs.write().unwrap().clear();
        self.links.write().unwrap().clear();
        *self.watermark.write().unwrap() = None;
        *self.fail_next_insert.write().unwrap() = None;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerReader for MemoryStore {
    async fn get_ledger_transaction(&self, id: &str) -> ReconResult<Option<LedgerTransaction>> {
        Ok(self.ledger_txs.read().unwrap().get(id).cloned())
    }
}

#[async_trait]
impl LinkStore for MemoryStore {
    async fn insert_link(&mut self, link: &Link, bank_tx_amount: &BigDecimal) -> ReconResult<()> {
        {
            let mut fail = self.fail_next_insert.write().unwrap();
            if fail.as_deref() == Some(link.bank_tx_external_id.as_str()) {
                fail.take();
                return Err(ReconError::Storage(format!(
                    "injected failure for {}",
                    link.bank_tx_external_id
                )));
            }
        }

        // Capacity check and insert under one write guard, so concurrent
        // inserts cannot both pass the check and overdraw the amount
        let mut links = self.links.write().unwrap();
        let allocated: BigDecimal = links
            .values()
            .filter(|l| l.bank_tx_external_id == link.bank_tx_external_id)
            .map(|l| l.allocated_amount.abs())
            .sum();

        if &allocated + link.allocated_amount.abs() > *bank_tx_amount {
            return Err(ReconError::Validation(format!(
                "Link would overdraw bank transaction {}: {} allocated of {}",
                link.bank_tx_external_id, allocated, bank_tx_amount
            )));
        }

        links.insert(link.id.clone(), link.clone());
        Ok(())
    }

    async fn delete_link(&mut self, link_id: &str) -> ReconResult<bool> {
        Ok(self.links.write().unwrap().remove(link_id).is_some())
    }

    async fn links_for_ledger_tx(&self, ledger_tx_id: &str) -> ReconResult<Vec<Link>> {
        let bank_txs = self.bank_txs.read().unwrap();
        let links_guard = self.links.read().unwrap();

        let mut links: Vec<Link> = links_guard
            .values()
            .filter(|l| l.ledger_tx_id == ledger_tx_id)
            .cloned()
            .collect();

        // Most recent bank settlement first; links whose bank transaction
        // is not cached sort last, ties broken by creation time
        links.sort_by(|a, b| {
            let settled_a = bank_txs.get(&a.bank_tx_external_id).map(|tx| tx.settled_at);
            let settled_b = bank_txs.get(&b.bank_tx_external_id).map(|tx| tx.settled_at);
            settled_b
                .cmp(&settled_a)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        Ok(links)
    }

    async fn links_for_bank_tx(&self, external_id: &str) -> ReconResult<Vec<Link>> {
        let links = self.links.read().unwrap();
        Ok(links
            .values()
            .filter(|l| l.bank_tx_external_id == external_id)
            .cloned()
            .collect())
    }

    async fn links_for_bank_txs(&self, external_ids: &[String]) -> ReconResult<Vec<Link>> {
        let wanted: HashSet<&String> = external_ids.iter().collect();
        let links = self.links.read().unwrap();
        Ok(links
            .values()
            .filter(|l| wanted.contains(&l.bank_tx_external_id))
            .cloned()
            .collect())
    }

    async fn linked_ledger_tx_ids(&self) -> ReconResult<Vec<String>> {
        let links = self.links.read().unwrap();
        let distinct: HashSet<String> = links.values().map(|l| l.ledger_tx_id.clone()).collect();
        let mut ids: Vec<String> = distinct.into_iter().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl BankFeedStore for MemoryStore {
    async fn upsert_bank_tx(&mut self, tx: &BankTransaction) -> ReconResult<()> {
        self.bank_txs
            .write()
            .unwrap()
            .insert(tx.external_id.clone(), tx.clone());
        Ok(())
    }

    async fn get_bank_tx(&self, external_id: &str) -> ReconResult<Option<BankTransaction>> {
        Ok(self.bank_txs.read().unwrap().get(external_id).cloned())
    }

    async fn cached_bank_txs(&self, filter: &BankTxFilter) -> ReconResult<Vec<BankTransaction>> {
        let bank_txs = self.bank_txs.read().unwrap();
        let mut matching: Vec<BankTransaction> = bank_txs
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.settled_at.cmp(&a.settled_at));
        Ok(matching)
    }

    async fn last_sync(&self) -> ReconResult<Option<NaiveDateTime>> {
        Ok(*self.watermark.read().unwrap())
    }

    async fn set_last_sync(&mut self, at: NaiveDateTime) -> ReconResult<()> {
        *self.watermark.write().unwrap() = Some(at);
        Ok(())
    }
}
