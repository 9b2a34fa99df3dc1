//! Scripted bank feed client for testing

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::VecDeque;

use crate::traits::BankFeedClient;
use crate::types::*;

/// Bank feed client that replays canned responses, for testing and development
///
/// Each fetch consumes the next queued batch or failure; an exhausted queue
/// returns an empty batch. The incremental `since` hint is ignored, which is
/// a legal implementation of the client contract.
pub struct ScriptedBankFeed {
    responses: VecDeque<ReconResult<Vec<BankTransaction>>>,
    connectivity_ok: bool,
}

impl ScriptedBankFeed {
    /// Create a new scripted feed with an empty queue
    pub fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            connectivity_ok: true,
        }
    }

    /// Queue a successful batch
    pub fn push_batch(&mut self, batch: Vec<BankTransaction>) {
        self.responses.push_back(Ok(batch));
    }

    /// Queue an upstream failure
    pub fn push_failure(&mut self, message: &str) {
        self.responses
            .push_back(Err(ReconError::ExternalService(message.to_string())));
    }

    /// Control what the connectivity test reports
    pub fn set_connectivity(&mut self, ok: bool) {
        self.connectivity_ok = ok;
    }
}

impl Default for ScriptedBankFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BankFeedClient for ScriptedBankFeed {
    async fn fetch_transactions(
        &mut self,
        _since: Option<NaiveDateTime>,
    ) -> ReconResult<Vec<BankTransaction>> {
        match self.responses.pop_front() {
            Some(response) => response,
            None => Ok(Vec::new()),
        }
    }

    async fn test_connection(&self) -> ReconResult<()> {
        if self.connectivity_ok {
            Ok(())
        } else {
            Err(ReconError::ExternalService(
                "bank feed unreachable".to_string(),
            ))
        }
    }
}
