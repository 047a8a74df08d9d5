//! Shared application state, built once at startup and handed to every
//! connection.

use std::sync::Arc;

use serde_json::json;

use crate::client::CohereClient;
use crate::config::Config;
use crate::delivery::{Delay, TokioDelay};
use crate::error::Result;
use crate::knowledge::KnowledgeBase;
use crate::store::{MemoryStore, MessageStore};
use crate::throttle::Throttler;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub knowledge: Arc<KnowledgeBase>,
    pub throttler: Arc<Throttler>,
    pub client: CohereClient,
    pub store: Arc<dyn MessageStore>,
    pub delay: Arc<dyn Delay>,
}

impl AppState {
    /// Wire up the production components from `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let knowledge = Arc::new(KnowledgeBase::from_config(&config.knowledge)?);
        let throttler = Arc::new(Throttler::new(&config.throttle));
        let client = CohereClient::new(&config.upstream, Arc::clone(&throttler));
        Ok(Self {
            config: Arc::new(config),
            knowledge,
            throttler,
            client,
            store: Arc::new(MemoryStore::new()),
            delay: Arc::new(TokioDelay),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    /// Snapshot served on `/api/stats`.
    pub fn stats(&self) -> serde_json::Value {
        json!({
            "throttling": self.throttler.stats(),
            "pool": self.client.pool().stats(),
            "knowledge": self.knowledge.stats(),
            "llmConfigured": self.client.is_configured(),
        })
    }
}
