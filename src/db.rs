//! The engine instance shared by every client.
//!
//! A [`Database`] ties together the keyspace, the pub/sub broker, the
//! script cache and the function registry. Clients talk to it through a
//! [`crate::CommandHandler`] each.

use crate::config::EngineConfig;
use crate::pubsub::{ClientId, PubSubBroker};
use crate::scripting::{FunctionRegistry, ScriptCache};
use crate::storage::{ExpirySweeper, StorageEngine};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
pub struct Database {
    storage: Arc<StorageEngine>,
    pubsub: PubSubBroker,
    scripts: ScriptCache,
    functions: FunctionRegistry,
    config: EngineConfig,
    start_time: Instant,
    next_client_id: AtomicU64,
    commands_processed: AtomicU64,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            storage: Arc::new(StorageEngine::new()),
            pubsub: PubSubBroker::new(),
            scripts: ScriptCache::new(),
            functions: FunctionRegistry::new(),
            config,
            start_time: Instant::now(),
            next_client_id: AtomicU64::new(1),
            commands_processed: AtomicU64::new(0),
        }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn pubsub(&self) -> &PubSubBroker {
        &self.pubsub
    }

    pub fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Starts the background expiry sweeper. Must be called from within a
    /// Tokio runtime; the sweeper stops when the handle is dropped.
    pub fn start_sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::start(Arc::clone(&self.storage), self.config.expiry.clone())
    }

    pub(crate) fn allocate_client_id(&self) -> ClientId {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn record_command(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed.load(Ordering::Relaxed)
    }
}
