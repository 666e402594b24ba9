//! Engram Kernel - the memory kernel facade
//!
//! A `MemoryKernel` owns the durable store, vector index, and every
//! processor, and exposes the small API surface hosts integrate against:
//! search, staged writes with approval, episodic scenes, sessions, handoff,
//! and the sleep cycle. Construction is explicit dependency injection - the
//! host supplies the embedder and (optionally) the LLM provider and drives
//! the sleep cycle on its own schedule.

mod facade;
mod graph_api;
pub mod scoring;
mod search;
mod sleep;
mod types;
mod write;

pub use graph_api::RelatedMemory;
pub use types::*;

use engram_core::{EngramConfig, EngramResult};
use engram_decay::DecayEngine;
use engram_echo::{CategoryProcessor, EchoProcessor};
use engram_episodic::EpisodicStore;
use engram_handoff::HandoffBus;
use engram_llm::{Embedder, LlmProvider};
use engram_policy::PolicyGateway;
use engram_staging::{InvariantEngine, StagingStore};
use engram_storage::Store;
use engram_vector::VectorIndex;
use std::sync::Arc;
use tracing::info;

/// The memory kernel. Safe to share across threads behind an `Arc`.
pub struct MemoryKernel {
    config: EngramConfig,
    store: Arc<Store>,
    vector: VectorIndex,
    embedder: Arc<dyn Embedder>,
    llm: Option<Arc<dyn LlmProvider>>,
    gateway: PolicyGateway,
    staging: StagingStore,
    invariants: InvariantEngine,
    decay: DecayEngine,
    episodic: EpisodicStore,
    echo: EchoProcessor,
    categories: CategoryProcessor,
    handoff: HandoffBus,
}

impl MemoryKernel {
    /// Construct a kernel from config and providers.
    ///
    /// Opens (or creates) the database, applies migrations, loads the
    /// persisted category graph, and sweeps commits left in APPLYING by a
    /// crash back to PENDING.
    pub fn new(
        config: EngramConfig,
        embedder: Arc<dyn Embedder>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> EngramResult<Self> {
        config.validate()?;

        let store = Arc::new(Store::open(config.storage.clone())?);
        let vector = match &config.storage.db_path {
            Some(path) => VectorIndex::open(path, config.vector.clone())?,
            None => VectorIndex::open_in_memory(config.vector.clone())?,
        };

        let kernel = Self {
            gateway: PolicyGateway::new(
                Arc::clone(&store),
                config.policy.clone(),
                config.handoff.clone(),
            ),
            staging: StagingStore::new(Arc::clone(&store)),
            invariants: InvariantEngine::new(Arc::clone(&store)),
            decay: DecayEngine::new(
                Arc::clone(&store),
                config.decay.clone(),
                config.traces.clone(),
                &config.storage,
            ),
            episodic: EpisodicStore::new(
                Arc::clone(&store),
                Arc::clone(&embedder),
                config.episodic.clone(),
            ),
            echo: EchoProcessor::new(llm.clone(), config.echo.clone()),
            categories: CategoryProcessor::new(llm.clone(), config.categories.clone()),
            handoff: HandoffBus::new(Arc::clone(&store), config.handoff.clone()),
            store,
            vector,
            embedder,
            llm,
            config,
        };

        kernel.categories.load(kernel.store.list_categories()?);
        let recovered = kernel.staging.recover_interrupted()?;
        info!(recovered, "memory kernel ready");
        Ok(kernel)
    }

    /// Direct handle to the durable store, for host-side tooling.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    /// Persist the in-memory category graph. Called after write batches and
    /// by the sleep cycle.
    pub(crate) fn persist_categories(&self) -> EngramResult<()> {
        for node in self.categories.snapshot() {
            self.store.upsert_category(&node)?;
        }
        Ok(())
    }
}
