//! convo-engine - History resolution, branch generation and snapshots
//!
//! Wires a [`GraphStore`] and a [`CompletionProvider`] together:
//! - `history` - validated root-to-tip paths
//! - `branching` - one child per completion choice
//! - `snapshot` - transcript + replay script keyed by a CRC-32C signature

pub mod branching;
pub mod error;
pub mod history;
pub mod snapshot;

use std::sync::Arc;

use convo_core::{BranchEdge, Message, Snapshot};
use convo_llm::CompletionProvider;
use convo_store::GraphStore;

pub use branching::BranchGenerator;
pub use error::{EngineError, Result};
pub use history::{validate_path, HistoryResolver, ResolvedPath};
pub use snapshot::SnapshotEngine;

/// Facade over the three engine components sharing one store.
#[derive(Clone)]
pub struct ConversationEngine {
    store: Arc<dyn GraphStore>,
    history: HistoryResolver,
    branches: BranchGenerator,
    snapshots: SnapshotEngine,
    default_model: String,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        provider: Arc<dyn CompletionProvider>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            history: HistoryResolver::new(store.clone()),
            branches: BranchGenerator::new(store.clone(), provider),
            snapshots: SnapshotEngine::new(store.clone()),
            store,
            default_model: default_model.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub async fn resolve(&self, tip_id: &str) -> Result<Vec<Message>> {
        self.history.resolve(tip_id).await
    }

    pub async fn resolve_path(&self, tip_id: &str, with_topic: bool) -> Result<ResolvedPath> {
        self.history.resolve_path(tip_id, with_topic).await
    }

    /// Branch from `tip_id` using `model`, or the default model when `None`.
    pub async fn generate(
        &self,
        tip_id: &str,
        model: Option<&str>,
    ) -> Result<Vec<(Message, BranchEdge)>> {
        let model = model.unwrap_or(&self.default_model);
        self.branches.generate(tip_id, model).await
    }

    pub async fn try_generate(
        &self,
        tip_id: &str,
        model: Option<&str>,
    ) -> Result<Vec<(Message, BranchEdge)>> {
        let model = model.unwrap_or(&self.default_model);
        self.branches.try_generate(tip_id, model).await
    }

    pub async fn snapshot(&self, tip_id: &str) -> Result<Option<Snapshot>> {
        self.snapshots.snapshot(tip_id).await
    }

    pub async fn try_snapshot(&self, tip_id: &str) -> Result<Snapshot> {
        self.snapshots.try_snapshot(tip_id).await
    }

    pub async fn snapshots(&self, tip_id: &str, limit: usize) -> Result<Vec<Snapshot>> {
        self.snapshots.snapshots(tip_id, limit).await
    }

    /// Execute a snapshot's replay script against this engine's store.
    pub async fn replay(&self, script: &str) -> Result<()> {
        Ok(self.store.replay(script).await?)
    }
}
