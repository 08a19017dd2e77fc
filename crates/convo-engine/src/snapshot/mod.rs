//! Content-addressed exports of a conversation tip.
//!
//! A snapshot carries the tip's transcript and a replay script. Its key is
//! `(tip id, signature)`, so asking again for an unchanged history reuses the
//! stored snapshot and only refreshes the edge timestamp.

mod signature;
mod transcript;

use std::sync::Arc;

use convo_core::Snapshot;
use convo_store::{GraphStore, NewSnapshot};

use crate::error::{EngineError, Result};
use crate::history::HistoryResolver;

pub use signature::signature;
pub use transcript::{render, Rendered};

#[derive(Clone)]
pub struct SnapshotEngine {
    store: Arc<dyn GraphStore>,
    history: HistoryResolver,
}

impl SnapshotEngine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            history: HistoryResolver::new(store.clone()),
            store,
        }
    }

    /// Snapshot the history ending at `tip_id`.
    ///
    /// Integrity and serialization failures are logged and yield `None`.
    pub async fn snapshot(&self, tip_id: &str) -> Result<Option<Snapshot>> {
        match self.try_snapshot(tip_id).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(error) if error.is_fail_soft() => {
                tracing::error!(tip_id = %tip_id, error = %error, "Snapshot failed");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn try_snapshot(&self, tip_id: &str) -> Result<Snapshot> {
        let path = self.history.resolve_path(tip_id, true).await?;
        let tip = path
            .tip()
            .ok_or_else(|| EngineError::NotFound(tip_id.to_string()))?;
        let Rendered { json, script } = render(&path)?;
        let signature = signature(&json, &script);

        let (model, usage) = path
            .tip_edge
            .as_ref()
            .and_then(|edge| edge.completion.as_ref())
            .map_or((None, None), |meta| (Some(meta.model.clone()), Some(meta.usage)));
        let snapshot = self
            .store
            .merge_snapshot(NewSnapshot {
                message_id: tip.id.clone(),
                signature,
                timestamp: convo_core::timestamp::now(),
                json,
                script,
                model,
                usage,
            })
            .await?;

        tracing::info!(
            tip_id = %tip_id,
            signature = snapshot.snapshot.signature,
            created = snapshot.created,
            messages = path.messages.len(),
            "Snapshot stored"
        );
        Ok(snapshot)
    }

    /// Snapshots of `tip_id`, most recently requested first.
    pub async fn snapshots(&self, tip_id: &str, limit: usize) -> Result<Vec<Snapshot>> {
        if self.store.get_message(tip_id).await?.is_none() {
            return Err(EngineError::NotFound(tip_id.to_string()));
        }
        Ok(self.store.snapshots(tip_id, limit.max(1)).await?)
    }
}
