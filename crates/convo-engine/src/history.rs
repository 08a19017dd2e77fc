//! Root-to-tip history of a conversation node.

use std::collections::HashSet;
use std::sync::Arc;

use convo_core::{BranchEdge, Message, TopicWithTags};
use convo_store::{AncestorPath, GraphStore};

use crate::error::{EngineError, Result};

/// Validated ancestor path: messages root first, plus the root's topic when
/// it was requested.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub messages: Vec<Message>,
    pub topic: Option<TopicWithTags>,
    /// Incoming edge of the tip; `None` when the tip is a root.
    pub tip_edge: Option<BranchEdge>,
}

impl ResolvedPath {
    pub fn root(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn tip(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[derive(Clone)]
pub struct HistoryResolver {
    store: Arc<dyn GraphStore>,
}

impl HistoryResolver {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Messages from the root down to `tip_id`, inclusive.
    pub async fn resolve(&self, tip_id: &str) -> Result<Vec<Message>> {
        Ok(self.resolve_path(tip_id, false).await?.messages)
    }

    pub async fn resolve_path(&self, tip_id: &str, with_topic: bool) -> Result<ResolvedPath> {
        let path = self.store.ancestor_path(tip_id, with_topic).await?;
        let resolved = validate_path(tip_id, path)?;

        tracing::debug!(
            tip_id = %tip_id,
            depth = resolved.messages.len() - 1,
            has_topic = resolved.topic.is_some(),
            "Resolved history"
        );
        Ok(resolved)
    }
}

/// Check that `path` is a simple chain from a root down to `tip_id`.
pub fn validate_path(tip_id: &str, path: AncestorPath) -> Result<ResolvedPath> {
    let AncestorPath { nodes, topic } = path;

    let Some(first) = nodes.first() else {
        return Err(EngineError::NotFound(tip_id.to_string()));
    };
    if let Some(parent_id) = first.parent_id() {
        return Err(EngineError::Integrity(format!(
            "history of {tip_id} does not reach a root: {} still has parent {parent_id}",
            first.message.id
        )));
    }

    let mut seen = HashSet::with_capacity(nodes.len());
    let mut previous: Option<&str> = None;
    for node in &nodes {
        if !seen.insert(node.message.id.as_str()) {
            return Err(EngineError::Integrity(format!(
                "message {} appears twice in history of {tip_id}",
                node.message.id
            )));
        }
        if node.parent_id() != previous {
            return Err(EngineError::Integrity(format!(
                "message {} is not linked to {:?}",
                node.message.id, previous
            )));
        }
        previous = Some(node.message.id.as_str());
    }

    if previous != Some(tip_id) {
        return Err(EngineError::Integrity(format!(
            "history ends at {previous:?} instead of {tip_id}"
        )));
    }

    let mut messages = Vec::with_capacity(nodes.len());
    let mut tip_edge = None;
    for node in nodes {
        messages.push(node.message);
        tip_edge = node.edge;
    }

    Ok(ResolvedPath {
        messages,
        topic,
        tip_edge,
    })
}
