use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::branch::TokenUsage;

/// Immutable export of a tip's history, keyed by `(message_id, signature)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSnapshot {
    /// Id of the tip message the snapshot was taken from.
    pub message_id: String,
    /// CRC-32C over `json` followed by `script`.
    pub signature: u32,
    pub timestamp: DateTime<Utc>,
    /// Transcript: JSON array of chat messages, root first.
    pub json: String,
    /// Replay script reconstructing the messages, branch edges, topic and tags.
    pub script: String,
}

/// Tip -> snapshot link. Its timestamp is refreshed whenever the snapshot is re-requested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEdge {
    pub message_id: String,
    pub signature: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub snapshot: ConversationSnapshot,
    pub edge: SnapshotEdge,
    /// False when an identical snapshot already existed and was reused.
    pub created: bool,
}
