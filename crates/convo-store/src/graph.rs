use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convo_core::{
    BranchEdge, CompletionMeta, Message, Snapshot, Tag, TokenUsage, Topic, TopicWithTags,
};

use crate::error::StoreResult;

/// One message on an ancestor path together with its incoming branch edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    pub message: Message,
    /// `None` for a root.
    pub edge: Option<BranchEdge>,
}

impl PathNode {
    pub fn parent_id(&self) -> Option<&str> {
        self.edge.as_ref().map(|edge| edge.parent_id.as_str())
    }
}

/// Raw answer of the ancestor-path query, topmost node first.
///
/// The store does not check that the path actually ends in a root; callers
/// validate the chain before trusting it.
#[derive(Debug, Clone, Default)]
pub struct AncestorPath {
    pub nodes: Vec<PathNode>,
    /// Topic initiated by the topmost node, when requested and present.
    pub topic: Option<TopicWithTags>,
}

#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub message_id: String,
    pub signature: u32,
    pub timestamp: DateTime<Utc>,
    pub json: String,
    pub script: String,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Graph storage for conversation trees, their topic side-data and snapshots.
///
/// Every mutating call is a single transaction: either everything it writes
/// becomes visible or nothing does.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn init(&self) -> StoreResult<()>;

    /// Create a conversation root.
    async fn insert_root(&self, message: &Message) -> StoreResult<()>;

    /// Create `message` as a child of `parent_id` with a metadata-free edge.
    async fn append_message(&self, parent_id: &str, message: &Message) -> StoreResult<BranchEdge>;

    /// Create every child under `parent_id`, in order, in one transaction.
    async fn create_branches(
        &self,
        parent_id: &str,
        children: Vec<(Message, CompletionMeta)>,
    ) -> StoreResult<Vec<(Message, BranchEdge)>>;

    async fn get_message(&self, id: &str) -> StoreResult<Option<Message>>;

    /// Children of `id` in creation order.
    async fn children(&self, id: &str) -> StoreResult<Vec<(Message, BranchEdge)>>;

    /// Walk incoming branch edges up from `tip_id`. Fails with `NotFound` when
    /// the tip does not exist.
    async fn ancestor_path(&self, tip_id: &str, with_topic: bool) -> StoreResult<AncestorPath>;

    /// Attach a topic and its tags to a root. A root keeps the first topic it
    /// was given; tags are added to whichever topic the root ends up with.
    async fn attach_topic(
        &self,
        root_id: &str,
        topic: &Topic,
        tags: &[Tag],
    ) -> StoreResult<TopicWithTags>;

    /// Create the snapshot keyed by `(message_id, signature)` unless it already
    /// exists, then create or refresh the tip's snapshot edge.
    async fn merge_snapshot(&self, snapshot: NewSnapshot) -> StoreResult<Snapshot>;

    /// Snapshots of `tip_id`, most recently requested first.
    async fn snapshots(&self, tip_id: &str, limit: usize) -> StoreResult<Vec<Snapshot>>;

    /// Execute a replay script in one transaction.
    async fn replay(&self, script: &str) -> StoreResult<()>;
}
