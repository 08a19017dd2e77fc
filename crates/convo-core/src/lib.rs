//! convo-core - Shared schema for the branching conversation store
//!
//! This crate provides the types used across the convo crates:
//! - `message` - Message, ChatMessage, ToolCall
//! - `branch` - BranchEdge and the completion metadata carried on it
//! - `topic` - Topic / Tag side-data attached to conversation roots
//! - `snapshot` - ConversationSnapshot and SnapshotEdge
//! - `id` - message identity service
//! - `timestamp` - canonical timestamp rendering
//! - `config` - file + environment configuration

pub mod branch;
pub mod config;
pub mod id;
pub mod message;
pub mod snapshot;
pub mod timestamp;
pub mod topic;

// Re-export commonly used types
pub use branch::{BranchEdge, CompletionMeta, TokenUsage};
pub use config::{Config, ConfigError};
pub use id::{is_message_id, new_message_id};
pub use message::{ChatMessage, FunctionCall, Message, Role, ToolCall};
pub use snapshot::{ConversationSnapshot, Snapshot, SnapshotEdge};
pub use timestamp::{format_timestamp, parse_timestamp};
pub use topic::{Tag, Topic, TopicWithTags};
