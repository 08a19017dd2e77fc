//! Table layout of the SQLite graph store.
//!
//! `branches.child_id` is the primary key, so a message has at most one
//! parent. Replay scripts target these tables directly.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    role TEXT NOT NULL,
    content TEXT,
    tool_calls TEXT,
    tool_call_id TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    child_id TEXT PRIMARY KEY,
    parent_id TEXT NOT NULL,
    created TEXT,
    model TEXT,
    system_fingerprint TEXT,
    completion_tokens INTEGER,
    prompt_tokens INTEGER,
    total_tokens INTEGER,
    finish_reason TEXT,
    choice_index INTEGER,
    CHECK (child_id <> parent_id),
    FOREIGN KEY(child_id) REFERENCES messages(id),
    FOREIGN KEY(parent_id) REFERENCES messages(id)
);

CREATE TABLE IF NOT EXISTS topics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    summary TEXT NOT NULL,
    description TEXT NOT NULL,
    UNIQUE(title, summary, description)
);

CREATE TABLE IF NOT EXISTS initiates (
    message_id TEXT PRIMARY KEY,
    topic_id INTEGER NOT NULL,
    FOREIGN KEY(message_id) REFERENCES messages(id),
    FOREIGN KEY(topic_id) REFERENCES topics(id)
);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    UNIQUE(name, description)
);

CREATE TABLE IF NOT EXISTS has_tag (
    topic_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    PRIMARY KEY(topic_id, tag_id),
    FOREIGN KEY(topic_id) REFERENCES topics(id),
    FOREIGN KEY(tag_id) REFERENCES tags(id)
);

CREATE TABLE IF NOT EXISTS snapshots (
    message_id TEXT NOT NULL,
    signature INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    json TEXT NOT NULL,
    script TEXT NOT NULL,
    PRIMARY KEY(message_id, signature),
    FOREIGN KEY(message_id) REFERENCES messages(id)
);

CREATE TABLE IF NOT EXISTS snapshot_edges (
    message_id TEXT NOT NULL,
    signature INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    model TEXT,
    completion_tokens INTEGER,
    prompt_tokens INTEGER,
    total_tokens INTEGER,
    PRIMARY KEY(message_id, signature),
    FOREIGN KEY(message_id, signature) REFERENCES snapshots(message_id, signature)
);

CREATE INDEX IF NOT EXISTS idx_branches_parent ON branches(parent_id);
CREATE INDEX IF NOT EXISTS idx_snapshot_edges_timestamp ON snapshot_edges(message_id, timestamp);
"#;
