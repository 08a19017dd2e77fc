use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use convo_core::{
    format_timestamp, parse_timestamp, BranchEdge, CompletionMeta, ConversationSnapshot, Message,
    Role, Snapshot, SnapshotEdge, Tag, TokenUsage, ToolCall, Topic, TopicWithTags,
};
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior,
};

use crate::error::{StoreError, StoreResult};
use crate::graph::{AncestorPath, GraphStore, NewSnapshot, PathNode};
use crate::schema::SCHEMA;

const DEFAULT_MAX_DEPTH: u32 = 10_000;
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const REPLAY_TABLES: [&str; 6] = ["messages", "branches", "topics", "initiates", "tags", "has_tag"];

const MESSAGE_COLUMNS: &str = "m.id, m.role, m.content, m.tool_calls, m.tool_call_id, m.timestamp";
const BRANCH_COLUMNS: &str = "b.parent_id, b.created, b.model, b.system_fingerprint, \
     b.completion_tokens, b.prompt_tokens, b.total_tokens, b.finish_reason, b.choice_index";

/// SQLite-backed graph store. Each call opens its own connection on a
/// blocking thread, so one store can be shared freely between tasks.
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    db_path: PathBuf,
    max_depth: u32,
}

impl SqliteGraphStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Create the store and its schema.
    pub async fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let store = Self::new(db_path);
        store.init().await?;
        Ok(store)
    }

    /// Bound on ancestor-path length; a longer walk is reported as not reaching a root.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_connection<T, F>(&self, func: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = open_connection(&db_path)?;
            func(&mut connection)
        })
        .await
        .map_err(|error| StoreError::Task(error.to_string()))?
    }

    /// Run `func` inside a `BEGIN IMMEDIATE` transaction, committing on success.
    async fn write<T, F>(&self, func: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> StoreResult<T> + Send + 'static,
    {
        self.with_connection(move |connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = func(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn init(&self) -> StoreResult<()> {
        self.with_connection(|connection| {
            connection.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    async fn insert_root(&self, message: &Message) -> StoreResult<()> {
        let message = message.clone();
        self.write(move |tx| insert_message(tx, &message)).await
    }

    async fn append_message(&self, parent_id: &str, message: &Message) -> StoreResult<BranchEdge> {
        let parent_id = parent_id.to_string();
        let message = message.clone();

        self.write(move |tx| {
            ensure_message(tx, &parent_id)?;
            insert_message(tx, &message)?;
            let edge = BranchEdge::plain(parent_id, message.id.clone());
            insert_branch(tx, &edge)?;
            Ok(edge)
        })
        .await
    }

    async fn create_branches(
        &self,
        parent_id: &str,
        children: Vec<(Message, CompletionMeta)>,
    ) -> StoreResult<Vec<(Message, BranchEdge)>> {
        let parent_id = parent_id.to_string();

        self.write(move |tx| {
            ensure_message(tx, &parent_id)?;
            let mut created = Vec::with_capacity(children.len());
            for (message, meta) in children {
                insert_message(tx, &message)?;
                let edge = BranchEdge {
                    parent_id: parent_id.clone(),
                    child_id: message.id.clone(),
                    completion: Some(meta),
                };
                insert_branch(tx, &edge)?;
                created.push((message, edge));
            }
            Ok(created)
        })
        .await
    }

    async fn get_message(&self, id: &str) -> StoreResult<Option<Message>> {
        let id = id.to_string();
        self.with_connection(move |connection| load_message(connection, &id))
            .await
    }

    async fn children(&self, id: &str) -> StoreResult<Vec<(Message, BranchEdge)>> {
        let id = id.to_string();

        self.with_connection(move |connection| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}, {BRANCH_COLUMNS} FROM branches b \
                 JOIN messages m ON m.id = b.child_id \
                 WHERE b.parent_id = ?1 ORDER BY b.rowid"
            );
            let mut stmt = connection.prepare(&sql)?;
            let mut rows = stmt.query(params![id])?;
            let mut children = Vec::new();

            while let Some(row) = rows.next()? {
                let message = message_from_row(row, 0)?;
                let edge = edge_from_row(row, 6, &message.id)?.ok_or_else(|| {
                    StoreError::InvalidData(format!("child {} lost its edge", message.id))
                })?;
                children.push((message, edge));
            }

            Ok(children)
        })
        .await
    }

    async fn ancestor_path(&self, tip_id: &str, with_topic: bool) -> StoreResult<AncestorPath> {
        let tip_id = tip_id.to_string();
        let max_depth = self.max_depth;

        self.with_connection(move |connection| {
            // One deferred transaction keeps the path and the topic consistent.
            let tx = connection.transaction()?;
            let sql = format!(
                r#"
                WITH RECURSIVE ancestry(id, depth) AS (
                    SELECT ?1, 0
                    UNION ALL
                    SELECT b.parent_id, a.depth + 1
                    FROM ancestry a JOIN branches b ON b.child_id = a.id
                    WHERE a.depth < ?2
                )
                SELECT {MESSAGE_COLUMNS}, {BRANCH_COLUMNS}
                FROM ancestry a
                JOIN messages m ON m.id = a.id
                LEFT JOIN branches b ON b.child_id = m.id
                ORDER BY a.depth DESC
                "#
            );

            let mut nodes = Vec::new();
            {
                let mut stmt = tx.prepare(&sql)?;
                let mut rows = stmt.query(params![tip_id, max_depth])?;
                while let Some(row) = rows.next()? {
                    let message = message_from_row(row, 0)?;
                    let edge = edge_from_row(row, 6, &message.id)?;
                    nodes.push(PathNode { message, edge });
                }
            }

            if nodes.is_empty() {
                return Err(StoreError::NotFound(tip_id));
            }

            let topic = if with_topic {
                load_topic(&tx, &nodes[0].message.id)?
            } else {
                None
            };
            tx.commit()?;

            Ok(AncestorPath { nodes, topic })
        })
        .await
    }

    async fn attach_topic(
        &self,
        root_id: &str,
        topic: &Topic,
        tags: &[Tag],
    ) -> StoreResult<TopicWithTags> {
        let root_id = root_id.to_string();
        let topic = topic.clone();
        let tags = tags.to_vec();

        self.write(move |tx| {
            ensure_message(tx, &root_id)?;
            let has_parent: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM branches WHERE child_id = ?1)",
                params![root_id],
                |row| row.get(0),
            )?;
            if has_parent {
                return Err(StoreError::NotRoot(root_id));
            }

            tx.execute(
                "INSERT INTO topics (title, summary, description) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(title, summary, description) DO NOTHING",
                params![topic.title, topic.summary, topic.description],
            )?;
            tx.execute(
                "INSERT INTO initiates (message_id, topic_id) \
                 SELECT ?1, id FROM topics WHERE title = ?2 AND summary = ?3 AND description = ?4 \
                 ON CONFLICT(message_id) DO NOTHING",
                params![root_id, topic.title, topic.summary, topic.description],
            )?;
            let topic_id: i64 = tx.query_row(
                "SELECT topic_id FROM initiates WHERE message_id = ?1",
                params![root_id],
                |row| row.get(0),
            )?;

            for tag in &tags {
                tx.execute(
                    "INSERT INTO tags (name, description) VALUES (?1, ?2) \
                     ON CONFLICT(name, description) DO NOTHING",
                    params![tag.name, tag.description],
                )?;
                tx.execute(
                    "INSERT INTO has_tag (topic_id, tag_id) \
                     SELECT ?1, id FROM tags WHERE name = ?2 AND description = ?3 \
                     ON CONFLICT(topic_id, tag_id) DO NOTHING",
                    params![topic_id, tag.name, tag.description],
                )?;
            }

            load_topic(tx, &root_id)?
                .ok_or_else(|| StoreError::InvalidData(format!("topic of {root_id} vanished")))
        })
        .await
    }

    async fn merge_snapshot(&self, snapshot: NewSnapshot) -> StoreResult<Snapshot> {
        self.write(move |tx| {
            ensure_message(tx, &snapshot.message_id)?;
            let signature = i64::from(snapshot.signature);
            let timestamp = format_timestamp(snapshot.timestamp);

            let inserted = tx.execute(
                r#"
                INSERT INTO snapshots (message_id, signature, timestamp, json, script)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(message_id, signature) DO NOTHING
                "#,
                params![
                    snapshot.message_id,
                    signature,
                    timestamp,
                    snapshot.json,
                    snapshot.script
                ],
            )?;

            let usage = snapshot.usage.map(usage_to_db).transpose()?;
            tx.execute(
                r#"
                INSERT INTO snapshot_edges (
                    message_id, signature, timestamp, model,
                    completion_tokens, prompt_tokens, total_tokens
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(message_id, signature) DO UPDATE SET
                    timestamp = excluded.timestamp
                "#,
                params![
                    snapshot.message_id,
                    signature,
                    timestamp,
                    snapshot.model,
                    usage.map(|u| u[0]),
                    usage.map(|u| u[1]),
                    usage.map(|u| u[2]),
                ],
            )?;

            let mut found = query_snapshots(
                tx,
                "WHERE s.message_id = ?1 AND s.signature = ?2",
                params![snapshot.message_id, signature],
            )?;
            let mut merged = found.pop().ok_or_else(|| {
                StoreError::InvalidData(format!("snapshot of {} vanished", snapshot.message_id))
            })?;
            merged.created = inserted == 1;
            if !merged.created {
                log::debug!(
                    "Snapshot {:08x} of {} already stored",
                    merged.snapshot.signature,
                    merged.snapshot.message_id
                );
            }
            Ok(merged)
        })
        .await
    }

    async fn snapshots(&self, tip_id: &str, limit: usize) -> StoreResult<Vec<Snapshot>> {
        let tip_id = tip_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_connection(move |connection| {
            query_snapshots(
                connection,
                "WHERE s.message_id = ?1 ORDER BY e.timestamp DESC, s.rowid DESC LIMIT ?2",
                params![tip_id, limit],
            )
        })
        .await
    }

    async fn replay(&self, script: &str) -> StoreResult<()> {
        let script = script.to_string();
        log::debug!("Replaying script of {} bytes into {:?}", script.len(), self.db_path);
        self.write(move |tx| {
            tx.authorizer(Some(authorize_replay));
            let result = tx.execute_batch(&script);
            tx.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
            result.map_err(|error| match error {
                rusqlite::Error::SqliteFailure(failure, message)
                    if failure.code == ErrorCode::AuthorizationForStatementDenied =>
                {
                    let reason = message.unwrap_or_else(|| failure.to_string());
                    log::warn!("Rejected replay script: {}", reason);
                    StoreError::RejectedScript(reason)
                }
                other => StoreError::Sqlite(other),
            })
        })
        .await
    }
}

/// Replay scripts may only insert into the conversation tables and read them
/// back in `INSERT ... SELECT` lookups. Anything else fails at prepare time.
fn authorize_replay(context: AuthContext<'_>) -> Authorization {
    match context.action {
        AuthAction::Insert { table_name } if REPLAY_TABLES.contains(&table_name) => {
            Authorization::Allow
        }
        AuthAction::Read { table_name, .. } if REPLAY_TABLES.contains(&table_name) => {
            Authorization::Allow
        }
        AuthAction::Select => Authorization::Allow,
        _ => Authorization::Deny,
    }
}

fn open_connection(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let connection = Connection::open(path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn ensure_message(connection: &Connection, id: &str) -> StoreResult<()> {
    let exists: bool = connection.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound(id.to_string()))
    }
}

fn insert_message(connection: &Connection, message: &Message) -> StoreResult<()> {
    let tool_calls = message
        .tool_calls
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    connection.execute(
        r#"
        INSERT INTO messages (id, role, content, tool_calls, tool_call_id, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            message.id,
            message.role.as_str(),
            message.content,
            tool_calls,
            message.tool_call_id,
            format_timestamp(message.timestamp),
        ],
    )?;
    Ok(())
}

fn insert_branch(connection: &Connection, edge: &BranchEdge) -> StoreResult<()> {
    let meta = edge.completion.as_ref();
    let usage = meta.map(|m| usage_to_db(m.usage)).transpose()?;
    connection.execute(
        r#"
        INSERT INTO branches (
            child_id, parent_id, created, model, system_fingerprint,
            completion_tokens, prompt_tokens, total_tokens, finish_reason, choice_index
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            edge.child_id,
            edge.parent_id,
            meta.map(|m| format_timestamp(m.created)),
            meta.map(|m| m.model.as_str()),
            meta.and_then(|m| m.system_fingerprint.as_deref()),
            usage.map(|u| u[0]),
            usage.map(|u| u[1]),
            usage.map(|u| u[2]),
            meta.and_then(|m| m.finish_reason.as_deref()),
            meta.map(|m| i64::from(m.index)),
        ],
    )?;
    Ok(())
}

fn load_message(connection: &Connection, id: &str) -> StoreResult<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
    let mut stmt = connection.prepare(&sql)?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(message_from_row(row, 0)?)),
        None => Ok(None),
    }
}

fn load_topic(connection: &Connection, root_id: &str) -> StoreResult<Option<TopicWithTags>> {
    let topic = connection
        .query_row(
            "SELECT t.id, t.title, t.summary, t.description FROM initiates i \
             JOIN topics t ON t.id = i.topic_id WHERE i.message_id = ?1",
            params![root_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    Topic {
                        title: row.get(1)?,
                        summary: row.get(2)?,
                        description: row.get(3)?,
                    },
                ))
            },
        )
        .optional()?;

    let Some((topic_id, topic)) = topic else {
        return Ok(None);
    };

    let mut stmt = connection.prepare(
        "SELECT g.name, g.description FROM has_tag h JOIN tags g ON g.id = h.tag_id \
         WHERE h.topic_id = ?1 ORDER BY g.name, g.description",
    )?;
    let mut rows = stmt.query(params![topic_id])?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next()? {
        tags.push(Tag {
            name: row.get(0)?,
            description: row.get(1)?,
        });
    }

    Ok(Some(TopicWithTags { topic, tags }))
}

fn query_snapshots(
    connection: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<Snapshot>> {
    let sql = format!(
        "SELECT s.message_id, s.signature, s.timestamp, s.json, s.script, \
                e.timestamp, e.model, e.completion_tokens, e.prompt_tokens, e.total_tokens \
         FROM snapshots s JOIN snapshot_edges e \
           ON e.message_id = s.message_id AND e.signature = s.signature {clause}"
    );
    let mut stmt = connection.prepare(&sql)?;
    let mut rows = stmt.query(params)?;
    let mut snapshots = Vec::new();

    while let Some(row) = rows.next()? {
        let message_id: String = row.get(0)?;
        let signature = signature_from_db(row.get(1)?)?;
        let usage = usage_from_row(row, 7)?;
        snapshots.push(Snapshot {
            snapshot: ConversationSnapshot {
                message_id: message_id.clone(),
                signature,
                timestamp: parse_timestamp(&row.get::<_, String>(2)?)?,
                json: row.get(3)?,
                script: row.get(4)?,
            },
            edge: SnapshotEdge {
                message_id,
                signature,
                timestamp: parse_timestamp(&row.get::<_, String>(5)?)?,
                model: row.get(6)?,
                usage,
            },
            created: false,
        });
    }

    Ok(snapshots)
}

fn message_from_row(row: &Row<'_>, offset: usize) -> StoreResult<Message> {
    let id: String = row.get(offset)?;
    let role = Role::from_db(&row.get::<_, String>(offset + 1)?);
    let tool_calls = row
        .get::<_, Option<String>>(offset + 3)?
        .map(|raw| serde_json::from_str::<Vec<ToolCall>>(&raw))
        .transpose()?;

    Ok(Message {
        role,
        content: row.get(offset + 2)?,
        tool_calls,
        tool_call_id: row.get(offset + 4)?,
        timestamp: parse_timestamp(&row.get::<_, String>(offset + 5)?)?,
        id,
    })
}

/// Read the `BRANCH_COLUMNS` block at `offset`; `None` when the message has no parent.
fn edge_from_row(row: &Row<'_>, offset: usize, child_id: &str) -> StoreResult<Option<BranchEdge>> {
    let Some(parent_id) = row.get::<_, Option<String>>(offset)? else {
        return Ok(None);
    };

    let completion = match row.get::<_, Option<String>>(offset + 1)? {
        Some(created) => Some(CompletionMeta {
            created: parse_timestamp(&created)?,
            model: row.get::<_, Option<String>>(offset + 2)?.unwrap_or_default(),
            system_fingerprint: row.get(offset + 3)?,
            usage: usage_from_row(row, offset + 4)?.unwrap_or_default(),
            finish_reason: row.get(offset + 7)?,
            index: row
                .get::<_, Option<i64>>(offset + 8)?
                .map(u32::try_from)
                .transpose()
                .map_err(|_| StoreError::InvalidData(format!("bad choice index on {child_id}")))?
                .unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Some(BranchEdge {
        parent_id,
        child_id: child_id.to_string(),
        completion,
    }))
}

fn usage_from_row(row: &Row<'_>, offset: usize) -> StoreResult<Option<TokenUsage>> {
    let completion: Option<i64> = row.get(offset)?;
    let prompt: Option<i64> = row.get(offset + 1)?;
    let total: Option<i64> = row.get(offset + 2)?;

    let (Some(completion), Some(prompt), Some(total)) = (completion, prompt, total) else {
        return Ok(None);
    };
    let count = |raw: i64| {
        u64::try_from(raw)
            .map_err(|_| StoreError::InvalidData(format!("negative token count: {raw}")))
    };
    Ok(Some(TokenUsage {
        completion_tokens: count(completion)?,
        prompt_tokens: count(prompt)?,
        total_tokens: count(total)?,
    }))
}

/// Token counts as SQLite integers: completion, prompt, total.
fn usage_to_db(usage: TokenUsage) -> StoreResult<[i64; 3]> {
    let count = |value: u64| {
        i64::try_from(value)
            .map_err(|_| StoreError::InvalidData(format!("token count too large: {value}")))
    };
    Ok([
        count(usage.completion_tokens)?,
        count(usage.prompt_tokens)?,
        count(usage.total_tokens)?,
    ])
}

fn signature_from_db(raw: i64) -> StoreResult<u32> {
    u32::try_from(raw).map_err(|_| StoreError::InvalidData(format!("signature out of range: {raw}")))
}
