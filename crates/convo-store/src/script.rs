//! Replay scripts: plain SQL that rebuilds a conversation path in any store
//! sharing [`crate::schema::SCHEMA`].
//!
//! Every statement is an `INSERT ... ON CONFLICT ... DO NOTHING` keyed by a
//! natural key (message id, topic content, tag content), so running a script
//! twice, or against a store that already holds the path, changes nothing.

use std::fmt::Write as _;

use convo_core::{format_timestamp, Message, TopicWithTags};

#[derive(Debug, Default)]
pub struct ReplayScript {
    out: String,
    messages: usize,
}

impl ReplayScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages written so far.
    pub fn len(&self) -> usize {
        self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages == 0
    }

    /// Append a message, linked from `parent_id` when given.
    pub fn message(&mut self, message: &Message, parent_id: Option<&str>) -> serde_json::Result<()> {
        let tool_calls = message
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let _ = writeln!(
            self.out,
            "INSERT INTO messages (id, role, content, tool_calls, tool_call_id, timestamp) VALUES ({}, {}, {}, {}, {}, {}) ON CONFLICT(id) DO NOTHING;",
            sql_text(&message.id),
            sql_text(message.role.as_str()),
            sql_opt_text(message.content.as_deref()),
            sql_opt_text(tool_calls.as_deref()),
            sql_opt_text(message.tool_call_id.as_deref()),
            sql_text(&format_timestamp(message.timestamp)),
        );
        if let Some(parent_id) = parent_id {
            let _ = writeln!(
                self.out,
                "INSERT INTO branches (child_id, parent_id) VALUES ({}, {}) ON CONFLICT(child_id) DO NOTHING;",
                sql_text(&message.id),
                sql_text(parent_id),
            );
        }
        self.out.push('\n');
        self.messages += 1;
        Ok(())
    }

    /// Append a topic initiated by `root_id` and its tags.
    pub fn topic(&mut self, root_id: &str, topic: &TopicWithTags) {
        let title = sql_text(&topic.topic.title);
        let summary = sql_text(&topic.topic.summary);
        let description = sql_text(&topic.topic.description);

        let _ = writeln!(
            self.out,
            "INSERT INTO topics (title, summary, description) VALUES ({title}, {summary}, {description}) ON CONFLICT(title, summary, description) DO NOTHING;"
        );
        let _ = writeln!(
            self.out,
            "INSERT INTO initiates (message_id, topic_id) SELECT {}, id FROM topics WHERE title = {title} AND summary = {summary} AND description = {description} ON CONFLICT(message_id) DO NOTHING;",
            sql_text(root_id),
        );
        for tag in &topic.tags {
            let name = sql_text(&tag.name);
            let tag_description = sql_text(&tag.description);
            let _ = writeln!(
                self.out,
                "INSERT INTO tags (name, description) VALUES ({name}, {tag_description}) ON CONFLICT(name, description) DO NOTHING;"
            );
            let _ = writeln!(
                self.out,
                "INSERT INTO has_tag (topic_id, tag_id) SELECT t.id, g.id FROM topics t, tags g WHERE t.title = {title} AND t.summary = {summary} AND t.description = {description} AND g.name = {name} AND g.description = {tag_description} ON CONFLICT(topic_id, tag_id) DO NOTHING;"
            );
        }
        self.out.push('\n');
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Render a SQL string literal. Text containing NUL is emitted as a cast blob
/// since SQLite stops reading statement text at the first NUL.
pub fn sql_text(value: &str) -> String {
    if value.contains('\0') {
        return format!("CAST(X'{}' AS TEXT)", hex::encode_upper(value.as_bytes()));
    }
    format!("'{}'", value.replace('\'', "''"))
}

pub fn sql_opt_text(value: Option<&str>) -> String {
    value.map_or_else(|| "NULL".to_string(), sql_text)
}
