use convo_core::ChatMessage;
use convo_store::ReplayScript;

use crate::history::ResolvedPath;

/// Transcript and replay script rendered from one resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub json: String,
    pub script: String,
}

/// Render `path` as a JSON array of chat messages and an idempotent script
/// that recreates the messages, their branch edges and the root's topic.
pub fn render(path: &ResolvedPath) -> serde_json::Result<Rendered> {
    let mut transcript: Vec<ChatMessage> = Vec::with_capacity(path.messages.len());
    let mut script = ReplayScript::new();
    let mut parent_id: Option<&str> = None;

    for message in &path.messages {
        transcript.push(message.to_chat());
        script.message(message, parent_id)?;
        parent_id = Some(message.id.as_str());
    }

    if let (Some(root), Some(topic)) = (path.root(), path.topic.as_ref()) {
        script.topic(&root.id, topic);
    }

    Ok(Rendered {
        json: serde_json::to_string(&transcript)?,
        script: script.finish(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use convo_core::{Message, Tag, Topic, TopicWithTags};

    #[test]
    fn transcript_omits_ids_and_absent_fields() {
        let root = Message::system("You are a bot");
        let user = Message::user("Hello");
        let rendered = render(&ResolvedPath {
            messages: vec![root.clone(), user],
            topic: None,
            tip_edge: None,
        })
        .unwrap();

        assert_eq!(
            rendered.json,
            r#"[{"role":"system","content":"You are a bot"},{"role":"user","content":"Hello"}]"#
        );
        assert!(!rendered.json.contains(&root.id));
        assert_eq!(rendered.script.matches("INSERT INTO messages").count(), 2);
        assert_eq!(rendered.script.matches("INSERT INTO branches").count(), 1);
        assert!(!rendered.script.contains("INSERT INTO topics"));
    }

    #[test]
    fn topic_is_scripted_against_the_root() {
        let root = Message::system("sys");
        let rendered = render(&ResolvedPath {
            messages: vec![root.clone()],
            topic: Some(TopicWithTags {
                topic: Topic {
                    title: "t".to_string(),
                    summary: "s".to_string(),
                    description: "d".to_string(),
                },
                tags: vec![Tag::new("n", "d")],
            }),
            tip_edge: None,
        })
        .unwrap();

        assert!(rendered
            .script
            .contains(&format!("SELECT '{}', id FROM topics", root.id)));
        assert_eq!(rendered.script.matches("INSERT INTO has_tag").count(), 1);
    }
}
