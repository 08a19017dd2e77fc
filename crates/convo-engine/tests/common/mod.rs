#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use convo_core::{ChatMessage, Message, Role};
use convo_llm::{ChatCompletion, Choice, CompletionProvider, ProviderError, Usage};
use convo_store::{GraphStore, SqliteGraphStore};

/// Provider answering from a queue of scripted results.
#[derive(Default)]
pub struct FakeProvider {
    responses: Mutex<VecDeque<Result<ChatCompletion, ProviderError>>>,
    requests: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<ChatCompletion, ProviderError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for FakeProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, ProviderError> {
        self.requests
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ProviderError::EmptyChoices))
    }
}

/// Completion with one assistant choice per entry of `contents`.
pub fn completion(contents: &[&str]) -> ChatCompletion {
    ChatCompletion {
        id: "chatcmpl-fake".to_string(),
        object: "chat.completion".to_string(),
        created: 1_700_000_000,
        model: "gpt-fake".to_string(),
        system_fingerprint: Some("fp_fake".to_string()),
        choices: contents
            .iter()
            .enumerate()
            .map(|(index, content)| Choice {
                index: index as u32,
                finish_reason: Some(if index == 0 { "stop" } else { "length" }.to_string()),
                message: Some(ChatMessage::new(Role::Assistant, *content)),
            })
            .collect(),
        usage: Usage {
            completion_tokens: 12,
            prompt_tokens: 20,
            total_tokens: 32,
        },
    }
}

pub async fn open_store(dir: &Path, name: &str) -> Arc<SqliteGraphStore> {
    Arc::new(
        SqliteGraphStore::open(dir.join(name))
            .await
            .expect("open store"),
    )
}

/// Seed `[system: You are a bot, user: Hello]` and return both messages.
pub async fn seed_greeting(store: &dyn GraphStore) -> (Message, Message) {
    let system = Message::system("You are a bot");
    let user = Message::user("Hello");
    store.insert_root(&system).await.expect("insert root");
    store
        .append_message(&system.id, &user)
        .await
        .expect("append user");
    (system, user)
}
