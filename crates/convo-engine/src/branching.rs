//! Fan a conversation tip out into one child per completion choice.

use std::sync::Arc;

use convo_core::timestamp::from_epoch_seconds;
use convo_core::{BranchEdge, ChatMessage, CompletionMeta, Message, TokenUsage};
use convo_llm::{ChatCompletion, CompletionProvider};
use convo_store::GraphStore;

use crate::error::{EngineError, Result};
use crate::history::HistoryResolver;

#[derive(Clone)]
pub struct BranchGenerator {
    store: Arc<dyn GraphStore>,
    provider: Arc<dyn CompletionProvider>,
    history: HistoryResolver,
}

impl BranchGenerator {
    pub fn new(store: Arc<dyn GraphStore>, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            history: HistoryResolver::new(store.clone()),
            store,
            provider,
        }
    }

    /// Ask `model` to continue the conversation at `tip_id`; every returned
    /// choice becomes a child of the tip.
    ///
    /// Provider, integrity and serialization failures are logged and yield an
    /// empty vector with nothing written. A missing tip and store failures are
    /// still returned.
    pub async fn generate(&self, tip_id: &str, model: &str) -> Result<Vec<(Message, BranchEdge)>> {
        match self.try_generate(tip_id, model).await {
            Err(error) if error.is_fail_soft() => {
                tracing::error!(tip_id = %tip_id, model = %model, error = %error, "Branch generation failed");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Like [`generate`](Self::generate) but every failure is returned.
    pub async fn try_generate(
        &self,
        tip_id: &str,
        model: &str,
    ) -> Result<Vec<(Message, BranchEdge)>> {
        let history = self.history.resolve(tip_id).await?;
        if history.is_empty() {
            return Err(EngineError::Integrity(format!("empty history for {tip_id}")));
        }

        let request: Vec<ChatMessage> = history.iter().map(Message::to_chat).collect();
        tracing::debug!(
            tip_id = %tip_id,
            model = %model,
            messages = request.len(),
            "Requesting completion"
        );

        let completion = self.provider.complete(model, &request).await?;
        let children = children_from_completion(tip_id, completion);

        let created = self.store.create_branches(tip_id, children).await?;
        tracing::info!(
            tip_id = %tip_id,
            branches = created.len(),
            "Created branches"
        );
        Ok(created)
    }
}

/// One message plus edge metadata per usable choice, in provider order.
fn children_from_completion(
    tip_id: &str,
    completion: ChatCompletion,
) -> Vec<(Message, CompletionMeta)> {
    let ChatCompletion {
        id,
        created,
        model,
        system_fingerprint,
        choices,
        usage,
        ..
    } = completion;

    let created = from_epoch_seconds(created).unwrap_or_else(|| {
        tracing::warn!(completion_id = %id, created, "Completion timestamp out of range, using now");
        convo_core::timestamp::now()
    });
    let usage = TokenUsage::from(usage);

    let mut children = Vec::with_capacity(choices.len());
    for choice in choices {
        let Some(chat) = choice.message else {
            tracing::warn!(
                tip_id = %tip_id,
                completion_id = %id,
                index = choice.index,
                "Skipping choice without a message"
            );
            continue;
        };

        let meta = CompletionMeta {
            created,
            model: model.clone(),
            system_fingerprint: system_fingerprint.clone(),
            usage,
            finish_reason: choice.finish_reason,
            index: choice.index,
        };
        children.push((Message::from_chat(chat), meta));
    }
    children
}
