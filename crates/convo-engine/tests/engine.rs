mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{completion, open_store, seed_greeting, FakeProvider};
use convo_core::{FunctionCall, Message, Role, Tag, ToolCall, Topic};
use convo_engine::{ConversationEngine, EngineError};
use convo_llm::ProviderError;
use convo_store::GraphStore;
use tempfile::tempdir;

fn engine(store: Arc<dyn GraphStore>, provider: Arc<FakeProvider>) -> ConversationEngine {
    ConversationEngine::new(store, provider, "gpt-3.5-turbo")
}

#[tokio::test]
async fn two_choices_become_two_children_of_the_tip() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path(), "fanout.db").await;
    let (system, user) = seed_greeting(store.as_ref()).await;

    let provider = Arc::new(FakeProvider::new());
    provider.push(Ok(completion(&["Hi!", "Hello there!"])));
    let engine = engine(store.clone(), provider.clone());

    let created = engine.generate(&user.id, None).await.expect("generate");
    assert_eq!(created.len(), 2);

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "gpt-3.5-turbo");
    assert_eq!(requests[0].1, vec![system.to_chat(), user.to_chat()]);

    for (index, (message, edge)) in created.iter().enumerate() {
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(edge.parent_id, user.id);
        let meta = edge.completion.as_ref().expect("completion metadata");
        assert_eq!(meta.index as usize, index);
        assert_eq!(meta.model, "gpt-fake");
        assert_eq!(meta.usage.total_tokens, 32);

        let history = engine.resolve(&message.id).await.expect("resolve");
        let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![system.id.as_str(), user.id.as_str(), message.id.as_str()]);
    }
    assert_eq!(
        created[1].1.completion.as_ref().unwrap().finish_reason.as_deref(),
        Some("length")
    );

    let children = store.children(&user.id).await.expect("children");
    assert_eq!(children, created);
}

#[tokio::test]
async fn explicit_model_overrides_default() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path(), "model.db").await;
    let (_, user) = seed_greeting(store.as_ref()).await;

    let provider = Arc::new(FakeProvider::new());
    provider.push(Ok(completion(&["ok"])));
    let engine = engine(store, provider.clone());

    engine
        .generate(&user.id, Some("gpt-4o"))
        .await
        .expect("generate");
    assert_eq!(provider.requests()[0].0, "gpt-4o");
}

#[tokio::test]
async fn concurrent_generations_each_append_their_own_children() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path(), "concurrent.db").await;
    let (_, user) = seed_greeting(store.as_ref()).await;

    let provider = Arc::new(FakeProvider::new());
    provider.push(Ok(completion(&["a1", "a2"])));
    provider.push(Ok(completion(&["b1", "b2", "b3"])));
    let engine = engine(store.clone(), provider);

    let (first, second) = tokio::join!(
        engine.generate(&user.id, None),
        engine.generate(&user.id, None)
    );
    let first = first.expect("first generate");
    let second = second.expect("second generate");

    let mut sizes = vec![first.len(), second.len()];
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 3]);

    let children = store.children(&user.id).await.expect("children");
    assert_eq!(children.len(), 5);
    let ids: HashSet<&str> = children.iter().map(|(m, _)| m.id.as_str()).collect();
    assert_eq!(ids.len(), 5);

    for (message, _) in &children {
        assert!(store.children(&message.id).await.expect("grandchildren").is_empty());
    }
}

#[tokio::test]
async fn provider_failure_writes_nothing() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path(), "failure.db").await;
    let (_, user) = seed_greeting(store.as_ref()).await;

    let provider = Arc::new(FakeProvider::new());
    provider.push(Err(ProviderError::Status {
        status: 500,
        body: "boom".to_string(),
    }));
    provider.push(Err(ProviderError::UnexpectedObject("text_completion".to_string())));
    let engine = engine(store.clone(), provider);

    let soft = engine.generate(&user.id, None).await.expect("fail-soft");
    assert!(soft.is_empty());

    let strict = engine.try_generate(&user.id, None).await.unwrap_err();
    assert!(matches!(
        strict,
        EngineError::Provider(ProviderError::UnexpectedObject(_))
    ));

    assert!(store.children(&user.id).await.expect("children").is_empty());
}

#[tokio::test]
async fn missing_tip_is_not_found() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path(), "missing.db").await;
    let provider = Arc::new(FakeProvider::new());
    let engine = engine(store, provider.clone());

    let err = engine.generate("no-such-id", None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ref id) if id == "no-such-id"));
    assert!(provider.requests().is_empty());

    let err = engine.snapshot("no-such-id").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn resolve_length_is_depth_plus_one() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path(), "depth.db").await;
    let engine = engine(store.clone(), Arc::new(FakeProvider::new()));

    let root = Message::system("root");
    store.insert_root(&root).await.expect("root");
    assert_eq!(engine.resolve(&root.id).await.expect("resolve").len(), 1);

    let mut tip = root.id.clone();
    for depth in 1..=5 {
        let next = Message::user(format!("turn {depth}"));
        store.append_message(&tip, &next).await.expect("append");
        tip = next.id.clone();

        let history = engine.resolve(&tip).await.expect("resolve");
        assert_eq!(history.len(), depth + 1);
        assert_eq!(history.last().map(|m| m.id.as_str()), Some(tip.as_str()));
        assert_eq!(history[0].id, root.id);
    }
}

#[tokio::test]
async fn snapshot_twice_reuses_the_stored_snapshot() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path(), "idempotent.db").await;
    let (_, user) = seed_greeting(store.as_ref()).await;

    let provider = Arc::new(FakeProvider::new());
    provider.push(Ok(completion(&["Hi!"])));
    let engine = engine(store, provider);
    let created = engine.generate(&user.id, None).await.expect("generate");
    let tip = &created[0].0;

    let first = engine.snapshot(&tip.id).await.expect("snapshot").expect("some");
    let second = engine.snapshot(&tip.id).await.expect("snapshot").expect("some");

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.snapshot, second.snapshot);
    assert!(second.edge.timestamp >= first.edge.timestamp);
    assert_eq!(first.edge.model.as_deref(), Some("gpt-fake"));
    assert_eq!(first.edge.usage.map(|u| u.total_tokens), Some(32));

    let stored = engine.snapshots(&tip.id, 10).await.expect("snapshots");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].snapshot.signature, first.snapshot.signature);
    assert_eq!(stored[0].edge.timestamp, second.edge.timestamp);

    assert_eq!(
        first.snapshot.json,
        r#"[{"role":"system","content":"You are a bot"},{"role":"user","content":"Hello"},{"role":"assistant","content":"Hi!"}]"#
    );
}

#[tokio::test]
async fn root_only_snapshot_includes_topic_and_tags() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path(), "root.db").await;
    let engine = engine(store.clone(), Arc::new(FakeProvider::new()));

    let root = Message::system("You are a bot");
    store.insert_root(&root).await.expect("root");
    store
        .attach_topic(
            &root.id,
            &Topic {
                title: "Greetings".to_string(),
                summary: "Small talk".to_string(),
                description: "How the bot says hello".to_string(),
            },
            &[Tag::new("casual", "informal"), Tag::new("intro", "first contact")],
        )
        .await
        .expect("topic");

    let snapshot = engine
        .try_snapshot(&root.id)
        .await
        .expect("root snapshot");

    assert_eq!(
        snapshot.snapshot.json,
        r#"[{"role":"system","content":"You are a bot"}]"#
    );
    let script = &snapshot.snapshot.script;
    assert_eq!(script.matches("INSERT INTO messages").count(), 1);
    assert!(!script.contains("INSERT INTO branches"));
    assert!(script.contains("'Greetings'"));
    assert_eq!(script.matches("INSERT INTO has_tag").count(), 2);
    assert!(snapshot.edge.model.is_none());
}

#[tokio::test]
async fn replayed_script_reproduces_the_snapshot() {
    let dir = tempdir().expect("temp dir");
    let source = open_store(dir.path(), "source.db").await;
    let (system, user) = seed_greeting(source.as_ref()).await;
    source
        .attach_topic(
            &system.id,
            &Topic {
                title: "It's a test".to_string(),
                summary: "quotes ' and ;".to_string(),
                description: String::new(),
            },
            &[Tag::new("replay", "round trip")],
        )
        .await
        .expect("topic");

    let provider = Arc::new(FakeProvider::new());
    provider.push(Ok(completion(&["first", "second"])));
    let source_engine = engine(source, provider);
    let created = source_engine
        .generate(&user.id, None)
        .await
        .expect("generate");
    let mut call = Message::assistant("");
    call.content = None;
    call.tool_calls = Some(vec![ToolCall {
        id: "call_1".to_string(),
        tool_type: "function".to_string(),
        function: FunctionCall {
            name: "lookup".to_string(),
            arguments: r#"{"query":"it's"}"#.to_string(),
        },
    }]);
    let result = Message::tool_result("call_1", "it's\0done");
    let store = source_engine.store();
    store
        .append_message(&created[1].0.id, &call)
        .await
        .expect("tool call");
    store
        .append_message(&call.id, &result)
        .await
        .expect("tool result");

    let tip = &result;
    let original = source_engine
        .try_snapshot(&tip.id)
        .await
        .expect("snapshot");

    let target = open_store(dir.path(), "target.db").await;
    let target_engine = engine(target, Arc::new(FakeProvider::new()));
    target_engine
        .replay(&original.snapshot.script)
        .await
        .expect("replay");
    let rebuilt = target_engine
        .try_snapshot(&tip.id)
        .await
        .expect("snapshot of replayed store");

    assert_eq!(rebuilt.snapshot.json, original.snapshot.json);
    assert_eq!(rebuilt.snapshot.script, original.snapshot.script);
    assert_eq!(rebuilt.snapshot.signature, original.snapshot.signature);
    assert!(rebuilt.created);

    let replayed = target_engine.resolve(&tip.id).await.expect("resolve replayed");
    assert_eq!(replayed.len(), 5);
    assert_eq!(replayed[3], call);
    assert_eq!(replayed[4], result);
    assert_eq!(replayed[4].content.as_deref(), Some("it's\0done"));
}

#[tokio::test]
async fn planted_cycle_is_an_integrity_error() {
    let dir = tempdir().expect("temp dir");
    let store = Arc::new(
        convo_store::SqliteGraphStore::open(dir.path().join("cycle.db"))
            .await
            .expect("open store")
            .with_max_depth(16),
    );
    let conn = rusqlite::Connection::open(dir.path().join("cycle.db")).expect("raw connection");
    conn.execute_batch(
        "INSERT INTO messages (id, role, content, tool_calls, tool_call_id, timestamp) \
         VALUES ('a', 'user', 'a', NULL, NULL, '2024-01-01T00:00:00.000000Z');\n\
         INSERT INTO messages (id, role, content, tool_calls, tool_call_id, timestamp) \
         VALUES ('b', 'assistant', 'b', NULL, NULL, '2024-01-01T00:00:01.000000Z');\n\
         INSERT INTO branches (child_id, parent_id) VALUES ('a', 'b');\n\
         INSERT INTO branches (child_id, parent_id) VALUES ('b', 'a');\n",
    )
    .expect("plant cycle");
    drop(conn);

    let provider = Arc::new(FakeProvider::new());
    let engine = engine(store.clone(), provider.clone());

    let err = engine.resolve("a").await.unwrap_err();
    assert!(matches!(err, EngineError::Integrity(_)));

    assert!(engine.snapshot("a").await.expect("fail-soft").is_none());
    assert!(engine.generate("a", None).await.expect("fail-soft").is_empty());
    assert!(provider.requests().is_empty());
    assert!(store.snapshots("a", 10).await.expect("snapshots").is_empty());
}
