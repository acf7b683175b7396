//! End-to-end turns through the public facade: trigger in, reaction
//! persisted, stream finished, writes mirrored to a live endpoint.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use braid::core::chunks::StreamChunk;
use braid::{
    ActionRegistry, ContextIdentifier, Database, ExecutionStatus, Item, ItemStatus, MirrorClient,
    ReactParams, RunEnv, ScriptedReaction, ScriptedReactor, SqliteStore, ThreadEngine,
    ThreadStore, ThreadStream, ToolCallId, TurnOptions,
};

/// One-shot HTTP fixture: accepts a single request, captures its head and
/// body, answers 200. Stands in for the mirror endpoint.
async fn mirror_fixture() -> (String, oneshot::Receiver<(String, serde_json::Value)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);

            if let Some(header_end) = find_header_end(&raw) {
                let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
                let content_length = head
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(str::to_owned))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    let body: serde_json::Value =
                        serde_json::from_slice(&raw[header_end + 4..header_end + 4 + content_length])
                            .unwrap();
                    socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}")
                        .await
                        .unwrap();
                    let _ = tx.send((head, body));
                    break;
                }
            }
        }
    });

    (format!("http://{addr}"), rx)
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn in_memory_store() -> Arc<dyn ThreadStore> {
    Arc::new(SqliteStore::new(Database::in_memory().unwrap()))
}

#[tokio::test]
async fn one_trigger_one_reaction_one_mirror_batch() {
    let (base_url, captured) = mirror_fixture().await;

    let mut env = RunEnv::new(":memory:");
    env.org_id = Some("org_1".into());
    env.mirror_base_url = Some(base_url);
    env.mirror_token = Some(secrecy::SecretString::from("tok"));

    let store = in_memory_store();
    let engine = ThreadEngine::new(
        Arc::clone(&store),
        Arc::new(ScriptedReactor::new(vec![ScriptedReaction::text("hello back").into()])),
        env,
    )
    .with_mirror(MirrorClient::new());

    let (stream, mut rx) = ThreadStream::channel(64);
    let outcome = engine
        .react(
            Item::input_text("web", "hello"),
            ReactParams {
                identifier: Some(ContextIdentifier::key("e2e")),
                options: TurnOptions { max_model_steps: 1, ..Default::default() },
                stream,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Exactly one execution, completed.
    assert_eq!(outcome.iterations, 1);
    let execution = store.get_execution(&outcome.execution_id).unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    // One assistant item, marked completed.
    let items = store.get_items(&ContextIdentifier::key("e2e")).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].status, ItemStatus::Completed);
    assert_eq!(items[1].text(), "hello back");

    // Stream ends in finish, then close.
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks.last(), Some(&StreamChunk::Finish));

    // Exactly one mirror batch: context upsert plus two item upserts (and
    // the execution record), bearer-authenticated at the thread endpoint.
    let (head, body) = captured.await.unwrap();
    assert!(head.starts_with("POST /api/thread "));
    assert!(head.to_ascii_lowercase().contains("authorization: bearer tok"));

    assert_eq!(body["orgId"], "org_1");
    let kinds: Vec<&str> = body["writes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["kind"].as_str().unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec!["context.upsert", "item.upsert", "item.upsert", "execution.upsert"]
    );
    assert_eq!(body["writes"][0]["context"]["key"], "e2e");
    assert_eq!(body["writes"][1]["item"]["type"], "input_text");
    assert_eq!(body["writes"][2]["item"]["type"], "output_text");
}

#[tokio::test]
async fn tool_turn_streams_outputs_in_order() {
    struct Reverse;

    #[async_trait::async_trait]
    impl braid::Action for Reverse {
        fn name(&self) -> &str {
            "reverse"
        }

        fn spec(&self) -> braid::ToolSpec {
            braid::ToolSpec::new(
                "reverse",
                "Reverse a string",
                serde_json::json!({ "type": "object", "properties": { "s": { "type": "string" } } }),
            )
        }

        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: &braid::ActionContext,
        ) -> Result<serde_json::Value, braid::engine::ActionError> {
            let s = args["s"].as_str().unwrap_or_default();
            Ok(serde_json::json!({ "reversed": s.chars().rev().collect::<String>() }))
        }
    }

    let mut actions = ActionRegistry::new();
    actions.register(Arc::new(Reverse));

    let store = in_memory_store();
    let engine = ThreadEngine::new(
        Arc::clone(&store),
        Arc::new(ScriptedReactor::new(vec![
            ScriptedReaction::tool_call(
                "reverse",
                ToolCallId::from_raw("c1"),
                serde_json::json!({ "s": "abc" }),
            )
            .into(),
            ScriptedReaction::text("cba it is").into(),
        ])),
        RunEnv::new(":memory:"),
    )
    .with_actions(actions);

    let (stream, mut rx) = ThreadStream::channel(64);
    let outcome = engine
        .react(
            Item::input_text("web", "reverse abc"),
            ReactParams {
                should_continue: Some(Arc::new(|iteration, _, _| iteration == 0)),
                stream,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.iterations, 2);

    let item = store.get_item(&outcome.reaction_item_id).unwrap().unwrap();
    assert_eq!(item.text(), "cba it is");

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }

    let expected_output = StreamChunk::ToolOutputAvailable {
        tool_call_id: ToolCallId::from_raw("c1"),
        output: serde_json::json!({ "reversed": "cba" }),
    };
    let pos = |c: &StreamChunk| chunks.iter().position(|x| x == c).unwrap();
    assert_eq!(chunks[0], StreamChunk::context_id(outcome.context_id));
    assert!(pos(&StreamChunk::substate(Some("actions"))) < pos(&expected_output));
    assert!(pos(&expected_output) < pos(&StreamChunk::substate(None)));
    assert_eq!(chunks.last(), Some(&StreamChunk::Finish));
}
