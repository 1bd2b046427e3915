//! Tests for `AgentProvider`
//!
//! End-to-end turns against the scripted agent: streaming, reuse,
//! permissions, cancellation and failures

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;

use common::{FakeLauncher, Script, agent, drain, eventually, manager, message_chunk, option, thought_chunk};
use kodegen_acp_bridge::{
    AgentError, AgentProvider, BlockSink, ChatRequest, ConversationId, MessageBlock,
    ModelProvider, SessionManager, StopReason, StreamEvent,
};

fn provider(launcher: &FakeLauncher) -> AgentProvider {
    AgentProvider::new(SessionManager::new(manager(launcher)))
}

fn request(conversation: &str, prompt: &str) -> ChatRequest {
    ChatRequest::new(conversation, agent("echo-agent"), prompt)
}

async fn next_event(stream: &mut kodegen_acp_bridge::EventStream) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no event within timeout")
        .expect("stream ended early")
}

#[tokio::test]
async fn test_echo_turn_streams_text_then_stop() {
    let _ = env_logger::builder().is_test(true).try_init();

    let launcher = FakeLauncher::new(Script::echo("hello"));
    let provider = provider(&launcher);

    let events = drain(provider.stream(request("conv-1", "hi"))).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::text("hello"),
            StreamEvent::Stop {
                reason: StopReason::Complete
            },
        ]
    );
    let prompts = launcher.log().params("session/prompt");
    assert_eq!(prompts[0]["prompt"], json!([{"type": "text", "text": "hi"}]));

    provider.shutdown().await;
}

#[tokio::test]
async fn test_second_turn_reuses_process_and_session() {
    let launcher = FakeLauncher::new(Script::echo("hello"));
    let provider = provider(&launcher);

    drain(provider.stream(request("conv-1", "one"))).await;
    let events = drain(provider.stream(request("conv-1", "two"))).await;

    assert_eq!(events.first(), Some(&StreamEvent::text("hello")));
    assert_eq!(launcher.spawn_count(), 1);
    assert_eq!(launcher.log().count("initialize"), 1);
    assert_eq!(launcher.log().count("session/new"), 1);
    assert_eq!(launcher.log().count("session/prompt"), 2);
    assert!(!provider.is_streaming(&ConversationId::new("conv-1")));
}

#[tokio::test]
async fn test_usage_and_thoughts_are_forwarded() {
    let mut script =
        Script::echo("").turn(vec![thought_chunk("thinking"), message_chunk("answer")]);
    script.usage = Some(json!({"inputTokens": 12, "outputTokens": 3}));
    let launcher = FakeLauncher::new(script);
    let provider = provider(&launcher);

    let response = provider.complete(request("conv-1", "q")).await.unwrap();

    assert_eq!(response.text, "answer");
    assert_eq!(response.reasoning, "thinking");
    assert_eq!(response.usage.map(|u| u.total()), Some(15));
    assert_eq!(response.stop_reason, Some(StopReason::Complete));
}

#[tokio::test]
async fn test_permission_request_round_trip() {
    let launcher = FakeLauncher::new(
        Script::echo("done").permission(vec![
            option("always", "allow_always"),
            option("once", "allow_once"),
            option("no", "reject_once"),
        ]),
    );
    let provider = provider(&launcher);

    let mut stream = provider.stream(request("conv-1", "write it"));
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        if let StreamEvent::PermissionRequested(prompt) = &event {
            assert_eq!(prompt.title, "Write file");
            assert_eq!(prompt.options.len(), 3);
            assert_eq!(provider.pending_permissions(), 1);
            provider
                .resolve_permission_request(&prompt.request_id, true)
                .unwrap();
            assert!(provider
                .resolve_permission_request(&prompt.request_id, true)
                .is_err());
        }
        events.push(event);
    }

    assert!(matches!(events.last(), Some(StreamEvent::Stop { .. })));
    assert_eq!(
        launcher.log().permission_outcomes(),
        vec![json!({"outcome": "selected", "optionId": "once"})]
    );
    assert_eq!(provider.pending_permissions(), 0);
}

#[tokio::test]
async fn test_deny_without_reject_option_cancels() {
    let launcher =
        FakeLauncher::new(Script::echo("done").permission(vec![option("once", "allow_once")]));
    let provider = provider(&launcher);

    let mut stream = provider.stream(request("conv-1", "write it"));
    while let Some(event) = stream.next().await {
        if let StreamEvent::PermissionRequested(prompt) = event {
            provider
                .resolve_permission_request(&prompt.request_id, false)
                .unwrap();
        }
    }

    assert_eq!(
        launcher.log().permission_outcomes(),
        vec![json!({"outcome": "cancelled"})]
    );
}

#[tokio::test]
async fn test_clearing_session_force_cancels_pending_permission() {
    let _ = env_logger::builder().is_test(true).try_init();

    let launcher = FakeLauncher::new(
        Script::echo("working")
            .permission(vec![option("once", "allow_once")])
            .hang(),
    );
    let provider = provider(&launcher);
    let conversation = ConversationId::new("conv-1");

    let mut stream = provider.stream(request("conv-1", "write it"));
    assert_eq!(next_event(&mut stream).await, StreamEvent::text("working"));
    assert!(matches!(
        next_event(&mut stream).await,
        StreamEvent::PermissionRequested(_)
    ));

    assert!(provider.sessions().clear_session(&conversation).await);

    let rest = drain(stream).await;
    assert_eq!(rest.len(), 1);
    assert!(matches!(&rest[0], StreamEvent::Error { .. }));
    assert_eq!(provider.pending_permissions(), 0);
    assert!(
        eventually(|| launcher.log().permission_outcomes() == vec![json!({"outcome": "cancelled"})])
            .await
    );
}

#[tokio::test]
async fn test_cancel_ends_stream_without_error() {
    let launcher = FakeLauncher::new(Script::echo("working").hang());
    let provider = provider(&launcher);
    let conversation = ConversationId::new("conv-1");

    let mut stream = provider.stream(request("conv-1", "long task"));
    assert_eq!(next_event(&mut stream).await, StreamEvent::text("working"));

    assert!(provider.cancel(&conversation));
    assert!(!provider.cancel(&conversation));

    assert!(drain(stream).await.is_empty());
    assert!(eventually(|| launcher.log().count("session/cancel") == 1).await);
    let cancel = launcher.log().params("session/cancel");
    assert_eq!(cancel[0]["sessionId"], "sess-1");
}

#[tokio::test]
async fn test_dropping_stream_cancels_turn() {
    let launcher = FakeLauncher::new(Script::echo("working").hang());
    let provider = provider(&launcher);
    let conversation = ConversationId::new("conv-1");

    let mut stream = provider.stream(request("conv-1", "long task"));
    next_event(&mut stream).await;
    assert!(provider.is_streaming(&conversation));

    drop(stream);

    assert!(!provider.is_streaming(&conversation));
    assert!(eventually(|| launcher.log().count("session/cancel") == 1).await);
}

#[tokio::test]
async fn test_new_turn_replaces_running_turn() {
    let launcher = FakeLauncher::new(Script::echo("working").hang());
    let provider = provider(&launcher);
    let conversation = ConversationId::new("conv-1");

    let mut first = provider.stream(request("conv-1", "one"));
    next_event(&mut first).await;

    let mut second = provider.stream(request("conv-1", "two"));
    assert!(drain(first).await.is_empty());
    assert_eq!(next_event(&mut second).await, StreamEvent::text("working"));

    assert!(provider.cancel(&conversation));
    assert!(drain(second).await.is_empty());
    assert_eq!(launcher.log().count("session/new"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replacing_a_starting_turn_keeps_the_new_turns_events() {
    let _ = env_logger::builder().is_test(true).try_init();

    let launcher = FakeLauncher::new(Script::echo("hello"));
    let provider = provider(&launcher);
    assert!(!drain(provider.stream(request("conv-1", "warm up"))).await.is_empty());

    for round in 0..100 {
        // Both turns resolve the session at the same time
        let mut first = provider.stream(request("conv-1", "one"));
        let _ = futures::poll!(first.next());

        let second = drain(provider.stream(request("conv-1", "two"))).await;
        assert!(
            second.contains(&StreamEvent::text("hello")),
            "round {round}: second turn lost its text: {second:?}"
        );
        assert!(
            matches!(second.last(), Some(StreamEvent::Stop { .. })),
            "round {round}: second turn did not stop: {second:?}"
        );
        drop(first);
    }

    assert_eq!(launcher.log().count("session/new"), 1);
}

#[tokio::test]
async fn test_agent_exit_mid_turn_yields_one_error() {
    let launcher = FakeLauncher::new(Script::echo("hello").die_on_prompt());
    let provider = provider(&launcher);

    let events = drain(provider.stream(request("conv-1", "hi"))).await;

    let errors = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Error { .. }))
        .count();
    assert_eq!(errors, 1);
    assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
}

#[tokio::test]
async fn test_startup_failure_yields_error_event() {
    let launcher = FakeLauncher::new(Script::echo("hello").fail_initialize());
    let provider = provider(&launcher);

    let err = provider.complete(request("conv-1", "hi")).await.unwrap_err();
    assert!(matches!(err, AgentError::Turn(_)), "got {err:?}");
    assert!(!provider.is_streaming(&ConversationId::new("conv-1")));
}

#[tokio::test]
async fn test_blocks_reach_sink() {
    #[derive(Default)]
    struct Recorder(Mutex<Vec<(ConversationId, MessageBlock)>>);

    impl BlockSink for Recorder {
        fn append(&self, conversation_id: &ConversationId, block: &MessageBlock) {
            self.0.lock().push((conversation_id.clone(), block.clone()));
        }
    }

    let launcher = FakeLauncher::new(Script::echo("hello"));
    let recorder = Arc::new(Recorder::default());
    let provider =
        AgentProvider::with_sink(SessionManager::new(manager(&launcher)), recorder.clone());

    drain(provider.stream(request("conv-1", "hi"))).await;

    let blocks = recorder.0.lock();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].0.as_str(), "conv-1");
    assert_eq!(
        blocks[0].1,
        MessageBlock::Text {
            text: "hello".into()
        }
    );
}

#[tokio::test]
async fn test_refresh_agents_respawns_on_next_turn() {
    let launcher = FakeLauncher::new(Script::echo("hello"));
    let provider = provider(&launcher);

    drain(provider.stream(request("conv-1", "one"))).await;
    provider.refresh_agents(None).await;
    drain(provider.stream(request("conv-1", "two"))).await;

    assert_eq!(launcher.spawn_count(), 2);
    assert_eq!(launcher.log().count("session/new"), 2);
}
