//! Tests for `ContentMapper`
//!
//! Notifications are parsed from wire JSON so the update tags and field
//! names are covered too.

use serde_json::{Value, json};

use kodegen_acp_bridge::mapper::ContentMapper;
use kodegen_acp_bridge::types::{
    MessageBlock, SessionId, SessionNotification, StreamEvent, ToolCallId, ToolCallStatus,
};

fn note(session: &str, update: Value) -> SessionNotification {
    serde_json::from_value(json!({"sessionId": session, "update": update}))
        .expect("valid notification")
}

fn tool_events(events: Vec<StreamEvent>) -> Vec<StreamEvent> {
    events.into_iter().filter(StreamEvent::is_tool_call).collect()
}

#[test]
fn test_text_and_thought_map_one_to_one() {
    let mut mapper = ContentMapper::new();

    let text = mapper.map(&note(
        "s1",
        json!({"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": "Hi"}}),
    ));
    assert_eq!(text.events, vec![StreamEvent::text("Hi")]);
    assert_eq!(text.blocks, vec![MessageBlock::Text { text: "Hi".into() }]);

    let thought = mapper.map(&note(
        "s1",
        json!({"sessionUpdate": "agent_thought_chunk", "content": {"type": "text", "text": "hmm"}}),
    ));
    assert_eq!(thought.events, vec![StreamEvent::reasoning("hmm")]);
}

#[test]
fn test_tool_call_lifecycle() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut mapper = ContentMapper::new();
    let id = ToolCallId::new("t1");

    let started = mapper.map(&note(
        "s1",
        json!({
            "sessionUpdate": "tool_call",
            "toolCallId": "t1",
            "title": "read_file",
            "status": "pending",
            "rawInput": {},
        }),
    ));
    assert_eq!(
        started.events,
        vec![
            StreamEvent::ToolCallStart {
                id: id.clone(),
                name: "read_file".into(),
            },
            StreamEvent::reasoning("Tool call — `read_file` — `pending`"),
        ]
    );
    assert_eq!(
        started.blocks,
        vec![MessageBlock::ToolCall {
            id: id.clone(),
            name: "read_file".into(),
            status: ToolCallStatus::Pending,
            arguments: None,
        }]
    );

    let running = mapper.map(&note(
        "s1",
        json!({
            "sessionUpdate": "tool_call_update",
            "toolCallId": "t1",
            "status": "in_progress",
            "rawInput": {"path": "src/lib.rs"},
        }),
    ));
    assert_eq!(
        running.events,
        vec![
            StreamEvent::reasoning("Tool call — `read_file` — `in_progress`"),
            StreamEvent::ToolCallChunk {
                id: id.clone(),
                delta: r#"{"path":"src/lib.rs"}"#.into(),
            },
        ]
    );
    assert_eq!(mapper.active_tool_calls(&SessionId::new("s1")), 1);

    let finished = mapper.map(&note(
        "s1",
        json!({"sessionUpdate": "tool_call_update", "toolCallId": "t1", "status": "completed"}),
    ));
    assert_eq!(
        finished.events,
        vec![
            StreamEvent::reasoning("Tool call — `read_file` — `completed`"),
            StreamEvent::ToolCallEnd {
                id: id.clone(),
                arguments: r#"{"path":"src/lib.rs"}"#.into(),
            },
        ]
    );
    assert_eq!(
        finished.blocks,
        vec![MessageBlock::ToolCall {
            id,
            name: "read_file".into(),
            status: ToolCallStatus::Completed,
            arguments: Some(r#"{"path":"src/lib.rs"}"#.into()),
        }]
    );
    assert_eq!(mapper.active_tool_calls(&SessionId::new("s1")), 0);
}

#[test]
fn test_string_fragments_concatenate() {
    let mut mapper = ContentMapper::new();
    let fragment = |mapper: &mut ContentMapper, text: &str, status: &str| {
        tool_events(
            mapper
                .map(&note(
                    "s1",
                    json!({
                        "sessionUpdate": "tool_call_update",
                        "toolCallId": "t2",
                        "title": "search",
                        "status": status,
                        "rawInput": text,
                    }),
                ))
                .events,
        )
    };

    let first = fragment(&mut mapper, "{\"q\":", "in_progress");
    assert_eq!(first.len(), 2);
    assert!(matches!(&first[0], StreamEvent::ToolCallStart { name, .. } if name == "search"));

    let second = fragment(&mut mapper, "\"rust\"}", "in_progress");
    assert_eq!(
        second,
        vec![StreamEvent::ToolCallChunk {
            id: ToolCallId::new("t2"),
            delta: "\"rust\"}".into(),
        }]
    );

    let last = fragment(&mut mapper, "", "completed");
    assert_eq!(
        last,
        vec![StreamEvent::ToolCallEnd {
            id: ToolCallId::new("t2"),
            arguments: r#"{"q":"rust"}"#.into(),
        }]
    );
}

#[test]
fn test_immediately_completed_call_without_arguments() {
    let mut mapper = ContentMapper::new();

    let mapped = mapper.map(&note(
        "s1",
        json!({"sessionUpdate": "tool_call", "toolCallId": "t3", "kind": "execute", "status": "completed"}),
    ));

    assert_eq!(
        tool_events(mapped.events),
        vec![
            StreamEvent::ToolCallStart {
                id: ToolCallId::new("t3"),
                name: "execute".into(),
            },
            StreamEvent::ToolCallEnd {
                id: ToolCallId::new("t3"),
                arguments: "{}".into(),
            },
        ]
    );
}

#[test]
fn test_failed_status_ends_the_call() {
    let mut mapper = ContentMapper::new();
    mapper.map(&note(
        "s1",
        json!({"sessionUpdate": "tool_call", "toolCallId": "t4", "title": "edit", "rawInput": {"file": "a"}}),
    ));

    let failed = mapper.map(&note(
        "s1",
        json!({"sessionUpdate": "tool_call_update", "toolCallId": "t4", "status": "failed"}),
    ));
    assert!(failed.events.contains(&StreamEvent::reasoning("Tool call — `edit` — `failed`")));
    assert!(matches!(
        failed.events.last(),
        Some(StreamEvent::ToolCallEnd { arguments, .. }) if arguments == r#"{"file":"a"}"#
    ));

    // A late update after the end starts a fresh call
    let late = mapper.map(&note(
        "s1",
        json!({"sessionUpdate": "tool_call_update", "toolCallId": "t4", "status": "in_progress"}),
    ));
    assert!(matches!(late.events.first(), Some(StreamEvent::ToolCallStart { .. })));
}

#[test]
fn test_sessions_do_not_share_tool_state() {
    let mut mapper = ContentMapper::new();
    let start = json!({"sessionUpdate": "tool_call", "toolCallId": "same", "title": "grep", "status": "pending"});

    let a = mapper.map(&note("s1", start.clone()));
    let b = mapper.map(&note("s2", start));
    assert!(matches!(a.events.first(), Some(StreamEvent::ToolCallStart { .. })));
    assert!(matches!(b.events.first(), Some(StreamEvent::ToolCallStart { .. })));
    assert_eq!(mapper.active_tool_calls(&SessionId::new("s1")), 1);
    assert_eq!(mapper.active_tool_calls(&SessionId::new("s2")), 1);

    mapper.clear_session(&SessionId::new("s1"));
    assert_eq!(mapper.active_tool_calls(&SessionId::new("s1")), 0);
    assert_eq!(mapper.active_tool_calls(&SessionId::new("s2")), 1);
}

#[test]
fn test_unrecognized_updates_are_dropped() {
    let mut mapper = ContentMapper::new();

    assert!(
        mapper
            .map(&note("s1", json!({"sessionUpdate": "something_new", "payload": 1})))
            .is_empty()
    );
    assert!(
        mapper
            .map(&note(
                "s1",
                json!({"sessionUpdate": "agent_message_chunk", "content": {"type": "image", "data": "..."}}),
            ))
            .is_empty()
    );
}
