//! Tests for `PermissionBroker`
//!
//! Request announcement, decision mapping and forced cancellation

use std::task::Poll;

use kodegen_acp_bridge::AgentError;
use kodegen_acp_bridge::provider::{EventQueue, PermissionBroker};
use kodegen_acp_bridge::types::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, RequestPermissionParams, SessionId,
    StreamEvent, ToolCallFields,
};

fn params(session: &str, kinds: &[(&str, PermissionOptionKind)]) -> RequestPermissionParams {
    RequestPermissionParams {
        session_id: SessionId::new(session),
        tool_call: ToolCallFields::new("call-1").title("Run tests"),
        options: kinds
            .iter()
            .map(|(id, kind)| PermissionOption::new(*id, *id, *kind))
            .collect(),
    }
}

fn all_options() -> Vec<(&'static str, PermissionOptionKind)> {
    vec![
        ("always", PermissionOptionKind::AllowAlways),
        ("once", PermissionOptionKind::AllowOnce),
        ("never", PermissionOptionKind::RejectAlways),
        ("not-now", PermissionOptionKind::RejectOnce),
    ]
}

async fn announced(queue: &EventQueue) -> kodegen_acp_bridge::PermissionPrompt {
    match queue.next().await {
        Some(StreamEvent::PermissionRequested(prompt)) => prompt,
        other => panic!("expected a permission prompt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_grant_selects_allow_once() {
    let _ = env_logger::builder().is_test(true).try_init();

    let broker = PermissionBroker::new();
    let queue = EventQueue::new();

    let decision = broker.request(params("s1", &all_options()), &queue);
    let prompt = announced(&queue).await;
    assert_eq!(prompt.title, "Run tests");
    assert_eq!(prompt.session_id.as_str(), "s1");
    assert_eq!(prompt.tool_call_id.as_str(), "call-1");
    assert_eq!(broker.pending_count(), 1);

    let outcome = broker.resolve(&prompt.request_id, true).unwrap();
    assert_eq!(
        outcome,
        PermissionOutcome::Selected {
            option_id: "once".into()
        }
    );
    assert_eq!(decision.await, outcome);
    assert_eq!(broker.pending_count(), 0);
}

#[tokio::test]
async fn test_deny_selects_reject_once() {
    let broker = PermissionBroker::new();
    let queue = EventQueue::new();

    let decision = broker.request(params("s1", &all_options()), &queue);
    let prompt = announced(&queue).await;
    broker.resolve(&prompt.request_id, false).unwrap();

    assert_eq!(
        decision.await,
        PermissionOutcome::Selected {
            option_id: "not-now".into()
        }
    );
}

#[tokio::test]
async fn test_no_matching_option_cancels() {
    let broker = PermissionBroker::new();
    let queue = EventQueue::new();

    let decision = broker.request(
        params("s1", &[("yes", PermissionOptionKind::AllowAlways)]),
        &queue,
    );
    let prompt = announced(&queue).await;

    assert_eq!(
        broker.resolve(&prompt.request_id, false).unwrap(),
        PermissionOutcome::Cancelled
    );
    assert_eq!(decision.await, PermissionOutcome::Cancelled);
}

#[tokio::test]
async fn test_unknown_or_repeated_resolution_fails() {
    let broker = PermissionBroker::new();
    let queue = EventQueue::new();

    let unknown = broker.resolve(&kodegen_acp_bridge::RequestId::new("nope"), true);
    assert!(matches!(unknown, Err(AgentError::PermissionNotFound(_))));

    let _decision = broker.request(params("s1", &all_options()), &queue);
    let prompt = announced(&queue).await;
    assert!(broker.resolve(&prompt.request_id, true).is_ok());
    assert!(matches!(
        broker.resolve(&prompt.request_id, true),
        Err(AgentError::PermissionNotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_session_only_touches_that_session() {
    let broker = PermissionBroker::new();
    let queue = EventQueue::new();

    let first = broker.request(params("s1", &all_options()), &queue);
    let second = broker.request(params("s1", &all_options()), &queue);
    let other = broker.request(params("s2", &all_options()), &queue);
    assert_eq!(broker.pending_for(&SessionId::new("s1")), 2);

    assert_eq!(broker.cancel_session(&SessionId::new("s1")), 2);
    assert_eq!(first.await, PermissionOutcome::Cancelled);
    assert_eq!(second.await, PermissionOutcome::Cancelled);
    assert_eq!(broker.pending_count(), 1);

    // The other session's request is still waiting
    let mut other = tokio_test::task::spawn(other);
    assert!(other.poll().is_pending());

    assert_eq!(broker.cancel_all(), 1);
    assert!(other.is_woken());
    assert_eq!(other.poll(), Poll::Ready(PermissionOutcome::Cancelled));
    assert_eq!(broker.cancel_all(), 0);
}

#[tokio::test]
async fn test_request_after_turn_ended_is_cancelled() {
    let broker = PermissionBroker::new();
    let queue = EventQueue::new();
    queue.close();

    let decision = broker.request(params("s1", &all_options()), &queue);

    assert_eq!(decision.await, PermissionOutcome::Cancelled);
    assert_eq!(broker.pending_count(), 0);
    assert_eq!(queue.next().await, None);
}

#[tokio::test]
async fn test_missing_title_falls_back() {
    let broker = PermissionBroker::new();
    let queue = EventQueue::new();
    let mut request = params("s1", &all_options());
    request.tool_call.title = None;

    let _decision = broker.request(request, &queue);
    assert_eq!(announced(&queue).await.title, "tool");
}
