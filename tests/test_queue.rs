//! Tests for `EventQueue`

use std::sync::Arc;
use std::time::Duration;

use kodegen_acp_bridge::provider::EventQueue;
use kodegen_acp_bridge::{StopReason, StreamEvent};

#[tokio::test]
async fn test_events_come_out_in_push_order() {
    let queue = EventQueue::new();
    assert!(queue.push_event(StreamEvent::text("a")));
    assert!(queue.push_event(StreamEvent::reasoning("b")));
    assert!(queue.push_event(StreamEvent::text("c")));
    assert_eq!(queue.len(), 3);

    assert_eq!(queue.next().await, Some(StreamEvent::text("a")));
    assert_eq!(queue.next().await, Some(StreamEvent::reasoning("b")));
    assert_eq!(queue.next().await, Some(StreamEvent::text("c")));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_buffered_events_drain_before_end() {
    let queue = EventQueue::new();
    queue.push_event(StreamEvent::text("last words"));
    queue.push_event(StreamEvent::Stop {
        reason: StopReason::Complete,
    });
    assert!(queue.close());
    assert!(queue.is_closed());

    assert_eq!(queue.next().await, Some(StreamEvent::text("last words")));
    assert!(matches!(queue.next().await, Some(StreamEvent::Stop { .. })));
    assert_eq!(queue.next().await, None);
    assert_eq!(queue.next().await, None);
}

#[tokio::test]
async fn test_pushes_after_end_are_rejected() {
    let queue = EventQueue::new();
    assert!(queue.push(None));

    assert!(!queue.push_event(StreamEvent::error("late")));
    assert!(!queue.close());
    assert!(queue.is_empty());
    assert_eq!(queue.next().await, None);
}

#[tokio::test]
async fn test_next_waits_for_a_push() {
    let queue = Arc::new(EventQueue::new());

    let consumer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = queue.next().await {
                seen.push(event);
            }
            seen
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!consumer.is_finished());

    queue.push_event(StreamEvent::text("one"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.push_event(StreamEvent::text("two"));
    queue.close();

    let seen = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .expect("consumer did not finish")
        .unwrap();
    assert_eq!(seen, vec![StreamEvent::text("one"), StreamEvent::text("two")]);
}

#[test]
fn test_next_is_ready_when_buffered() {
    let queue = EventQueue::new();
    queue.push_event(StreamEvent::text("ready"));

    let mut next = tokio_test::task::spawn(queue.next());
    assert_eq!(
        next.poll(),
        std::task::Poll::Ready(Some(StreamEvent::text("ready")))
    );

    let mut pending = tokio_test::task::spawn(queue.next());
    assert!(pending.poll().is_pending());
    queue.close();
    assert!(pending.is_woken());
    assert_eq!(pending.poll(), std::task::Poll::Ready(None));
}
