//! Push-to-pull bridge for one turn's events
//!
//! Session listeners are synchronous callbacks; the turn's consumer is an
//! async stream. The queue sits in between: `push` never blocks, `next`
//! waits until something is available.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::types::events::StreamEvent;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<StreamEvent>,
    closed: bool,
}

/// Single-producer, single-consumer FIFO of stream events
///
/// Pushing `None` ends the stream. Events pushed before the end are still
/// delivered; afterwards [`next`](Self::next) keeps returning `None` at once
/// and further pushes are ignored.
#[derive(Debug, Default)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl EventQueue {
    /// Empty, open queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, or end the stream with `None`
    ///
    /// Returns `false` if the queue had already ended.
    pub fn push(&self, item: Option<StreamEvent>) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            match item {
                Some(event) => state.items.push_back(event),
                None => state.closed = true,
            }
        }
        self.available.notify_one();
        true
    }

    /// Append an event
    pub fn push_event(&self, event: StreamEvent) -> bool {
        self.push(Some(event))
    }

    /// End the stream
    pub fn close(&self) -> bool {
        self.push(None)
    }

    /// Next event, waiting if none is buffered; `None` once ended and drained
    pub async fn next(&self) -> Option<StreamEvent> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(event) = state.items.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            // A push between the check above and this wait leaves a permit behind
            self.available.notified().await;
        }
    }

    /// Whether the stream has been ended
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Events buffered and not yet taken
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no events are buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}
