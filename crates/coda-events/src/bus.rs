use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::EventType;

/// One submitted event, before the dispatcher stamps its envelope.
#[derive(Debug, Clone)]
pub struct Submission {
    pub event_type: EventType,
    pub data: Value,
    /// High-priority events enter the replay buffer for late joiners.
    pub high_priority: bool,
}

/// Producer half of the event bus.
///
/// Clonable and callable from any thread or task: the unbounded channel
/// send is synchronous and never blocks. Producers never touch the
/// server's own concurrency state — the dispatcher drains submissions in
/// its own scheduling context.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Submission>,
}

impl EventSink {
    /// Submit an event for broadcast. Returns `false` if the bus has been
    /// shut down (the submission is dropped, never an error for the
    /// producer).
    pub fn submit(&self, event_type: EventType, data: Value, high_priority: bool) -> bool {
        let accepted = self
            .tx
            .send(Submission {
                event_type,
                data,
                high_priority,
            })
            .is_ok();
        if !accepted {
            debug!(event = %event_type, "event bus closed, dropping submission");
        }
        accepted
    }

    /// A sink whose submissions go nowhere. Useful for components that run
    /// without an attached gateway (and in tests).
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Consumer half: the dispatcher's receive handle.
pub type EventStream = mpsc::UnboundedReceiver<Submission>;

/// The event bus itself is just the channel pair.
pub struct EventBus;

impl EventBus {
    pub fn channel() -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }
}
