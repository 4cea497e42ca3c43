//! Broadcast event bus for distributing `WorkflowEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op, so the engine never blocks on slow or absent listeners.

use flowdeck_types::event::WorkflowEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Multi-consumer bus for execution progress events.
///
/// Cloning the bus clones the sender, allowing multiple producers and consumers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    /// Receive events for one execution until its terminal event arrives.
    ///
    /// Lagged receivers skip the dropped events and keep going; a closed
    /// channel ends the wait.
    pub async fn follow(
        mut receiver: broadcast::Receiver<WorkflowEvent>,
        execution_id: Uuid,
        mut on_event: impl FnMut(&WorkflowEvent),
    ) {
        loop {
            match receiver.recv().await {
                Ok(event) if event.execution_id() == execution_id => {
                    on_event(&event);
                    if event.is_terminal() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
