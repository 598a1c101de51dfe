use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::report::{SweepReport, SweepScope, TaskReport};

/// Notifications published while the sweeper works.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SweepEvent {
    Started { sweep_id: Uuid, scope: SweepScope },
    TaskFinished { sweep_id: Uuid, report: TaskReport },
    Finished(SweepReport),
    Stopped,
}

/// Very small event bus. Subscribers that went away are dropped on the next
/// publish.
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<SweepEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<SweepEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SweepEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
