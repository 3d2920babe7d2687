use crate::domain::JobStage;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events published to the surrounding application (dashboard, HTTP layer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    SessionStarted {
        session_id: Uuid,
        room_id: String,
    },
    SessionStopped {
        session_id: Uuid,
        artifact_id: Uuid,
    },
    SessionFailed {
        session_id: Uuid,
        room_id: String,
        error: String,
    },
    /// Warning: a session's frame buffer hit capacity and backpressure was
    /// applied. No frames were lost.
    BufferOverflow {
        session_id: Uuid,
    },
    JobStageChanged {
        job_id: Uuid,
        stage: JobStage,
    },
    JobFailed {
        job_id: Uuid,
        error: String,
    },
}

/// Broadcast fan-out for core events. Slow subscribers lag and drop rather
/// than backpressure the controllers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Succeeds even with no subscribers.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
