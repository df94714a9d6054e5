//! Run event system.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so that a UI,
//! a transcript writer or a test can follow a run without touching the
//! driver's state.

use coachflow_types::{AnswerRecord, DriverState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        step_count: usize,
    },
    StateChanged {
        state: DriverState,
    },
    NodeHighlighted {
        node_id: Option<String>,
    },
    OutputReceived {
        chunk: String,
    },
    AnswersExtracted {
        /// Index of the first new answer in the run's answer list.
        first_index: usize,
        answers: Vec<AnswerRecord>,
    },
    InputSent {
        text: String,
    },
    FeedbackRequested {
        node_id: String,
        edge_id: String,
    },
    StepCompleted {
        edge_id: String,
        cursor: usize,
    },
    RunFinished {
        state: DriverState,
        cursor: usize,
        error: Option<String>,
        duration_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Events sent with no subscriber are dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(RunEvent::StateChanged {
            state: DriverState::AwaitingMenu,
        });
        emitter.emit(RunEvent::NodeHighlighted {
            node_id: Some("coach".into()),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            RunEvent::StateChanged {
                state: DriverState::AwaitingMenu
            }
        );
        match rx.recv().await.unwrap() {
            RunEvent::NodeHighlighted { node_id } => assert_eq!(node_id.as_deref(), Some("coach")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(0);
        emitter.emit(RunEvent::InputSent { text: "\n".into() });
    }

    #[test]
    fn run_finished_serializes_state_in_snake_case() {
        let event = RunEvent::RunFinished {
            state: DriverState::AwaitingFeedback,
            cursor: 1,
            error: None,
            duration_ms: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["RunFinished"]["state"], "awaiting_feedback");
        let back: RunEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
