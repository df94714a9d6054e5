//! The step state machine.
//!
//! A driver walks the linearized edges one at a time. Each step highlights
//! the target node, waits for the session's pre-step menu and sends the
//! canned input the grammar assigns to the target's role. Critic steps also
//! wait for the feedback prompt and then for human feedback. Output that
//! arrives while waiting is always appended to the raw log and segmented,
//! whether or not it satisfies the wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use coachflow_types::{CoachflowError, DriverState, Result};
use regex::Regex;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant as Deadline};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::Connection;
use crate::events::{EventEmitter, RunEvent};
use crate::grammar::StepPlan;
use crate::graph::{PipelineEdge, PipelineGraph, PipelineNode};
use crate::markers::MarkerKind;
use crate::session::{RunState, Shared};

pub(crate) struct ProtocolDriver {
    shared: Arc<Shared>,
    generation: u64,
    run_id: Uuid,
    pipeline_name: String,
    nodes: HashMap<String, PipelineNode>,
    order: Vec<PipelineEdge>,
    feedback_rx: mpsc::Receiver<String>,
    stop_rx: watch::Receiver<bool>,
}

/// What woke a driver waiting for feedback.
enum Wake {
    Stop,
    Feedback(Option<String>),
    Chunk(Option<String>),
}

impl ProtocolDriver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        generation: u64,
        run_id: Uuid,
        graph: &PipelineGraph,
        order: Vec<PipelineEdge>,
        feedback_rx: mpsc::Receiver<String>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            shared,
            generation,
            run_id,
            pipeline_name: graph.name.clone(),
            nodes: graph
                .nodes()
                .iter()
                .map(|n| (n.id.clone(), n.clone()))
                .collect(),
            order,
            feedback_rx,
            stop_rx,
        }
    }

    /// Run to completion. Every error ends as `Failed`; nothing escapes.
    pub(crate) async fn execute(mut self) -> DriverState {
        let started = Instant::now();
        info!(
            run_id = %self.run_id,
            pipeline = %self.pipeline_name,
            steps = self.order.len(),
            "Run started"
        );
        let run_id = self.run_id;
        let pipeline_name = self.pipeline_name.clone();
        let step_count = self.order.len();
        let announced = self
            .update(move |_, events| {
                events.emit(RunEvent::RunStarted {
                    run_id,
                    pipeline_name,
                    step_count,
                })
            })
            .await;
        if announced.is_err() {
            debug!(run_id = %self.run_id, "Run stopped before it started");
            return DriverState::Failed;
        }

        let outcome = self.drive().await;
        let (state, error) = match outcome {
            Ok(()) => {
                info!(
                    run_id = %self.run_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Run completed"
                );
                (DriverState::Done, None)
            }
            Err(CoachflowError::Stopped) => {
                info!(run_id = %self.run_id, "Run ended by stop");
                (DriverState::Failed, Some(CoachflowError::Stopped.to_string()))
            }
            Err(e) if e.is_fatal_to_run() => {
                warn!(run_id = %self.run_id, error = %e, "Run aborted");
                (DriverState::Failed, Some(e.to_string()))
            }
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "Run failed unexpectedly");
                (DriverState::Failed, Some(e.to_string()))
            }
        };

        self.finish(state, error, started.elapsed()).await;
        state
    }

    async fn drive(&mut self) -> Result<()> {
        let mut conn = tokio::select! {
            _ = self.stop_rx.changed() => return Err(CoachflowError::Stopped),
            conn = self.shared.connector.connect() => conn?,
        };
        debug!(endpoint = %self.shared.connector.endpoint(), "Channel open");

        self.set_state(DriverState::AwaitingMenu).await?;
        self.wait_for(&mut conn, MarkerKind::Menu).await?;
        let opening = self.shared.grammar.opening_input.clone();
        self.send(&conn, &opening).await?;

        loop {
            let cursor = self.update(|state, _| state.cursor).await?;
            let Some(edge) = self.order.get(cursor).cloned() else {
                return Ok(());
            };

            self.set_state(DriverState::Stepping).await?;
            self.lookup(&edge, &edge.source)?;
            let target = self.lookup(&edge, &edge.target)?.clone();
            self.highlight(&target.id).await?;
            info!(
                step = cursor + 1,
                of = self.order.len(),
                edge = %edge.id,
                target = %target.id,
                role = %target.role,
                "Step"
            );

            self.set_state(DriverState::AwaitingMenu).await?;
            self.wait_for(&mut conn, MarkerKind::Menu).await?;
            self.set_state(DriverState::Stepping).await?;

            let plan = self.shared.grammar.plan(&target);
            match plan {
                StepPlan::Send(inputs) => {
                    for input in &inputs {
                        self.send(&conn, input).await?;
                    }
                }
                StepPlan::AwaitFeedback {
                    inputs,
                    prompt,
                    confirm_input,
                } => {
                    for input in &inputs {
                        self.send(&conn, input).await?;
                    }
                    self.wait_for(&mut conn, prompt).await?;

                    let node_id = target.id.clone();
                    let edge_id = edge.id.clone();
                    self.update(move |state, events| {
                        state.status = DriverState::AwaitingFeedback;
                        events.emit(RunEvent::StateChanged {
                            state: DriverState::AwaitingFeedback,
                        });
                        events.emit(RunEvent::FeedbackRequested { node_id, edge_id });
                    })
                    .await?;
                    info!(node = %target.id, "Waiting for feedback");

                    let feedback = self.await_feedback(&mut conn).await?;
                    self.send(&conn, &format!("{feedback}\n")).await?;
                    self.send(&conn, &confirm_input).await?;
                }
            }

            self.advance(&edge).await?;
        }
    }

    // --- Waiting ---

    async fn wait_for(&mut self, conn: &mut Connection, kind: MarkerKind) -> Result<()> {
        let marker = self.shared.markers.get(kind).clone();
        debug!(marker = %kind, "Waiting for marker");
        self.wait_for_match(conn, kind, &marker).await?;
        debug!(marker = %kind, "Marker matched");
        Ok(())
    }

    /// Consume chunks until `marker` matches the text received since the
    /// wait began. Chunks already queued are drained before the deadline is
    /// checked, and a received chunk is always ingested.
    async fn wait_for_match(
        &mut self,
        conn: &mut Connection,
        kind: MarkerKind,
        marker: &Regex,
    ) -> Result<()> {
        let limit = self.shared.wait_timeout;
        let deadline = limit.map(|limit| Deadline::now() + limit);
        let mut window = String::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => return Err(CoachflowError::Stopped),
                chunk = conn.recv() => chunk.ok_or(CoachflowError::ChannelClosed)?,
                _ = sleep_until(deadline.unwrap_or_else(Deadline::now)), if deadline.is_some() => {
                    return Err(CoachflowError::WaitTimeout {
                        marker: kind.to_string(),
                        timeout_ms: limit.unwrap_or_default().as_millis() as u64,
                    });
                }
            };
            window.push_str(&chunk);
            self.ingest(chunk).await?;
            if marker.is_match(&window) {
                return Ok(());
            }
        }
    }

    async fn await_feedback(&mut self, conn: &mut Connection) -> Result<String> {
        loop {
            let wake = tokio::select! {
                _ = self.stop_rx.changed() => Wake::Stop,
                text = self.feedback_rx.recv() => Wake::Feedback(text),
                chunk = conn.recv() => Wake::Chunk(chunk),
            };
            match wake {
                Wake::Stop | Wake::Feedback(None) => return Err(CoachflowError::Stopped),
                Wake::Feedback(Some(text)) => return Ok(text),
                Wake::Chunk(Some(chunk)) => self.ingest(chunk).await?,
                Wake::Chunk(None) => return Err(CoachflowError::ChannelClosed),
            }
        }
    }

    // --- State updates ---

    /// Apply `f` to the shared state if this driver still owns the run.
    async fn update<T>(&self, f: impl FnOnce(&mut RunState, &EventEmitter) -> T) -> Result<T> {
        let mut state = self.shared.state.lock().await;
        if state.generation != self.generation {
            return Err(CoachflowError::Stopped);
        }
        Ok(f(&mut *state, &self.shared.events))
    }

    async fn ingest(&self, chunk: String) -> Result<()> {
        debug!(bytes = chunk.len(), "Output chunk");
        self.update(move |state, events| {
            state.log.push(chunk.clone());
            let RunState {
                log,
                segmenter,
                answers,
                ..
            } = state;
            let fresh = segmenter.update(log);
            events.emit(RunEvent::OutputReceived { chunk });
            if !fresh.is_empty() {
                let first_index = answers.len();
                answers.extend(fresh.iter().cloned());
                events.emit(RunEvent::AnswersExtracted {
                    first_index,
                    answers: fresh,
                });
            }
        })
        .await
    }

    async fn send(&self, conn: &Connection, text: &str) -> Result<()> {
        self.update(|_, events| {
            events.emit(RunEvent::InputSent {
                text: text.to_string(),
            })
        })
        .await?;
        debug!(input = ?text, "Sending input");
        conn.send(text)
    }

    async fn set_state(&self, next: DriverState) -> Result<()> {
        self.update(|state, events| {
            if state.status != next {
                debug!(from = ?state.status, to = ?next, "State change");
                state.status = next;
                events.emit(RunEvent::StateChanged { state: next });
            }
        })
        .await
    }

    async fn highlight(&self, node_id: &str) -> Result<()> {
        self.update(|state, events| {
            state.registry.set_highlight(node_id, true);
            events.emit(RunEvent::NodeHighlighted {
                node_id: Some(node_id.to_string()),
            });
        })
        .await
    }

    async fn advance(&self, edge: &PipelineEdge) -> Result<()> {
        self.update(|state, events| {
            state.cursor += 1;
            events.emit(RunEvent::StepCompleted {
                edge_id: edge.id.clone(),
                cursor: state.cursor,
            });
        })
        .await
    }

    fn lookup(&self, edge: &PipelineEdge, node_id: &str) -> Result<&PipelineNode> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| CoachflowError::MissingNode {
                edge: edge.id.clone(),
                node: node_id.to_string(),
            })
    }

    async fn finish(&self, final_state: DriverState, error: Option<String>, elapsed: Duration) {
        let published = self
            .update(move |state, events| {
                state.status = final_state;
                state.executing = false;
                state.feedback_tx = None;
                state.stop_tx = None;
                state.last_error = error.clone();
                state.registry.clear_highlight();
                events.emit(RunEvent::StateChanged { state: final_state });
                events.emit(RunEvent::NodeHighlighted { node_id: None });
                events.emit(RunEvent::RunFinished {
                    state: final_state,
                    cursor: state.cursor,
                    error,
                    duration_ms: elapsed.as_millis() as u64,
                });
            })
            .await;
        if published.is_err() {
            debug!(run_id = %self.run_id, "Run detached by stop; outcome not published");
        }
    }
}
