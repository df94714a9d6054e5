//! The consumer-facing run API: `run`, `stop`, `submit_feedback` and the
//! observable run state.
//!
//! A [`Session`] owns the shared run state behind one async mutex. Each
//! `run()` spawns a [`ProtocolDriver`](crate::driver::ProtocolDriver) task
//! tagged with a generation number; `stop()` bumps the generation, which
//! detaches the old task so it can no longer write to the state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use coachflow_types::{AnswerRecord, CoachflowError, DriverState, Result};
use futures_core::Stream;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::Connector;
use crate::config::SessionConfig;
use crate::driver::ProtocolDriver;
use crate::events::{EventEmitter, RunEvent};
use crate::grammar::Grammar;
use crate::graph::{PipelineEdge, PipelineGraph};
use crate::linearize::linearize;
use crate::markers::Markers;
use crate::registry::NodeRegistry;
use crate::segmenter::{visible_answers, OutputSegmenter};
use crate::validation::{validate, ValidationReport};

pub(crate) struct Shared {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) markers: Markers,
    pub(crate) grammar: Grammar,
    pub(crate) wait_timeout: Option<Duration>,
    pub(crate) events: EventEmitter,
    pub(crate) state: Mutex<RunState>,
}

pub(crate) struct RunState {
    /// Bumped by every `run()` and `stop()`; a driver only writes while its
    /// generation is current.
    pub(crate) generation: u64,
    pub(crate) executing: bool,
    pub(crate) run_id: Option<Uuid>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) status: DriverState,
    pub(crate) cursor: usize,
    pub(crate) order: Vec<PipelineEdge>,
    pub(crate) log: Vec<String>,
    pub(crate) segmenter: OutputSegmenter,
    pub(crate) answers: Vec<AnswerRecord>,
    pub(crate) registry: NodeRegistry,
    pub(crate) feedback_tx: Option<mpsc::Sender<String>>,
    pub(crate) stop_tx: Option<watch::Sender<bool>>,
    pub(crate) last_error: Option<String>,
}

impl RunState {
    fn new(markers: &Markers) -> Self {
        Self {
            generation: 0,
            executing: false,
            run_id: None,
            started_at: None,
            status: DriverState::Idle,
            cursor: 0,
            order: Vec::new(),
            log: Vec::new(),
            segmenter: OutputSegmenter::new(markers),
            answers: Vec::new(),
            registry: NodeRegistry::new(),
            feedback_tx: None,
            stop_tx: None,
            last_error: None,
        }
    }

    fn clear_output(&mut self) {
        self.cursor = 0;
        self.log.clear();
        self.segmenter.reset();
        self.answers.clear();
        self.registry.clear_highlight();
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub run_id: Option<Uuid>,
    pub state: DriverState,
    pub highlighted_node_id: Option<String>,
    pub cursor: usize,
    pub step_count: usize,
    pub answers: Vec<AnswerRecord>,
    pub error: Option<String>,
}

/// Handle to a spawned run.
pub struct RunHandle {
    run_id: Uuid,
    task: JoinHandle<DriverState>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run task and return its terminal state.
    pub async fn finished(self) -> DriverState {
        self.task.await.unwrap_or_else(|e| {
            error!(run_id = %self.run_id, error = %e, "Run task aborted");
            DriverState::Failed
        })
    }
}

#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(connector: Arc<dyn Connector>, config: &SessionConfig) -> Result<Self> {
        Ok(Self::from_parts(
            connector,
            config.compile_markers()?,
            config.build_grammar()?,
            config.wait_timeout(),
            EventEmitter::new(config.event_capacity),
        ))
    }

    pub fn from_parts(
        connector: Arc<dyn Connector>,
        markers: Markers,
        grammar: Grammar,
        wait_timeout: Option<Duration>,
        events: EventEmitter,
    ) -> Self {
        let state = RunState::new(&markers);
        Self {
            shared: Arc::new(Shared {
                connector,
                markers,
                grammar,
                wait_timeout,
                events,
                state: Mutex::new(state),
            }),
        }
    }

    // --- Observation ---

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.shared.events.subscribe()
    }

    /// Run events as a stream. Events missed by a lagging consumer are skipped.
    pub fn updates(&self) -> impl Stream<Item = RunEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "Run update stream lagged");
                None
            }
        })
    }

    pub async fn snapshot(&self) -> RunSnapshot {
        let state = self.shared.state.lock().await;
        RunSnapshot {
            run_id: state.run_id,
            state: state.status,
            highlighted_node_id: state.registry.highlighted().map(String::from),
            cursor: state.cursor,
            step_count: state.order.len(),
            answers: state.answers.clone(),
            error: state.last_error.clone(),
        }
    }

    pub async fn state(&self) -> DriverState {
        self.shared.state.lock().await.status
    }

    pub async fn is_executing(&self) -> bool {
        self.shared.state.lock().await.executing
    }

    pub async fn raw_output(&self) -> Vec<String> {
        self.shared.state.lock().await.log.clone()
    }

    /// The edge order of the current (or last) run.
    pub async fn execution_order(&self) -> Vec<PipelineEdge> {
        self.shared.state.lock().await.order.clone()
    }

    pub async fn registry(&self) -> NodeRegistry {
        self.shared.state.lock().await.registry.clone()
    }

    pub async fn set_selected(&self, node_id: &str, selected: bool) -> bool {
        self.shared
            .state
            .lock()
            .await
            .registry
            .set_selected(node_id, selected)
    }

    /// Answers filtered by node selection.
    pub async fn visible_answers(&self) -> Vec<AnswerRecord> {
        let state = self.shared.state.lock().await;
        let selected: HashSet<String> = state.registry.selected_ids();
        visible_answers(&state.answers, &state.order, &selected)
            .into_iter()
            .cloned()
            .collect()
    }

    // --- Control ---

    /// Validate `graph` and publish its error codes to the registry. The
    /// registry is left alone while a run is executing.
    pub async fn validate(&self, graph: &PipelineGraph) -> ValidationReport {
        let report = validate(graph);
        let mut state = self.shared.state.lock().await;
        if !state.executing {
            state.registry.sync(graph);
            state.registry.apply(&report);
        }
        report
    }

    /// Start a run. Returns `Ok(None)` without doing anything when a run is
    /// already executing, and `Err` when the graph is invalid.
    pub async fn run(&self, graph: &PipelineGraph) -> Result<Option<RunHandle>> {
        let mut state = self.shared.state.lock().await;
        if state.executing {
            debug!("Run requested while a run is executing; ignored");
            return Ok(None);
        }

        state.registry.sync(graph);
        let report = validate(graph);
        state.registry.apply(&report);
        if !report.is_valid() {
            warn!(
                problems = report.diagnostics.len(),
                "Pipeline is invalid; run refused"
            );
            return Err(CoachflowError::ValidationError(report.summary()));
        }
        if graph.edges().is_empty() {
            return Err(CoachflowError::ValidationError(
                "pipeline has no edges".into(),
            ));
        }

        let order = linearize(graph.edges());
        let (feedback_tx, feedback_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let run_id = Uuid::new_v4();

        state.generation += 1;
        state.executing = true;
        state.run_id = Some(run_id);
        state.started_at = Some(Instant::now());
        state.status = DriverState::Idle;
        state.order = order.clone();
        state.clear_output();
        state.feedback_tx = Some(feedback_tx);
        state.stop_tx = Some(stop_tx);
        state.last_error = None;

        let driver = ProtocolDriver::new(
            Arc::clone(&self.shared),
            state.generation,
            run_id,
            graph,
            order,
            feedback_rx,
            stop_rx,
        );
        drop(state);

        let task = tokio::spawn(driver.execute());
        Ok(Some(RunHandle { run_id, task }))
    }

    /// Abort the active run (if any), then clear output and reset the cursor.
    pub async fn stop(&self) {
        let mut state = self.shared.state.lock().await;
        let was_executing = state.executing;

        if let Some(stop) = state.stop_tx.take() {
            let _ = stop.send(true);
        }
        state.feedback_tx = None;
        state.generation += 1;
        state.executing = false;
        state.clear_output();

        if !was_executing {
            state.status = DriverState::Idle;
            return;
        }

        let error = CoachflowError::Stopped.to_string();
        let duration_ms = state
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or_default();
        state.status = DriverState::Failed;
        state.last_error = Some(error.clone());
        info!(run_id = ?state.run_id, "Run stopped");

        let events = &self.shared.events;
        events.emit(RunEvent::StateChanged {
            state: DriverState::Failed,
        });
        events.emit(RunEvent::NodeHighlighted { node_id: None });
        events.emit(RunEvent::RunFinished {
            state: DriverState::Failed,
            cursor: 0,
            error: Some(error),
            duration_ms,
        });
    }

    /// Hand feedback text to a run waiting in `AwaitingFeedback`.
    pub async fn submit_feedback(&self, text: impl Into<String>) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if state.status != DriverState::AwaitingFeedback {
            return Err(CoachflowError::NotAwaitingFeedback);
        }
        let sender = state
            .feedback_tx
            .as_ref()
            .ok_or(CoachflowError::NotAwaitingFeedback)?;
        sender
            .try_send(text.into())
            .map_err(|_| CoachflowError::NotAwaitingFeedback)?;

        // Leave AwaitingFeedback now so a second submission is refused.
        state.status = DriverState::Stepping;
        self.shared.events.emit(RunEvent::StateChanged {
            state: DriverState::Stepping,
        });
        Ok(())
    }
}
