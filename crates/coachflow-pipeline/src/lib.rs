//! Pipeline linearization, validation, output segmentation and the protocol
//! driver.
//!
//! This crate implements the core Coachflow runner: edge ordering, the edge
//! grammar checks, incremental answer extraction from session output, and the
//! step state machine that drives a remote interactive session over a duplex
//! text channel, pausing for human feedback on Critic steps.

pub mod channel;
pub mod config;
mod driver;
pub mod events;
pub mod feedback;
pub mod grammar;
pub mod graph;
pub mod linearize;
pub mod markers;
pub mod registry;
pub mod segmenter;
pub mod session;
pub mod transcript;
pub mod validation;

pub use channel::{
    memory_pair, Connection, Connector, MemoryConnector, RemoteEnd, WebSocketConnector,
    DEFAULT_URL,
};
pub use config::SessionConfig;
pub use events::{EventEmitter, RunEvent};
pub use feedback::{attend, ConsoleFeedback, FeedbackProvider, FeedbackRequest, ScriptedFeedback};
pub use grammar::{Grammar, GrammarOverrides, StepPlan, StepRule};
pub use graph::{PipelineEdge, PipelineGraph, PipelineNode};
pub use linearize::{find_cycle, linearize, node_order};
pub use markers::{MarkerKind, MarkerPatterns, Markers};
pub use registry::{NodeRegistry, NodeStatus};
pub use segmenter::{answer_visible, visible_answers, OutputSegmenter};
pub use session::{RunHandle, RunSnapshot, Session};
pub use transcript::Transcript;
pub use validation::{
    default_rules, ensure_valid, validate, validate_with, Diagnostic, EdgePosition, EdgeRule,
    Endpoint, ValidationReport,
};
