//! Shared types and errors for the Coachflow pipeline driver.
//!
//! This crate provides the vocabulary used across all other Coachflow crates:
//! - `CoachflowError`: unified error taxonomy
//! - `Role` and `Choice`: what a pipeline node does and which menu letter it sends
//! - `NodeErrorCode`: per-node badges written by validation
//! - `AnswerRecord`: a structured answer block scraped from session output
//! - `DriverState`: the states of a pipeline run

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unified error type for all Coachflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CoachflowError {
    // === Parser Errors ===
    #[error("DOT parse error at line {line}, col {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
        source_snippet: Option<String>,
    },

    // === Graph Errors ===
    #[error("Pipeline validation failed: {0}")]
    ValidationError(String),

    #[error("Edge '{edge}' references unknown node '{node}'")]
    MissingNode { edge: String, node: String },

    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    #[error("Invalid choice '{0}'")]
    InvalidChoice(String),

    // === Channel Errors ===
    #[error("Failed to connect to {url}: {message}")]
    ConnectFailed { url: String, message: String },

    #[error("Session channel closed")]
    ChannelClosed,

    #[error("Timed out after {timeout_ms}ms waiting for '{marker}'")]
    WaitTimeout { marker: String, timeout_ms: u64 },

    #[error("Run stopped")]
    Stopped,

    #[error("No step is waiting for feedback")]
    NotAwaitingFeedback,

    // === Configuration ===
    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CoachflowError {
    /// Returns `true` if the error ends the current run.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            CoachflowError::MissingNode { .. }
                | CoachflowError::ChannelClosed
                | CoachflowError::ConnectFailed { .. }
                | CoachflowError::WaitTimeout { .. }
                | CoachflowError::Stopped
        )
    }

    /// Returns `true` if the error is caused by user input (pipeline file,
    /// configuration) and can be fixed without touching the remote session.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CoachflowError::ParseError { .. }
                | CoachflowError::ValidationError(_)
                | CoachflowError::UnknownRole(_)
                | CoachflowError::InvalidChoice(_)
                | CoachflowError::Config(_)
        )
    }
}

/// A convenience alias for `Result<T, CoachflowError>`.
pub type Result<T> = std::result::Result<T, CoachflowError>;

// ---------------------------------------------------------------------------
// Role: the pipeline-step kind of a node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Coach,
    Coder,
    Critic,
    Validator,
    Capitalizer,
    Before,
    After,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Coach,
        Role::Coder,
        Role::Critic,
        Role::Validator,
        Role::Capitalizer,
        Role::Before,
        Role::After,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Coach => "Coach",
            Role::Coder => "Coder",
            Role::Critic => "Critic",
            Role::Validator => "Validator",
            Role::Capitalizer => "Capitalizer",
            Role::Before => "Before",
            Role::After => "After",
        }
    }

    /// Before/After steps send a menu letter instead of running inference.
    pub fn is_option(&self) -> bool {
        matches!(self, Role::Before | Role::After)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoachflowError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CoachflowError::UnknownRole(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Choice: the single menu letter an option node sends
// ---------------------------------------------------------------------------

/// Action names of a `Before` node, in menu order.
const BEFORE_NAMES: [&str; 5] = [
    "ModifyPrompt",
    "AddPrompt",
    "SkipInference",
    "LogComment",
    "UsePremiumLLM",
];

/// Action names of an `After` node, in menu order.
const AFTER_NAMES: [&str; 5] = [
    "ModifyAnswer",
    "CriticAnswer",
    "FindBetterPrompt",
    "EvalAnswer",
    "SkipHumanEval",
];

/// A menu letter accepted by the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Choice(char);

impl Choice {
    pub const LETTERS: [char; 7] = ['A', 'B', 'C', 'D', 'E', 'F', 'J'];

    pub fn new(letter: char) -> Result<Self> {
        let upper = letter.to_ascii_uppercase();
        if Self::LETTERS.contains(&upper) {
            Ok(Self(upper))
        } else {
            Err(CoachflowError::InvalidChoice(letter.to_string()))
        }
    }

    pub fn letter(&self) -> char {
        self.0
    }

    fn from_index(index: usize) -> Self {
        Self(Self::LETTERS[index])
    }

    /// Parse either a bare letter (`"C"`) or an action name valid for `role`
    /// (`"SkipInference"` on a `Before` node).
    pub fn parse_for(role: Role, value: &str) -> Result<Self> {
        let value = value.trim();
        let mut chars = value.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Self::new(c);
        }
        let position = match role {
            Role::Before => BEFORE_NAMES
                .iter()
                .position(|name| name.eq_ignore_ascii_case(value)),
            Role::After => AFTER_NAMES
                .iter()
                .position(|name| name.eq_ignore_ascii_case(value)),
            _ => None,
        };
        position
            .map(Self::from_index)
            .ok_or_else(|| CoachflowError::InvalidChoice(value.to_string()))
    }

    /// Whether this choice on a node of `role` carries a free-text payload.
    pub fn requires_prompt(&self, role: Role) -> bool {
        match role {
            Role::After => matches!(self.0, 'A' | 'B' | 'E'),
            Role::Before => matches!(self.0, 'A' | 'B'),
            _ => false,
        }
    }

    /// Human-readable action name for this letter on a node of `role`.
    pub fn describe(&self, role: Role) -> &'static str {
        let index = Self::LETTERS.iter().position(|c| *c == self.0);
        let named = match role {
            Role::Before => index.and_then(|i| BEFORE_NAMES.get(i)).copied(),
            Role::After => index.and_then(|i| AFTER_NAMES.get(i)).copied(),
            _ => None,
        };
        named.unwrap_or("Unknown Choice")
    }
}

impl Default for Choice {
    fn default() -> Self {
        Self('A')
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Choice {
    type Error = CoachflowError;

    fn try_from(value: String) -> Result<Self> {
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::new(c),
            _ => Err(CoachflowError::InvalidChoice(value)),
        }
    }
}

impl From<Choice> for String {
    fn from(choice: Choice) -> Self {
        choice.0.to_string()
    }
}

// ---------------------------------------------------------------------------
// NodeErrorCode: validation badge on a node
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum NodeErrorCode {
    #[default]
    None,
    FirstIsNotCoach,
    LastIsNotCapitalizer,
    BeforeThenAfter,
    TwoAfter,
    TwoBefore,
    MissingNode,
}

impl NodeErrorCode {
    /// Badge text shown next to an offending node.
    pub fn describe(&self) -> &'static str {
        match self {
            NodeErrorCode::None => "",
            NodeErrorCode::FirstIsNotCoach => "First is not Coach",
            NodeErrorCode::LastIsNotCapitalizer => "Last is not Capitalizer",
            NodeErrorCode::BeforeThenAfter => "Before then after",
            NodeErrorCode::TwoAfter => "Two after in a row",
            NodeErrorCode::TwoBefore => "Two before in a row",
            NodeErrorCode::MissingNode => "Missing node",
        }
    }
}

impl fmt::Display for NodeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// AnswerRecord: an answer block scraped from the session output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    Default,
    Refined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub lines: Vec<String>,
    pub kind: AnswerKind,
}

impl AnswerRecord {
    pub fn new(lines: Vec<String>, kind: AnswerKind) -> Self {
        Self { lines, kind }
    }

    pub fn title(&self) -> &'static str {
        match self.kind {
            AnswerKind::Default => "LLM Answer",
            AnswerKind::Refined => "Refined Answer",
        }
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// DriverState: the states of a pipeline run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    #[default]
    Idle,
    AwaitingMenu,
    Stepping,
    AwaitingFeedback,
    Done,
    Failed,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DriverState::Done | DriverState::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DriverState::AwaitingMenu | DriverState::Stepping | DriverState::AwaitingFeedback
        )
    }
}
