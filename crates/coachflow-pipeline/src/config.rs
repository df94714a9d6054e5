use std::path::Path;
use std::time::Duration;

use coachflow_types::{CoachflowError, Result};
use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_URL;
use crate::grammar::{Grammar, GrammarOverrides};
use crate::markers::{MarkerPatterns, Markers};

/// Session settings, loadable from TOML. Every field has a default.
///
/// ```toml
/// url = "ws://localhost:1337/ws"
/// wait_timeout_ms = 120000
///
/// [markers]
/// menu = 'Choose an action \(or hit Enter for inference\) :$'
///
/// [grammar]
/// feedback_confirm_input = "y\nyes\nyes\n"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Per-wait limit. Absent means a wait never times out.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub markers: MarkerPatterns,
    #[serde(default)]
    pub grammar: GrammarOverrides,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_event_capacity() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            wait_timeout_ms: None,
            event_capacity: default_event_capacity(),
            markers: MarkerPatterns::default(),
            grammar: GrammarOverrides::default(),
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoachflowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CoachflowError::Config(e.to_string()))?;
        // Surface bad patterns and role names at load time.
        config.compile_markers()?;
        config.build_grammar()?;
        Ok(config)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn compile_markers(&self) -> Result<Markers> {
        Markers::compile(&self.markers)
    }

    pub fn build_grammar(&self) -> Result<Grammar> {
        Grammar::with_overrides(&self.grammar)
    }
}
