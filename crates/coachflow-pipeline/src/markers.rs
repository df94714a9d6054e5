//! Regular expressions that recognise synchronisation points in session output.

use std::fmt;

use coachflow_types::{CoachflowError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Names the six markers, for logs, timeouts and the grammar table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Menu,
    CriticPrompt,
    RefinementPrompt,
    AnswerStart,
    RefinedStart,
    AnswerEnd,
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarkerKind::Menu => "menu",
            MarkerKind::CriticPrompt => "critic_prompt",
            MarkerKind::RefinementPrompt => "refinement_prompt",
            MarkerKind::AnswerStart => "answer_start",
            MarkerKind::RefinedStart => "refined_start",
            MarkerKind::AnswerEnd => "answer_end",
        };
        f.write_str(name)
    }
}

/// Pattern sources, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerPatterns {
    pub menu: String,
    pub critic_prompt: String,
    pub refinement_prompt: String,
    pub answer_start: String,
    pub refined_start: String,
    pub answer_end: String,
}

impl Default for MarkerPatterns {
    fn default() -> Self {
        Self {
            menu: r"Choose an action \(or hit Enter for inference\) :$".into(),
            critic_prompt: r"Provide critic/feedback/request: $".into(),
            refinement_prompt: r"Is the task refinement adequate\?$".into(),
            answer_start: r"LLM ANSWER".into(),
            refined_start: r"REFINED ANSWER".into(),
            answer_end: r"\*{5}\s\w+".into(),
        }
    }
}

/// Compiled markers.
#[derive(Debug, Clone)]
pub struct Markers {
    menu: Regex,
    critic_prompt: Regex,
    refinement_prompt: Regex,
    answer_start: Regex,
    refined_start: Regex,
    answer_end: Regex,
}

fn compile(kind: MarkerKind, pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| CoachflowError::Config(format!("invalid {kind} marker '{pattern}': {e}")))
}

impl Markers {
    pub fn compile(patterns: &MarkerPatterns) -> Result<Self> {
        Ok(Self {
            menu: compile(MarkerKind::Menu, &patterns.menu)?,
            critic_prompt: compile(MarkerKind::CriticPrompt, &patterns.critic_prompt)?,
            refinement_prompt: compile(MarkerKind::RefinementPrompt, &patterns.refinement_prompt)?,
            answer_start: compile(MarkerKind::AnswerStart, &patterns.answer_start)?,
            refined_start: compile(MarkerKind::RefinedStart, &patterns.refined_start)?,
            answer_end: compile(MarkerKind::AnswerEnd, &patterns.answer_end)?,
        })
    }

    pub fn get(&self, kind: MarkerKind) -> &Regex {
        match kind {
            MarkerKind::Menu => &self.menu,
            MarkerKind::CriticPrompt => &self.critic_prompt,
            MarkerKind::RefinementPrompt => &self.refinement_prompt,
            MarkerKind::AnswerStart => &self.answer_start,
            MarkerKind::RefinedStart => &self.refined_start,
            MarkerKind::AnswerEnd => &self.answer_end,
        }
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::compile(&MarkerPatterns::default()).expect("built-in marker patterns compile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_matches_only_at_end_of_text() {
        let markers = Markers::default();
        let menu = markers.get(MarkerKind::Menu);
        assert!(menu.is_match("A) modify\nChoose an action (or hit Enter for inference) :"));
        assert!(!menu.is_match("Choose an action (or hit Enter for inference) :\nmore"));
    }

    #[test]
    fn critic_prompt_needs_trailing_space() {
        let markers = Markers::default();
        let critic = markers.get(MarkerKind::CriticPrompt);
        assert!(critic.is_match("Provide critic/feedback/request: "));
        assert!(!critic.is_match("Provide critic/feedback/request:"));
    }

    #[test]
    fn answer_end_needs_five_stars_and_a_word() {
        let markers = Markers::default();
        let end = markers.get(MarkerKind::AnswerEnd);
        assert!(end.is_match("***** END"));
        assert!(end.is_match("text***** done"));
        assert!(!end.is_match("**** END"));
        assert!(!end.is_match("*****"));
    }

    #[test]
    fn start_markers_are_case_sensitive() {
        let markers = Markers::default();
        assert!(markers.get(MarkerKind::AnswerStart).is_match("=== LLM ANSWER ==="));
        assert!(!markers.get(MarkerKind::AnswerStart).is_match("llm answer"));
        assert!(markers.get(MarkerKind::RefinedStart).is_match("REFINED ANSWER:"));
    }

    #[test]
    fn invalid_override_is_config_error() {
        let patterns = MarkerPatterns {
            menu: "(".into(),
            ..MarkerPatterns::default()
        };
        let err = Markers::compile(&patterns).unwrap_err();
        assert!(matches!(err, CoachflowError::Config(ref m) if m.contains("menu")));
    }
}
