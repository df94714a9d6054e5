//! The protocol grammar: which canned input each role sends.
//!
//! The grammar is a table of role -> [`StepRule`], so a new revision of the
//! remote menu only needs new table entries. [`Grammar::plan`] turns a node
//! into the concrete [`StepPlan`] the driver executes.

use std::collections::BTreeMap;

use coachflow_types::{Result, Role};
use serde::{Deserialize, Serialize};

use crate::graph::PipelineNode;
use crate::markers::MarkerKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepRule {
    /// Send a fixed input and advance.
    Proceed { input: String },
    /// Send the node's menu letter; letters listed in `confirm_letters` are
    /// followed by `confirm_input`.
    Option {
        confirm_letters: String,
        confirm_input: String,
    },
    /// Choose the feedback branch, wait for `prompt`, then forward human
    /// feedback followed by `confirm_input`.
    Feedback {
        branch_input: String,
        prompt: MarkerKind,
        confirm_input: String,
    },
}

/// What the driver does for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPlan {
    Send(Vec<String>),
    AwaitFeedback {
        inputs: Vec<String>,
        prompt: MarkerKind,
        confirm_input: String,
    },
}

/// Optional overrides, read from the `[grammar]` table of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrammarOverrides {
    pub opening_input: Option<String>,
    pub proceed_input: Option<String>,
    pub critic_branch_input: Option<String>,
    pub feedback_confirm_input: Option<String>,
    pub option_confirm_input: Option<String>,
    pub before_confirm_letters: Option<String>,
    pub after_confirm_letters: Option<String>,
    /// Full per-role replacement rules keyed by role name, applied last.
    pub rules: BTreeMap<String, StepRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    /// Sent once, when the first menu appears.
    pub opening_input: String,
    rules: BTreeMap<Role, StepRule>,
}

const PROCEED: &str = "\n";

impl Default for Grammar {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        for role in [Role::Coach, Role::Coder, Role::Validator, Role::Capitalizer] {
            rules.insert(
                role,
                StepRule::Proceed {
                    input: PROCEED.into(),
                },
            );
        }
        rules.insert(
            Role::Critic,
            StepRule::Feedback {
                branch_input: "\nB\n".into(),
                prompt: MarkerKind::CriticPrompt,
                confirm_input: "y\nyes\nyes\n".into(),
            },
        );
        rules.insert(
            Role::Before,
            StepRule::Option {
                confirm_letters: "ABCDEF".into(),
                confirm_input: "Y\n".into(),
            },
        );
        rules.insert(
            Role::After,
            StepRule::Option {
                confirm_letters: String::new(),
                confirm_input: "Y\n".into(),
            },
        );
        Self {
            opening_input: PROCEED.into(),
            rules,
        }
    }
}

impl Grammar {
    pub fn with_overrides(overrides: &GrammarOverrides) -> Result<Self> {
        let mut grammar = Self::default();
        if let Some(input) = &overrides.opening_input {
            grammar.opening_input = input.clone();
        }
        for (role, rule) in grammar.rules.iter_mut() {
            match rule {
                StepRule::Proceed { input } => {
                    if let Some(v) = &overrides.proceed_input {
                        *input = v.clone();
                    }
                }
                StepRule::Option {
                    confirm_letters,
                    confirm_input,
                } => {
                    if let Some(v) = &overrides.option_confirm_input {
                        *confirm_input = v.clone();
                    }
                    let letters = match role {
                        Role::Before => overrides.before_confirm_letters.as_ref(),
                        Role::After => overrides.after_confirm_letters.as_ref(),
                        _ => None,
                    };
                    if let Some(v) = letters {
                        *confirm_letters = v.to_ascii_uppercase();
                    }
                }
                StepRule::Feedback {
                    branch_input,
                    confirm_input,
                    ..
                } => {
                    if let Some(v) = &overrides.critic_branch_input {
                        *branch_input = v.clone();
                    }
                    if let Some(v) = &overrides.feedback_confirm_input {
                        *confirm_input = v.clone();
                    }
                }
            }
        }
        for (name, rule) in &overrides.rules {
            grammar.rules.insert(name.parse::<Role>()?, rule.clone());
        }
        Ok(grammar)
    }

    pub fn rule(&self, role: Role) -> Option<&StepRule> {
        self.rules.get(&role)
    }

    /// The inputs for a step whose target is `node`. Roles without a rule
    /// proceed with a bare newline.
    pub fn plan(&self, node: &PipelineNode) -> StepPlan {
        match self.rules.get(&node.role) {
            None => StepPlan::Send(vec![PROCEED.into()]),
            Some(StepRule::Proceed { input }) => StepPlan::Send(vec![input.clone()]),
            Some(StepRule::Option {
                confirm_letters,
                confirm_input,
            }) => {
                let letter = node.effective_choice().letter();
                let mut inputs = vec![format!("{letter}\n")];
                if confirm_letters.contains(letter) {
                    inputs.push(confirm_input.clone());
                }
                StepPlan::Send(inputs)
            }
            Some(StepRule::Feedback {
                branch_input,
                prompt,
                confirm_input,
            }) => StepPlan::AwaitFeedback {
                inputs: vec![branch_input.clone()],
                prompt: *prompt,
                confirm_input: confirm_input.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachflow_types::Choice;

    fn node(role: Role) -> PipelineNode {
        PipelineNode::new("n", role)
    }

    #[test]
    fn plain_roles_send_newline() {
        let grammar = Grammar::default();
        for role in [Role::Coach, Role::Coder, Role::Validator, Role::Capitalizer] {
            assert_eq!(grammar.plan(&node(role)), StepPlan::Send(vec!["\n".into()]));
        }
    }

    #[test]
    fn critic_waits_for_feedback() {
        let plan = Grammar::default().plan(&node(Role::Critic));
        assert_eq!(
            plan,
            StepPlan::AwaitFeedback {
                inputs: vec!["\nB\n".into()],
                prompt: MarkerKind::CriticPrompt,
                confirm_input: "y\nyes\nyes\n".into(),
            }
        );
    }

    #[test]
    fn before_letters_get_confirmed() {
        let grammar = Grammar::default();
        let skip = node(Role::Before).with_choice(Choice::new('C').unwrap());
        assert_eq!(
            grammar.plan(&skip),
            StepPlan::Send(vec!["C\n".into(), "Y\n".into()])
        );
        let j = node(Role::Before).with_choice(Choice::new('J').unwrap());
        assert_eq!(grammar.plan(&j), StepPlan::Send(vec!["J\n".into()]));
    }

    #[test]
    fn after_letters_are_sent_alone() {
        let grammar = Grammar::default();
        let eval = node(Role::After).with_choice(Choice::new('d').unwrap());
        assert_eq!(grammar.plan(&eval), StepPlan::Send(vec!["D\n".into()]));
        // Default choice is A.
        assert_eq!(
            grammar.plan(&node(Role::After)),
            StepPlan::Send(vec!["A\n".into()])
        );
    }

    #[test]
    fn overrides_replace_canned_inputs() {
        let overrides = GrammarOverrides {
            opening_input: Some("\r\n".into()),
            proceed_input: Some("go\n".into()),
            after_confirm_letters: Some("ab".into()),
            ..GrammarOverrides::default()
        };
        let grammar = Grammar::with_overrides(&overrides).unwrap();
        assert_eq!(grammar.opening_input, "\r\n");
        assert_eq!(
            grammar.plan(&node(Role::Coder)),
            StepPlan::Send(vec!["go\n".into()])
        );
        assert_eq!(
            grammar.plan(&node(Role::After)),
            StepPlan::Send(vec!["A\n".into(), "Y\n".into()])
        );
    }

    #[test]
    fn rule_overrides_from_toml() {
        let overrides: GrammarOverrides = toml::from_str(
            r#"
            [rules.Validator]
            kind = "feedback"
            branch_input = "V\n"
            prompt = "refinement_prompt"
            confirm_input = "y\n"
            "#,
        )
        .unwrap();
        let grammar = Grammar::with_overrides(&overrides).unwrap();
        match grammar.plan(&node(Role::Validator)) {
            StepPlan::AwaitFeedback { prompt, .. } => {
                assert_eq!(prompt, MarkerKind::RefinementPrompt)
            }
            other => panic!("expected feedback plan, got {other:?}"),
        }
    }

    #[test]
    fn unknown_role_in_rule_overrides_is_rejected() {
        let mut overrides = GrammarOverrides::default();
        overrides.rules.insert(
            "Painter".into(),
            StepRule::Proceed {
                input: "\n".into(),
            },
        );
        assert!(Grammar::with_overrides(&overrides).is_err());
    }
}
