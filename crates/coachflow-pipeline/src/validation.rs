//! Pipeline validation: edge-grammar rules and per-node diagnostics.
//!
//! Rules are evaluated per edge in the graph's input order (not the
//! linearized order). The first edge must start at a Coach, the last edge
//! must end at a Capitalizer, and interior edges may not join certain
//! option-role pairs. A single edge is both first and last. Call [`validate`]
//! for the full report or [`ensure_valid`] to fail on any diagnostic.

use coachflow_types::{CoachflowError, NodeErrorCode, Result, Role};

use crate::graph::{PipelineEdge, PipelineGraph, PipelineNode};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: NodeErrorCode,
    /// The node the badge goes on.
    pub node_id: String,
    pub edge_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// `(node id, code)` updates in rule order. A later code on the same node
    /// replaces an earlier one when applied to a registry.
    pub fn node_errors(&self) -> impl Iterator<Item = (&str, NodeErrorCode)> {
        self.diagnostics
            .iter()
            .map(|d| (d.node_id.as_str(), d.code))
    }

    pub fn errors_for(&self, node_id: &str) -> Vec<NodeErrorCode> {
        self.diagnostics
            .iter()
            .filter(|d| d.node_id == node_id)
            .map(|d| d.code)
            .collect()
    }

    pub fn summary(&self) -> String {
        self.diagnostics
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ---------------------------------------------------------------------------
// EdgeRule trait
// ---------------------------------------------------------------------------

/// Where an edge sits in the input edge list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePosition {
    /// The only edge: first and last at once.
    Only,
    First,
    Last,
    Interior,
}

impl EdgePosition {
    fn of(index: usize, len: usize) -> Self {
        match (index == 0, index + 1 == len) {
            (true, true) => EdgePosition::Only,
            (true, false) => EdgePosition::First,
            (false, true) => EdgePosition::Last,
            (false, false) => EdgePosition::Interior,
        }
    }

    fn is_first(self) -> bool {
        matches!(self, EdgePosition::Only | EdgePosition::First)
    }

    fn is_last(self) -> bool {
        matches!(self, EdgePosition::Only | EdgePosition::Last)
    }
}

/// Which endpoint of the edge a rule blames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Target,
}

pub trait EdgeRule: Send + Sync {
    fn code(&self) -> NodeErrorCode;
    /// Return the offending endpoint, or `None` when the edge passes.
    fn check(
        &self,
        position: EdgePosition,
        source: &PipelineNode,
        target: &PipelineNode,
    ) -> Option<Endpoint>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct FirstIsCoachRule;

impl EdgeRule for FirstIsCoachRule {
    fn code(&self) -> NodeErrorCode {
        NodeErrorCode::FirstIsNotCoach
    }

    fn check(
        &self,
        position: EdgePosition,
        source: &PipelineNode,
        _target: &PipelineNode,
    ) -> Option<Endpoint> {
        (position.is_first() && source.role != Role::Coach).then_some(Endpoint::Source)
    }
}

struct LastIsCapitalizerRule;

impl EdgeRule for LastIsCapitalizerRule {
    fn code(&self) -> NodeErrorCode {
        NodeErrorCode::LastIsNotCapitalizer
    }

    fn check(
        &self,
        position: EdgePosition,
        _source: &PipelineNode,
        target: &PipelineNode,
    ) -> Option<Endpoint> {
        (position.is_last() && target.role != Role::Capitalizer).then_some(Endpoint::Target)
    }
}

/// Interior role pairs that may not follow each other; the target is blamed.
const FORBIDDEN_PAIRS: &[(Role, Role, NodeErrorCode)] = &[
    (Role::Before, Role::After, NodeErrorCode::BeforeThenAfter),
    (Role::After, Role::After, NodeErrorCode::TwoAfter),
    (Role::Before, Role::Before, NodeErrorCode::TwoBefore),
];

struct ForbiddenPairRule {
    source: Role,
    target: Role,
    code: NodeErrorCode,
}

impl EdgeRule for ForbiddenPairRule {
    fn code(&self) -> NodeErrorCode {
        self.code
    }

    fn check(
        &self,
        position: EdgePosition,
        source: &PipelineNode,
        target: &PipelineNode,
    ) -> Option<Endpoint> {
        (position == EdgePosition::Interior
            && source.role == self.source
            && target.role == self.target)
            .then_some(Endpoint::Target)
    }
}

pub fn default_rules() -> Vec<Box<dyn EdgeRule>> {
    let mut rules: Vec<Box<dyn EdgeRule>> =
        vec![Box::new(FirstIsCoachRule), Box::new(LastIsCapitalizerRule)];
    rules.extend(FORBIDDEN_PAIRS.iter().map(|&(source, target, code)| {
        Box::new(ForbiddenPairRule {
            source,
            target,
            code,
        }) as Box<dyn EdgeRule>
    }));
    rules
}

fn describe(code: NodeErrorCode, edge: &PipelineEdge, node: &PipelineNode) -> String {
    match code {
        NodeErrorCode::FirstIsNotCoach => format!(
            "First edge '{}' starts at '{}' ({}); a pipeline must start with a Coach",
            edge.id, node.id, node.role
        ),
        NodeErrorCode::LastIsNotCapitalizer => format!(
            "Last edge '{}' ends at '{}' ({}); a pipeline must end with a Capitalizer",
            edge.id, node.id, node.role
        ),
        NodeErrorCode::BeforeThenAfter => format!(
            "Edge '{}' goes from a Before step straight to After step '{}'",
            edge.id, node.id
        ),
        NodeErrorCode::TwoAfter => {
            format!("Edge '{}' chains two After steps into '{}'", edge.id, node.id)
        }
        NodeErrorCode::TwoBefore => {
            format!("Edge '{}' chains two Before steps into '{}'", edge.id, node.id)
        }
        NodeErrorCode::MissingNode | NodeErrorCode::None => {
            format!("Edge '{}' is invalid at '{}'", edge.id, node.id)
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every rule against every edge, in input edge order.
pub fn validate(graph: &PipelineGraph) -> ValidationReport {
    validate_with(graph, &default_rules())
}

pub fn validate_with(graph: &PipelineGraph, rules: &[Box<dyn EdgeRule>]) -> ValidationReport {
    let edges = graph.edges();
    let mut diagnostics = Vec::new();

    for (index, edge) in edges.iter().enumerate() {
        let (source, target) = match (graph.node(&edge.source), graph.node(&edge.target)) {
            (Some(s), Some(t)) => (s, t),
            (s, t) => {
                for (id, node) in [(&edge.source, s), (&edge.target, t)] {
                    if node.is_none() {
                        diagnostics.push(Diagnostic {
                            code: NodeErrorCode::MissingNode,
                            node_id: id.clone(),
                            edge_id: edge.id.clone(),
                            message: format!(
                                "Edge '{}' references unknown node '{}'",
                                edge.id, id
                            ),
                        });
                    }
                }
                continue;
            }
        };

        let position = EdgePosition::of(index, edges.len());
        for rule in rules {
            if let Some(endpoint) = rule.check(position, source, target) {
                let node = match endpoint {
                    Endpoint::Source => source,
                    Endpoint::Target => target,
                };
                diagnostics.push(Diagnostic {
                    code: rule.code(),
                    node_id: node.id.clone(),
                    edge_id: edge.id.clone(),
                    message: describe(rule.code(), edge, node),
                });
            }
        }
    }

    ValidationReport { diagnostics }
}

/// Validate; return `Err` if any rule fired.
pub fn ensure_valid(graph: &PipelineGraph) -> Result<ValidationReport> {
    let report = validate(graph);
    if !report.is_valid() {
        return Err(CoachflowError::ValidationError(report.summary()));
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn build(dot: &str) -> PipelineGraph {
        PipelineGraph::from_dot_str(dot).unwrap()
    }

    #[test]
    fn single_edge_coach_to_capitalizer_is_valid() {
        let graph = build("digraph G { a [role=Coach] b [role=Capitalizer] a -> b }");
        assert!(validate(&graph).is_valid());
    }

    #[test]
    fn coach_coder_capitalizer_is_valid() {
        let graph = build(
            "digraph G { a [role=Coach] b [role=Coder] c [role=Capitalizer] a -> b -> c }",
        );
        let report = ensure_valid(&graph).unwrap();
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn first_edge_from_coder_is_flagged_on_source() {
        let graph = build(
            "digraph G { a [role=Coder] b [role=Critic] c [role=Capitalizer] a -> b -> c }",
        );
        let report = validate(&graph);
        assert!(!report.is_valid());
        assert_eq!(report.errors_for("a"), vec![NodeErrorCode::FirstIsNotCoach]);
        assert!(report.errors_for("b").is_empty());
    }

    #[test]
    fn last_edge_not_capitalizer_is_flagged_on_target() {
        let graph = build("digraph G { a [role=Coach] b [role=Coder] a -> b }");
        let report = validate(&graph);
        assert_eq!(report.errors_for("b"), vec![NodeErrorCode::LastIsNotCapitalizer]);
    }

    #[test]
    fn single_edge_checks_both_ends() {
        let graph = build("digraph G { a [role=Coder] b [role=Validator] a -> b }");
        let report = validate(&graph);
        assert_eq!(report.errors_for("a"), vec![NodeErrorCode::FirstIsNotCoach]);
        assert_eq!(report.errors_for("b"), vec![NodeErrorCode::LastIsNotCapitalizer]);
    }

    #[test]
    fn interior_before_then_after_flags_target() {
        let graph = build(
            r#"digraph G {
                c [role=Coach] pre [role=Before] post [role=After]
                v [role=Validator] cap [role=Capitalizer]
                c -> pre -> post -> v -> cap
            }"#,
        );
        let report = validate(&graph);
        assert_eq!(report.errors_for("post"), vec![NodeErrorCode::BeforeThenAfter]);
        assert!(report.errors_for("pre").is_empty());
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn interior_two_after_and_two_before() {
        let graph = build(
            r#"digraph G {
                c [role=Coach] a1 [role=After] a2 [role=After]
                b1 [role=Before] b2 [role=Before] cap [role=Capitalizer]
                c -> a1 -> a2 -> b1 -> b2 -> cap
            }"#,
        );
        let report = validate(&graph);
        assert_eq!(report.errors_for("a2"), vec![NodeErrorCode::TwoAfter]);
        assert_eq!(report.errors_for("b2"), vec![NodeErrorCode::TwoBefore]);
    }

    #[test]
    fn option_pairs_on_first_or_last_edge_are_not_interior() {
        // Only the first/last rules apply at the ends.
        let graph = build(
            r#"digraph G {
                pre [role=Before] post [role=After] cap [role=Capitalizer]
                pre -> post -> cap
            }"#,
        );
        let report = validate(&graph);
        assert_eq!(report.errors_for("pre"), vec![NodeErrorCode::FirstIsNotCoach]);
        assert!(report.errors_for("post").is_empty());
    }

    #[test]
    fn coder_to_critic_interior_is_allowed() {
        let graph = build(
            r#"digraph G {
                c [role=Coach] d [role=Coder] k [role=Critic] cap [role=Capitalizer]
                c -> d -> k -> cap
            }"#,
        );
        assert!(validate(&graph).is_valid());
    }

    #[test]
    fn rules_use_input_order_not_linearized_order() {
        // Linearized, this is a valid coach -> coder -> cap chain; in input
        // order the first edge starts at the Coder.
        let graph = build(
            r#"digraph G {
                c [role=Coach] d [role=Coder] cap [role=Capitalizer]
                d -> cap
                c -> d
            }"#,
        );
        let report = validate(&graph);
        // The last input edge also ends at the Coder.
        assert_eq!(
            report.errors_for("d"),
            vec![NodeErrorCode::FirstIsNotCoach, NodeErrorCode::LastIsNotCapitalizer]
        );
    }

    #[test]
    fn dangling_endpoint_is_missing_node() {
        let json = r#"{"name":"g","nodes":[{"id":"a","role":"Coach"}],
            "edges":[{"id":"e1","source":"a","target":"ghost"}]}"#;
        let graph = PipelineGraph::from_json_str(json).unwrap();
        let report = validate(&graph);
        assert_eq!(report.errors_for("ghost"), vec![NodeErrorCode::MissingNode]);
        assert!(ensure_valid(&graph).is_err());
    }

    #[test]
    fn ensure_valid_names_every_message() {
        let graph = build("digraph G { a [role=Coder] b [role=Validator] a -> b }");
        let err = ensure_valid(&graph).unwrap_err().to_string();
        assert!(err.contains("must start with a Coach"));
        assert!(err.contains("must end with a Capitalizer"));
    }

    #[test]
    fn empty_graph_has_no_diagnostics() {
        assert!(validate(&PipelineGraph::new("empty")).is_valid());
    }
}
