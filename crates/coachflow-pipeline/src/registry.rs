//! Central per-node status store.
//!
//! Validation and the driver never touch nodes directly: they produce
//! updates (`set_error`, `set_highlight`) that land here, keyed by node id.

use std::collections::{HashMap, HashSet};

use coachflow_types::NodeErrorCode;
use serde::Serialize;

use crate::graph::PipelineGraph;
use crate::validation::ValidationReport;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub error: NodeErrorCode,
    pub highlighted: bool,
    pub selected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeStatus>,
    highlighted: Option<String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_graph(graph: &PipelineGraph) -> Self {
        let mut registry = Self::new();
        registry.sync(graph);
        registry
    }

    /// Track the graph's current node set: new ids are added with the
    /// graph's `selected` flag, ids no longer in the graph are dropped.
    pub fn sync(&mut self, graph: &PipelineGraph) {
        let live: HashSet<&str> = graph.nodes().iter().map(|n| n.id.as_str()).collect();
        self.nodes.retain(|id, _| live.contains(id.as_str()));
        if let Some(current) = &self.highlighted {
            if !live.contains(current.as_str()) {
                self.highlighted = None;
            }
        }
        for node in graph.nodes() {
            self.nodes
                .entry(node.id.clone())
                .or_insert_with(|| NodeStatus {
                    selected: node.selected,
                    ..NodeStatus::default()
                });
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn status(&self, id: &str) -> Option<&NodeStatus> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // --- Errors ---

    /// Returns `false` for unknown ids.
    pub fn set_error(&mut self, id: &str, code: NodeErrorCode) -> bool {
        match self.nodes.get_mut(id) {
            Some(status) => {
                status.error = code;
                true
            }
            None => false,
        }
    }

    pub fn reset_errors(&mut self) {
        for status in self.nodes.values_mut() {
            status.error = NodeErrorCode::None;
        }
    }

    /// Replace all error codes with the ones in `report`.
    pub fn apply(&mut self, report: &ValidationReport) {
        self.reset_errors();
        for (id, code) in report.node_errors() {
            self.set_error(id, code);
        }
    }

    /// Nodes carrying an error code, sorted by id.
    pub fn errors(&self) -> Vec<(String, NodeErrorCode)> {
        let mut errors: Vec<_> = self
            .nodes
            .iter()
            .filter(|(_, s)| s.error != NodeErrorCode::None)
            .map(|(id, s)| (id.clone(), s.error))
            .collect();
        errors.sort();
        errors
    }

    // --- Highlight ---

    /// Turning a highlight on moves it: at most one node is highlighted.
    pub fn set_highlight(&mut self, id: &str, on: bool) -> bool {
        if !self.nodes.contains_key(id) {
            return false;
        }
        if on {
            self.clear_highlight();
            if let Some(status) = self.nodes.get_mut(id) {
                status.highlighted = true;
            }
            self.highlighted = Some(id.to_string());
        } else if self.highlighted.as_deref() == Some(id) {
            self.clear_highlight();
        }
        true
    }

    pub fn clear_highlight(&mut self) {
        if let Some(previous) = self.highlighted.take() {
            if let Some(status) = self.nodes.get_mut(&previous) {
                status.highlighted = false;
            }
        }
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    // --- Selection ---

    pub fn set_selected(&mut self, id: &str, selected: bool) -> bool {
        match self.nodes.get_mut(id) {
            Some(status) => {
                status.selected = selected;
                true
            }
            None => false,
        }
    }

    pub fn selected_ids(&self) -> HashSet<String> {
        self.nodes
            .iter()
            .filter(|(_, s)| s.selected)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineNode;
    use crate::validation::validate;
    use coachflow_types::Role;

    fn graph() -> PipelineGraph {
        let mut g = PipelineGraph::new("g");
        g.add_node(PipelineNode::new("a", Role::Coder)).unwrap();
        g.add_node(PipelineNode::new("b", Role::Critic)).unwrap();
        g.add_node(PipelineNode::new("c", Role::Capitalizer)).unwrap();
        g.connect("a", "b").unwrap();
        g.connect("b", "c").unwrap();
        g
    }

    #[test]
    fn highlight_is_exclusive() {
        let mut registry = NodeRegistry::from_graph(&graph());
        assert!(registry.set_highlight("a", true));
        assert!(registry.set_highlight("b", true));

        let lit: Vec<_> = ["a", "b", "c"]
            .iter()
            .filter(|id| registry.status(id).unwrap().highlighted)
            .collect();
        assert_eq!(lit, vec![&"b"]);
        assert_eq!(registry.highlighted(), Some("b"));

        registry.set_highlight("a", false);
        assert_eq!(registry.highlighted(), Some("b"));
        registry.set_highlight("b", false);
        assert_eq!(registry.highlighted(), None);
        assert!(!registry.status("b").unwrap().highlighted);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut registry = NodeRegistry::from_graph(&graph());
        assert!(!registry.set_highlight("ghost", true));
        assert!(!registry.set_error("ghost", NodeErrorCode::TwoAfter));
        assert_eq!(registry.highlighted(), None);
    }

    #[test]
    fn apply_resets_previous_errors() {
        let g = graph();
        let mut registry = NodeRegistry::from_graph(&g);
        registry.set_error("c", NodeErrorCode::TwoBefore);

        registry.apply(&validate(&g));
        assert_eq!(
            registry.errors(),
            vec![("a".to_string(), NodeErrorCode::FirstIsNotCoach)]
        );
    }

    #[test]
    fn errors_are_sorted_by_node_id() {
        let mut registry = NodeRegistry::from_graph(&graph());
        registry.set_error("c", NodeErrorCode::TwoBefore);
        registry.set_error("a", NodeErrorCode::FirstIsNotCoach);

        assert_eq!(
            registry.errors(),
            vec![
                ("a".to_string(), NodeErrorCode::FirstIsNotCoach),
                ("c".to_string(), NodeErrorCode::TwoBefore),
            ]
        );
    }

    #[test]
    fn sync_tracks_added_and_removed_nodes() {
        let mut g = graph();
        let mut registry = NodeRegistry::from_graph(&g);
        registry.set_highlight("b", true);

        g.remove_node("b");
        let mut extra = PipelineNode::new("d", Role::Coach);
        extra.selected = true;
        g.add_node(extra).unwrap();
        registry.sync(&g);

        assert!(!registry.contains("b"));
        assert_eq!(registry.highlighted(), None);
        assert!(registry.selected_ids().contains("d"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn selection_round_trip() {
        let mut registry = NodeRegistry::from_graph(&graph());
        assert!(registry.selected_ids().is_empty());
        registry.set_selected("a", true);
        registry.set_selected("c", true);
        registry.set_selected("a", false);
        let selected: Vec<_> = registry.selected_ids().into_iter().collect();
        assert_eq!(selected, vec!["c".to_string()]);
    }
}
