use std::collections::HashMap;
use std::path::Path;

use coachflow_dot::{AttributeValue, DotGraph, NodeDef};
use coachflow_types::{Choice, CoachflowError, Result, Role};
use serde::{Deserialize, Serialize};

/// A pipeline: role-tagged nodes connected by edges that fix execution order.
///
/// Node order follows the pipeline file. Edge order is significant: it is the
/// order validation reads ("first" and "last" edge) and the tie-break order of
/// the linearizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineGraph {
    #[serde(default)]
    pub name: String,
    nodes: Vec<PipelineNode>,
    #[serde(default)]
    edges: Vec<PipelineEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineNode {
    pub id: String,
    pub role: Role,
    /// Menu letter sent by Before/After nodes. Ignored for other roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub selected: bool,
}

impl PipelineNode {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            choice: None,
            prompt: None,
            selected: false,
        }
    }

    pub fn with_choice(mut self, choice: Choice) -> Self {
        self.choice = Some(choice);
        self
    }

    /// The letter an option node sends; `A` when none was configured.
    pub fn effective_choice(&self) -> Choice {
        self.choice.unwrap_or_default()
    }

    /// An option node whose choice carries free text but has none.
    pub fn missing_prompt(&self) -> bool {
        self.role.is_option()
            && self.effective_choice().requires_prompt(self.role)
            && self.prompt.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl PipelineEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

// --- Attribute extraction helpers ---

fn get_text_attr(attrs: &HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    attrs.get(key).map(AttributeValue::as_text)
}

fn get_bool_attr(attrs: &HashMap<String, AttributeValue>, key: &str) -> Option<bool> {
    attrs.get(key).and_then(AttributeValue::as_bool)
}

fn node_def_to_pipeline_node(node_def: &NodeDef) -> Result<PipelineNode> {
    let attrs = &node_def.attrs;
    let role = get_text_attr(attrs, "role")
        .or_else(|| get_text_attr(attrs, "type"))
        .ok_or_else(|| {
            CoachflowError::ValidationError(format!(
                "Node '{}' has no role attribute",
                node_def.id
            ))
        })?
        .parse::<Role>()?;

    let choice = match get_text_attr(attrs, "choice") {
        Some(value) if role.is_option() => Some(Choice::parse_for(role, &value)?),
        Some(_) => None,
        None if role.is_option() => Some(Choice::default()),
        None => None,
    };

    Ok(PipelineNode {
        id: node_def.id.clone(),
        role,
        choice,
        prompt: get_text_attr(attrs, "prompt").filter(|p| !p.is_empty()),
        selected: get_bool_attr(attrs, "selected").unwrap_or(false),
    })
}

impl PipelineGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn from_dot(graph: DotGraph) -> Result<Self> {
        let mut nodes = Vec::with_capacity(graph.nodes.len());
        for node_def in &graph.nodes {
            nodes.push(node_def_to_pipeline_node(node_def)?);
        }

        let mut pipeline = Self {
            name: graph.name,
            nodes,
            edges: Vec::with_capacity(graph.edges.len()),
        };

        for edge_def in &graph.edges {
            let id = match get_text_attr(&edge_def.attrs, "id") {
                Some(id) if !id.is_empty() => id,
                _ => pipeline.next_edge_id(),
            };
            if pipeline.edge(&id).is_some() {
                return Err(CoachflowError::ValidationError(format!(
                    "Duplicate edge id '{id}'"
                )));
            }
            pipeline
                .edges
                .push(PipelineEdge::new(id, &edge_def.from, &edge_def.to));
        }

        Ok(pipeline)
    }

    pub fn from_dot_str(source: &str) -> Result<Self> {
        Self::from_dot(coachflow_dot::parse(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let graph: Self = serde_json::from_str(source)?;
        let mut seen = std::collections::HashSet::new();
        for node in &graph.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(CoachflowError::ValidationError(format!(
                    "Duplicate node id '{}'",
                    node.id
                )));
            }
        }
        Ok(graph)
    }

    /// Load a pipeline file. `.json` files use the serde form, anything else
    /// is parsed as DOT.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&source)
        } else {
            Self::from_dot_str(&source)
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    // --- Queries ---

    pub fn node(&self, id: &str) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut PipelineNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[PipelineNode] {
        &self.nodes
    }

    pub fn edge(&self, id: &str) -> Option<&PipelineEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn edges(&self) -> &[PipelineEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    // --- Editing ---

    pub fn add_node(&mut self, node: PipelineNode) -> Result<()> {
        if self.node(&node.id).is_some() {
            return Err(CoachflowError::ValidationError(format!(
                "Node '{}' already exists",
                node.id
            )));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<PipelineNode> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        self.edges.retain(|e| e.source != id && e.target != id);
        Some(self.nodes.remove(index))
    }

    /// Append an edge between two existing nodes and return its generated id.
    pub fn connect(&mut self, source: &str, target: &str) -> Result<String> {
        let id = self.next_edge_id();
        for endpoint in [source, target] {
            if self.node(endpoint).is_none() {
                return Err(CoachflowError::MissingNode {
                    edge: id,
                    node: endpoint.to_string(),
                });
            }
        }
        self.edges.push(PipelineEdge::new(id.clone(), source, target));
        Ok(id)
    }

    pub fn remove_edge(&mut self, id: &str) -> Option<PipelineEdge> {
        let index = self.edges.iter().position(|e| e.id == id)?;
        Some(self.edges.remove(index))
    }

    pub fn set_selected(&mut self, id: &str, selected: bool) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.selected = selected;
                true
            }
            None => false,
        }
    }

    fn next_edge_id(&self) -> String {
        let mut n = self.edges.len() + 1;
        loop {
            let candidate = format!("e{n}");
            if self.edge(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}
