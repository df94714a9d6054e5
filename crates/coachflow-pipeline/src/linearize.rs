//! Edge linearization: turns the edge set into the single sequence a run walks.
//!
//! Nodes are ranked by a depth-first post-order traversal started from every
//! distinct source (in order of first appearance), reversed. Edges are then
//! stable-sorted by the rank of their source, so edges sharing a source keep
//! their input order. Cycles are tolerated: the visited set stops the walk and
//! the result is still a permutation of the input.

use std::collections::{HashMap, HashSet};

use crate::graph::PipelineEdge;

type Adjacency<'a> = HashMap<&'a str, Vec<&'a str>>;

/// Adjacency map plus the distinct sources in order of first appearance.
fn adjacency(edges: &[PipelineEdge]) -> (Adjacency<'_>, Vec<&str>) {
    let mut map: Adjacency<'_> = HashMap::new();
    let mut sources = Vec::new();
    for edge in edges {
        map.entry(edge.source.as_str())
            .or_insert_with(|| {
                sources.push(edge.source.as_str());
                Vec::new()
            })
            .push(edge.target.as_str());
    }
    (map, sources)
}

/// Node ids in topological order (for acyclic input).
pub fn node_order(edges: &[PipelineEdge]) -> Vec<String> {
    let (adjacency, sources) = adjacency(edges);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut post_order: Vec<&str> = Vec::new();

    for root in sources {
        if !visited.insert(root) {
            continue;
        }
        // Iterative DFS; each frame holds the node and the next child to visit.
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, next_child) = *frame;
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&child) = children.get(next_child) {
                frame.1 += 1;
                if visited.insert(child) {
                    stack.push((child, 0));
                }
            } else {
                post_order.push(node);
                stack.pop();
            }
        }
    }

    post_order.reverse();
    post_order.into_iter().map(String::from).collect()
}

/// Order `edges` for execution. Always returns a permutation of the input.
pub fn linearize(edges: &[PipelineEdge]) -> Vec<PipelineEdge> {
    let order = node_order(edges);
    let rank: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut ordered = edges.to_vec();
    // `sort_by_key` is stable: ties keep input order.
    ordered.sort_by_key(|e| rank.get(e.source.as_str()).copied().unwrap_or(usize::MAX));
    ordered
}

/// Find one cycle, returned as the node path that closes on itself
/// (`["a", "b", "a"]`). `None` for acyclic edge sets.
pub fn find_cycle(edges: &[PipelineEdge]) -> Option<Vec<String>> {
    let (adjacency, sources) = adjacency(edges);
    let mut finished: HashSet<&str> = HashSet::new();

    for root in sources {
        if finished.contains(root) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        let mut on_stack: HashSet<&str> = HashSet::from([root]);
        while let Some(frame) = stack.last_mut() {
            let (node, next_child) = *frame;
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&child) = children.get(next_child) {
                frame.1 += 1;
                if on_stack.contains(child) {
                    let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                    cycle.push(child.to_string());
                    return Some(cycle);
                }
                if !finished.contains(child) {
                    on_stack.insert(child);
                    stack.push((child, 0));
                }
            } else {
                on_stack.remove(node);
                finished.insert(node);
                stack.pop();
            }
        }
    }
    None
}
