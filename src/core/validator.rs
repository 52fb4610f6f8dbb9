//! Graph validation - structural checks run before anything touches the remote host
//!
//! Every check runs even when an earlier one fails, so the caller sees all
//! problems at once. Nothing here mutates the graph.

use super::command::validate_naming_pattern;
use super::graph::{Graph, KindTag, NodeKind, PortDirection};
use crate::catalog::ToolCatalog;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Outcome of validating a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Fold another report's findings into this one
    pub fn merge(mut self, other: ValidationReport) -> Self {
        self.errors.extend(other.errors);
        self.valid = self.errors.is_empty();
        self
    }

    /// True if any error message contains `needle`
    pub fn has_error_containing(&self, needle: &str) -> bool {
        self.errors.iter().any(|e| e.contains(needle))
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            return write!(f, "graph is valid");
        }
        writeln!(f, "graph is invalid ({} problems):", self.errors.len())?;
        for error in &self.errors {
            writeln!(f, "  - {}", error)?;
        }
        Ok(())
    }
}

/// Structural validation: integrity, cycles, disconnected nodes, missing inputs
pub fn validate(graph: &Graph) -> ValidationReport {
    let mut errors = Vec::new();

    if graph.is_empty() {
        errors.push("workflow has no nodes".to_string());
    }

    check_integrity(graph, &mut errors);
    check_cycles(graph, &mut errors);
    check_disconnected(graph, &mut errors);
    check_required_inputs(graph, &mut errors);

    ValidationReport::from_errors(errors)
}

/// Structural validation plus the checks that need the tool catalog
pub fn validate_with_catalog(graph: &Graph, catalog: &dyn ToolCatalog) -> ValidationReport {
    let mut errors = Vec::new();

    for node in graph.nodes() {
        match &node.kind {
            NodeKind::Transform | NodeKind::View => {
                let Some(schema) = catalog.lookup(&node.component) else {
                    errors.push(format!(
                        "unknown component '{}' for node {}",
                        node.component, node.id
                    ));
                    continue;
                };
                for option in schema.options.iter().filter(|o| o.required) {
                    let present = match node.config.get(&option.name) {
                        Some(value) => !super::command::is_empty_value(value),
                        None => option
                            .default
                            .as_ref()
                            .is_some_and(|v| !super::command::is_empty_value(v)),
                    };
                    if !present {
                        errors.push(format!(
                            "parameter '{}' is required for node {}",
                            option.label(),
                            node.id
                        ));
                    }
                }
            }
            NodeKind::Sink {
                destination,
                naming_pattern,
                ..
            } => {
                if destination.trim().is_empty() {
                    errors.push(format!("sink node {} has no destination path", node.id));
                }
                if let Some(pattern) = naming_pattern {
                    if let Err(placeholder) = validate_naming_pattern(pattern) {
                        errors.push(format!(
                            "invalid placeholder {} in naming pattern of node {}",
                            placeholder, node.id
                        ));
                    }
                }
            }
            NodeKind::Source { .. } => {}
        }
    }

    validate(graph).merge(ValidationReport::from_errors(errors))
}

/// Referential integrity, port direction/type and input fan-in
fn check_integrity(graph: &Graph, errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for node in graph.nodes() {
        if !seen.insert(node.id.as_str()) {
            errors.push(format!("duplicate node id {}", node.id));
        }
    }

    let mut fan_in: HashMap<(&str, &str), usize> = HashMap::new();
    for edge in graph.edges() {
        let from = graph.node(&edge.from_node);
        let to = graph.node(&edge.to_node);

        if from.is_none() {
            errors.push(format!(
                "connection {} references unknown node {}",
                edge.id, edge.from_node
            ));
        }
        if to.is_none() {
            errors.push(format!(
                "connection {} references unknown node {}",
                edge.id, edge.to_node
            ));
        }
        let (Some(from), Some(to)) = (from, to) else {
            continue;
        };

        let from_port = from.port(&edge.from_port);
        let to_port = to.port(&edge.to_port);
        match from_port {
            None => errors.push(format!(
                "connection {} uses unknown port '{}' on node {}",
                edge.id, edge.from_port, from.id
            )),
            Some(p) if p.direction != PortDirection::Output => errors.push(format!(
                "connection {} starts at input port '{}' on node {}",
                edge.id, edge.from_port, from.id
            )),
            _ => {}
        }
        match to_port {
            None => errors.push(format!(
                "connection {} uses unknown port '{}' on node {}",
                edge.id, edge.to_port, to.id
            )),
            Some(p) if p.direction != PortDirection::Input => errors.push(format!(
                "connection {} ends at output port '{}' on node {}",
                edge.id, edge.to_port, to.id
            )),
            _ => {}
        }
        if let (Some(a), Some(b)) = (from_port, to_port) {
            if a.port_type != b.port_type {
                errors.push(format!(
                    "connection {} joins incompatible port types {:?} and {:?}",
                    edge.id, a.port_type, b.port_type
                ));
            }
        }

        *fan_in
            .entry((edge.to_node.as_str(), edge.to_port.as_str()))
            .or_default() += 1;
    }

    // Report in node order so messages are stable
    for node in graph.nodes() {
        for port in node.input_ports() {
            if let Some(&count) = fan_in.get(&(node.id.as_str(), port.name.as_str())) {
                if count > 1 {
                    errors.push(format!(
                        "input port '{}' on node {} has {} incoming connections (at most 1 allowed)",
                        port.name, node.id, count
                    ));
                }
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first cycle search with an explicit stack.
///
/// Each stack frame holds a node index and the position of the next
/// successor to look at; the frames on the stack form the current path.
fn check_cycles(graph: &Graph, errors: &mut Vec<String>) {
    let nodes = graph.nodes();
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for edge in graph.edges() {
        if let (Some(&from), Some(&to)) = (
            index.get(edge.from_node.as_str()),
            index.get(edge.to_node.as_str()),
        ) {
            successors[from].push(to);
        }
    }

    let mut state = vec![Visit::Unvisited; nodes.len()];
    for root in 0..nodes.len() {
        if state[root] != Visit::Unvisited {
            continue;
        }

        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        state[root] = Visit::OnStack;

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            if next < successors[node].len() {
                frame.1 += 1;
                let succ = successors[node][next];
                match state[succ] {
                    Visit::Unvisited => {
                        state[succ] = Visit::OnStack;
                        stack.push((succ, 0));
                    }
                    Visit::OnStack => {
                        let start = stack
                            .iter()
                            .position(|&(n, _)| n == succ)
                            .unwrap_or(0);
                        let mut path: Vec<&str> = stack[start..]
                            .iter()
                            .map(|&(n, _)| nodes[n].id.as_str())
                            .collect();
                        path.push(nodes[succ].id.as_str());
                        errors.push(format!("cycle detected: {}", path.join(" -> ")));
                    }
                    Visit::Done => {}
                }
            } else {
                state[node] = Visit::Done;
                stack.pop();
            }
        }
    }
}

fn check_disconnected(graph: &Graph, errors: &mut Vec<String>) {
    let touched: HashSet<&str> = graph
        .edges()
        .iter()
        .flat_map(|e| [e.from_node.as_str(), e.to_node.as_str()])
        .collect();

    for node in graph.nodes() {
        if !touched.contains(node.id.as_str()) {
            errors.push(format!(
                "disconnected node {}: no incoming or outgoing connections",
                node.id
            ));
        }
    }
}

fn check_required_inputs(graph: &Graph, errors: &mut Vec<String>) {
    for node in graph.nodes() {
        if !matches!(node.kind.tag(), KindTag::Transform | KindTag::View) {
            continue;
        }
        for port in node.input_ports().filter(|p| p.required) {
            let connected = graph.incoming(&node.id).any(|e| e.to_port == port.name);
            if !connected {
                errors.push(format!(
                    "missing input for {}: required input port '{}' is not connected",
                    node.id, port.name
                ));
            }
        }
    }
}
