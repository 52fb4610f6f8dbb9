//! Workflow graph model - typed nodes, ports and connections

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Opaque node identifier (`node_<n>`)
pub type NodeId = String;

/// Port payload type. Only files flow between nodes today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PortType {
    #[default]
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// A named, typed connection point on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub direction: PortDirection,
    #[serde(rename = "type", default)]
    pub port_type: PortType,
    /// Only meaningful for input ports
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Port {
    /// Required file input port
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Input,
            port_type: PortType::File,
            required: true,
        }
    }

    /// File output port
    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Output,
            port_type: PortType::File,
            required: false,
        }
    }

    /// Mark an input port as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// How a sink delivers upstream files to its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SinkMode {
    #[default]
    Copy,
    Move,
}

/// Node kind, carrying only the fields that kind needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeKind {
    /// File input; its output is the set of remote files the user picked
    Source {
        #[serde(default)]
        files: Vec<String>,
    },
    /// File output; copies or moves upstream files into `destination`
    Sink {
        destination: String,
        #[serde(default)]
        mode: SinkMode,
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "namingPattern")]
        naming_pattern: Option<String>,
    },
    /// Tool invocation
    Transform,
    /// Visualization / read-only consumer
    View,
}

/// Field-less kind tag used in reports and messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KindTag {
    Source,
    Sink,
    Transform,
    View,
}

impl fmt::Display for KindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Sink => write!(f, "sink"),
            Self::Transform => write!(f, "transform"),
            Self::View => write!(f, "view"),
        }
    }
}

impl NodeKind {
    pub fn tag(&self) -> KindTag {
        match self {
            Self::Source { .. } => KindTag::Source,
            Self::Sink { .. } => KindTag::Sink,
            Self::Transform => KindTag::Transform,
            Self::View => KindTag::View,
        }
    }

    /// Ports a freshly created node of this kind gets
    pub fn default_ports(&self) -> Vec<Port> {
        match self {
            Self::Source { .. } => vec![Port::output("file")],
            Self::Sink { .. } => vec![Port::input("file")],
            Self::Transform => vec![Port::input("file"), Port::output("file")],
            Self::View => vec![Port::input("file")],
        }
    }
}

/// Canvas position, carried through snapshots but ignored by execution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub component: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// Input ports in declaration order
    pub fn input_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports
            .iter()
            .filter(|p| p.direction == PortDirection::Input)
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports
            .iter()
            .filter(|p| p.direction == PortDirection::Output)
    }
}

/// Directed connection `(from_node, from_port) -> (to_node, to_port)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub from_node: NodeId,
    pub from_port: String,
    pub to_node: NodeId,
    pub to_port: String,
}

/// Rejected graph edits
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("node '{0}' does not exist")]
    UnknownNode(NodeId),

    #[error("node '{node}' has no port named '{port}'")]
    UnknownPort { node: NodeId, port: String },

    #[error("port '{port}' on node '{node}' is not an {expected} port")]
    WrongDirection {
        node: NodeId,
        port: String,
        expected: PortDirection,
    },

    #[error("cannot connect {from_type:?} port to {to_type:?} port")]
    TypeMismatch { from_type: PortType, to_type: PortType },

    #[error("input port '{port}' on node '{node}' already has a connection ({edge})")]
    InputOccupied {
        node: NodeId,
        port: String,
        edge: String,
    },

    #[error("connection '{0}' does not exist")]
    UnknownEdge(String),
}

/// Serializable `{nodes, edges}` form used for save/export/import and run submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default, alias = "connections")]
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    /// Parse a snapshot from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Workflow graph. Nodes keep their insertion order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    next_node: u64,
    next_edge: u64,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from a snapshot.
    ///
    /// Content is taken as-is: dangling edges, bad ports and duplicate ids
    /// survive so the validator can report them. Nodes without ports get the
    /// default ports of their kind and edges without ids get fresh ones.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self {
            next_node: max_suffix(snapshot.nodes.iter().map(|n| n.id.as_str()), "node_"),
            next_edge: max_suffix(snapshot.edges.iter().map(|e| e.id.as_str()), "edge_"),
            nodes: snapshot.nodes,
            edges: Vec::new(),
        };

        for node in &mut graph.nodes {
            if node.ports.is_empty() {
                node.ports = node.kind.default_ports();
            }
        }

        for mut edge in snapshot.edges {
            if edge.id.is_empty() {
                edge.id = graph.fresh_edge_id();
            }
            graph.edges.push(edge);
        }

        graph
    }

    /// Load a snapshot from a JSON or YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );
        let snapshot: GraphSnapshot = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(Self::from_snapshot(snapshot))
    }

    /// Serializable copy of the current graph
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Add a node with the default ports of its kind, returning its id
    pub fn add_node(&mut self, component: impl Into<String>, kind: NodeKind) -> NodeId {
        self.next_node += 1;
        let id = format!("node_{}", self.next_node);
        let ports = kind.default_ports();
        self.nodes.push(Node {
            id: id.clone(),
            component: component.into(),
            kind,
            ports,
            config: Map::new(),
            continue_on_error: false,
            position: None,
        });
        id
    }

    /// Remove a node and every connection touching it
    pub fn remove_node(&mut self, id: &str) -> Result<Node, GraphError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        self.edges.retain(|e| e.from_node != id && e.to_node != id);
        Ok(self.nodes.remove(index))
    }

    /// Connect an output port to an input port.
    ///
    /// Input ports accept a single connection; output ports fan out freely.
    pub fn add_edge(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Result<String, GraphError> {
        let source = self.lookup_port(from_node, from_port, PortDirection::Output)?;
        let target = self.lookup_port(to_node, to_port, PortDirection::Input)?;

        if source.port_type != target.port_type {
            return Err(GraphError::TypeMismatch {
                from_type: source.port_type,
                to_type: target.port_type,
            });
        }

        if let Some(existing) = self
            .edges
            .iter()
            .find(|e| e.to_node == to_node && e.to_port == to_port)
        {
            return Err(GraphError::InputOccupied {
                node: to_node.to_string(),
                port: to_port.to_string(),
                edge: existing.id.clone(),
            });
        }

        let id = self.fresh_edge_id();
        self.edges.push(Edge {
            id: id.clone(),
            from_node: from_node.to_string(),
            from_port: from_port.to_string(),
            to_node: to_node.to_string(),
            to_port: to_port.to_string(),
        });
        Ok(id)
    }

    /// Remove an edge by id
    pub fn remove_edge(&mut self, edge_id: &str) -> Result<Edge, GraphError> {
        let index = self
            .edges
            .iter()
            .position(|e| e.id == edge_id)
            .ok_or_else(|| GraphError::UnknownEdge(edge_id.to_string()))?;
        Ok(self.edges.remove(index))
    }

    /// Replace one option value in a node's config
    pub fn set_config(&mut self, id: &str, option: &str, value: Value) -> Result<(), GraphError> {
        self.node_mut(id)?.config.insert(option.to_string(), value);
        Ok(())
    }

    /// Let the run go on when this node fails
    pub fn set_continue_on_error(&mut self, id: &str, flag: bool) -> Result<(), GraphError> {
        self.node_mut(id)?.continue_on_error = flag;
        Ok(())
    }

    /// Move a node on the canvas
    pub fn set_position(&mut self, id: &str, x: f64, y: f64) -> Result<(), GraphError> {
        self.node_mut(id)?.position = Some(Position { x, y });
        Ok(())
    }

    /// Get node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Insertion index of a node
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Connections ending at `id`, in edge order
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to_node == id)
    }

    /// Connections starting at `id`, in edge order
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from_node == id)
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, GraphError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
    }

    fn lookup_port(
        &self,
        node_id: &str,
        port_name: &str,
        expected: PortDirection,
    ) -> Result<&Port, GraphError> {
        let node = self
            .node(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;
        let port = node.port(port_name).ok_or_else(|| GraphError::UnknownPort {
            node: node_id.to_string(),
            port: port_name.to_string(),
        })?;
        if port.direction != expected {
            return Err(GraphError::WrongDirection {
                node: node_id.to_string(),
                port: port_name.to_string(),
                expected,
            });
        }
        Ok(port)
    }

    fn fresh_edge_id(&mut self) -> String {
        self.next_edge += 1;
        format!("edge_{}", self.next_edge)
    }
}

/// Highest `<prefix><n>` counter among ids, so new ids never collide
fn max_suffix<'a>(ids: impl Iterator<Item = &'a str>, prefix: &str) -> u64 {
    ids.filter_map(|id| id.strip_prefix(prefix))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}
