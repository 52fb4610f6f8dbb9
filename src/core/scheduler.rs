//! Scheduler - deterministic topological ordering (Kahn's algorithm)

use super::graph::{Graph, NodeId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use thiserror::Error;

/// Raised only when the graph breaks an invariant validation should have caught
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("connection {edge} references unknown node {node}")]
    UnknownNode { edge: String, node: String },

    #[error("nodes could not be scheduled (cycle?): {}", .0.join(", "))]
    Unscheduled(Vec<NodeId>),
}

/// Produces execution orders for a graph
pub struct Scheduler;

impl Scheduler {
    /// Topological order; among ready nodes the one inserted first goes first
    pub fn order(graph: &Graph) -> Result<Vec<NodeId>, SchedulerError> {
        let nodes = graph.nodes();
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; nodes.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

        for edge in graph.edges() {
            let lookup = |node: &str| {
                index.get(node).copied().ok_or_else(|| SchedulerError::UnknownNode {
                    edge: edge.id.clone(),
                    node: node.to_string(),
                })
            };
            let from = lookup(&edge.from_node)?;
            let to = lookup(&edge.to_node)?;
            successors[from].push(to);
            in_degree[to] += 1;
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(nodes[i].id.clone());
            for &next in &successors[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < nodes.len() {
            let stuck = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| nodes[i].id.clone())
                .collect();
            return Err(SchedulerError::Unscheduled(stuck));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{GraphSnapshot, NodeKind};

    fn source(graph: &mut Graph) -> NodeId {
        graph.add_node(
            "reads",
            NodeKind::Source {
                files: vec!["/data/a.fq".into()],
            },
        )
    }

    #[test]
    fn test_chain_order() {
        let mut graph = Graph::new();
        let c = graph.add_node("multiqc", NodeKind::Transform);
        let b = graph.add_node("fastqc", NodeKind::Transform);
        let a = source(&mut graph);
        graph.add_edge(&a, "file", &b, "file").unwrap();
        graph.add_edge(&b, "file", &c, "file").unwrap();

        assert_eq!(Scheduler::order(&graph).unwrap(), vec![a, b, c]);
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let mut graph = Graph::new();
        let s = source(&mut graph);
        let x = graph.add_node("fastqc", NodeKind::Transform);
        let y = graph.add_node("trimmomatic", NodeKind::Transform);
        let z = graph.add_node("igv", NodeKind::View);
        // connect in reverse so edge order does not match insertion order
        graph.add_edge(&s, "file", &z, "file").unwrap();
        graph.add_edge(&s, "file", &y, "file").unwrap();
        graph.add_edge(&s, "file", &x, "file").unwrap();

        let first = Scheduler::order(&graph).unwrap();
        assert_eq!(first, vec![s, x, y, z]);
        assert_eq!(Scheduler::order(&graph).unwrap(), first);
    }

    #[test]
    fn test_every_edge_respected() {
        let mut graph = Graph::new();
        let v = graph.add_node("igv", NodeKind::View);
        let t2 = graph.add_node("samtools", NodeKind::Transform);
        let t1 = graph.add_node("bwa", NodeKind::Transform);
        let s = source(&mut graph);
        graph.add_edge(&s, "file", &t1, "file").unwrap();
        graph.add_edge(&t1, "file", &t2, "file").unwrap();
        graph.add_edge(&t2, "file", &v, "file").unwrap();

        let order = Scheduler::order(&graph).unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        for edge in graph.edges() {
            assert!(pos(&edge.from_node) < pos(&edge.to_node));
        }
    }

    #[test]
    fn test_cycle_is_invariant_error() {
        let snapshot = GraphSnapshot::from_json(
            r#"{
              "nodes": [
                {"id": "node_1", "component": "a", "kind": {"type": "transform"}},
                {"id": "node_2", "component": "b", "kind": {"type": "transform"}}
              ],
              "edges": [
                {"fromNode": "node_1", "fromPort": "file", "toNode": "node_2", "toPort": "file"},
                {"fromNode": "node_2", "fromPort": "file", "toNode": "node_1", "toPort": "file"}
              ]
            }"#,
        )
        .unwrap();
        let graph = Graph::from_snapshot(snapshot);
        assert_eq!(
            Scheduler::order(&graph).unwrap_err(),
            SchedulerError::Unscheduled(vec!["node_1".into(), "node_2".into()])
        );
    }

    #[test]
    fn test_dangling_edge_is_invariant_error() {
        let snapshot = GraphSnapshot::from_json(
            r#"{
              "nodes": [{"id": "node_1", "component": "a", "kind": {"type": "transform"}}],
              "edges": [{"id": "edge_9", "fromNode": "node_1", "fromPort": "file", "toNode": "ghost", "toPort": "file"}]
            }"#,
        )
        .unwrap();
        let err = Scheduler::order(&Graph::from_snapshot(snapshot)).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownNode { ref node, .. } if node == "ghost"));
    }

    #[test]
    fn test_empty_graph() {
        assert!(Scheduler::order(&Graph::new()).unwrap().is_empty());
    }
}
