use bioflow::core::{validate, Edge, Graph, GraphSnapshot, Node, NodeKind, Scheduler, SinkMode};
use bioflow::remote::{self, MemoryChannel, ScriptedCommand};
use bioflow::{Engine, EngineConfig, Outcome, RunState, StaticCatalog, ToolSchema};
use std::sync::Arc;
use tokio::sync::mpsc;

fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with("fastqc", ToolSchema::new("fastqc"))
        .with("trimmomatic", ToolSchema::new("trimmomatic SE"))
        .with("igv", ToolSchema::new("igv-snapshot"))
}

fn engine(channel: &MemoryChannel) -> Engine {
    let config = EngineConfig {
        work_dir: "/scratch".into(),
        ..EngineConfig::default()
    };
    Engine::new(Arc::new(channel.clone()), Arc::new(catalog()), &config)
}

fn source(files: &[&str]) -> NodeKind {
    NodeKind::Source {
        files: files.iter().map(|f| f.to_string()).collect(),
    }
}

fn sink(destination: &str) -> NodeKind {
    NodeKind::Sink {
        destination: destination.into(),
        mode: SinkMode::Copy,
        naming_pattern: None,
    }
}

/// Tiny deterministic generator so graph properties can be checked over many shapes
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn chance(&mut self, percent: u64) -> bool {
        self.next() % 100 < percent
    }
}

fn raw_nodes(count: usize) -> Vec<Node> {
    let mut scratch = Graph::new();
    for i in 0..count {
        scratch.add_node(format!("tool{}", i), NodeKind::Transform);
    }
    scratch.snapshot().nodes
}

fn raw_edge(from: &str, to: &str) -> Edge {
    Edge {
        id: String::new(),
        from_node: from.into(),
        from_port: "file".into(),
        to_node: to.into(),
        to_port: "file".into(),
    }
}

/// Random DAG: edges only go from lower to higher index, nodes inserted shuffled
fn random_dag(rng: &mut Lcg, count: usize) -> Graph {
    let mut nodes = raw_nodes(count);
    for i in (1..nodes.len()).rev() {
        let j = (rng.next() as usize) % (i + 1);
        nodes.swap(i, j);
    }

    let mut edges = Vec::new();
    for i in 0..count {
        for j in (i + 1)..count {
            if rng.chance(25) {
                edges.push(raw_edge(&format!("node_{}", i + 1), &format!("node_{}", j + 1)));
            }
        }
    }
    Graph::from_snapshot(GraphSnapshot { nodes, edges })
}

#[tokio::test]
async fn test_source_transform_sink_all_succeed_in_order() {
    let channel = MemoryChannel::new();
    let mut graph = Graph::new();
    let a = graph.add_node("server-file", source(&["/data/reads.fq"]));
    let b = graph.add_node("fastqc", NodeKind::Transform);
    let c = graph.add_node("server-folder", sink("/results"));
    graph.add_edge(&a, "file", &b, "file").unwrap();
    graph.add_edge(&b, "file", &c, "file").unwrap();

    let report = engine(&channel).submit(graph.snapshot()).await.unwrap();

    let ids: Vec<&str> = report.entries().iter().map(|e| e.node_id.as_str()).collect();
    assert_eq!(ids, vec![a.as_str(), b.as_str(), c.as_str()]);
    assert!(report.entries().iter().all(|e| e.outcome == Outcome::Success));
    assert_eq!(report.state(), RunState::Completed);
    assert_eq!(
        channel.executed_commands(),
        vec![
            "fastqc /data/reads.fq",
            "mkdir -p /results && cp -r -- /scratch/fastqc_node_2.out /results/",
        ]
    );
}

#[test]
fn test_stray_transform_is_disconnected_and_missing_input() {
    let mut graph = Graph::new();
    let a = graph.add_node("server-file", source(&["/data/reads.fq"]));
    let b = graph.add_node("fastqc", NodeKind::Transform);
    let d = graph.add_node("server-folder", sink("/results"));
    let e = graph.add_node("trimmomatic", NodeKind::Transform);
    graph.add_edge(&a, "file", &b, "file").unwrap();
    graph.add_edge(&b, "file", &d, "file").unwrap();

    let report = validate(&graph);
    assert!(!report.valid);
    assert!(report.has_error_containing(&format!("disconnected node {}", e)));
    assert!(report.has_error_containing(&format!("missing input for {}", e)));
    assert_eq!(report.errors.len(), 2);
}

#[tokio::test]
async fn test_listing_hides_system_entries() {
    let channel = MemoryChannel::new();
    channel
        .add_file("/home/bio/.hidden", "x")
        .add_file("/home/bio/pagefile.sys", "x")
        .add_file("/home/bio/notes.txt", "x")
        .add_dir("/home/bio/data");

    let listing = remote::list_directory(&channel, "/home/bio").await.unwrap();
    let names: Vec<String> = listing.iter().map(|e| e.display_name()).collect();
    assert_eq!(names, vec!["data/", "notes.txt"]);
}

#[tokio::test]
async fn test_batch_delete_with_second_failure() {
    let channel = MemoryChannel::new();
    channel
        .add_file("/tmp/1.bam", "1")
        .add_file("/tmp/2.bam", "2")
        .add_file("/tmp/3.bam", "3")
        .fail_path("/tmp/2.bam");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let paths = vec!["/tmp/1.bam".to_string(), "/tmp/2.bam".into(), "/tmp/3.bam".into()];
    let report = remote::delete_files(&channel, &paths, Some(&tx)).await.unwrap();
    drop(tx);

    let mut last = None;
    while let Some(progress) = rx.recv().await {
        last = Some(progress);
    }
    let last = last.unwrap();
    assert_eq!(last.fraction(), 1.0);
    assert_eq!(last.path, "/tmp/3.bam");

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "/tmp/2.bam");
    assert!(!channel.exists("/tmp/3.bam"));
}

#[test]
fn test_acyclic_orders_are_complete_and_topological() {
    let mut rng = Lcg(7);
    for count in 1..40 {
        let graph = random_dag(&mut rng, count);
        let order = Scheduler::order(&graph).unwrap();
        assert_eq!(order.len(), graph.node_count());

        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        for edge in graph.edges() {
            assert!(pos(&edge.from_node) < pos(&edge.to_node));
        }
        assert_eq!(Scheduler::order(&graph).unwrap(), order);
    }
}

#[test]
fn test_every_cycle_is_reported() {
    let mut rng = Lcg(42);
    for length in 1..12 {
        let extra = (rng.next() % 5) as usize;
        let graph = random_dag(&mut rng, length + extra);
        let mut snapshot = graph.snapshot();
        for i in 1..length {
            snapshot
                .edges
                .push(raw_edge(&format!("node_{}", i), &format!("node_{}", i + 1)));
        }
        snapshot
            .edges
            .push(raw_edge(&format!("node_{}", length), "node_1"));

        let report = validate(&Graph::from_snapshot(snapshot));
        assert!(!report.valid);
        assert!(report.has_error_containing("cycle detected"), "length {}", length);
    }
}

#[test]
fn test_snapshot_round_trip_is_equivalent() {
    let mut rng = Lcg(99);
    for count in [3, 8, 15] {
        let graph = random_dag(&mut rng, count);
        let json = graph.snapshot().to_json().unwrap();
        let restored = Graph::from_snapshot(GraphSnapshot::from_json(&json).unwrap());

        assert_eq!(validate(&restored), validate(&graph));
        assert_eq!(
            Scheduler::order(&restored).unwrap(),
            Scheduler::order(&graph).unwrap()
        );
    }
}

/// source -> fastqc -> trimmomatic, plus an independent source -> igv branch
fn two_branches() -> (Graph, String, String, String) {
    let mut graph = Graph::new();
    let a = graph.add_node("server-file", source(&["/data/a.fq"]));
    let b = graph.add_node("fastqc", NodeKind::Transform);
    let c = graph.add_node("trimmomatic", NodeKind::Transform);
    let s = graph.add_node("server-file", source(&["/data/b.bam"]));
    let v = graph.add_node("igv", NodeKind::View);
    graph.add_edge(&a, "file", &b, "file").unwrap();
    graph.add_edge(&b, "file", &c, "file").unwrap();
    graph.add_edge(&s, "file", &v, "file").unwrap();
    (graph, b, c, v)
}

#[tokio::test]
async fn test_failure_without_continue_omits_later_nodes() {
    let channel = MemoryChannel::new();
    channel.script("fastqc", ScriptedCommand::exit(1));
    let (graph, b, _, _) = two_branches();
    let order = Scheduler::order(&graph).unwrap();

    let report = engine(&channel).submit(graph.snapshot()).await.unwrap();
    assert_eq!(report.state(), RunState::Aborted);

    let failed_at = order.iter().position(|id| id == &b).unwrap();
    assert_eq!(report.entries().len(), failed_at + 1);
    for later in &order[failed_at + 1..] {
        assert!(report.entry(later).is_none());
    }
}

#[tokio::test]
async fn test_failure_with_continue_runs_independent_nodes() {
    let channel = MemoryChannel::new();
    channel.script("fastqc", ScriptedCommand::exit(1));
    let (mut graph, b, c, v) = two_branches();
    graph.set_continue_on_error(&b, true).unwrap();

    let report = engine(&channel).submit(graph.snapshot()).await.unwrap();
    assert_eq!(report.state(), RunState::Completed);
    assert_eq!(report.entries().len(), 5);
    assert_eq!(report.entry(&b).unwrap().outcome, Outcome::Failure);
    assert_eq!(report.entry(&c).unwrap().outcome, Outcome::Failure);
    assert!(report.entry(&v).unwrap().is_success());
    assert!(channel
        .executed_commands()
        .contains(&"igv-snapshot /data/b.bam".to_string()));
}

#[tokio::test]
async fn test_invalid_submission_reports_errors() {
    let channel = MemoryChannel::new();
    let snapshot = GraphSnapshot {
        nodes: raw_nodes(2),
        edges: vec![raw_edge("node_1", "node_2"), raw_edge("node_2", "node_1")],
    };

    let err = engine(&channel).submit(snapshot).await.unwrap_err();
    let errors = err.validation_errors().unwrap();
    assert!(errors.iter().any(|e| e.starts_with("cycle detected")));
    assert!(errors.iter().any(|e| e.contains("unknown component 'tool0'")));
    assert_eq!(channel.sessions_opened(), 0);
}
