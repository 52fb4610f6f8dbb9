//! Run executor - walks the topological order and dispatches nodes to the remote host
//!
//! Nodes run strictly one after another. Command output is streamed back as
//! [`RunEvent`]s while the remote command is still running.

use super::command::{build_tool_command, plan_sink, wrap_in_env};
use super::graph::{Graph, KindTag, Node, NodeId, NodeKind};
use super::scheduler::Scheduler;
use super::validator::validate_with_catalog;
use crate::catalog::{OutputResolver, ToolCatalog};
use crate::error::RunError;
use crate::remote::{run_command, ChannelError, ExitStatus, OutputChunk, RemoteChannel};
use crate::report::{ExecutionReport, ReportEntry, RunState};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Run progress event
#[derive(Debug, Clone)]
pub enum RunEvent {
    NodeStarted { node_id: NodeId, kind: KindTag },
    Output { node_id: NodeId, chunk: OutputChunk },
    NodeFinished { entry: ReportEntry },
    RunFinished { state: RunState },
}

/// Executes validated graphs against one remote channel
pub struct Executor {
    channel: Arc<dyn RemoteChannel>,
    catalog: Arc<dyn ToolCatalog>,
    resolver: Arc<dyn OutputResolver>,
    /// Used for tools whose schema has no environment wrapper of its own
    env_wrapper: Option<String>,
    cancel: CancellationToken,
    event_tx: mpsc::UnboundedSender<RunEvent>,
}

/// Node dispatch failed in a way the report cannot absorb
enum Interrupt {
    Connection(ChannelError),
    Cancelled,
}

impl Executor {
    /// Create a new executor and the receiver for its events
    pub fn new(
        channel: Arc<dyn RemoteChannel>,
        catalog: Arc<dyn ToolCatalog>,
        resolver: Arc<dyn OutputResolver>,
    ) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        (
            Self {
                channel,
                catalog,
                resolver,
                env_wrapper: None,
                cancel: CancellationToken::new(),
                event_tx: tx,
            },
            rx,
        )
    }

    /// Fallback environment template for tools without one
    pub fn with_env_wrapper(mut self, wrapper: Option<String>) -> Self {
        self.env_wrapper = wrapper;
        self
    }

    /// Token that stops the run between nodes and interrupts the running command
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validate, order and execute `graph`
    pub async fn run(&self, graph: Graph) -> Result<ExecutionReport, RunError> {
        let validation = validate_with_catalog(&graph, self.catalog.as_ref());
        if !validation.valid {
            log::warn!("Rejected graph with {} problems", validation.errors.len());
            return Err(RunError::Validation(validation));
        }

        let order = Scheduler::order(&graph)?;
        log::info!(
            "Running {} nodes on {}",
            order.len(),
            self.channel.describe()
        );

        let mut report = ExecutionReport::begin();
        let mut produced: HashMap<NodeId, Vec<String>> = HashMap::new();
        let mut failed: HashSet<NodeId> = HashSet::new();
        let mut state = RunState::Completed;

        for id in &order {
            if self.cancel.is_cancelled() {
                log::warn!("Run cancelled before node {}", id);
                state = RunState::Cancelled;
                break;
            }

            let Some(node) = graph.node(id) else {
                continue;
            };

            let blocked = graph
                .incoming(id)
                .find(|e| failed.contains(&e.from_node))
                .map(|e| e.from_node.clone());
            let upstream_failure = blocked.is_some();

            let entry = match blocked {
                Some(upstream) => ReportEntry::failure(
                    node,
                    format!("upstream node {} failed; not executed", upstream),
                ),
                None => {
                    self.emit(RunEvent::NodeStarted {
                        node_id: id.clone(),
                        kind: node.kind.tag(),
                    });
                    let inputs: Vec<String> = graph
                        .incoming(id)
                        .flat_map(|e| produced.get(&e.from_node).cloned().unwrap_or_default())
                        .collect();
                    match self.dispatch(node, &inputs).await {
                        Ok(entry) => entry,
                        Err(Interrupt::Cancelled) => {
                            self.finish_node(&mut report, ReportEntry::failure(node, "cancelled"));
                            state = RunState::Cancelled;
                            break;
                        }
                        Err(Interrupt::Connection(source)) => {
                            log::warn!("Connection lost while running {}: {}", id, source);
                            self.finish_node(
                                &mut report,
                                ReportEntry::failure(node, format!("connection error: {}", source)),
                            );
                            let partial = report.finish(RunState::Aborted);
                            self.emit(RunEvent::RunFinished {
                                state: RunState::Aborted,
                            });
                            return Err(RunError::Connection {
                                source,
                                partial: Box::new(partial),
                            });
                        }
                    }
                }
            };

            let succeeded = entry.is_success();
            if succeeded {
                produced.insert(id.clone(), entry.outputs.clone());
            } else {
                log::warn!("Node {} failed: {}", id, entry.detail);
                failed.insert(id.clone());
            }
            self.finish_node(&mut report, entry);

            if !succeeded && !upstream_failure && !node.continue_on_error {
                log::warn!("Aborting run after failure of {}", id);
                state = RunState::Aborted;
                break;
            }
        }

        log::info!("Run {} finished: {:?}", report.run_id(), state);
        self.emit(RunEvent::RunFinished { state });
        Ok(report.finish(state))
    }

    async fn dispatch(&self, node: &Node, inputs: &[String]) -> Result<ReportEntry, Interrupt> {
        log::info!("Dispatching {} ({} {})", node.id, node.kind.tag(), node.component);

        match &node.kind {
            NodeKind::Source { files } => Ok(ReportEntry::success(
                node,
                format!("{} file(s) designated", files.len()),
            )
            .with_outputs(files.clone())),

            NodeKind::Transform | NodeKind::View => {
                let Some(schema) = self.catalog.lookup(&node.component) else {
                    return Ok(ReportEntry::failure(
                        node,
                        format!("unknown component '{}'", node.component),
                    ));
                };
                let outputs = self.resolver.outputs(node, Some(schema));
                let command = build_tool_command(schema, &node.config, inputs, &outputs);
                let wrapper = schema.env.as_deref().or(self.env_wrapper.as_deref());
                let command = wrap_in_env(wrapper, &command);

                let (status, last_error) = self.execute(node, &command, schema.has_stderr).await?;
                Ok(command_entry(node, &status, last_error).with_outputs_if_success(outputs))
            }

            NodeKind::Sink {
                destination,
                mode,
                naming_pattern,
            } => {
                if inputs.is_empty() {
                    return Ok(ReportEntry::failure(node, "no input files to deliver"));
                }
                let plan = plan_sink(*mode, destination, naming_pattern.as_deref(), inputs, Utc::now());
                let (status, last_error) = self.execute(node, &plan.command, true).await?;
                Ok(command_entry(node, &status, last_error).with_outputs_if_success(plan.delivered))
            }
        }
    }

    /// Run one command, forwarding output as events.
    ///
    /// Returns the exit status and the last non-empty stderr line.
    async fn execute(
        &self,
        node: &Node,
        command: &str,
        forward_stderr: bool,
    ) -> Result<(Result<ExitStatus, ChannelError>, Option<String>), Interrupt> {
        log::debug!("Command for {}: {}", node.id, command);

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        let event_tx = self.event_tx.clone();
        let node_id = node.id.clone();

        let forwarder = tokio::spawn(async move {
            let mut last_error = None;
            while let Some(chunk) = chunk_rx.recv().await {
                if let OutputChunk::Stderr(text) = &chunk {
                    if let Some(line) = text.lines().rev().find(|l| !l.trim().is_empty()) {
                        last_error = Some(line.trim().to_string());
                    }
                    if !forward_stderr {
                        continue;
                    }
                }
                let _ = event_tx.send(RunEvent::Output {
                    node_id: node_id.clone(),
                    chunk,
                });
            }
            last_error
        });

        let status = run_command(self.channel.as_ref(), command, chunk_tx, self.cancel.clone()).await;
        let last_error = forwarder.await.unwrap_or_default();

        match status {
            Err(ChannelError::Cancelled) => Err(Interrupt::Cancelled),
            Err(e) if e.is_connection() => Err(Interrupt::Connection(e)),
            other => Ok((other, last_error)),
        }
    }

    fn finish_node(&self, report: &mut ExecutionReport, entry: ReportEntry) {
        self.emit(RunEvent::NodeFinished {
            entry: entry.clone(),
        });
        report.record(entry);
    }

    fn emit(&self, event: RunEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Report entry for a finished command
fn command_entry(
    node: &Node,
    status: &Result<ExitStatus, ChannelError>,
    last_error: Option<String>,
) -> ReportEntry {
    match status {
        Ok(status) if status.success() => {
            ReportEntry::success(node, status.to_string()).with_exit_code(status.code)
        }
        Ok(status) => {
            let detail = match last_error {
                Some(line) => format!("{}: {}", status, line),
                None => status.to_string(),
            };
            ReportEntry::failure(node, detail).with_exit_code(status.code)
        }
        Err(e) => ReportEntry::failure(node, e.to_string()),
    }
}
