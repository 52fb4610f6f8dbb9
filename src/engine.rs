//! Engine facade - run submission from a serialized graph

use crate::catalog::{NamingConvention, OutputResolver, ToolCatalog};
use crate::config::EngineConfig;
use crate::core::{
    validate, validate_with_catalog, Executor, Graph, GraphSnapshot, NodeId, RunEvent, Scheduler,
    ValidationReport,
};
use crate::error::RunError;
use crate::remote::RemoteChannel;
use crate::report::ExecutionReport;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Binds a remote channel, a tool catalog and an output resolver
pub struct Engine {
    channel: Arc<dyn RemoteChannel>,
    catalog: Arc<dyn ToolCatalog>,
    resolver: Arc<dyn OutputResolver>,
    env_wrapper: Option<String>,
}

impl Engine {
    /// Create an engine; outputs go under the configured work dir
    pub fn new(
        channel: Arc<dyn RemoteChannel>,
        catalog: Arc<dyn ToolCatalog>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            channel,
            catalog,
            resolver: Arc::new(NamingConvention::new(config.work_dir.clone())),
            env_wrapper: config.env_wrapper.clone(),
        }
    }

    /// Replace the default naming-convention resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn OutputResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// The channel runs are dispatched to
    pub fn channel(&self) -> &dyn RemoteChannel {
        self.channel.as_ref()
    }

    /// Structural and catalog validation without running anything
    pub fn validate(&self, snapshot: &GraphSnapshot) -> ValidationReport {
        validate_with_catalog(&Graph::from_snapshot(snapshot.clone()), self.catalog.as_ref())
    }

    /// Execution order of a structurally valid graph
    pub fn order(&self, snapshot: &GraphSnapshot) -> Result<Vec<NodeId>, RunError> {
        let graph = Graph::from_snapshot(snapshot.clone());
        let report = validate(&graph);
        if !report.valid {
            return Err(RunError::Validation(report));
        }
        Ok(Scheduler::order(&graph)?)
    }

    /// Executor for one run, plus its event stream
    pub fn executor(&self) -> (Executor, mpsc::UnboundedReceiver<RunEvent>) {
        let (executor, events) = Executor::new(
            Arc::clone(&self.channel),
            Arc::clone(&self.catalog),
            Arc::clone(&self.resolver),
        );
        (executor.with_env_wrapper(self.env_wrapper.clone()), events)
    }

    /// Run a submitted graph to completion, discarding progress events
    pub async fn submit(&self, snapshot: GraphSnapshot) -> Result<ExecutionReport, RunError> {
        let (executor, _events) = self.executor();
        executor.run(Graph::from_snapshot(snapshot)).await
    }
}
