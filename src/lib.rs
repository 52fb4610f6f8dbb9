//! bioflow - Remote workflow orchestration engine
//!
//! Models a bioinformatics pipeline as a graph of typed nodes, validates it,
//! orders it topologically and runs each node on a remote host over SSH.

pub mod catalog;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod remote;
pub mod report;

// Re-exports
pub use catalog::{NamingConvention, OutputResolver, StaticCatalog, ToolCatalog, ToolSchema};
pub use config::EngineConfig;
pub use crate::core::{Executor, Graph, GraphSnapshot, NodeKind, RunEvent, Scheduler, ValidationReport};
pub use engine::Engine;
pub use error::RunError;
pub use remote::{MemoryChannel, RemoteChannel, RemoteCredential, SshChannel};
pub use report::{ExecutionReport, Outcome, ReportEntry, RunState};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
