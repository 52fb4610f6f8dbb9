//! Core engine - graph model, validation, scheduling and execution

mod command;
mod executor;
mod graph;
mod scheduler;
mod validator;

pub use command::{
    build_tool_command, plan_sink, render_naming_pattern, shell_quote, validate_naming_pattern,
    wrap_in_env, SinkPlan, COMMAND_PLACEHOLDER, NAMING_PLACEHOLDERS,
};
pub use executor::{Executor, RunEvent};
pub use graph::{
    Edge, Graph, GraphError, GraphSnapshot, KindTag, Node, NodeId, NodeKind, Port,
    PortDirection, PortType, Position, SinkMode,
};
pub use scheduler::{Scheduler, SchedulerError};
pub use validator::{validate, validate_with_catalog, ValidationReport};
