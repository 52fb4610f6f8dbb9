//! Run-level errors

use crate::core::{SchedulerError, ValidationReport};
use crate::remote::ChannelError;
use crate::report::ExecutionReport;
use thiserror::Error;

/// Why a run produced no complete report
#[derive(Debug, Error)]
pub enum RunError {
    /// The graph was rejected before anything ran
    #[error("{0}")]
    Validation(ValidationReport),

    /// The remote host became unreachable; `partial` holds what ran so far
    #[error("lost connection to remote host: {source}")]
    Connection {
        #[source]
        source: ChannelError,
        partial: Box<ExecutionReport>,
    },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(#[from] SchedulerError),
}

impl RunError {
    /// Validation messages, if this is a validation failure
    pub fn validation_errors(&self) -> Option<&[String]> {
        match self {
            Self::Validation(report) => Some(&report.errors),
            _ => None,
        }
    }

    /// Report of the nodes that ran before a connection failure
    pub fn partial_report(&self) -> Option<&ExecutionReport> {
        match self {
            Self::Connection { partial, .. } => Some(partial.as_ref()),
            _ => None,
        }
    }
}
