use std::sync::Arc;
use std::sync::mpsc::RecvError;

use thiserror::Error;

use crate::core::ArcStr;

/// Errors raised while the graph is being built.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task '{task}' depends on a handle from another blueprint (node {index})")]
    ForeignHandle { task: ArcStr, index: usize },

    #[error("Failed to build runtime for task '{0}':\n{1}")]
    Runtime(ArcStr, std::io::Error),
}

/// The failure of a single node.
///
/// Dependents of a failed node resolve to a clone of the same error, so
/// awaiting any downstream value reports the task that actually failed.
#[derive(Debug, Error, Clone)]
pub enum TaskError {
    #[error("Task '{task}':\n{error}")]
    Failed {
        task: ArcStr,
        error: Arc<anyhow::Error>,
    },

    #[error("Task '{task}' panicked: {message}")]
    Panicked { task: ArcStr, message: String },

    #[error("Task '{task}' was cancelled")]
    Cancelled { task: ArcStr },
}

impl TaskError {
    /// Name of the task the error originated from.
    pub fn task(&self) -> &str {
        match self {
            TaskError::Failed { task, .. } => task,
            TaskError::Panicked { task, .. } => task,
            TaskError::Cancelled { task } => task,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled { .. })
    }
}

#[derive(Debug, Error, Clone)]
pub enum ExecError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Scheduler lost contact with its workers")]
    Scheduler(#[from] RecvError),

    #[error("Node {0} is not part of this graph")]
    UnknownNode(usize),
}

/// A malformed connection string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Connection string is empty")]
    Empty,

    #[error("Connection string '{0}' has no host")]
    MissingHost(String),

    #[error("Connection string '{0}' has an invalid host")]
    InvalidHost(String),

    #[error("Connection string '{0}' has no port, expected host:port")]
    MissingPort(String),

    #[error("Connection string '{0}' has an invalid port")]
    InvalidPort(String),
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Address {0} is already bound by a running cluster")]
    AddressInUse(String),

    #[error("Couldn't build the worker pool.\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("No scheduler is listening on {0}")]
    Unreachable(String),

    #[error("Client is closed")]
    Closed,

    #[error("Scheduler at {0} has shut down")]
    Disconnected(String),

    #[error("Couldn't spawn the submission driver.\n{0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl From<TaskError> for ClientError {
    fn from(error: TaskError) -> Self {
        ClientError::Exec(ExecError::Task(error))
    }
}
