//! Error types for the task queue.

use std::fmt;

use flashmat_core::KernelError;
use thiserror::Error;

use crate::task::TaskId;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// A task whose kernel returned an error or panicked.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    /// Position of the task in submission order.
    pub id: TaskId,
    /// Task name, e.g. "chol".
    pub name: String,
    /// Error reported by the kernel.
    pub error: KernelError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} ({}): {}", self.id.index(), self.name, self.error)
    }
}

fn list_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from configuring or draining the queue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Configuration rejected before any task ran.
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// One or more tasks failed during `exec`. All other tasks still ran.
    #[error("{} task(s) failed: {}", .0.len(), list_failures(.0))]
    TaskFailed(Vec<TaskFailure>),

    /// A kernel run inline (queue disabled) failed.
    #[error("Kernel {name} failed: {source}")]
    Kernel {
        /// Task name
        name: String,
        /// Error reported by the kernel
        #[source]
        source: KernelError,
    },

    /// Writing dirty blocks back from the accelerators failed once every
    /// task had run. Task failures of the same run are kept alongside.
    #[error("Device flush failed after {} task failure(s): {source}", .failures.len())]
    DeviceFlush {
        /// Tasks that failed during the run
        failures: Vec<TaskFailure>,
        /// Error reported by the backend
        #[source]
        source: KernelError,
    },

    /// The operation needs an idle queue, but tasks are pending or running.
    #[error("Queue is not idle: {0}")]
    NotIdle(String),
}

impl QueueError {
    /// Kernel errors carried by this error, in submission order.
    pub fn kernel_errors(&self) -> Vec<&KernelError> {
        match self {
            QueueError::TaskFailed(failures) => failures.iter().map(|f| &f.error).collect(),
            QueueError::Kernel { source, .. } => vec![source],
            QueueError::DeviceFlush { failures, source } => failures
                .iter()
                .map(|f| &f.error)
                .chain(std::iter::once(source))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_failed_lists_every_task() {
        let err = QueueError::TaskFailed(vec![
            TaskFailure {
                id: TaskId::new(3),
                name: "lu".to_string(),
                error: KernelError::Singular { index: 0 },
            },
            TaskFailure {
                id: TaskId::new(7),
                name: "trsm".to_string(),
                error: KernelError::Panicked("boom".to_string()),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 task(s) failed"));
        assert!(msg.contains("task 3 (lu)"));
        assert!(msg.contains("boom"));
        assert_eq!(err.kernel_errors().len(), 2);
    }
}
