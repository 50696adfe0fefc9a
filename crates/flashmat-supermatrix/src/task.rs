//! Task descriptions.
//!
//! A [`TaskSpec`] bundles a kernel closure with the blocks it reads and
//! writes. The queue only looks at the declared operands; the closure
//! itself is opaque.

use std::fmt;

use flashmat_core::{BlockKey, KernelError, Obj, Scalar};

/// Boxed leaf kernel.
pub type Kernel = Box<dyn FnOnce() -> Result<(), KernelError> + Send + 'static>;

/// Position of a task in submission order within one `exec` batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

impl TaskId {
    /// Create an id from a submission index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Submission index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a task uses an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Read only.
    Read,
    /// Overwritten without being read.
    Write,
    /// Read and updated.
    ReadWrite,
}

impl Access {
    /// Check if the task reads the operand.
    pub fn reads(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    /// Check if the task writes the operand.
    pub fn writes(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// A leaf block used by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    /// Identity and footprint of the block.
    pub key: BlockKey,
    /// Access mode.
    pub access: Access,
}

/// Scalar parameter recorded for verbose output.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskParam {
    /// Integer parameter.
    Int(i64),
    /// Floating-point parameter, e.g. alpha.
    Float(f64),
    /// Enumerated option, e.g. "lower".
    Flag(&'static str),
}

impl fmt::Display for TaskParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskParam::Int(v) => write!(f, "{}", v),
            TaskParam::Float(v) => write!(f, "{}", v),
            TaskParam::Flag(v) => write!(f, "{}", v),
        }
    }
}

/// Lifecycle of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Pushed, waiting for predecessors.
    Queued,
    /// All predecessors done; sitting in a ready queue.
    Ready,
    /// Kernel running on a worker.
    Running,
    /// Kernel returned `Ok`.
    Done,
    /// Kernel returned an error or panicked.
    Failed,
}

/// A task before it is pushed.
pub struct TaskSpec {
    name: String,
    cost: f64,
    params: Vec<(&'static str, TaskParam)>,
    operands: Vec<Operand>,
    kernel: Kernel,
}

impl TaskSpec {
    /// Create a task running `kernel`, with unit cost and no operands.
    pub fn new<F>(name: impl Into<String>, kernel: F) -> Self
    where
        F: FnOnce() -> Result<(), KernelError> + Send + 'static,
    {
        Self {
            name: name.into(),
            cost: 1.0,
            params: Vec::new(),
            operands: Vec::new(),
            kernel: Box::new(kernel),
        }
    }

    /// Set the cost estimate used for sorting ready tasks.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Record a named parameter.
    pub fn param(mut self, name: &'static str, value: TaskParam) -> Self {
        self.params.push((name, value));
        self
    }

    /// Declare every leaf of `obj` as read.
    pub fn input<T: Scalar>(mut self, obj: &Obj<T>) -> Self {
        self.operands.extend(obj.block_keys().into_iter().map(|key| Operand {
            key,
            access: Access::Read,
        }));
        self
    }

    /// Declare every leaf of `obj` as read and updated.
    pub fn output<T: Scalar>(mut self, obj: &Obj<T>) -> Self {
        self.operands.extend(obj.block_keys().into_iter().map(|key| Operand {
            key,
            access: Access::ReadWrite,
        }));
        self
    }

    /// Declare one block key with an explicit access mode.
    pub fn operand(mut self, key: BlockKey, access: Access) -> Self {
        self.operands.push(Operand { key, access });
        self
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cost estimate.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Recorded parameters.
    pub fn params(&self) -> &[(&'static str, TaskParam)] {
        &self.params
    }

    /// Declared operands.
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub(crate) fn into_task(self, id: TaskId) -> Task {
        Task {
            id,
            name: self.name,
            cost: self.cost,
            params: self.params,
            operands: self.operands,
            kernel: Some(self.kernel),
        }
    }

    /// Run the kernel on the calling thread without queueing it.
    pub fn run_now(self) -> Result<(), KernelError> {
        (self.kernel)()
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("cost", &self.cost)
            .field("operands", &self.operands.len())
            .finish()
    }
}

/// A pushed task.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) cost: f64,
    pub(crate) params: Vec<(&'static str, TaskParam)>,
    pub(crate) operands: Vec<Operand>,
    pub(crate) kernel: Option<Kernel>,
}

impl Task {
    /// First written operand; drives affinity and cache placement.
    pub(crate) fn primary_output(&self) -> Option<&BlockKey> {
        self.operands
            .iter()
            .find(|op| op.access.writes())
            .map(|op| &op.key)
    }

    pub(crate) fn outputs(&self) -> impl Iterator<Item = &BlockKey> {
        self.operands
            .iter()
            .filter(|op| op.access.writes())
            .map(|op| &op.key)
    }
}
