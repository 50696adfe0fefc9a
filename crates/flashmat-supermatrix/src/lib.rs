#![warn(missing_docs)]
//! SuperMatrix: out-of-order task execution for blocked matrix algorithms
//!
//! Algorithms push leaf operations as tasks that declare which blocks they
//! read and write. The [`Supermatrix`] context builds a dependency graph in
//! submission order and, when the outermost algorithm call returns, runs
//! every task on a pool of worker threads:
//! - `config`: queue configuration and environment overrides
//! - `task`: task descriptions and operand declarations
//! - `deps`: read/write conflict tracking per block
//! - `queue`: the session object, verbose rendering, statistics
//! - `exec`: the worker pool with sorting, cache affinity, stealing and data affinity
//! - `cache`, `device`: simulated cache and accelerator residency
//!
//! # Example
//!
//! ```
//! use flashmat_core::Obj;
//! use flashmat_supermatrix::{QueueConfig, Supermatrix, TaskSpec};
//!
//! let sm = Supermatrix::new(QueueConfig::default().with_num_threads(2)).unwrap();
//! sm.enable();
//! let a = Obj::<f64>::create(2, 2);
//! sm.run_scoped(|| {
//!     let view = a.clone();
//!     let task = TaskSpec::new("fill", move || {
//!         view.fill(1.0);
//!         Ok(())
//!     })
//!     .output(&a);
//!     // Safety: the task only touches `a`, which it declares.
//!     unsafe { sm.push(task) }
//! })
//! .unwrap();
//! assert_eq!(a.get(1, 1).unwrap(), 1.0);
//! ```

pub mod cache;
pub mod config;
pub mod deps;
pub mod device;
pub mod error;
pub mod exec;
pub mod queue;
pub mod task;

// Re-export main types
pub use cache::CacheState;
pub use config::{ConflictDetection, DataAffinity, QueueConfig, Verbose};
pub use deps::DepKind;
pub use device::{DeviceBackend, DeviceEvent, RecordingDevice};
pub use error::{QueueError, Result, TaskFailure};
pub use exec::{ExecStats, TaskRecord};
pub use flashmat_core::KernelError;
pub use queue::Supermatrix;
pub use task::{Access, Kernel, Operand, TaskId, TaskParam, TaskSpec, TaskState};
