//! The `Supermatrix` context: task queue, dependency graph and execution.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use tracing::{debug, info, trace, warn};

use crate::config::{QueueConfig, Verbose};
use crate::deps::{DepKind, DependencyTracker};
use crate::device::DeviceBackend;
use crate::error::{QueueError, Result};
use crate::exec::{self, ExecStats, Schedule};
use crate::task::{Access, Task, TaskId, TaskSpec};

/// Tasks pushed since the last `exec`.
struct PendingQueue {
    tasks: Vec<Task>,
    graph: StableGraph<TaskId, DepKind>,
    nodes: Vec<NodeIndex>,
    tracker: DependencyTracker,
}

impl PendingQueue {
    fn new(config: &QueueConfig) -> Self {
        Self {
            tasks: Vec::new(),
            graph: StableGraph::new(),
            nodes: Vec::new(),
            tracker: DependencyTracker::new(config.conflict_detection),
        }
    }

    fn push(&mut self, spec: TaskSpec) -> TaskId {
        let id = TaskId::new(self.tasks.len());
        let task = spec.into_task(id);
        let deps = self.tracker.record(id, &task.operands);
        let node = self.graph.add_node(id);
        for &(from, kind) in &deps {
            self.graph.add_edge(self.nodes[from.index()], node, kind);
        }
        trace!(task = id.index(), name = %task.name, deps = deps.len(), "queued");
        self.nodes.push(node);
        self.tasks.push(task);
        id
    }

    fn into_schedule(self) -> Schedule {
        let n = self.tasks.len();
        let mut dependents = vec![Vec::new(); n];
        let mut indegree = vec![0; n];
        for edge in self.graph.edge_references() {
            let from = self.graph[edge.source()].index();
            let to = self.graph[edge.target()].index();
            dependents[from].push(to);
            indegree[to] += 1;
        }
        Schedule {
            tasks: self.tasks,
            dependents,
            indegree,
        }
    }

    fn predecessors(&self, task: usize) -> Vec<(TaskId, DepKind)> {
        let mut preds: Vec<_> = self
            .graph
            .edges_directed(self.nodes[task], Direction::Incoming)
            .map(|e| (self.graph[e.source()], *e.weight()))
            .collect();
        preds.sort_by_key(|(id, _)| *id);
        preds
    }
}

/// Task queue and executor session.
///
/// With the queue disabled, [`push`](Self::push) runs each kernel at once.
/// With it enabled, pushed tasks accumulate until the outermost
/// [`end`](Self::end) (or an explicit [`exec`](Self::exec)) runs them all on
/// the worker pool, honouring every dependency between them.
pub struct Supermatrix {
    config: QueueConfig,
    device: Option<Arc<dyn DeviceBackend>>,
    enabled: AtomicBool,
    depth: AtomicUsize,
    executing: AtomicBool,
    pending: Mutex<PendingQueue>,
    last_stats: Mutex<Option<ExecStats>>,
}

impl Supermatrix {
    /// Create a session. The queue starts disabled.
    pub fn new(config: QueueConfig) -> Result<Self> {
        if config.num_gpus > 0 {
            return Err(QueueError::InvalidConfig(
                "num_gpus > 0 needs a device backend".to_string(),
            ));
        }
        Self::build(config, None)
    }

    /// Create a session whose accelerator workers report transfers to
    /// `device`.
    pub fn with_device(config: QueueConfig, device: Arc<dyn DeviceBackend>) -> Result<Self> {
        Self::build(config, Some(device))
    }

    fn build(config: QueueConfig, device: Option<Arc<dyn DeviceBackend>>) -> Result<Self> {
        config.validate()?;
        debug!(
            threads = config.num_threads,
            queues = config.num_queues(),
            gpus = config.num_gpus,
            "queue session created"
        );
        Ok(Self {
            pending: Mutex::new(PendingQueue::new(&config)),
            config,
            device,
            enabled: AtomicBool::new(false),
            depth: AtomicUsize::new(0),
            executing: AtomicBool::new(false),
            last_stats: Mutex::new(None),
        })
    }

    /// Configuration of this session.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Start queueing tasks instead of running them inline.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        debug!("queue enabled");
    }

    /// Run tasks inline again. Tasks queued before this call still run at
    /// the outermost [`end`](Self::end).
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        debug!("queue disabled");
    }

    /// Check if tasks are queued rather than run inline.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enter an algorithm call.
    pub fn begin(&self) {
        self.depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Leave an algorithm call; leaving the outermost one runs the queue,
    /// along with anything queued before a [`disable`](Self::disable).
    pub fn end(&self) -> Result<()> {
        let prev = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        if prev <= 1 && (self.is_enabled() || self.num_tasks() > 0) {
            self.exec()
        } else {
            Ok(())
        }
    }

    /// Current nesting depth of `begin`/`end`.
    pub fn stack_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Run `f` between `begin` and `end`.
    ///
    /// The queue is drained even if `f` fails; `f`'s error takes precedence.
    pub fn run_scoped<R, E>(&self, f: impl FnOnce() -> std::result::Result<R, E>) -> std::result::Result<R, E>
    where
        E: From<QueueError>,
    {
        self.begin();
        let out = f();
        let ended = self.end();
        let value = out?;
        ended?;
        Ok(value)
    }

    /// Submit a task.
    ///
    /// With the queue disabled the kernel runs before `push` returns and a
    /// kernel error comes back as [`QueueError::Kernel`]. Otherwise the task
    /// is queued behind every earlier task it conflicts with.
    ///
    /// # Safety
    ///
    /// The declared operands must cover every element the kernel reads or
    /// writes. Undeclared accesses may race with other tasks.
    pub unsafe fn push(&self, spec: TaskSpec) -> Result<()> {
        if !self.is_enabled() {
            let name = spec.name().to_string();
            return spec
                .run_now()
                .map_err(|source| QueueError::Kernel { name, source });
        }
        self.pending.lock().push(spec);
        Ok(())
    }

    /// Number of queued tasks.
    pub fn num_tasks(&self) -> usize {
        self.pending.lock().tasks.len()
    }

    /// Drop every queued task without running it.
    pub fn reset(&self) -> Result<()> {
        if self.executing.load(Ordering::Acquire) {
            return Err(QueueError::NotIdle("exec is running".to_string()));
        }
        let mut pending = self.pending.lock();
        let dropped = pending.tasks.len();
        *pending = PendingQueue::new(&self.config);
        debug!(dropped, "queue reset");
        Ok(())
    }

    /// Run every queued task and wait for all of them.
    ///
    /// Every task runs even if some fail; failures are reported together.
    pub fn exec(&self) -> Result<()> {
        if self
            .executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(QueueError::NotIdle("exec is already running".to_string()));
        }
        let pending = {
            let mut guard = self.pending.lock();
            std::mem::replace(&mut *guard, PendingQueue::new(&self.config))
        };
        let result = self.exec_pending(pending);
        self.executing.store(false, Ordering::Release);
        result
    }

    fn exec_pending(&self, pending: PendingQueue) -> Result<()> {
        if pending.tasks.is_empty() {
            return Ok(());
        }
        match self.config.verbose {
            Verbose::None => {}
            style => info!("task graph:\n{}", render(&pending, style)),
        }
        let outcome = exec::run(&self.config, self.device.as_deref(), pending.into_schedule());
        *self.last_stats.lock() = Some(outcome.stats);
        match outcome.flush_error {
            Some(source) => {
                warn!(failed = outcome.failures.len(), error = %source, "device flush failed");
                Err(QueueError::DeviceFlush {
                    failures: outcome.failures,
                    source,
                })
            }
            None if outcome.failures.is_empty() => Ok(()),
            None => {
                warn!(failed = outcome.failures.len(), "tasks failed");
                Err(QueueError::TaskFailed(outcome.failures))
            }
        }
    }

    /// Render the queued task graph.
    pub fn render_dag(&self, style: Verbose) -> String {
        render(&self.pending.lock(), style)
    }

    /// Statistics of the last `exec`.
    pub fn last_stats(&self) -> Option<ExecStats> {
        self.last_stats.lock().clone()
    }

    /// Wall time of the last `exec`.
    pub fn total_time(&self) -> Duration {
        self.last_stats
            .lock()
            .as_ref()
            .map_or(Duration::ZERO, |s| s.total_time)
    }

    /// Sum of task execution times in the last `exec`.
    pub fn parallel_time(&self) -> Duration {
        self.last_stats
            .lock()
            .as_ref()
            .map_or(Duration::ZERO, |s| s.parallel_time)
    }
}

impl Drop for Supermatrix {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().tasks.len();
        if pending > 0 {
            warn!(pending, "queue session dropped with unexecuted tasks");
        }
    }
}

impl std::fmt::Debug for Supermatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supermatrix")
            .field("config", &self.config)
            .field("enabled", &self.is_enabled())
            .field("depth", &self.stack_depth())
            .field("tasks", &self.num_tasks())
            .finish()
    }
}

fn access_tag(access: Access) -> &'static str {
    match access {
        Access::Read => "r",
        Access::Write => "w",
        Access::ReadWrite => "rw",
    }
}

fn render(pending: &PendingQueue, style: Verbose) -> String {
    let mut out = String::new();
    match style {
        Verbose::None => {}
        Verbose::Readable => {
            for (i, task) in pending.tasks.iter().enumerate() {
                let _ = write!(out, "{:>5} {}", i, task.name);
                for (name, value) in &task.params {
                    let _ = write!(out, " {}={}", name, value);
                }
                let _ = write!(out, " |");
                for op in &task.operands {
                    let _ = match op.key.coords {
                        Some((r, c)) => write!(
                            out,
                            " {}:{}({},{})",
                            access_tag(op.access),
                            op.key.id.value(),
                            r,
                            c
                        ),
                        None => write!(out, " {}:{}", access_tag(op.access), op.key.id.value()),
                    };
                }
                let preds = pending.predecessors(i);
                if !preds.is_empty() {
                    let _ = write!(out, " <-");
                    for (id, kind) in preds {
                        let _ = write!(out, " {}{}", id.index(), kind.label());
                    }
                }
                out.push('\n');
            }
        }
        Verbose::Dot => {
            out.push_str("digraph supermatrix {\n");
            for (i, task) in pending.tasks.iter().enumerate() {
                let _ = writeln!(out, "  t{} [label=\"{} {}\"];", i, i, task.name);
            }
            for edge in pending.graph.edge_references() {
                let _ = writeln!(
                    out,
                    "  t{} -> t{} [label=\"{}\"];",
                    pending.graph[edge.source()].index(),
                    pending.graph[edge.target()].index(),
                    edge.weight().label()
                );
            }
            out.push_str("}\n");
        }
    }
    out
}
