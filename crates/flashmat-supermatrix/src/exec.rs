//! Multithreaded executor for one batch of queued tasks.
//!
//! Workers are scoped OS threads grouped into ready queues. A task enters a
//! ready queue once all its predecessors finished. Each worker dequeues from
//! its own queue (preferring a cache-warm task when caching is on), steals
//! from the tail of other queues when stealing is on, and otherwise waits
//! on a condition variable. Kernels run outside every lock.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use flashmat_core::{BlockKey, KernelError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, debug_span, trace};

use crate::cache::CacheState;
use crate::config::{DataAffinity, QueueConfig};
use crate::device::{DeviceBackend, DeviceResidency};
use crate::error::TaskFailure;
use crate::task::{Kernel, Task, TaskId, TaskState};

/// Timing of one executed task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// Task id.
    pub id: TaskId,
    /// Task name.
    pub name: String,
    /// Worker that ran it.
    pub worker: usize,
    /// Start, relative to the start of `exec`.
    pub start: Duration,
    /// End, relative to the start of `exec`.
    pub end: Duration,
    /// `Done` or `Failed`.
    pub state: TaskState,
    /// Whether the worker took it from another queue.
    pub stolen: bool,
}

/// Statistics of the last `exec`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecStats {
    /// Wall time of `exec`.
    pub total_time: Duration,
    /// Sum of task execution times.
    pub parallel_time: Duration,
    /// Tasks run by each worker.
    pub tasks_per_worker: Vec<usize>,
    /// Tasks taken from another worker's queue.
    pub steals: usize,
    /// Output blocks already resident in the worker's cache.
    pub cache_hits: usize,
    /// Output blocks not resident in the worker's cache.
    pub cache_misses: usize,
    /// One record per task, in completion order.
    pub records: Vec<TaskRecord>,
}

impl ExecStats {
    /// Record of task `id`, if it ran.
    pub fn record(&self, id: TaskId) -> Option<&TaskRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}

/// Tasks of one batch with their dependency structure.
pub(crate) struct Schedule {
    pub(crate) tasks: Vec<Task>,
    /// Successors of each task.
    pub(crate) dependents: Vec<Vec<usize>>,
    /// Number of predecessors of each task.
    pub(crate) indegree: Vec<usize>,
}

/// Static description of a task, readable by every worker.
struct TaskInfo {
    id: TaskId,
    name: String,
    cost: f64,
    keys: Vec<BlockKey>,
    outputs: Vec<BlockKey>,
    primary: Option<BlockKey>,
}

#[derive(Default)]
struct ReadyQueue {
    tasks: VecDeque<usize>,
}

impl ReadyQueue {
    fn insert(&mut self, task: usize, infos: &[TaskInfo], sorting: bool) {
        if sorting {
            let cost = infos[task].cost;
            let pos = self
                .tasks
                .iter()
                .position(|&t| infos[t].cost < cost)
                .unwrap_or(self.tasks.len());
            self.tasks.insert(pos, task);
        } else {
            self.tasks.push_back(task);
        }
    }
}

struct Shared<'a> {
    config: &'a QueueConfig,
    infos: Vec<TaskInfo>,
    dependents: Vec<Vec<usize>>,
    remaining: Vec<AtomicUsize>,
    kernels: Vec<Mutex<Option<Kernel>>>,
    queues: Vec<Mutex<ReadyQueue>>,
    caches: Vec<Mutex<CacheState>>,
    device: Option<Mutex<DeviceResidency<'a>>>,
    generation: Mutex<u64>,
    wakeup: Condvar,
    done: AtomicUsize,
    steals: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    records: Mutex<Vec<TaskRecord>>,
    failures: Mutex<Vec<TaskFailure>>,
    start: Instant,
}

/// Result of running a batch.
pub(crate) struct Outcome {
    pub(crate) stats: ExecStats,
    pub(crate) failures: Vec<TaskFailure>,
    /// Error from writing dirty device blocks back after the last task.
    pub(crate) flush_error: Option<KernelError>,
}

/// Queue index of a task under the affinity rule, if the rule applies.
fn affinity_queue(affinity: DataAffinity, task: usize, coords: Option<(usize, usize)>, n: usize) -> Option<usize> {
    match (affinity, coords) {
        (DataAffinity::None, _) => None,
        (DataAffinity::RoundRobin, _) => Some(task % n),
        (DataAffinity::RowBlockCyclic, Some((i, _))) => Some(i % n),
        (DataAffinity::ColumnBlockCyclic, Some((_, j))) => Some(j % n),
        (DataAffinity::BlockCyclic2d, Some((i, j))) => {
            let (r, c) = mesh(n);
            Some((i % r) * c + (j % c))
        }
        (_, None) => None,
    }
}

/// Most square `r x c` mesh with `r * c == n` and `r <= c`.
fn mesh(n: usize) -> (usize, usize) {
    let mut r = (n as f64).sqrt() as usize;
    while r > 1 && n % r != 0 {
        r -= 1;
    }
    let r = r.max(1);
    (r, n / r)
}

impl<'a> Shared<'a> {
    fn queue_of(&self, worker: usize) -> usize {
        (worker / self.config.effective_cores_per_queue()).min(self.queues.len() - 1)
    }

    fn cache_of(&self, worker: usize) -> usize {
        (worker / self.config.cores_per_cache.max(1)).min(self.caches.len() - 1)
    }

    fn notify(&self) {
        let mut g = self.generation.lock();
        *g = g.wrapping_add(1);
        self.wakeup.notify_all();
    }

    fn enqueue(&self, task: usize, fallback: usize) {
        let info = &self.infos[task];
        let q = affinity_queue(
            self.config.data_affinity,
            task,
            info.primary.and_then(|k| k.coords),
            self.queues.len(),
        )
        .unwrap_or(fallback);
        trace!(task = task, name = %info.name, queue = q, "ready");
        self.queues[q]
            .lock()
            .insert(task, &self.infos, self.config.sorting);
        self.notify();
    }

    fn dequeue(&self, worker: usize) -> Option<(usize, bool)> {
        let q = self.queue_of(worker);
        {
            let mut queue = self.queues[q].lock();
            if self.config.caching && queue.tasks.len() > 1 {
                let cache = self.caches[self.cache_of(worker)].lock();
                let warm = queue.tasks.iter().position(|&t| {
                    self.infos[t]
                        .primary
                        .map_or(false, |k| cache.contains(&k))
                });
                if let Some(task) = warm.and_then(|pos| queue.tasks.remove(pos)) {
                    return Some((task, false));
                }
            }
            if let Some(task) = queue.tasks.pop_front() {
                return Some((task, false));
            }
        }
        if self.config.work_stealing {
            let n = self.queues.len();
            for k in 1..n {
                let victim = (q + k) % n;
                if let Some(task) = self.queues[victim].lock().tasks.pop_back() {
                    self.steals.fetch_add(1, Ordering::Relaxed);
                    return Some((task, true));
                }
            }
        }
        None
    }

    fn run_task(&self, worker: usize, task: usize, stolen: bool) {
        let info = &self.infos[task];
        let device = (worker < self.config.num_gpus).then_some(worker);
        trace!(task = task, name = %info.name, worker = worker, stolen = stolen, "running");

        let mut result = self.prepare_device(device, info);
        let start = self.start.elapsed();
        if result.is_ok() {
            let kernel = self.kernels[task].lock().take();
            result = match kernel {
                Some(kernel) => match catch_unwind(AssertUnwindSafe(kernel)) {
                    Ok(r) => r,
                    Err(payload) => Err(KernelError::Panicked(panic_message(payload.as_ref()))),
                },
                None => Err(KernelError::Panicked("kernel already taken".to_string())),
            };
        }
        let end = self.start.elapsed();
        if let Some(residency) = &self.device {
            residency.lock().finish(device, &info.outputs);
        }
        self.update_caches(worker, info);

        let state = match result {
            Ok(()) => TaskState::Done,
            Err(error) => {
                debug!(task = task, name = %info.name, error = %error, "task failed");
                self.failures.lock().push(TaskFailure {
                    id: info.id,
                    name: info.name.clone(),
                    error,
                });
                TaskState::Failed
            }
        };
        self.records.lock().push(TaskRecord {
            id: info.id,
            name: info.name.clone(),
            worker,
            start,
            end,
            state,
            stolen,
        });

        let home = self.queue_of(worker);
        for &d in &self.dependents[task] {
            if self.remaining[d].fetch_sub(1, Ordering::AcqRel) == 1 {
                self.enqueue(d, home);
            }
        }
        self.done.fetch_add(1, Ordering::AcqRel);
        self.notify();
    }

    fn prepare_device(&self, device: Option<usize>, info: &TaskInfo) -> Result<(), KernelError> {
        let Some(residency) = &self.device else {
            return Ok(());
        };
        let mut residency = residency.lock();
        match device {
            Some(d) => residency.prepare_device(d, &info.keys),
            None => residency.prepare_host(&info.keys),
        }
    }

    fn update_caches(&self, worker: usize, info: &TaskInfo) {
        let own = self.cache_of(worker);
        {
            let mut cache = self.caches[own].lock();
            if let Some(primary) = &info.primary {
                if cache.contains(primary) {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.cache_misses.fetch_add(1, Ordering::Relaxed);
                }
            }
            for key in &info.keys {
                cache.touch(key);
            }
        }
        for (c, cache) in self.caches.iter().enumerate() {
            if c != own {
                let mut cache = cache.lock();
                for key in &info.outputs {
                    cache.invalidate(key);
                }
            }
        }
    }

    fn worker_loop(&self, worker: usize) -> usize {
        let _span = debug_span!("worker", id = worker).entered();
        let total = self.infos.len();
        let mut ran = 0;
        loop {
            if self.done.load(Ordering::Acquire) == total {
                break;
            }
            let seen = *self.generation.lock();
            if let Some((task, stolen)) = self.dequeue(worker) {
                self.run_task(worker, task, stolen);
                ran += 1;
                continue;
            }
            let mut g = self.generation.lock();
            while *g == seen && self.done.load(Ordering::Acquire) < total {
                self.wakeup.wait(&mut g);
            }
        }
        ran
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run every task of `schedule` and wait for all of them.
#[tracing::instrument(skip_all, fields(tasks = schedule.tasks.len(), threads = config.num_threads))]
pub(crate) fn run(config: &QueueConfig, device: Option<&dyn DeviceBackend>, schedule: Schedule) -> Outcome {
    let start = Instant::now();
    let Schedule {
        tasks,
        dependents,
        indegree,
    } = schedule;

    let elem_bytes = tasks
        .iter()
        .flat_map(|t| t.operands.first())
        .map(|op| op.key.region.elem_bytes)
        .next()
        .unwrap_or(8);
    let mut infos = Vec::with_capacity(tasks.len());
    let mut kernels = Vec::with_capacity(tasks.len());
    for mut task in tasks {
        infos.push(TaskInfo {
            id: task.id,
            name: task.name.clone(),
            cost: task.cost,
            keys: task.operands.iter().map(|op| op.key).collect(),
            outputs: task.outputs().copied().collect(),
            primary: task.primary_output().copied(),
        });
        kernels.push(Mutex::new(task.kernel.take()));
    }

    let shared = Shared {
        config,
        dependents,
        remaining: indegree.iter().map(|&d| AtomicUsize::new(d)).collect(),
        kernels,
        queues: (0..config.num_queues())
            .map(|_| Mutex::new(ReadyQueue::default()))
            .collect(),
        caches: (0..config.num_caches())
            .map(|_| Mutex::new(CacheState::new(config.cache_capacity_blocks(elem_bytes))))
            .collect(),
        device: device.map(|backend| {
            Mutex::new(DeviceResidency::new(
                backend,
                config.num_gpus,
                config.gpu_capacity_blocks,
            ))
        }),
        generation: Mutex::new(0),
        wakeup: Condvar::new(),
        done: AtomicUsize::new(0),
        steals: AtomicUsize::new(0),
        cache_hits: AtomicUsize::new(0),
        cache_misses: AtomicUsize::new(0),
        records: Mutex::new(Vec::with_capacity(infos.len())),
        failures: Mutex::new(Vec::new()),
        start,
        infos,
    };

    let n_queues = shared.queues.len();
    let mut next = 0;
    for (t, &d) in indegree.iter().enumerate() {
        if d == 0 {
            shared.enqueue(t, next % n_queues);
            next += 1;
        }
    }

    let tasks_per_worker: Vec<usize> = thread::scope(|s| {
        let handles: Vec<_> = (0..config.num_threads)
            .map(|w| {
                let shared = &shared;
                s.spawn(move || shared.worker_loop(w))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(0))
            .collect()
    });

    let mut failures = shared.failures.into_inner();
    failures.sort_by_key(|f| f.id);
    let flush_error = shared
        .device
        .and_then(|residency| residency.into_inner().flush_all().err());

    let records = shared.records.into_inner();
    let parallel_time = records.iter().map(|r| r.end - r.start).sum();
    let stats = ExecStats {
        total_time: start.elapsed(),
        parallel_time,
        tasks_per_worker,
        steals: shared.steals.into_inner(),
        cache_hits: shared.cache_hits.into_inner(),
        cache_misses: shared.cache_misses.into_inner(),
        records,
    };
    debug!(
        tasks = stats.records.len(),
        failed = failures.len(),
        steals = stats.steals,
        total_ms = stats.total_time.as_secs_f64() * 1e3,
        "batch finished"
    );
    Outcome {
        stats,
        failures,
        flush_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_is_most_square() {
        assert_eq!(mesh(1), (1, 1));
        assert_eq!(mesh(4), (2, 2));
        assert_eq!(mesh(6), (2, 3));
        assert_eq!(mesh(7), (1, 7));
    }

    #[test]
    fn test_affinity_queue() {
        assert_eq!(affinity_queue(DataAffinity::None, 3, Some((1, 1)), 4), None);
        assert_eq!(affinity_queue(DataAffinity::RoundRobin, 5, None, 4), Some(1));
        assert_eq!(affinity_queue(DataAffinity::RowBlockCyclic, 0, Some((5, 2)), 4), Some(1));
        assert_eq!(affinity_queue(DataAffinity::ColumnBlockCyclic, 0, Some((5, 2)), 4), Some(2));
        assert_eq!(affinity_queue(DataAffinity::BlockCyclic2d, 0, Some((3, 1)), 4), Some(3));
        assert_eq!(affinity_queue(DataAffinity::BlockCyclic2d, 0, None, 4), None);
    }

    #[test]
    fn test_sorted_insert_is_descending_and_stable() {
        let infos: Vec<TaskInfo> = [1.0, 5.0, 3.0, 5.0]
            .iter()
            .enumerate()
            .map(|(i, &cost)| TaskInfo {
                id: TaskId::new(i),
                name: String::new(),
                cost,
                keys: Vec::new(),
                outputs: Vec::new(),
                primary: None,
            })
            .collect();
        let mut q = ReadyQueue::default();
        for t in 0..4 {
            q.insert(t, &infos, true);
        }
        assert_eq!(q.tasks, VecDeque::from(vec![1, 3, 2, 0]));
    }
}
