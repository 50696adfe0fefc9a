use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flashmat_core::{hier, BlockKey, KernelError, Obj};
use flashmat_supermatrix::{
    Access, ConflictDetection, DataAffinity, DeviceBackend, QueueConfig, QueueError,
    RecordingDevice, Supermatrix, TaskSpec, TaskState, Verbose,
};
use parking_lot::Mutex;
use proptest::prelude::*;

/// Logical clock shared by the kernels of one test.
#[derive(Default)]
struct Clock {
    tick: AtomicUsize,
    spans: Mutex<HashMap<usize, (usize, usize)>>,
}

impl Clock {
    fn task(self: &Arc<Self>, id: usize) -> impl FnOnce() -> Result<(), KernelError> + Send + 'static {
        let clock = Arc::clone(self);
        move || {
            let start = clock.tick.fetch_add(1, Ordering::SeqCst);
            std::thread::yield_now();
            let end = clock.tick.fetch_add(1, Ordering::SeqCst);
            clock.spans.lock().insert(id, (start, end));
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
struct RandomTask {
    operands: Vec<(usize, Access)>,
    cost: u8,
}

fn access() -> impl Strategy<Value = Access> {
    prop_oneof![Just(Access::Read), Just(Access::Write), Just(Access::ReadWrite)]
}

fn random_task(num_blocks: usize) -> impl Strategy<Value = RandomTask> {
    (
        proptest::collection::vec((0..num_blocks, access()), 0..4),
        any::<u8>(),
    )
        .prop_map(|(operands, cost)| RandomTask { operands, cost })
}

fn affinity() -> impl Strategy<Value = DataAffinity> {
    prop_oneof![
        Just(DataAffinity::None),
        Just(DataAffinity::BlockCyclic2d),
        Just(DataAffinity::RowBlockCyclic),
        Just(DataAffinity::ColumnBlockCyclic),
        Just(DataAffinity::RoundRobin),
    ]
}

/// Two tasks conflict when they share a block and at least one writes it.
fn conflicts(a: &RandomTask, b: &RandomTask) -> bool {
    a.operands.iter().any(|&(x, ax)| {
        b.operands
            .iter()
            .any(|&(y, by)| x == y && (ax.writes() || by.writes()))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn prop_conflicting_tasks_run_in_program_order(
        tasks in proptest::collection::vec(random_task(9), 1..40),
        threads in 2usize..=32,
        stealing in any::<bool>(),
        sorting in any::<bool>(),
        caching in any::<bool>(),
        affinity in affinity(),
        overlap in any::<bool>(),
    ) {
        // 3x3 leaves so every operand carries block coordinates.
        let h = hier::create::<f64>(6, 6, &[2]).unwrap();
        let mut keys = Vec::new();
        for j in 0..h.width() {
            for i in 0..h.length() {
                keys.push(h.block_at(i, j).unwrap().block_keys()[0]);
            }
        }
        let detection = if overlap {
            ConflictDetection::Overlap
        } else {
            ConflictDetection::Identity
        };
        let config = QueueConfig::default()
            .with_num_threads(threads)
            .with_work_stealing(stealing)
            .with_sorting(sorting)
            .with_caching(caching)
            .with_data_affinity(affinity)
            .with_conflict_detection(detection);
        let sm = Supermatrix::new(config).unwrap();
        sm.enable();
        let clock = Arc::new(Clock::default());

        sm.run_scoped(|| {
            for (i, t) in tasks.iter().enumerate() {
                let mut spec = TaskSpec::new(format!("t{}", i), clock.task(i)).with_cost(t.cost as f64);
                for &(blk, mode) in &t.operands {
                    spec = spec.operand(keys[blk], mode);
                }
                unsafe { sm.push(spec)? };
            }
            Ok::<_, QueueError>(())
        })
        .unwrap();

        let spans = clock.spans.lock();
        prop_assert_eq!(spans.len(), tasks.len());
        for j in 0..tasks.len() {
            for i in 0..j {
                if conflicts(&tasks[i], &tasks[j]) {
                    prop_assert!(spans[&i].1 < spans[&j].0, "task {} overlaps task {}", i, j);
                }
            }
        }
        let stats = sm.last_stats().unwrap();
        prop_assert_eq!(stats.tasks_per_worker.iter().sum::<usize>(), tasks.len());
        prop_assert_eq!(sm.num_tasks(), 0);
    }
}

#[test]
fn test_independent_tasks_overlap_in_time() {
    let sm = Supermatrix::new(QueueConfig::default().with_num_threads(2)).unwrap();
    sm.enable();
    let started = Arc::new(AtomicUsize::new(0));
    let saw_other = Arc::new(AtomicUsize::new(0));
    let blocks: Vec<Obj<f64>> = (0..2).map(|_| Obj::create(1, 1)).collect();

    sm.run_scoped(|| {
        for b in &blocks {
            let started = Arc::clone(&started);
            let saw_other = Arc::clone(&saw_other);
            let spec = TaskSpec::new("spin", move || {
                started.fetch_add(1, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(5);
                while started.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                    std::thread::yield_now();
                }
                if started.load(Ordering::SeqCst) == 2 {
                    saw_other.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })
            .output(b);
            unsafe { sm.push(spec)? };
        }
        Ok::<_, QueueError>(())
    })
    .unwrap();

    assert_eq!(saw_other.load(Ordering::SeqCst), 2);
    let stats = sm.last_stats().unwrap();
    assert!(stats.tasks_per_worker.iter().all(|&n| n == 1));
}

#[test]
fn test_failures_are_collected_and_downstream_still_runs() {
    let sm = Supermatrix::new(QueueConfig::default().with_num_threads(3)).unwrap();
    sm.enable();
    let a = Obj::<f64>::create(1, 1);
    let ran = Arc::new(AtomicUsize::new(0));

    let result = sm.run_scoped(|| {
        for i in 0..4 {
            let ran = Arc::clone(&ran);
            let spec = TaskSpec::new(format!("step{}", i), move || {
                ran.fetch_add(1, Ordering::SeqCst);
                match i {
                    1 => Err(KernelError::Singular { index: 0 }),
                    2 => panic!("step two exploded"),
                    _ => Ok(()),
                }
            })
            .output(&a);
            unsafe { sm.push(spec)? };
        }
        Ok::<_, QueueError>(())
    });

    assert_eq!(ran.load(Ordering::SeqCst), 4);
    match result {
        Err(QueueError::TaskFailed(failures)) => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].name, "step1");
            assert_eq!(failures[0].error, KernelError::Singular { index: 0 });
            assert!(matches!(&failures[1].error, KernelError::Panicked(msg) if msg.contains("exploded")));
        }
        other => panic!("expected TaskFailed, got {:?}", other),
    }
    let stats = sm.last_stats().unwrap();
    let failed = stats
        .records
        .iter()
        .filter(|r| r.state == TaskState::Failed)
        .count();
    assert_eq!(failed, 2);
}

#[test]
fn test_row_affinity_places_tasks_by_block_row() {
    let config = QueueConfig::default()
        .with_num_threads(4)
        .with_data_affinity(DataAffinity::RowBlockCyclic);
    let sm = Supermatrix::new(config).unwrap();
    sm.enable();
    let h = hier::create::<f64>(16, 16, &[2]).unwrap();

    let mut blocks = Vec::new();
    for j in 0..h.width() {
        for i in 0..h.length() {
            blocks.push((i, j, h.block_at(i, j).unwrap()));
        }
    }

    sm.run_scoped(|| {
        for (i, j, block) in &blocks {
            unsafe { sm.push(TaskSpec::new(format!("{},{}", i, j), || Ok(())).output(block))? };
        }
        Ok::<_, QueueError>(())
    })
    .unwrap();

    let stats = sm.last_stats().unwrap();
    assert_eq!(stats.records.len(), 64);
    for r in &stats.records {
        let row: usize = r.name.split(',').next().unwrap().parse().unwrap();
        assert_eq!(r.worker, row % 4, "task {}", r.name);
    }
    assert_eq!(stats.steals, 0);
}

#[test]
fn test_cache_reuse_is_counted() {
    let config = QueueConfig::default().with_caching(true).with_block_size(2);
    let sm = Supermatrix::new(config).unwrap();
    sm.enable();
    let a = Obj::<f64>::create(2, 2);
    sm.run_scoped(|| {
        for _ in 0..4 {
            unsafe { sm.push(TaskSpec::new("touch", || Ok(())).output(&a))? };
        }
        Ok::<_, QueueError>(())
    })
    .unwrap();
    let stats = sm.last_stats().unwrap();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 3);
}

#[test]
fn test_device_worker_transfers_operands() {
    let device = Arc::new(RecordingDevice::new());
    let config = QueueConfig::default().with_num_threads(1).with_gpus(1, 8);
    let sm = Supermatrix::with_device(config, device.clone()).unwrap();
    sm.enable();
    let a = Obj::<f64>::create(2, 2);
    let b = Obj::<f64>::create(2, 2);
    sm.run_scoped(|| {
        unsafe {
            sm.push(TaskSpec::new("produce", || Ok(())).output(&a))?;
            sm.push(TaskSpec::new("consume", || Ok(())).input(&a).output(&b))?;
        }
        Ok::<_, QueueError>(())
    })
    .unwrap();
    // a and b are each copied in once and flushed once at the end.
    assert_eq!(device.num_updates(), 2);
    assert_eq!(device.num_flushes(), 2);
}

/// Backend whose write-back always fails.
struct FailingFlush {
    flushes: AtomicUsize,
}

impl DeviceBackend for FailingFlush {
    fn update_block(&self, _device: usize, _key: &BlockKey) -> Result<(), KernelError> {
        Ok(())
    }

    fn flush_block(&self, device: usize, _key: &BlockKey) -> Result<(), KernelError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Err(KernelError::Device(format!("device {} lost", device)))
    }

    fn invalidate_block(&self, _device: usize, _key: &BlockKey) {}
}

#[test]
fn test_device_flush_failure_is_reported_separately() {
    let device = Arc::new(FailingFlush {
        flushes: AtomicUsize::new(0),
    });
    let config = QueueConfig::default().with_num_threads(1).with_gpus(1, 8);
    let sm = Supermatrix::with_device(config, device.clone()).unwrap();
    sm.enable();
    let a = Obj::<f64>::create(2, 2);
    let result = sm.run_scoped(|| {
        unsafe {
            sm.push(TaskSpec::new("produce", || Ok(())).output(&a))?;
            sm.push(TaskSpec::new("fail", || Err(KernelError::Singular { index: 0 })).input(&a))?;
        }
        Ok::<_, QueueError>(())
    });

    let err = result.unwrap_err();
    match &err {
        QueueError::DeviceFlush { failures, source } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].name, "fail");
            assert_eq!(failures[0].id.index(), 1);
            assert_eq!(source, &KernelError::Device("device 0 lost".to_string()));
        }
        other => panic!("expected DeviceFlush, got {:?}", other),
    }
    assert!(err.to_string().contains("after 1 task failure(s)"));
    assert_eq!(err.kernel_errors().len(), 2);
    assert!(device.flushes.load(Ordering::SeqCst) >= 1);
    let stats = sm.last_stats().unwrap();
    assert!(stats.records.iter().all(|r| r.id.index() < 2));
}

#[test]
fn test_overlap_detection_orders_aliasing_views() {
    let flat = Obj::<f64>::create(4, 4);
    let h1 = hier::create_hier_view_of(&flat, &[2]).unwrap();
    let h2 = hier::create_hier_view_of(&flat, &[2]).unwrap();
    let w = h1.block_at(1, 1).unwrap();
    let r = h2.block_at(1, 1).unwrap();

    let identity = Supermatrix::new(QueueConfig::default()).unwrap();
    identity.enable();
    unsafe {
        identity.push(TaskSpec::new("write", || Ok(())).output(&w)).unwrap();
        identity.push(TaskSpec::new("read", || Ok(())).input(&r)).unwrap();
    }
    assert!(!identity.render_dag(Verbose::Dot).contains("->"));
    identity.reset().unwrap();

    let config = QueueConfig::default()
        .with_num_threads(2)
        .with_conflict_detection(ConflictDetection::Overlap);
    let overlap = Supermatrix::new(config).unwrap();
    overlap.enable();
    let seen = Arc::new(Mutex::new(0.0));
    let seen2 = Arc::clone(&seen);
    let r2 = r.clone();
    let w2 = w.clone();
    unsafe {
        overlap
            .push(
                TaskSpec::new("write", move || {
                    std::thread::sleep(Duration::from_millis(20));
                    w2.fill(7.0);
                    Ok(())
                })
                .output(&w),
            )
            .unwrap();
        overlap
            .push(
                TaskSpec::new("read", move || {
                    *seen2.lock() = r2.get(0, 0)?;
                    Ok(())
                })
                .input(&r),
            )
            .unwrap();
    }
    assert!(overlap.render_dag(Verbose::Dot).contains("t0 -> t1"));
    overlap.exec().unwrap();
    assert_eq!(*seen.lock(), 7.0);
}

#[test]
fn test_invalid_config_rejected_before_any_task() {
    let config = QueueConfig::default().with_num_threads(6).with_cores_per_cache(4);
    assert!(matches!(
        Supermatrix::new(config),
        Err(QueueError::InvalidConfig(_))
    ));
}

#[test]
fn test_verbose_exec_logs_graph_and_runs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("flashmat_supermatrix=debug")
        .with_test_writer()
        .try_init();

    let config = QueueConfig::default()
        .with_num_threads(2)
        .with_verbose(Verbose::Readable);
    let sm = Supermatrix::new(config).unwrap();
    sm.enable();
    let a = Obj::<f64>::create(2, 2);
    let b = Obj::<f64>::create(2, 2);
    let (a1, a2, b1) = (a.clone(), a.clone(), b.clone());
    sm.run_scoped(|| {
        unsafe {
            sm.push(
                TaskSpec::new("seed", move || {
                    a1.fill(2.0);
                    Ok(())
                })
                .output(&a),
            )?;
            sm.push(
                TaskSpec::new("double", move || {
                    b1.set(0, 0, 2.0 * a2.get(0, 0)?)?;
                    Ok(())
                })
                .input(&a)
                .output(&b),
            )?;
        }
        Ok::<_, QueueError>(())
    })
    .unwrap();
    assert_eq!(b.get(0, 0).unwrap(), 4.0);
    let stats = sm.last_stats().unwrap();
    assert_eq!(stats.records.len(), 2);
    assert!(stats.records.iter().all(|r| r.start <= r.end && r.end <= stats.total_time));
}
