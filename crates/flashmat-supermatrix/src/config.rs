//! Queue configuration.
//!
//! A [`QueueConfig`] is fixed for one [`Supermatrix`](crate::Supermatrix)
//! session. Values can be set field by field, through the `with_*`
//! builders, or from `FLASHMAT_*` environment variables with
//! [`QueueConfig::from_env`].

use std::env;
use std::str::FromStr;

use crate::error::{QueueError, Result};

/// Rule mapping a ready task to a ready queue from the block coordinates of
/// its primary output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataAffinity {
    /// Tasks go to the queue of the worker that made them ready.
    #[default]
    None,
    /// Queues form an `r x c` mesh; block `(i, j)` goes to `(i mod r, j mod c)`.
    BlockCyclic2d,
    /// Block row `i` goes to queue `i mod q`.
    RowBlockCyclic,
    /// Block column `j` goes to queue `j mod q`.
    ColumnBlockCyclic,
    /// Task `t` goes to queue `t mod q`, regardless of coordinates.
    RoundRobin,
}

/// How the dependency tracker decides that two operands conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConflictDetection {
    /// Operands conflict iff they name the same base block.
    #[default]
    Identity,
    /// Operands conflict iff their buffer regions overlap.
    Overlap,
}

/// What `exec` prints about the task graph before running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Verbose {
    /// Nothing.
    #[default]
    None,
    /// One line per task with its operands and predecessors.
    Readable,
    /// A Graphviz `digraph`.
    Dot,
}

/// Configuration of the task queue and its workers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Worker threads used by `exec`.
    pub num_threads: usize,
    /// Insert ready tasks in descending cost order instead of FIFO.
    pub sorting: bool,
    /// Prefer ready tasks whose output is resident in the worker's cache.
    pub caching: bool,
    /// Let idle workers take tasks from other queues.
    pub work_stealing: bool,
    /// Placement rule for ready tasks.
    pub data_affinity: DataAffinity,
    /// Nominal leaf block dimension, used to size the simulated caches.
    pub block_size: usize,
    /// Bytes per simulated cache.
    pub cache_size: usize,
    /// Cache line in bytes.
    pub cache_line_size: usize,
    /// Workers sharing one simulated cache.
    pub cores_per_cache: usize,
    /// Workers sharing one ready queue. `None` picks one queue per worker
    /// when stealing or affinity is on, one shared queue otherwise.
    pub cores_per_queue: Option<usize>,
    /// Workers that drive an accelerator; they are the lowest-numbered ones.
    pub num_gpus: usize,
    /// Leaf blocks each accelerator can hold.
    pub gpu_capacity_blocks: usize,
    /// Conflict detection rule.
    pub conflict_detection: ConflictDetection,
    /// Task graph output at `exec` time.
    pub verbose: Verbose,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            sorting: false,
            caching: false,
            work_stealing: false,
            data_affinity: DataAffinity::None,
            block_size: 128,
            cache_size: 2 * 1024 * 1024,
            cache_line_size: 64,
            cores_per_cache: 1,
            cores_per_queue: None,
            num_gpus: 0,
            gpu_capacity_blocks: 128,
            conflict_detection: ConflictDetection::Identity,
            verbose: Verbose::None,
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| QueueError::InvalidConfig(format!("cannot parse {}={:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

fn parse_flag(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(QueueError::InvalidConfig(format!(
                "cannot parse {}={:?} as a flag",
                name, raw
            ))),
        },
        Err(_) => Ok(None),
    }
}

impl FromStr for DataAffinity {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(DataAffinity::None),
            "blockcyclic2d" | "2dblockcyclic" | "2d" => Ok(DataAffinity::BlockCyclic2d),
            "rowblockcyclic" | "row" => Ok(DataAffinity::RowBlockCyclic),
            "columnblockcyclic" | "column" | "col" => Ok(DataAffinity::ColumnBlockCyclic),
            "roundrobin" => Ok(DataAffinity::RoundRobin),
            _ => Err(QueueError::InvalidConfig(format!("unknown data affinity {:?}", s))),
        }
    }
}

impl QueueConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration overridden by environment variables:
    /// `FLASHMAT_NUM_THREADS`, `FLASHMAT_SORTING`, `FLASHMAT_CACHING`,
    /// `FLASHMAT_WORK_STEALING` and `FLASHMAT_DATA_AFFINITY`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(n) = parse_env("FLASHMAT_NUM_THREADS")? {
            config.num_threads = n;
        }
        if let Some(b) = parse_flag("FLASHMAT_SORTING")? {
            config.sorting = b;
        }
        if let Some(b) = parse_flag("FLASHMAT_CACHING")? {
            config.caching = b;
        }
        if let Some(b) = parse_flag("FLASHMAT_WORK_STEALING")? {
            config.work_stealing = b;
        }
        if let Some(a) = parse_env("FLASHMAT_DATA_AFFINITY")? {
            config.data_affinity = a;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the number of worker threads.
    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = n;
        self
    }

    /// Enable or disable cost sorting of ready tasks.
    pub fn with_sorting(mut self, on: bool) -> Self {
        self.sorting = on;
        self
    }

    /// Enable or disable cache-affine dequeueing.
    pub fn with_caching(mut self, on: bool) -> Self {
        self.caching = on;
        self
    }

    /// Enable or disable work stealing.
    pub fn with_work_stealing(mut self, on: bool) -> Self {
        self.work_stealing = on;
        self
    }

    /// Set the data affinity rule.
    pub fn with_data_affinity(mut self, affinity: DataAffinity) -> Self {
        self.data_affinity = affinity;
        self
    }

    /// Set the nominal leaf block dimension.
    pub fn with_block_size(mut self, b: usize) -> Self {
        self.block_size = b;
        self
    }

    /// Set the simulated cache size and line size in bytes.
    pub fn with_cache(mut self, cache_size: usize, cache_line_size: usize) -> Self {
        self.cache_size = cache_size;
        self.cache_line_size = cache_line_size;
        self
    }

    /// Set the number of workers sharing one simulated cache.
    pub fn with_cores_per_cache(mut self, n: usize) -> Self {
        self.cores_per_cache = n;
        self
    }

    /// Set the number of workers sharing one ready queue.
    pub fn with_cores_per_queue(mut self, n: usize) -> Self {
        self.cores_per_queue = Some(n);
        self
    }

    /// Set the number of accelerator workers and their capacity in blocks.
    pub fn with_gpus(mut self, num_gpus: usize, capacity_blocks: usize) -> Self {
        self.num_gpus = num_gpus;
        self.gpu_capacity_blocks = capacity_blocks;
        self
    }

    /// Set the conflict detection rule.
    pub fn with_conflict_detection(mut self, mode: ConflictDetection) -> Self {
        self.conflict_detection = mode;
        self
    }

    /// Set the task graph output.
    pub fn with_verbose(mut self, verbose: Verbose) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check the configuration for values the executor cannot honour.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(QueueError::InvalidConfig(msg));
        if self.num_threads == 0 {
            return invalid("num_threads must be at least 1".to_string());
        }
        if self.block_size == 0 {
            return invalid("block_size must be positive".to_string());
        }
        if self.cache_line_size == 0 {
            return invalid("cache_line_size must be positive".to_string());
        }
        if self.cores_per_cache == 0 || self.num_threads % self.cores_per_cache != 0 {
            return invalid(format!(
                "cores_per_cache {} does not divide num_threads {}",
                self.cores_per_cache, self.num_threads
            ));
        }
        if let Some(cpq) = self.cores_per_queue {
            if cpq == 0 || self.num_threads % cpq != 0 {
                return invalid(format!(
                    "cores_per_queue {} does not divide num_threads {}",
                    cpq, self.num_threads
                ));
            }
        }
        if self.num_gpus > self.num_threads {
            return invalid(format!(
                "num_gpus {} exceeds num_threads {}",
                self.num_gpus, self.num_threads
            ));
        }
        if self.num_gpus > 0 && self.gpu_capacity_blocks == 0 {
            return invalid("gpu_capacity_blocks must be positive".to_string());
        }
        Ok(())
    }

    /// Workers sharing one ready queue.
    pub fn effective_cores_per_queue(&self) -> usize {
        match self.cores_per_queue {
            Some(n) => n,
            None if self.work_stealing || self.data_affinity != DataAffinity::None => 1,
            None => self.num_threads,
        }
    }

    /// Number of ready queues.
    pub fn num_queues(&self) -> usize {
        (self.num_threads / self.effective_cores_per_queue().max(1)).max(1)
    }

    /// Number of simulated caches.
    pub fn num_caches(&self) -> usize {
        (self.num_threads / self.cores_per_cache.max(1)).max(1)
    }

    /// Leaf blocks one simulated cache holds for `elem_bytes`-sized
    /// elements: `cache_size / (block_size^2 * elem_bytes)`, with the block
    /// footprint rounded up to whole cache lines.
    pub fn cache_capacity_blocks(&self, elem_bytes: usize) -> usize {
        let raw = self.block_size * self.block_size * elem_bytes;
        let line = self.cache_line_size.max(1);
        let block_bytes = raw.div_ceil(line) * line;
        self.cache_size / block_bytes.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_queues(), 1);
    }

    #[test]
    fn test_rejects_zero_threads() {
        let config = QueueConfig::default().with_num_threads(0);
        assert!(matches!(config.validate(), Err(QueueError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_non_dividing_cores() {
        let config = QueueConfig::default()
            .with_num_threads(6)
            .with_cores_per_cache(4);
        assert!(config.validate().is_err());
        let config = QueueConfig::default()
            .with_num_threads(6)
            .with_cores_per_queue(4);
        assert!(config.validate().is_err());
        let config = QueueConfig::default()
            .with_num_threads(6)
            .with_cores_per_queue(3);
        assert!(config.validate().is_ok());
        assert_eq!(config.num_queues(), 2);
    }

    #[test]
    fn test_queue_count_follows_stealing() {
        let shared = QueueConfig::default().with_num_threads(4);
        assert_eq!(shared.num_queues(), 1);
        let stealing = shared.clone().with_work_stealing(true);
        assert_eq!(stealing.num_queues(), 4);
    }

    #[test]
    fn test_cache_capacity_rounds_to_lines() {
        let config = QueueConfig::default()
            .with_block_size(3)
            .with_cache(1024, 64);
        // 3 * 3 * 8 = 72 bytes, two lines.
        assert_eq!(config.cache_capacity_blocks(8), 8);
    }

    #[test]
    fn test_affinity_from_str() {
        assert_eq!(
            "block-cyclic-2d".parse::<DataAffinity>().unwrap(),
            DataAffinity::BlockCyclic2d
        );
        assert_eq!("ROW".parse::<DataAffinity>().unwrap(), DataAffinity::RowBlockCyclic);
        assert!("diagonal".parse::<DataAffinity>().is_err());
    }
}
