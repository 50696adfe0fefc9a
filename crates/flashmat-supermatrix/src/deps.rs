//! Per-block dependency tracking.
//!
//! For every block the tracker remembers the last task that wrote it and
//! the tasks that read it since. A new reader depends on the last writer;
//! a new writer depends on the last writer and on every reader since.
//! Read/read pairs never conflict.

use std::collections::{HashMap, HashSet};

use flashmat_core::{BlockId, BlockKey, BufferId};

use crate::config::ConflictDetection;
use crate::task::{Access, Operand, TaskId};

/// Kind of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepKind {
    /// Read after write.
    True,
    /// Write after read.
    Anti,
    /// Write after write.
    Output,
}

impl DepKind {
    /// Short label for rendered graphs.
    pub fn label(self) -> &'static str {
        match self {
            DepKind::True => "RAW",
            DepKind::Anti => "WAR",
            DepKind::Output => "WAW",
        }
    }
}

#[derive(Debug)]
struct BlockState {
    key: BlockKey,
    last_writer: Option<TaskId>,
    readers: Vec<TaskId>,
}

impl BlockState {
    fn new(key: BlockKey) -> Self {
        Self {
            key,
            last_writer: None,
            readers: Vec::new(),
        }
    }

    fn access(&mut self, task: TaskId, access: Access, deps: &mut Vec<(TaskId, DepKind)>) {
        if let Some(w) = self.last_writer {
            let kind = if access.reads() {
                DepKind::True
            } else {
                DepKind::Output
            };
            deps.push((w, kind));
        }
        if access.writes() {
            deps.extend(self.readers.iter().map(|&r| (r, DepKind::Anti)));
            self.readers.clear();
            self.last_writer = Some(task);
        } else if self.readers.last() != Some(&task) {
            self.readers.push(task);
        }
    }
}

/// Tracking table from blocks to their last accessors.
#[derive(Debug)]
pub(crate) struct DependencyTracker {
    mode: ConflictDetection,
    by_id: HashMap<BlockId, BlockState>,
    by_buffer: HashMap<BufferId, Vec<BlockState>>,
}

impl DependencyTracker {
    pub(crate) fn new(mode: ConflictDetection) -> Self {
        Self {
            mode,
            by_id: HashMap::new(),
            by_buffer: HashMap::new(),
        }
    }

    /// Register `task` accessing `operands`; return the earlier tasks it
    /// must wait for, one edge per predecessor.
    pub(crate) fn record(&mut self, task: TaskId, operands: &[Operand]) -> Vec<(TaskId, DepKind)> {
        let mut raw = Vec::new();
        for op in operands {
            match self.mode {
                ConflictDetection::Identity => {
                    self.by_id
                        .entry(op.key.id)
                        .or_insert_with(|| BlockState::new(op.key))
                        .access(task, op.access, &mut raw);
                }
                ConflictDetection::Overlap => {
                    let states = self.by_buffer.entry(op.key.buffer).or_default();
                    let mut exact = false;
                    for state in states.iter_mut() {
                        if state.key.region == op.key.region {
                            exact = true;
                            state.access(task, op.access, &mut raw);
                        } else if state.key.region.overlaps(&op.key.region) {
                            state.access(task, op.access, &mut raw);
                        }
                    }
                    if !exact {
                        let mut state = BlockState::new(op.key);
                        state.access(task, op.access, &mut raw);
                        states.push(state);
                    }
                }
            }
        }
        let mut seen = HashSet::new();
        raw.into_iter()
            .filter(|&(from, _)| from != task && seen.insert(from))
            .collect()
    }
}
