//! Shared numeric storage behind block handles.
//!
//! A [`Buffer`] is a fixed-length array of elements that many views may
//! reference at once. Views never own the buffer; it lives as long as the
//! last `Arc` to it. Element access goes through raw pointers so that the
//! task runtime can hand disjoint blocks of one buffer to different worker
//! threads. Exclusivity of writes is the runtime's job (its dependency
//! graph), not the buffer's.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::scalar::Scalar;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a numeric buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

/// Identity of a base block object (a handle, not a view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u64);

impl BufferId {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of the id.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl BlockId {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of the id.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Fixed-length element storage shared by views.
pub struct Buffer<T> {
    id: BufferId,
    data: Box<[UnsafeCell<T>]>,
}

// Safety: concurrent access is only to disjoint elements, or read-only, as
// guaranteed by the dependency graph of the task runtime.
unsafe impl<T: Send> Sync for Buffer<T> {}

impl<T: Scalar> Buffer<T> {
    /// Allocate a zero-filled buffer.
    pub fn zeros(len: usize) -> Arc<Self> {
        Self::from_vec(vec![T::zero(); len])
    }

    /// Take ownership of existing data.
    pub fn from_vec(data: Vec<T>) -> Arc<Self> {
        Arc::new(Self {
            id: BufferId::fresh(),
            data: data.into_iter().map(UnsafeCell::new).collect(),
        })
    }

    /// Identity of this buffer.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pointer to element `offset`.
    ///
    /// `offset` may equal `len()` (one past the end) for empty views.
    pub(crate) fn ptr_at(&self, offset: usize) -> *mut T {
        assert!(offset <= self.data.len(), "buffer offset out of range");
        // UnsafeCell<T> has the same layout as T.
        let base = self.data.as_ptr() as *mut T;
        base.wrapping_add(offset)
    }

    /// Copy the whole buffer out.
    pub fn to_vec(&self) -> Vec<T> {
        // Safety: reads of Copy data; see the type-level note on races.
        self.data.iter().map(|c| unsafe { *c.get() }).collect()
    }
}

impl<T> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}
