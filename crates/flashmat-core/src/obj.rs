//! Block handles and views.
//!
//! An [`Obj`] is a view `(offm, offn, m, n)` over a reference-counted base
//! object. The base holds either scalar elements (a region of a shared
//! [`Buffer`]) or a column-major array of nested handles, which makes a
//! hierarchical ("FLASH") matrix. Views are cheap to clone and never own
//! data: dropping a view never frees a buffer another view still uses.
//!
//! For a hierarchical matrix the view extents are counted in blocks;
//! [`Obj::scalar_length`] and [`Obj::scalar_width`] report the flat extent.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::{BlockId, Buffer, BufferId};
use crate::error::{FlashError, Result};
use crate::grid::BlockGrid;
use crate::scalar::{Datatype, Scalar};

/// What the elements of a handle are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemKind {
    /// Raw numeric elements.
    Scalar,
    /// Nested block handles.
    Matrix,
}

impl ElemKind {
    /// Lower-case name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ElemKind::Scalar => "scalar",
            ElemKind::Matrix => "matrix",
        }
    }
}

pub(crate) struct ScalarStore<T> {
    pub(crate) buffer: Arc<Buffer<T>>,
    pub(crate) offset: usize,
    pub(crate) rs: usize,
    pub(crate) cs: usize,
}

pub(crate) enum Content<T> {
    Scalar(ScalarStore<T>),
    Matrix {
        /// Nested handles, column-major, `m * n` of them.
        blocks: Vec<Obj<T>>,
        rows: BlockGrid,
        cols: BlockGrid,
    },
}

pub(crate) struct Base<T> {
    id: BlockId,
    m: usize,
    n: usize,
    coords: Option<(usize, usize)>,
    content: Content<T>,
}

/// A view over a block handle.
#[derive(Clone)]
pub struct Obj<T> {
    base: Arc<Base<T>>,
    offm: usize,
    offn: usize,
    m: usize,
    n: usize,
}

/// Memory footprint of a scalar view inside its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Offset of element (0, 0) in the buffer.
    pub offset: usize,
    /// Rows.
    pub m: usize,
    /// Columns.
    pub n: usize,
    /// Row stride.
    pub rs: usize,
    /// Column stride.
    pub cs: usize,
    /// Bytes per element.
    pub elem_bytes: usize,
}

impl Region {
    /// Check if the region covers no element.
    pub fn is_empty(&self) -> bool {
        self.m == 0 || self.n == 0
    }

    /// Bytes covered by the region's elements.
    pub fn bytes(&self) -> usize {
        self.m * self.n * self.elem_bytes
    }

    fn last(&self) -> usize {
        self.offset + (self.m - 1) * self.rs + (self.n - 1) * self.cs
    }

    /// Row/column rectangle of the region, when the layout allows one.
    fn rectangle(&self, other: &Region) -> Option<((usize, usize), (usize, usize))> {
        if self.rs == 1 && other.rs == 1 && self.cs == other.cs && self.cs > 0 {
            let ld = self.cs;
            let (r0, c0) = (self.offset % ld, self.offset / ld);
            if r0 + self.m <= ld {
                return Some(((r0, r0 + self.m), (c0, c0 + self.n)));
            }
        }
        if self.cs == 1 && other.cs == 1 && self.rs == other.rs && self.rs > 0 {
            let ld = self.rs;
            let (r0, c0) = (self.offset / ld, self.offset % ld);
            if c0 + self.n <= ld {
                return Some(((r0, r0 + self.m), (c0, c0 + self.n)));
            }
        }
        None
    }

    /// Check whether two regions of the same buffer share an element.
    ///
    /// Views with matching strides are compared as row/column rectangles;
    /// otherwise the comparison falls back to address ranges, which may
    /// report an overlap for interleaved but disjoint views.
    pub fn overlaps(&self, other: &Region) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if let (Some((ra, ca)), Some((rb, cb))) = (self.rectangle(other), other.rectangle(self)) {
            return ra.0 < rb.1 && rb.0 < ra.1 && ca.0 < cb.1 && cb.0 < ca.1;
        }
        self.offset <= other.last() && other.offset <= self.last()
    }
}

/// Identity and footprint of a leaf block, used for dependency tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    /// Identity of the base handle.
    pub id: BlockId,
    /// Buffer holding the elements.
    pub buffer: BufferId,
    /// Footprint of the view in the buffer.
    pub region: Region,
    /// Block coordinates inside the parent hierarchical matrix, if any.
    pub coords: Option<(usize, usize)>,
}

/// Raw strided access to the elements of a scalar view.
///
/// Obtained from [`Obj::scalar_view`]; borrows the handle so the buffer
/// outlives it. Concurrent writers to the same elements are a data race;
/// the task runtime rules them out through its dependency graph.
#[derive(Debug, Clone, Copy)]
pub struct ScalarView<'a, T> {
    ptr: *mut T,
    m: usize,
    n: usize,
    rs: usize,
    cs: usize,
    _marker: PhantomData<&'a Obj<T>>,
}

impl<'a, T: Scalar> ScalarView<'a, T> {
    /// Number of rows.
    #[inline]
    pub fn length(&self) -> usize {
        self.m
    }

    /// Number of columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.n
    }

    /// Read element `(i, j)`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        assert!(i < self.m && j < self.n, "element ({}, {}) out of range", i, j);
        // Safety: in bounds of the viewed region, which lies in the buffer.
        unsafe { *self.ptr.add(i * self.rs + j * self.cs) }
    }

    /// Write element `(i, j)`.
    #[inline]
    pub fn set(&self, i: usize, j: usize, value: T) {
        assert!(i < self.m && j < self.n, "element ({}, {}) out of range", i, j);
        // Safety: as in `get`; the buffer cells are UnsafeCell.
        unsafe { *self.ptr.add(i * self.rs + j * self.cs) = value }
    }

    /// Swap the roles of rows and columns.
    pub fn transposed(&self) -> Self {
        Self {
            ptr: self.ptr,
            m: self.n,
            n: self.m,
            rs: self.cs,
            cs: self.rs,
            _marker: PhantomData,
        }
    }
}

impl<T: Scalar> Obj<T> {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a zero-filled flat `m x n` matrix in column-major storage.
    pub fn create(m: usize, n: usize) -> Self {
        let buffer = Buffer::zeros(m * n);
        Self::from_store(
            ScalarStore {
                buffer,
                offset: 0,
                rs: 1,
                cs: m.max(1),
            },
            m,
            n,
            None,
        )
    }

    /// Create a flat matrix from column-major data.
    pub fn from_col_major(m: usize, n: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != m * n {
            return Err(FlashError::BufferLength {
                len: data.len(),
                shape: vec![m, n],
            });
        }
        let buffer = Buffer::from_vec(data);
        Ok(Self::from_store(
            ScalarStore {
                buffer,
                offset: 0,
                rs: 1,
                cs: m.max(1),
            },
            m,
            n,
            None,
        ))
    }

    /// Create a flat matrix with `f(i, j)` at each position.
    pub fn from_fn(m: usize, n: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(m * n);
        for j in 0..n {
            for i in 0..m {
                data.push(f(i, j));
            }
        }
        let buffer = Buffer::from_vec(data);
        Self::from_store(
            ScalarStore {
                buffer,
                offset: 0,
                rs: 1,
                cs: m.max(1),
            },
            m,
            n,
            None,
        )
    }

    /// Wrap an existing buffer region as a new handle.
    ///
    /// The handle gets its own identity even if another handle already
    /// covers the same elements.
    pub fn attach(
        buffer: Arc<Buffer<T>>,
        offset: usize,
        m: usize,
        n: usize,
        rs: usize,
        cs: usize,
    ) -> Result<Self> {
        Self::attach_with_coords(buffer, offset, m, n, rs, cs, None)
    }

    pub(crate) fn attach_with_coords(
        buffer: Arc<Buffer<T>>,
        offset: usize,
        m: usize,
        n: usize,
        rs: usize,
        cs: usize,
        coords: Option<(usize, usize)>,
    ) -> Result<Self> {
        if m > 0 && n > 0 {
            let last = offset + (m - 1) * rs + (n - 1) * cs;
            if last >= buffer.len() {
                return Err(FlashError::BufferLength {
                    len: buffer.len(),
                    shape: vec![m, n],
                });
            }
        } else if offset > buffer.len() {
            return Err(FlashError::BufferLength {
                len: buffer.len(),
                shape: vec![m, n],
            });
        }
        Ok(Self::from_store(
            ScalarStore {
                buffer,
                offset,
                rs,
                cs,
            },
            m,
            n,
            coords,
        ))
    }

    fn from_store(store: ScalarStore<T>, m: usize, n: usize, coords: Option<(usize, usize)>) -> Self {
        Self::from_base(Base {
            id: BlockId::fresh(),
            m,
            n,
            coords,
            content: Content::Scalar(store),
        })
    }

    pub(crate) fn from_blocks(
        blocks: Vec<Obj<T>>,
        rows: BlockGrid,
        cols: BlockGrid,
        coords: Option<(usize, usize)>,
    ) -> Self {
        let (m, n) = (rows.count(), cols.count());
        debug_assert_eq!(blocks.len(), m * n);
        Self::from_base(Base {
            id: BlockId::fresh(),
            m,
            n,
            coords,
            content: Content::Matrix { blocks, rows, cols },
        })
    }

    fn from_base(base: Base<T>) -> Self {
        let (m, n) = (base.m, base.n);
        Self {
            base: Arc::new(base),
            offm: 0,
            offn: 0,
            m,
            n,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Rows of the view (blocks for a hierarchical matrix).
    #[inline]
    pub fn length(&self) -> usize {
        self.m
    }

    /// Columns of the view (blocks for a hierarchical matrix).
    #[inline]
    pub fn width(&self) -> usize {
        self.n
    }

    /// Row offset of the view inside its base.
    #[inline]
    pub fn offm(&self) -> usize {
        self.offm
    }

    /// Column offset of the view inside its base.
    #[inline]
    pub fn offn(&self) -> usize {
        self.offn
    }

    /// Rows of the base object.
    pub fn base_length(&self) -> usize {
        self.base.m
    }

    /// Columns of the base object.
    pub fn base_width(&self) -> usize {
        self.base.n
    }

    /// Check if the view covers nothing.
    pub fn is_empty(&self) -> bool {
        self.m == 0 || self.n == 0
    }

    /// Element kind of the base.
    pub fn elem_kind(&self) -> ElemKind {
        match self.base.content {
            Content::Scalar(_) => ElemKind::Scalar,
            Content::Matrix { .. } => ElemKind::Matrix,
        }
    }

    /// Datatype tag.
    pub fn datatype(&self) -> Datatype {
        T::DATATYPE
    }

    /// Identity of the base handle.
    pub fn id(&self) -> BlockId {
        self.base.id
    }

    /// Coordinates of the base inside its parent hierarchical matrix.
    pub fn coords(&self) -> Option<(usize, usize)> {
        self.base.coords
    }

    /// Row stride of the base elements.
    pub fn row_stride(&self) -> usize {
        match &self.base.content {
            Content::Scalar(s) => s.rs,
            Content::Matrix { .. } => 1,
        }
    }

    /// Column stride of the base elements.
    pub fn col_stride(&self) -> usize {
        match &self.base.content {
            Content::Scalar(s) => s.cs,
            Content::Matrix { .. } => self.base.m.max(1),
        }
    }

    /// Buffer holding the scalar elements, if any.
    pub fn buffer(&self) -> Option<&Arc<Buffer<T>>> {
        match &self.base.content {
            Content::Scalar(s) => Some(&s.buffer),
            Content::Matrix { .. } => None,
        }
    }

    /// Buffer, element offset and strides of a scalar view.
    pub(crate) fn scalar_parts(&self) -> Option<(Arc<Buffer<T>>, usize, usize, usize)> {
        match &self.base.content {
            Content::Scalar(s) => Some((
                Arc::clone(&s.buffer),
                s.offset + self.offm * s.rs + self.offn * s.cs,
                s.rs,
                s.cs,
            )),
            Content::Matrix { .. } => None,
        }
    }

    /// Check if two views share the same base object.
    pub fn same_base(&self, other: &Obj<T>) -> bool {
        Arc::ptr_eq(&self.base, &other.base)
    }

    /// Scalar rows covered by the view.
    pub fn scalar_length(&self) -> usize {
        match &self.base.content {
            Content::Scalar(_) => self.m,
            Content::Matrix { rows, .. } => rows.extent_between(self.offm, self.m),
        }
    }

    /// Scalar columns covered by the view.
    pub fn scalar_width(&self) -> usize {
        match &self.base.content {
            Content::Scalar(_) => self.n,
            Content::Matrix { cols, .. } => cols.extent_between(self.offn, self.n),
        }
    }

    /// Nesting depth: 0 for a flat matrix.
    pub fn depth(&self) -> usize {
        match &self.base.content {
            Content::Scalar(_) => 0,
            Content::Matrix { blocks, .. } => 1 + blocks.first().map_or(0, |b| b.depth()),
        }
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Sub-view of `m x n` elements (blocks) starting at `(i, j)` of this view.
    pub fn view(&self, i: usize, j: usize, m: usize, n: usize) -> Result<Self> {
        if i + m > self.m || j + n > self.n {
            return Err(FlashError::IndexOutOfBounds {
                index: vec![i + m, j + n],
                shape: vec![self.m, self.n],
            });
        }
        Ok(Self {
            base: Arc::clone(&self.base),
            offm: self.offm + i,
            offn: self.offn + j,
            m,
            n,
        })
    }

    /// Build a view from absolute offsets in the same base.
    pub(crate) fn rebased(&self, offm: usize, offn: usize, m: usize, n: usize) -> Self {
        debug_assert!(offm + m <= self.base.m && offn + n <= self.base.n);
        Self {
            base: Arc::clone(&self.base),
            offm,
            offn,
            m,
            n,
        }
    }

    /// Nested handle at block `(i, j)` of this hierarchical view.
    pub fn block_at(&self, i: usize, j: usize) -> Result<Self> {
        match &self.base.content {
            Content::Scalar(_) => Err(FlashError::ElemKindMismatch {
                expected: ElemKind::Matrix.name(),
                actual: ElemKind::Scalar.name(),
            }),
            Content::Matrix { blocks, .. } => {
                if i >= self.m || j >= self.n {
                    return Err(FlashError::IndexOutOfBounds {
                        index: vec![i, j],
                        shape: vec![self.m, self.n],
                    });
                }
                let (bi, bj) = (self.offm + i, self.offn + j);
                Ok(blocks[bi + bj * self.base.m].clone())
            }
        }
    }

    /// Unwrap a 1x1 hierarchical view into its nested handle.
    pub fn single_block(&self) -> Result<Self> {
        if self.m != 1 || self.n != 1 {
            return Err(FlashError::NotSingleBlock {
                m: self.m,
                n: self.n,
            });
        }
        self.block_at(0, 0)
    }

    /// Strided access to the elements of a scalar view.
    pub fn scalar_view(&self) -> Result<ScalarView<'_, T>> {
        match &self.base.content {
            Content::Scalar(s) => {
                let offset = s.offset + self.offm * s.rs + self.offn * s.cs;
                let ptr = if self.is_empty() {
                    s.buffer.ptr_at(s.offset.min(s.buffer.len()))
                } else {
                    s.buffer.ptr_at(offset)
                };
                Ok(ScalarView {
                    ptr,
                    m: self.m,
                    n: self.n,
                    rs: s.rs,
                    cs: s.cs,
                    _marker: PhantomData,
                })
            }
            Content::Matrix { .. } => Err(FlashError::ElemKindMismatch {
                expected: ElemKind::Scalar.name(),
                actual: ElemKind::Matrix.name(),
            }),
        }
    }

    /// Keys of every leaf block reachable from this view.
    pub fn block_keys(&self) -> Vec<BlockKey> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<BlockKey>) {
        match &self.base.content {
            Content::Scalar(s) => keys.push(BlockKey {
                id: self.base.id,
                buffer: s.buffer.id(),
                region: Region {
                    offset: s.offset + self.offm * s.rs + self.offn * s.cs,
                    m: self.m,
                    n: self.n,
                    rs: s.rs,
                    cs: s.cs,
                    elem_bytes: T::DATATYPE.size_in_bytes(),
                },
                coords: self.base.coords,
            }),
            Content::Matrix { blocks, .. } => {
                for j in self.offn..self.offn + self.n {
                    for i in self.offm..self.offm + self.m {
                        blocks[i + j * self.base.m].collect_keys(keys);
                    }
                }
            }
        }
    }

    /// Visit every leaf of the view with its scalar offset inside the view.
    pub fn visit_leaves(&self, f: &mut dyn FnMut(usize, usize, &Obj<T>)) {
        self.visit_leaves_at(0, 0, f)
    }

    fn visit_leaves_at(&self, row0: usize, col0: usize, f: &mut dyn FnMut(usize, usize, &Obj<T>)) {
        match &self.base.content {
            Content::Scalar(_) => f(row0, col0, self),
            Content::Matrix { blocks, rows, cols } => {
                let r_base = rows.start(self.offm);
                let c_base = cols.start(self.offn);
                for j in self.offn..self.offn + self.n {
                    for i in self.offm..self.offm + self.m {
                        let r = row0 + rows.start(i) - r_base;
                        let c = col0 + cols.start(j) - c_base;
                        blocks[i + j * self.base.m].visit_leaves_at(r, c, f);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Element access (scalar coordinates, any depth)
    // ------------------------------------------------------------------

    fn locate(&self, i: usize, j: usize) -> Result<(Obj<T>, usize, usize)> {
        if i >= self.scalar_length() || j >= self.scalar_width() {
            return Err(FlashError::IndexOutOfBounds {
                index: vec![i, j],
                shape: vec![self.scalar_length(), self.scalar_width()],
            });
        }
        match &self.base.content {
            Content::Scalar(_) => Ok((self.clone(), i, j)),
            Content::Matrix { blocks, rows, cols } => {
                let (bi, li) = rows.locate(rows.start(self.offm) + i);
                let (bj, lj) = cols.locate(cols.start(self.offn) + j);
                blocks[bi + bj * self.base.m].locate(li, lj)
            }
        }
    }

    /// Read scalar element `(i, j)` of the view.
    pub fn get(&self, i: usize, j: usize) -> Result<T> {
        let (leaf, li, lj) = self.locate(i, j)?;
        let v = leaf.scalar_view()?;
        Ok(v.get(li, lj))
    }

    /// Write scalar element `(i, j)` of the view.
    pub fn set(&self, i: usize, j: usize, value: T) -> Result<()> {
        let (leaf, li, lj) = self.locate(i, j)?;
        let v = leaf.scalar_view()?;
        v.set(li, lj, value);
        Ok(())
    }

    /// Copy the view out in column-major order (scalar extents).
    pub fn to_col_major(&self) -> Vec<T> {
        let (m, n) = (self.scalar_length(), self.scalar_width());
        let mut out = vec![T::zero(); m * n];
        self.visit_leaves(&mut |r0, c0, leaf| {
            if let Ok(v) = leaf.scalar_view() {
                for j in 0..v.width() {
                    for i in 0..v.length() {
                        out[(r0 + i) + (c0 + j) * m] = v.get(i, j);
                    }
                }
            }
        });
        out
    }

    /// Copy the scalar contents of `src` into this view.
    pub fn copy_from(&self, src: &Obj<T>) -> Result<()> {
        let (m, n) = (self.scalar_length(), self.scalar_width());
        if src.scalar_length() != m || src.scalar_width() != n {
            return Err(FlashError::ShapeMismatch {
                expected: vec![m, n],
                actual: vec![src.scalar_length(), src.scalar_width()],
            });
        }
        let data = src.to_col_major();
        self.visit_leaves(&mut |r0, c0, leaf| {
            if let Ok(v) = leaf.scalar_view() {
                for j in 0..v.width() {
                    for i in 0..v.length() {
                        v.set(i, j, data[(r0 + i) + (c0 + j) * m]);
                    }
                }
            }
        });
        Ok(())
    }

    /// Set every scalar of the view to `value`.
    pub fn fill(&self, value: T) {
        self.visit_leaves(&mut |_, _, leaf| {
            if let Ok(v) = leaf.scalar_view() {
                for j in 0..v.width() {
                    for i in 0..v.length() {
                        v.set(i, j, value);
                    }
                }
            }
        });
    }
}

impl<T> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.base.content {
            Content::Scalar(_) => ElemKind::Scalar,
            Content::Matrix { .. } => ElemKind::Matrix,
        };
        f.debug_struct("Obj")
            .field("id", &self.base.id)
            .field("kind", &kind)
            .field("offm", &self.offm)
            .field("offn", &self.offn)
            .field("m", &self.m)
            .field("n", &self.n)
            .finish()
    }
}
