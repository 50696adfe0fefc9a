//! Construction of hierarchical matrices and conversions to and from flat
//! storage.
//!
//! `blocksizes` lists one blocksize per level, outermost first and in
//! scalars: `[64, 16]` builds a matrix of 64x64 blocks, each of which is
//! a matrix of 16x16 leaves. Edge blocks are smaller when an extent is not
//! divisible by the blocksize.

use crate::buffer::Buffer;
use crate::error::{FlashError, Result};
use crate::grid::BlockGrid;
use crate::obj::{ElemKind, Obj};
use crate::scalar::Scalar;

fn check_blocksizes(blocksizes: &[usize]) -> Result<()> {
    match blocksizes.iter().find(|&&b| b == 0) {
        Some(&b) => Err(FlashError::InvalidBlocksize(b)),
        None => Ok(()),
    }
}

fn require_flat<T: Scalar>(flat: &Obj<T>) -> Result<()> {
    if flat.elem_kind() != ElemKind::Scalar {
        return Err(FlashError::ElemKindMismatch {
            expected: ElemKind::Scalar.name(),
            actual: ElemKind::Matrix.name(),
        });
    }
    Ok(())
}

/// Create a zero-filled hierarchical matrix in which every leaf block owns
/// its own column-major buffer.
///
/// An empty `blocksizes` gives a flat matrix.
pub fn create<T: Scalar>(m: usize, n: usize, blocksizes: &[usize]) -> Result<Obj<T>> {
    check_blocksizes(blocksizes)?;
    create_level(m, n, blocksizes, None)
}

fn create_level<T: Scalar>(
    m: usize,
    n: usize,
    blocksizes: &[usize],
    coords: Option<(usize, usize)>,
) -> Result<Obj<T>> {
    let Some((&b, rest)) = blocksizes.split_first() else {
        return Obj::attach_with_coords(Buffer::zeros(m * n), 0, m, n, 1, m.max(1), coords);
    };
    let rows = BlockGrid::covering(m, b)?;
    let cols = BlockGrid::covering(n, b)?;
    let mut blocks = Vec::with_capacity(rows.count() * cols.count());
    for (j, (_, nj)) in cols.blocks().enumerate() {
        for (i, (_, mi)) in rows.blocks().enumerate() {
            blocks.push(create_level(mi, nj, rest, Some((i, j)))?);
        }
    }
    Ok(Obj::from_blocks(blocks, rows, cols, coords))
}

/// Create a hierarchical matrix whose leaves alias the elements of `flat`.
///
/// Writes through either object are visible through the other. Leaves get
/// fresh identities, distinct from `flat`'s.
pub fn create_hier_view_of<T: Scalar>(flat: &Obj<T>, blocksizes: &[usize]) -> Result<Obj<T>> {
    require_flat(flat)?;
    check_blocksizes(blocksizes)?;
    view_level(flat, blocksizes, None)
}

fn view_level<T: Scalar>(
    flat: &Obj<T>,
    blocksizes: &[usize],
    coords: Option<(usize, usize)>,
) -> Result<Obj<T>> {
    let Some((&b, rest)) = blocksizes.split_first() else {
        let (buffer, offset, rs, cs) = flat.scalar_parts().ok_or(FlashError::ElemKindMismatch {
            expected: ElemKind::Scalar.name(),
            actual: ElemKind::Matrix.name(),
        })?;
        return Obj::attach_with_coords(buffer, offset, flat.length(), flat.width(), rs, cs, coords);
    };
    let rows = BlockGrid::covering(flat.length(), b)?;
    let cols = BlockGrid::covering(flat.width(), b)?;
    let mut blocks = Vec::with_capacity(rows.count() * cols.count());
    for (j, (c0, nj)) in cols.blocks().enumerate() {
        for (i, (r0, mi)) in rows.blocks().enumerate() {
            let sub = flat.view(r0, c0, mi, nj)?;
            blocks.push(view_level(&sub, rest, Some((i, j)))?);
        }
    }
    Ok(Obj::from_blocks(blocks, rows, cols, coords))
}

/// Create a hierarchical matrix holding a copy of `flat`.
pub fn create_hier_copy_of<T: Scalar>(flat: &Obj<T>, blocksizes: &[usize]) -> Result<Obj<T>> {
    require_flat(flat)?;
    let hier = create(flat.length(), flat.width(), blocksizes)?;
    hier.copy_from(flat)?;
    Ok(hier)
}

/// Copy the elements of a flat matrix into a hierarchical one.
pub fn copy_flat_to_hier<T: Scalar>(flat: &Obj<T>, hier: &Obj<T>) -> Result<()> {
    require_flat(flat)?;
    hier.copy_from(flat)
}

/// Copy the elements of a hierarchical matrix into a flat one.
pub fn copy_hier_to_flat<T: Scalar>(hier: &Obj<T>, flat: &Obj<T>) -> Result<()> {
    require_flat(flat)?;
    flat.copy_from(hier)
}

/// Create a new flat column-major matrix with the elements of `obj`.
pub fn flatten<T: Scalar>(obj: &Obj<T>) -> Result<Obj<T>> {
    Obj::from_col_major(obj.scalar_length(), obj.scalar_width(), obj.to_col_major())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_edge_blocks() {
        let h = create::<f64>(10, 7, &[4]).unwrap();
        assert_eq!(h.elem_kind(), ElemKind::Matrix);
        assert_eq!((h.length(), h.width()), (3, 2));
        assert_eq!((h.scalar_length(), h.scalar_width()), (10, 7));
        let corner = h.block_at(2, 1).unwrap();
        assert_eq!((corner.length(), corner.width()), (2, 3));
        assert_eq!(corner.coords(), Some((2, 1)));
    }

    #[test]
    fn test_create_two_levels() {
        let h = create::<f64>(32, 32, &[16, 4]).unwrap();
        assert_eq!(h.depth(), 2);
        let inner = h.block_at(1, 0).unwrap();
        assert_eq!((inner.length(), inner.width()), (4, 4));
        assert_eq!(h.block_keys().len(), 64);
    }

    #[test]
    fn test_leaves_own_distinct_buffers() {
        let h = create::<f64>(8, 8, &[4]).unwrap();
        let keys = h.block_keys();
        assert_eq!(keys.len(), 4);
        assert_ne!(keys[0].buffer, keys[1].buffer);
    }

    #[test]
    fn test_view_of_aliases_flat() {
        let flat = Obj::<f64>::from_fn(6, 6, |i, j| (i * 6 + j) as f64);
        let h = create_hier_view_of(&flat, &[4]).unwrap();
        assert_eq!(h.get(5, 4).unwrap(), 34.0);
        h.set(1, 5, -1.0).unwrap();
        assert_eq!(flat.get(1, 5).unwrap(), -1.0);
        let keys = h.block_keys();
        assert!(keys.iter().all(|k| k.buffer == keys[0].buffer));
        assert!(keys.iter().all(|k| k.id != flat.id()));
    }

    #[test]
    fn test_copy_round_trip() {
        let flat = Obj::<f64>::from_fn(9, 5, |i, j| (i as f64) - 2.0 * (j as f64));
        let h = create_hier_copy_of(&flat, &[4, 2]).unwrap();
        let back = flatten(&h).unwrap();
        assert_eq!(back.to_col_major(), flat.to_col_major());

        let other = Obj::<f64>::create(9, 5);
        copy_hier_to_flat(&h, &other).unwrap();
        assert_eq!(other.to_col_major(), flat.to_col_major());
    }

    #[test]
    fn test_zero_blocksize_rejected() {
        assert_eq!(
            create::<f64>(4, 4, &[2, 0]).unwrap_err(),
            FlashError::InvalidBlocksize(0)
        );
    }
}
