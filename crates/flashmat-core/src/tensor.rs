//! N-dimensional tensor views and their partition protocol.
//!
//! A [`TensorView`] is a box `origin .. origin + sizes` inside a strided
//! base tensor stored in a shared [`Buffer`]. Mode 0 is the fastest-varying
//! mode of a freshly created tensor.
//!
//! The 1-D protocol of [`crate::partition`] is generalised in two ways:
//! along a single mode ([`TensorView::part_1x2_mode`]) and along `k` modes
//! at once ([`TensorView::part_2k`]), which splits the view into `2^k`
//! pieces indexed by a bitmask (bit `i` set means "high half along
//! `modes[i]`"). Repartitioning a [`Part2k`] yields `3^k` pieces indexed by
//! one base-3 digit per mode.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::{FlashError, Result};
use crate::partition::Side;
use crate::scalar::Scalar;

/// Travel direction of a multi-mode sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From low indices towards high indices.
    Forward,
    /// From high indices towards low indices.
    Backward,
}

/// A strided box inside a shared tensor buffer.
#[derive(Clone)]
pub struct TensorView<T> {
    buffer: Arc<Buffer<T>>,
    base_offset: usize,
    base_sizes: Vec<usize>,
    strides: Vec<usize>,
    origin: Vec<usize>,
    sizes: Vec<usize>,
}

impl<T> std::fmt::Debug for TensorView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorView")
            .field("origin", &self.origin)
            .field("sizes", &self.sizes)
            .field("strides", &self.strides)
            .finish()
    }
}

fn col_major_strides(sizes: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(sizes.len());
    let mut s = 1;
    for &d in sizes {
        strides.push(s);
        s *= d.max(1);
    }
    strides
}

impl<T: Scalar> TensorView<T> {
    /// Create a zero-filled tensor.
    pub fn create(sizes: &[usize]) -> Self {
        let len = sizes.iter().product();
        Self::over(Buffer::zeros(len), sizes)
    }

    /// Create a tensor from data laid out with mode 0 fastest.
    pub fn from_vec(sizes: &[usize], data: Vec<T>) -> Result<Self> {
        let len: usize = sizes.iter().product();
        if data.len() != len {
            return Err(FlashError::BufferLength {
                len: data.len(),
                shape: sizes.to_vec(),
            });
        }
        Ok(Self::over(Buffer::from_vec(data), sizes))
    }

    fn over(buffer: Arc<Buffer<T>>, sizes: &[usize]) -> Self {
        Self {
            buffer,
            base_offset: 0,
            base_sizes: sizes.to_vec(),
            strides: col_major_strides(sizes),
            origin: vec![0; sizes.len()],
            sizes: sizes.to_vec(),
        }
    }

    /// Number of modes.
    pub fn order(&self) -> usize {
        self.sizes.len()
    }

    /// Extent of every mode.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Extent of one mode.
    pub fn size(&self, mode: usize) -> Result<usize> {
        self.check_mode(mode)?;
        Ok(self.sizes[mode])
    }

    /// Stride of every mode.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Position of the view inside its base.
    pub fn origin(&self) -> &[usize] {
        &self.origin
    }

    /// Number of elements in the view.
    pub fn num_elems(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Check if the view covers nothing.
    pub fn is_empty(&self) -> bool {
        self.sizes.iter().any(|&s| s == 0)
    }

    /// Check if two views address the same base tensor.
    pub fn same_base(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
            && self.base_offset == other.base_offset
            && self.strides == other.strides
            && self.base_sizes == other.base_sizes
    }

    fn check_mode(&self, mode: usize) -> Result<()> {
        if mode >= self.order() {
            return Err(FlashError::InvalidMode {
                mode,
                order: self.order(),
            });
        }
        Ok(())
    }

    fn offset_of(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.order() || index.iter().zip(&self.sizes).any(|(&i, &s)| i >= s) {
            return Err(FlashError::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.sizes.clone(),
            });
        }
        Ok(self.base_offset
            + index
                .iter()
                .zip(&self.origin)
                .zip(&self.strides)
                .map(|((&i, &o), &s)| (i + o) * s)
                .sum::<usize>())
    }

    /// Read one element.
    pub fn get(&self, index: &[usize]) -> Result<T> {
        let off = self.offset_of(index)?;
        // Safety: offset_of bounds-checks against the view, which lies in
        // the buffer.
        Ok(unsafe { *self.buffer.ptr_at(off) })
    }

    /// Write one element.
    pub fn set(&self, index: &[usize], value: T) -> Result<()> {
        let off = self.offset_of(index)?;
        // Safety: as in `get`.
        unsafe { *self.buffer.ptr_at(off) = value };
        Ok(())
    }

    /// Copy the view out with mode 0 fastest.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.num_elems());
        if self.is_empty() {
            return out;
        }
        let mut index = vec![0; self.order()];
        loop {
            if let Ok(v) = self.get(&index) {
                out.push(v);
            }
            let mut k = 0;
            loop {
                if k == index.len() {
                    return out;
                }
                index[k] += 1;
                if index[k] < self.sizes[k] {
                    break;
                }
                index[k] = 0;
                k += 1;
            }
        }
    }

    /// Sub-view starting at `origin` (relative to this view) with `sizes`.
    pub fn sub(&self, origin: &[usize], sizes: &[usize]) -> Result<Self> {
        if origin.len() != self.order()
            || sizes.len() != self.order()
            || (0..self.order()).any(|k| origin[k] + sizes[k] > self.sizes[k])
        {
            return Err(FlashError::IndexOutOfBounds {
                index: origin.iter().zip(sizes).map(|(o, s)| o + s).collect(),
                shape: self.sizes.clone(),
            });
        }
        Ok(Self {
            buffer: Arc::clone(&self.buffer),
            base_offset: self.base_offset,
            base_sizes: self.base_sizes.clone(),
            strides: self.strides.clone(),
            origin: self.origin.iter().zip(origin).map(|(a, b)| a + b).collect(),
            sizes: sizes.to_vec(),
        })
    }

    fn split_mode(&self, mode: usize, at: usize) -> Result<(Self, Self)> {
        let mut lo_sizes = self.sizes.clone();
        lo_sizes[mode] = at;
        let mut hi_sizes = self.sizes.clone();
        hi_sizes[mode] = self.sizes[mode] - at;
        let mut hi_origin = vec![0; self.order()];
        hi_origin[mode] = at;
        Ok((
            self.sub(&vec![0; self.order()], &lo_sizes)?,
            self.sub(&hi_origin, &hi_sizes)?,
        ))
    }

    /// Split along one mode, `b` indices going to `side` (`Left` is low).
    pub fn part_1x2_mode(&self, mode: usize, b: usize, side: Side) -> Result<Part1x2Mode<T>> {
        self.check_mode(mode)?;
        let extent = self.sizes[mode];
        check_extent(b, extent)?;
        let at = match side {
            Side::Left => b,
            Side::Right => extent - b,
            other => return Err(invalid_side(other)),
        };
        let (left, right) = self.split_mode(mode, at)?;
        Ok(Part1x2Mode { mode, left, right })
    }

    /// Split along `modes` at once into `2^k` pieces.
    ///
    /// With `Direction::Forward` the low half along `modes[i]` gets
    /// `sizes[i]` indices; with `Direction::Backward` the high half does.
    pub fn part_2k(&self, modes: &[usize], sizes: &[usize], dir: Direction) -> Result<Part2k<T>> {
        self.check_modes(modes)?;
        if sizes.len() != modes.len() {
            return Err(FlashError::ShapeMismatch {
                expected: vec![modes.len()],
                actual: vec![sizes.len()],
            });
        }
        let mut bounds = Vec::with_capacity(modes.len());
        for (&mode, &b) in modes.iter().zip(sizes) {
            let extent = self.sizes[mode];
            check_extent(b, extent)?;
            let at = match dir {
                Direction::Forward => b,
                Direction::Backward => extent - b,
            };
            bounds.push(vec![0, at, extent]);
        }
        Ok(Part2k {
            modes: modes.to_vec(),
            parts: split_grid(self, modes, &bounds)?,
        })
    }

    fn check_modes(&self, modes: &[usize]) -> Result<()> {
        for (i, &mode) in modes.iter().enumerate() {
            self.check_mode(mode)?;
            if modes[..i].contains(&mode) {
                return Err(FlashError::InvalidMode {
                    mode,
                    order: self.order(),
                });
            }
        }
        Ok(())
    }
}

fn check_extent(requested: usize, available: usize) -> Result<()> {
    if requested > available {
        return Err(FlashError::ExceedsRemaining {
            requested,
            available,
        });
    }
    Ok(())
}

fn invalid_side(side: Side) -> FlashError {
    FlashError::InvalidSide {
        side: format!("{:?}", side),
        shape: "1x2 mode",
    }
}

/// Join two views adjacent along `mode`.
pub fn merge_mode<T: Scalar>(mode: usize, lo: &TensorView<T>, hi: &TensorView<T>) -> Result<TensorView<T>> {
    lo.check_mode(mode)?;
    if !lo.same_base(hi) || lo.order() != hi.order() {
        return Err(FlashError::NotAdjacent {
            reason: "views belong to different tensors".to_string(),
        });
    }
    for k in (0..lo.order()).filter(|&k| k != mode) {
        if lo.origin[k] != hi.origin[k] || lo.sizes[k] != hi.sizes[k] {
            return Err(FlashError::NotAdjacent {
                reason: format!("extents differ along mode {}", k),
            });
        }
    }
    if lo.origin[mode] + lo.sizes[mode] != hi.origin[mode] {
        return Err(FlashError::NotAdjacent {
            reason: format!("gap along mode {}", mode),
        });
    }
    let mut merged = lo.clone();
    merged.sizes[mode] += hi.sizes[mode];
    Ok(merged)
}

/// Split `whole` along `modes` at the relative cut points in `bounds`.
///
/// `bounds[i]` has `r + 1` entries for a radix-`r` split; piece indices are
/// `sum(d_i * r^i)`.
fn split_grid<T: Scalar>(whole: &TensorView<T>, modes: &[usize], bounds: &[Vec<usize>]) -> Result<Vec<TensorView<T>>> {
    let radix = bounds.first().map_or(1, |b| b.len() - 1);
    let count = radix.pow(modes.len() as u32);
    let mut parts = Vec::with_capacity(count);
    for idx in 0..count {
        let mut origin = vec![0; whole.order()];
        let mut sizes = whole.sizes.clone();
        let mut rest = idx;
        for (k, &mode) in modes.iter().enumerate() {
            let d = rest % radix;
            rest /= radix;
            origin[mode] = bounds[k][d];
            sizes[mode] = bounds[k][d + 1] - bounds[k][d];
        }
        parts.push(whole.sub(&origin, &sizes)?);
    }
    Ok(parts)
}

/// Merge a radix-`r` grid of pieces back into one view.
fn merge_grid<T: Scalar>(mut parts: Vec<TensorView<T>>, modes: &[usize], radix: usize) -> Result<TensorView<T>> {
    for &mode in modes {
        let mut next = Vec::with_capacity(parts.len() / radix);
        for group in parts.chunks(radix) {
            let mut acc = group[0].clone();
            for piece in &group[1..] {
                acc = merge_mode(mode, &acc, piece)?;
            }
            next.push(acc);
        }
        parts = next;
    }
    parts.pop().ok_or_else(|| FlashError::NotAdjacent {
        reason: "no pieces to merge".to_string(),
    })
}

/// A tensor view split in two along one mode.
#[derive(Debug, Clone)]
pub struct Part1x2Mode<T> {
    /// Split mode.
    pub mode: usize,
    /// Low indices.
    pub left: TensorView<T>,
    /// High indices.
    pub right: TensorView<T>,
}

/// Three bands along one mode.
#[derive(Debug, Clone)]
pub struct Repart1x3Mode<T> {
    /// Split mode.
    pub mode: usize,
    /// Low band.
    pub a0: TensorView<T>,
    /// Middle band.
    pub a1: TensorView<T>,
    /// High band.
    pub a2: TensorView<T>,
}

impl<T: Scalar> Part1x2Mode<T> {
    /// Take `b` indices from the boundary of `side` as the middle band.
    pub fn repart(&self, b: usize, side: Side) -> Result<Repart1x3Mode<T>> {
        let mode = self.mode;
        match side {
            Side::Right => {
                check_extent(b, self.right.sizes[mode])?;
                let (a1, a2) = self.right.split_mode(mode, b)?;
                Ok(Repart1x3Mode {
                    mode,
                    a0: self.left.clone(),
                    a1,
                    a2,
                })
            }
            Side::Left => {
                let extent = self.left.sizes[mode];
                check_extent(b, extent)?;
                let (a0, a1) = self.left.split_mode(mode, extent - b)?;
                Ok(Repart1x3Mode {
                    mode,
                    a0,
                    a1,
                    a2: self.right.clone(),
                })
            }
            other => Err(invalid_side(other)),
        }
    }
}

impl<T: Scalar> Repart1x3Mode<T> {
    /// Fold the middle band into `side`.
    pub fn cont_with(&self, side: Side) -> Result<Part1x2Mode<T>> {
        let mode = self.mode;
        let whole = merge_mode(mode, &merge_mode(mode, &self.a0, &self.a1)?, &self.a2)?;
        let at = match side {
            Side::Left => self.a0.sizes[mode] + self.a1.sizes[mode],
            Side::Right => self.a0.sizes[mode],
            other => return Err(invalid_side(other)),
        };
        let (left, right) = whole.split_mode(mode, at)?;
        Ok(Part1x2Mode { mode, left, right })
    }
}

/// A tensor view split in two along each of `k` modes.
#[derive(Debug, Clone)]
pub struct Part2k<T> {
    modes: Vec<usize>,
    parts: Vec<TensorView<T>>,
}

/// A tensor view split in three along each of `k` modes.
#[derive(Debug, Clone)]
pub struct Repart3k<T> {
    modes: Vec<usize>,
    parts: Vec<TensorView<T>>,
}

impl<T: Scalar> Part2k<T> {
    /// Partitioned modes.
    pub fn modes(&self) -> &[usize] {
        &self.modes
    }

    /// Piece selected by `mask`: bit `i` picks the high half of `modes[i]`.
    /// `None` when `mask` has a bit at or above `k`.
    pub fn part(&self, mask: usize) -> Option<&TensorView<T>> {
        self.parts.get(mask)
    }

    /// All `2^k` pieces in mask order.
    pub fn parts(&self) -> &[TensorView<T>] {
        &self.parts
    }

    /// Merge every piece back.
    pub fn merge(&self) -> Result<TensorView<T>> {
        merge_grid(self.parts.clone(), &self.modes, 2)
    }

    /// Take `b[i]` indices along `modes[i]` as the middle band.
    ///
    /// `Forward` takes them from the start of the high half, `Backward`
    /// from the end of the low half.
    pub fn repart(&self, b: &[usize], dir: Direction) -> Result<Repart3k<T>> {
        if b.len() != self.modes.len() {
            return Err(FlashError::ShapeMismatch {
                expected: vec![self.modes.len()],
                actual: vec![b.len()],
            });
        }
        let whole = self.merge()?;
        let mut bounds = Vec::with_capacity(self.modes.len());
        for (k, &mode) in self.modes.iter().enumerate() {
            let low = self.parts[0].sizes[mode];
            let extent = whole.sizes[mode];
            let (lo, hi) = match dir {
                Direction::Forward => {
                    check_extent(b[k], extent - low)?;
                    (low, low + b[k])
                }
                Direction::Backward => {
                    check_extent(b[k], low)?;
                    (low - b[k], low)
                }
            };
            bounds.push(vec![0, lo, hi, extent]);
        }
        Ok(Repart3k {
            modes: self.modes.clone(),
            parts: split_grid(&whole, &self.modes, &bounds)?,
        })
    }
}

impl<T: Scalar> Repart3k<T> {
    /// Partitioned modes.
    pub fn modes(&self) -> &[usize] {
        &self.modes
    }

    /// Piece selected by one digit (0, 1 or 2) per partitioned mode.
    pub fn part(&self, digits: &[usize]) -> Result<&TensorView<T>> {
        if digits.len() != self.modes.len() || digits.iter().any(|&d| d > 2) {
            return Err(FlashError::IndexOutOfBounds {
                index: digits.to_vec(),
                shape: vec![3; self.modes.len()],
            });
        }
        let idx = digits.iter().rev().fold(0, |acc, &d| acc * 3 + d);
        Ok(&self.parts[idx])
    }

    /// All `3^k` pieces in digit order.
    pub fn parts(&self) -> &[TensorView<T>] {
        &self.parts
    }

    /// Fold the middle bands into the low halves (`Forward`) or the high
    /// halves (`Backward`).
    pub fn cont_with(&self, dir: Direction) -> Result<Part2k<T>> {
        let whole = merge_grid(self.parts.clone(), &self.modes, 3)?;
        let mut bounds = Vec::with_capacity(self.modes.len());
        for (k, &mode) in self.modes.iter().enumerate() {
            // Digit 1 along mode k, 0 elsewhere.
            let a0 = self.parts[0].sizes[mode];
            let a1 = self.parts[3usize.pow(k as u32)].sizes[mode];
            let at = match dir {
                Direction::Forward => a0 + a1,
                Direction::Backward => a0,
            };
            bounds.push(vec![0, at, whole.sizes[mode]]);
        }
        Ok(Part2k {
            modes: self.modes.clone(),
            parts: split_grid(&whole, &self.modes, &bounds)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(sizes: &[usize]) -> TensorView<f64> {
        let len: usize = sizes.iter().product();
        TensorView::from_vec(sizes, (0..len).map(|x| x as f64).collect()).unwrap()
    }

    #[test]
    fn test_get_uses_strides() {
        let t = iota(&[2, 3, 4]);
        assert_eq!(t.strides(), &[1, 2, 6]);
        assert_eq!(t.get(&[1, 2, 3]).unwrap(), 23.0);
        assert!(t.get(&[2, 0, 0]).is_err());
    }

    #[test]
    fn test_mode_sweep_visits_every_slice() {
        let t = iota(&[2, 5, 3]);
        let mut p = t.part_1x2_mode(1, 0, Side::Left).unwrap();
        let mut firsts = Vec::new();
        while p.left.sizes()[1] < 5 {
            let r = p.repart(2.min(p.right.sizes()[1]), Side::Right).unwrap();
            firsts.push(r.a1.get(&[0, 0, 0]).unwrap());
            p = r.cont_with(Side::Left).unwrap();
        }
        assert_eq!(firsts, vec![0.0, 4.0, 8.0]);
    }

    #[test]
    fn test_part_2k_masks() {
        let t = iota(&[4, 4, 2]);
        let p = t.part_2k(&[0, 1], &[1, 3], Direction::Forward).unwrap();
        assert_eq!(p.parts().len(), 4);
        assert_eq!(p.part(0b00).unwrap().sizes(), &[1, 3, 2]);
        assert_eq!(p.part(0b01).unwrap().sizes(), &[3, 3, 2]);
        assert_eq!(p.part(0b10).unwrap().sizes(), &[1, 1, 2]);
        assert_eq!(p.part(0b11).unwrap().get(&[0, 0, 1]).unwrap(), t.get(&[1, 3, 1]).unwrap());
        assert!(p.part(0b100).is_none());
    }

    #[test]
    fn test_repeated_mode_rejected() {
        let t = iota(&[3, 3]);
        assert!(matches!(
            t.part_2k(&[1, 1], &[0, 0], Direction::Forward),
            Err(FlashError::InvalidMode { .. })
        ));
        assert!(t.part_1x2_mode(2, 0, Side::Left).is_err());
    }

    #[test]
    fn test_merge_mode_checks_adjacency() {
        let t = iota(&[4, 4]);
        let a = t.sub(&[0, 0], &[2, 4]).unwrap();
        let b = t.sub(&[3, 0], &[1, 4]).unwrap();
        assert!(merge_mode(0, &a, &b).is_err());
        let c = t.sub(&[2, 0], &[2, 4]).unwrap();
        assert_eq!(merge_mode(0, &a, &c).unwrap().sizes(), &[4, 4]);
    }
}
