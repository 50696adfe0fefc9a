//! Partition / Repartition / Continue-with protocol.
//!
//! A blocked algorithm sweeps a matrix by keeping it split into an
//! "exposed" and a "remaining" part:
//!
//! ```text
//! let mut p = part_2x1(&a, 0, Side::Top)?;
//! while p.top.length() < a.length() {
//!     let b = determine_blocksize(p.bottom.length(), nb);
//!     let r = p.repart(b, Side::Bottom)?;
//!     // ... operate on r.a0, r.a1, r.a2 ...
//!     p = r.cont_with(Side::Top)?;
//! }
//! ```
//!
//! `repart` takes the middle block from the side it names; `cont_with`
//! folds the middle block into the side it names. All views alias the
//! source, and every step checks that the pieces being stitched together
//! are adjacent views of one base.
//!
//! Extents are in elements of the view: scalars for a flat matrix, blocks
//! for a hierarchical one.

use crate::error::{FlashError, Result};
use crate::obj::Obj;
use crate::scalar::Scalar;

/// Side of a 2x1 or 1x2 partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Upper part of a 2x1 partition.
    Top,
    /// Lower part of a 2x1 partition.
    Bottom,
    /// Left part of a 1x2 partition.
    Left,
    /// Right part of a 1x2 partition.
    Right,
}

/// Quadrant of a 2x2 partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    /// Top-left.
    TL,
    /// Top-right.
    TR,
    /// Bottom-left.
    BL,
    /// Bottom-right.
    BR,
}

fn invalid_side(side: Side, shape: &'static str) -> FlashError {
    FlashError::InvalidSide {
        side: format!("{:?}", side),
        shape,
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

fn not_adjacent(reason: &str) -> FlashError {
    FlashError::NotAdjacent {
        reason: reason.to_string(),
    }
}

/// Clamp a blocksize to what remains.
#[inline]
pub fn determine_blocksize(remaining: usize, b: usize) -> usize {
    remaining.min(b)
}

// ----------------------------------------------------------------------
// Merges
// ----------------------------------------------------------------------

/// Stack two vertically adjacent views into one.
pub fn merge_2x1<T: Scalar>(top: &Obj<T>, bottom: &Obj<T>) -> Result<Obj<T>> {
    if !top.same_base(bottom) {
        return Err(not_adjacent("views belong to different objects"));
    }
    if top.offn() != bottom.offn() || top.width() != bottom.width() {
        return Err(not_adjacent("column ranges differ"));
    }
    if top.offm() + top.length() != bottom.offm() {
        return Err(not_adjacent("top does not end where bottom starts"));
    }
    Ok(top.rebased(
        top.offm(),
        top.offn(),
        top.length() + bottom.length(),
        top.width(),
    ))
}

/// Join two horizontally adjacent views into one.
pub fn merge_1x2<T: Scalar>(left: &Obj<T>, right: &Obj<T>) -> Result<Obj<T>> {
    if !left.same_base(right) {
        return Err(not_adjacent("views belong to different objects"));
    }
    if left.offm() != right.offm() || left.length() != right.length() {
        return Err(not_adjacent("row ranges differ"));
    }
    if left.offn() + left.width() != right.offn() {
        return Err(not_adjacent("left does not end where right starts"));
    }
    Ok(left.rebased(
        left.offm(),
        left.offn(),
        left.length(),
        left.width() + right.width(),
    ))
}

/// Join four quadrants into one view.
pub fn merge_2x2<T: Scalar>(tl: &Obj<T>, tr: &Obj<T>, bl: &Obj<T>, br: &Obj<T>) -> Result<Obj<T>> {
    let top = merge_1x2(tl, tr)?;
    let bottom = merge_1x2(bl, br)?;
    merge_2x1(&top, &bottom)
}

fn split_rows<T: Scalar>(a: &Obj<T>, at: usize) -> Result<(Obj<T>, Obj<T>)> {
    let top = a.view(0, 0, at, a.width())?;
    let bottom = a.view(at, 0, a.length() - at, a.width())?;
    Ok((top, bottom))
}

fn split_cols<T: Scalar>(a: &Obj<T>, at: usize) -> Result<(Obj<T>, Obj<T>)> {
    let left = a.view(0, 0, a.length(), at)?;
    let right = a.view(0, at, a.length(), a.width() - at)?;
    Ok((left, right))
}

// ----------------------------------------------------------------------
// 2x1
// ----------------------------------------------------------------------

/// A view split into an upper and a lower part.
#[derive(Debug, Clone)]
pub struct Part2x1<T> {
    /// Upper part.
    pub top: Obj<T>,
    /// Lower part.
    pub bottom: Obj<T>,
}

/// Three horizontal bands.
#[derive(Debug, Clone)]
pub struct Repart3x1<T> {
    /// Upper band.
    pub a0: Obj<T>,
    /// Middle band.
    pub a1: Obj<T>,
    /// Lower band.
    pub a2: Obj<T>,
}

/// Split `a` into top and bottom, `mb` rows going to `side`.
pub fn part_2x1<T: Scalar>(a: &Obj<T>, mb: usize, side: Side) -> Result<Part2x1<T>> {
    check_extent(mb, a.length())?;
    let at = match side {
        Side::Top => mb,
        Side::Bottom => a.length() - mb,
        other => return Err(invalid_side(other, "2x1")),
    };
    let (top, bottom) = split_rows(a, at)?;
    Ok(Part2x1 { top, bottom })
}

impl<T: Scalar> Part2x1<T> {
    /// Take `mb` rows from the boundary of `side` as the middle band.
    pub fn repart(&self, mb: usize, side: Side) -> Result<Repart3x1<T>> {
        match side {
            Side::Bottom => {
                check_extent(mb, self.bottom.length())?;
                let (a1, a2) = split_rows(&self.bottom, mb)?;
                Ok(Repart3x1 {
                    a0: self.top.clone(),
                    a1,
                    a2,
                })
            }
            Side::Top => {
                check_extent(mb, self.top.length())?;
                let (a0, a1) = split_rows(&self.top, self.top.length() - mb)?;
                Ok(Repart3x1 {
                    a0,
                    a1,
                    a2: self.bottom.clone(),
                })
            }
            other => Err(invalid_side(other, "2x1")),
        }
    }

    /// Merge the two parts back.
    pub fn merge(&self) -> Result<Obj<T>> {
        merge_2x1(&self.top, &self.bottom)
    }
}

impl<T: Scalar> Repart3x1<T> {
    /// Merge the three bands back.
    pub fn merge(&self) -> Result<Obj<T>> {
        merge_2x1(&merge_2x1(&self.a0, &self.a1)?, &self.a2)
    }

    /// Fold the middle band into `side`.
    pub fn cont_with(&self, side: Side) -> Result<Part2x1<T>> {
        let whole = self.merge()?;
        let at = match side {
            Side::Top => self.a0.length() + self.a1.length(),
            Side::Bottom => self.a0.length(),
            other => return Err(invalid_side(other, "2x1")),
        };
        let (top, bottom) = split_rows(&whole, at)?;
        Ok(Part2x1 { top, bottom })
    }
}

// ----------------------------------------------------------------------
// 1x2
// ----------------------------------------------------------------------

/// A view split into a left and a right part.
#[derive(Debug, Clone)]
pub struct Part1x2<T> {
    /// Left part.
    pub left: Obj<T>,
    /// Right part.
    pub right: Obj<T>,
}

/// Three vertical bands.
#[derive(Debug, Clone)]
pub struct Repart1x3<T> {
    /// Left band.
    pub a0: Obj<T>,
    /// Middle band.
    pub a1: Obj<T>,
    /// Right band.
    pub a2: Obj<T>,
}

/// Split `a` into left and right, `nb` columns going to `side`.
pub fn part_1x2<T: Scalar>(a: &Obj<T>, nb: usize, side: Side) -> Result<Part1x2<T>> {
    check_extent(nb, a.width())?;
    let at = match side {
        Side::Left => nb,
        Side::Right => a.width() - nb,
        other => return Err(invalid_side(other, "1x2")),
    };
    let (left, right) = split_cols(a, at)?;
    Ok(Part1x2 { left, right })
}

impl<T: Scalar> Part1x2<T> {
    /// Take `nb` columns from the boundary of `side` as the middle band.
    pub fn repart(&self, nb: usize, side: Side) -> Result<Repart1x3<T>> {
        match side {
            Side::Right => {
                check_extent(nb, self.right.width())?;
                let (a1, a2) = split_cols(&self.right, nb)?;
                Ok(Repart1x3 {
                    a0: self.left.clone(),
                    a1,
                    a2,
                })
            }
            Side::Left => {
                check_extent(nb, self.left.width())?;
                let (a0, a1) = split_cols(&self.left, self.left.width() - nb)?;
                Ok(Repart1x3 {
                    a0,
                    a1,
                    a2: self.right.clone(),
                })
            }
            other => Err(invalid_side(other, "1x2")),
        }
    }

    /// Merge the two parts back.
    pub fn merge(&self) -> Result<Obj<T>> {
        merge_1x2(&self.left, &self.right)
    }
}

impl<T: Scalar> Repart1x3<T> {
    /// Merge the three bands back.
    pub fn merge(&self) -> Result<Obj<T>> {
        merge_1x2(&merge_1x2(&self.a0, &self.a1)?, &self.a2)
    }

    /// Fold the middle band into `side`.
    pub fn cont_with(&self, side: Side) -> Result<Part1x2<T>> {
        let whole = self.merge()?;
        let at = match side {
            Side::Left => self.a0.width() + self.a1.width(),
            Side::Right => self.a0.width(),
            other => return Err(invalid_side(other, "1x2")),
        };
        let (left, right) = split_cols(&whole, at)?;
        Ok(Part1x2 { left, right })
    }
}

// ----------------------------------------------------------------------
// 2x2
// ----------------------------------------------------------------------

/// A view split into four quadrants.
#[derive(Debug, Clone)]
pub struct Part2x2<T> {
    /// Top-left quadrant.
    pub tl: Obj<T>,
    /// Top-right quadrant.
    pub tr: Obj<T>,
    /// Bottom-left quadrant.
    pub bl: Obj<T>,
    /// Bottom-right quadrant.
    pub br: Obj<T>,
}

/// Nine blocks of a 3x3 repartition, `aij` at row band `i`, column band `j`.
#[derive(Debug, Clone)]
pub struct Repart3x3<T> {
    /// Above and left of the middle block.
    pub a00: Obj<T>,
    /// Above the middle block.
    pub a01: Obj<T>,
    /// Above and right of the middle block.
    pub a02: Obj<T>,
    /// Left of the middle block.
    pub a10: Obj<T>,
    /// Middle block.
    pub a11: Obj<T>,
    /// Right of the middle block.
    pub a12: Obj<T>,
    /// Below and left of the middle block.
    pub a20: Obj<T>,
    /// Below the middle block.
    pub a21: Obj<T>,
    /// Below and right of the middle block.
    pub a22: Obj<T>,
}

fn quadrants<T: Scalar>(whole: &Obj<T>, at_m: usize, at_n: usize) -> Result<Part2x2<T>> {
    let (top, bottom) = split_rows(whole, at_m)?;
    let (tl, tr) = split_cols(&top, at_n)?;
    let (bl, br) = split_cols(&bottom, at_n)?;
    Ok(Part2x2 { tl, tr, bl, br })
}

/// Split `a` into quadrants, the `mb x nb` corner going to `quadrant`.
pub fn part_2x2<T: Scalar>(a: &Obj<T>, mb: usize, nb: usize, quadrant: Quadrant) -> Result<Part2x2<T>> {
    check_extent(mb, a.length())?;
    check_extent(nb, a.width())?;
    let (at_m, at_n) = match quadrant {
        Quadrant::TL => (mb, nb),
        Quadrant::TR => (mb, a.width() - nb),
        Quadrant::BL => (a.length() - mb, nb),
        Quadrant::BR => (a.length() - mb, a.width() - nb),
    };
    quadrants(a, at_m, at_n)
}

impl<T: Scalar> Part2x2<T> {
    /// Merge the four quadrants back.
    pub fn merge(&self) -> Result<Obj<T>> {
        merge_2x2(&self.tl, &self.tr, &self.bl, &self.br)
    }

    /// Take an `mb x nb` block at the inner corner of `quadrant` as `a11`.
    pub fn repart(&self, mb: usize, nb: usize, quadrant: Quadrant) -> Result<Repart3x3<T>> {
        let whole = self.merge()?;
        let (m, n) = (whole.length(), whole.width());
        let (r, c) = (self.tl.length(), self.tl.width());
        let rows = match quadrant {
            Quadrant::BR | Quadrant::BL => {
                check_extent(mb, m - r)?;
                [r, r + mb]
            }
            Quadrant::TL | Quadrant::TR => {
                check_extent(mb, r)?;
                [r - mb, r]
            }
        };
        let cols = match quadrant {
            Quadrant::BR | Quadrant::TR => {
                check_extent(nb, n - c)?;
                [c, c + nb]
            }
            Quadrant::TL | Quadrant::BL => {
                check_extent(nb, c)?;
                [c - nb, c]
            }
        };
        let (top, rest) = split_rows(&whole, rows[0])?;
        let (mid, bottom) = split_rows(&rest, rows[1] - rows[0])?;
        let band = |a: &Obj<T>| -> Result<(Obj<T>, Obj<T>, Obj<T>)> {
            let (x0, rest) = split_cols(a, cols[0])?;
            let (x1, x2) = split_cols(&rest, cols[1] - cols[0])?;
            Ok((x0, x1, x2))
        };
        let (a00, a01, a02) = band(&top)?;
        let (a10, a11, a12) = band(&mid)?;
        let (a20, a21, a22) = band(&bottom)?;
        Ok(Repart3x3 {
            a00,
            a01,
            a02,
            a10,
            a11,
            a12,
            a20,
            a21,
            a22,
        })
    }
}

impl<T: Scalar> Repart3x3<T> {
    /// Merge the nine blocks back.
    pub fn merge(&self) -> Result<Obj<T>> {
        let row = |x0: &Obj<T>, x1: &Obj<T>, x2: &Obj<T>| merge_1x2(&merge_1x2(x0, x1)?, x2);
        let r0 = row(&self.a00, &self.a01, &self.a02)?;
        let r1 = row(&self.a10, &self.a11, &self.a12)?;
        let r2 = row(&self.a20, &self.a21, &self.a22)?;
        merge_2x1(&merge_2x1(&r0, &r1)?, &r2)
    }

    /// Fold `a11` into `quadrant`.
    pub fn cont_with(&self, quadrant: Quadrant) -> Result<Part2x2<T>> {
        let whole = self.merge()?;
        let p = self.a00.length();
        let q = p + self.a11.length();
        let s = self.a00.width();
        let t = s + self.a11.width();
        let (at_m, at_n) = match quadrant {
            Quadrant::TL => (q, t),
            Quadrant::TR => (q, s),
            Quadrant::BL => (p, t),
            Quadrant::BR => (p, s),
        };
        quadrants(&whole, at_m, at_n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(m: usize, n: usize) -> Obj<f64> {
        Obj::from_fn(m, n, |i, j| (i * 100 + j) as f64)
    }

    #[test]
    fn test_part_2x1_sides() {
        let a = sample(5, 3);
        let p = part_2x1(&a, 2, Side::Top).unwrap();
        assert_eq!((p.top.length(), p.bottom.length()), (2, 3));
        let p = part_2x1(&a, 2, Side::Bottom).unwrap();
        assert_eq!((p.top.length(), p.bottom.length()), (3, 2));
        assert!(matches!(
            part_2x1(&a, 1, Side::Left),
            Err(FlashError::InvalidSide { .. })
        ));
        assert!(matches!(
            part_2x1(&a, 6, Side::Top),
            Err(FlashError::ExceedsRemaining { .. })
        ));
    }

    #[test]
    fn test_repart_takes_from_named_side() {
        let a = sample(6, 2);
        let p = part_2x1(&a, 2, Side::Top).unwrap();
        let r = p.repart(3, Side::Bottom).unwrap();
        assert_eq!((r.a0.length(), r.a1.length(), r.a2.length()), (2, 3, 1));
        assert_eq!(r.a1.get(0, 1).unwrap(), 201.0);

        let r = p.repart(1, Side::Top).unwrap();
        assert_eq!((r.a0.length(), r.a1.length(), r.a2.length()), (1, 1, 4));
        assert_eq!(r.a1.get(0, 0).unwrap(), 100.0);
    }

    #[test]
    fn test_repart_zero_is_empty_middle() {
        let a = sample(4, 4);
        let p = part_1x2(&a, 0, Side::Left).unwrap();
        let r = p.repart(0, Side::Right).unwrap();
        assert!(r.a1.is_empty());
        let back = r.cont_with(Side::Left).unwrap();
        assert_eq!(back.left.width(), 0);
    }

    #[test]
    fn test_cont_with_rejects_foreign_view() {
        let a = sample(4, 4);
        let b = sample(4, 4);
        let p = part_2x1(&a, 0, Side::Top).unwrap();
        let mut r = p.repart(2, Side::Bottom).unwrap();
        r.a1 = b.view(0, 0, 2, 4).unwrap();
        assert!(matches!(
            r.cont_with(Side::Top),
            Err(FlashError::NotAdjacent { .. })
        ));
    }

    #[test]
    fn test_merge_detects_gap() {
        let a = sample(6, 6);
        let top = a.view(0, 0, 2, 6).unwrap();
        let bottom = a.view(3, 0, 3, 6).unwrap();
        assert!(merge_2x1(&top, &bottom).is_err());
        let left = a.view(0, 0, 6, 2).unwrap();
        let right = a.view(0, 2, 5, 4).unwrap();
        assert!(merge_1x2(&left, &right).is_err());
    }

    #[test]
    fn test_2x2_sweep_diagonal() {
        let a = sample(7, 7);
        let mut p = part_2x2(&a, 0, 0, Quadrant::TL).unwrap();
        let mut diag = Vec::new();
        while p.tl.length() < a.length() {
            let b = determine_blocksize(p.br.length(), 3);
            let r = p.repart(b, b, Quadrant::BR).unwrap();
            diag.push(r.a11.get(0, 0).unwrap());
            assert_eq!(r.a21.width(), r.a11.width());
            assert_eq!(r.a12.length(), r.a11.length());
            p = r.cont_with(Quadrant::TL).unwrap();
        }
        assert_eq!(diag, vec![0.0, 303.0, 606.0]);
        assert!(p.br.is_empty());
    }

    #[test]
    fn test_2x2_backward_sweep() {
        let a = sample(5, 5);
        let mut p = part_2x2(&a, 0, 0, Quadrant::BR).unwrap();
        let mut count = 0;
        while p.br.length() < a.length() {
            let b = determine_blocksize(p.tl.length(), 2);
            let r = p.repart(b, b, Quadrant::TL).unwrap();
            assert_eq!(r.a11.offm() + r.a11.length(), a.length() - p.br.length());
            p = r.cont_with(Quadrant::BR).unwrap();
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn test_off_diagonal_quadrants() {
        let a = sample(6, 6);
        let p = part_2x2(&a, 2, 2, Quadrant::TR).unwrap();
        assert_eq!((p.tr.length(), p.tr.width()), (2, 2));
        let r = p.repart(1, 1, Quadrant::BL).unwrap();
        // a11 sits below tr's rows and left of its columns.
        assert_eq!((r.a11.offm(), r.a11.offn()), (2, 3));
        let p2 = r.cont_with(Quadrant::TR).unwrap();
        assert_eq!((p2.tl.length(), p2.tl.width()), (3, 3));
    }
}
