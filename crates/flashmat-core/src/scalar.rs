//! Scalar trait for block element types.
//!
//! This module defines the `Scalar` trait that abstracts over `f32` and `f64`
//! for matrix handles and leaf kernels, and the datatype tag carried by
//! every block handle.

use std::fmt::{self, Debug};

use num_traits::{Float, NumAssign};

/// Datatype tag stored on every block handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// Single precision real.
    Float,
    /// Double precision real.
    Double,
}

impl Datatype {
    /// Size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Datatype::Float => 4,
            Datatype::Double => 8,
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Float => write!(f, "float"),
            Datatype::Double => write!(f, "double"),
        }
    }
}

/// Trait for element types stored in blocks.
pub trait Scalar: Float + NumAssign + Debug + Default + Send + Sync + 'static {
    /// Datatype tag for this type.
    const DATATYPE: Datatype;

    /// Create a scalar from f64.
    fn from_f64(val: f64) -> Self;

    /// Get the value as f64.
    fn real_f64(&self) -> f64;
}

impl Scalar for f64 {
    const DATATYPE: Datatype = Datatype::Double;

    fn from_f64(val: f64) -> Self {
        val
    }

    fn real_f64(&self) -> f64 {
        *self
    }
}

impl Scalar for f32 {
    const DATATYPE: Datatype = Datatype::Float;

    fn from_f64(val: f64) -> Self {
        val as f32
    }

    fn real_f64(&self) -> f64 {
        *self as f64
    }
}
