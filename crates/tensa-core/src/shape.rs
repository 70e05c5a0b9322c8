use smallvec::SmallVec;
use std::fmt;

use tensa_kernels::broadcast::{contiguous_strides, Strides};

use crate::error::TensaError;
use crate::Result;

/// Logical tensor shape, inline for up to 4 dimensions.
///
/// The empty shape is a scalar with one element.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    /// Shape with the given dimensions, outermost first.
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// The zero-dimensional shape.
    pub fn scalar() -> Self {
        Self::default()
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Element count; 1 for a scalar.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Dimension sizes, outermost first.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Size of `axis`, or `None` past the last dimension.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// Whether this is the zero-dimensional shape.
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Row-major strides of the packed layout.
    pub fn contiguous_strides(&self) -> Strides {
        contiguous_strides(&self.dims)
    }

    /// Right-aligned broadcast of two shapes, `None` if incompatible.
    ///
    /// A dimension missing from the shorter shape counts as 1.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let ndim = self.ndim().max(other.ndim());
        let mut dims = SmallVec::with_capacity(ndim);
        for r in (0..ndim).rev() {
            let a = self.dim_from_right(r);
            let b = other.dim_from_right(r);
            dims.push(match (a, b) {
                (a, b) if a == b => a,
                (1, b) => b,
                (a, 1) => a,
                _ => return None,
            });
        }
        Some(Shape { dims })
    }

    /// Whether this shape broadcasts to exactly `target`.
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        self.ndim() <= target.ndim() && self.broadcast_with(target).as_ref() == Some(target)
    }

    fn dim_from_right(&self, i: usize) -> usize {
        if i < self.ndim() {
            self.dims[self.ndim() - 1 - i]
        } else {
            1
        }
    }

    /// Resolve a view target where at most one entry is `-1`.
    pub fn resolve_view(&self, target: &[isize]) -> Result<Shape> {
        let numel = self.numel();
        let invalid = || TensaError::InvalidReshape {
            numel,
            shape: target.to_vec(),
        };

        let mut inferred = None;
        let mut known: usize = 1;
        for (i, &d) in target.iter().enumerate() {
            match d {
                -1 if inferred.is_some() => {
                    return Err(TensaError::AmbiguousShape {
                        shape: target.to_vec(),
                    })
                }
                -1 => inferred = Some(i),
                d if d < 0 => return Err(invalid()),
                d => known = known.checked_mul(d as usize).ok_or_else(invalid)?,
            }
        }

        let mut dims: SmallVec<[usize; 4]> = target.iter().map(|&d| d.max(0) as usize).collect();
        if let Some(idx) = inferred {
            if known == 0 || numel % known != 0 {
                return Err(invalid());
            }
            dims[idx] = numel / known;
        }
        let shape = Shape { dims };
        if shape.numel() != numel {
            return Err(invalid());
        }
        Ok(shape)
    }

    /// Shape with `axes` removed.
    pub fn without_axes(&self, axes: &[usize]) -> Shape {
        Shape {
            dims: tensa_kernels::reduce::reduced_dims(&self.dims, axes),
        }
    }

    /// Shape with a size-1 dimension inserted at `axis`.
    pub fn unsqueezed(&self, axis: usize) -> Result<Shape> {
        if axis > self.ndim() {
            return Err(TensaError::InvalidAxis {
                axis,
                ndim: self.ndim(),
            });
        }
        let mut dims = self.dims.clone();
        dims.insert(axis, 1);
        Ok(Shape { dims })
    }

    /// Swap of a 2-d shape.
    pub fn transposed(&self) -> Option<Shape> {
        match self.dims() {
            &[r, c] => Some(Shape::new(&[c, r])),
            _ => None,
        }
    }

    pub(crate) fn check_axis(&self, axis: usize) -> Result<()> {
        if axis < self.ndim() {
            Ok(())
        } else {
            Err(TensaError::InvalidAxis {
                axis,
                ndim: self.ndim(),
            })
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims.as_slice())
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape {
            dims: SmallVec::from_vec(dims),
        }
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(&dims)
    }
}
