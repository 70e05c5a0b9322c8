//! Per-dimension subscripts and the view-or-copy decision.
//!
//! [`SliceArg`] is what callers write: indices may be negative and count from
//! the end of the dimension. [`resolve`] turns them into non-negative
//! [`SliceItem`]s, which is all the memory manager ever sees.

use std::ops::{Range, RangeFull};

use smallvec::{smallvec, SmallVec};
use tensa_kernels::broadcast::{broadcast_strides, contiguous_strides, Strides};

use crate::error::TensaError;
use crate::shape::Shape;
use crate::Result;

/// One caller-side subscript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceArg {
    /// Single position; drops the dimension from the result.
    Index(isize),
    /// Half-open `start..end`.
    Range(isize, isize),
    All,
}

/// One resolved subscript; bounds are not yet checked against a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceItem {
    Index(usize),
    Range(usize, usize),
    All,
}

pub type SliceSpec = SmallVec<[SliceItem; 4]>;

// Indices beyond `isize::MAX` saturate, so they stay out of range instead of
// wrapping into a from-the-end index.
fn to_index<T: TryInto<isize>>(index: T) -> isize {
    index.try_into().unwrap_or(isize::MAX)
}

macro_rules! impl_slice_arg_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for SliceArg {
                fn from(index: $t) -> Self {
                    SliceArg::Index(to_index(index))
                }
            }

            impl From<Range<$t>> for SliceArg {
                fn from(r: Range<$t>) -> Self {
                    SliceArg::Range(to_index(r.start), to_index(r.end))
                }
            }
        )*
    };
}

impl_slice_arg_from!(i32, isize, usize);

impl From<RangeFull> for SliceArg {
    fn from(_: RangeFull) -> Self {
        SliceArg::All
    }
}

/// Build a `[SliceArg; N]` from indices, ranges and `..`.
///
/// ```
/// use tensa_core::{slice, SliceArg};
/// let spec = slice![1, 0..2, ..];
/// assert_eq!(spec, [SliceArg::Index(1), SliceArg::Range(0, 2), SliceArg::All]);
/// ```
#[macro_export]
macro_rules! slice {
    ($($arg:expr),* $(,)?) => {
        [$($crate::SliceArg::from($arg)),*]
    };
}

/// Resolve negative positions against `dims`. Missing trailing subscripts
/// select the whole dimension.
pub fn resolve(args: &[SliceArg], dims: &[usize]) -> Result<SliceSpec> {
    if args.len() > dims.len() {
        return Err(TensaError::InvalidAxis {
            axis: args.len() - 1,
            ndim: dims.len(),
        });
    }
    let mut items = SliceSpec::with_capacity(dims.len());
    for (axis, &size) in dims.iter().enumerate() {
        let out_of_bounds = |index: isize| TensaError::IndexOutOfBounds { axis, index, size };
        let from_end = |i: isize| if i < 0 { i + size as isize } else { i };
        let item = match args.get(axis).copied().unwrap_or(SliceArg::All) {
            SliceArg::All => SliceItem::All,
            SliceArg::Index(i) => {
                let r = from_end(i);
                if r < 0 || r as usize >= size {
                    return Err(out_of_bounds(i));
                }
                SliceItem::Index(r as usize)
            }
            SliceArg::Range(s, e) => {
                let (rs, re) = (from_end(s), from_end(e));
                if rs < 0 || rs as usize > size {
                    return Err(out_of_bounds(s));
                }
                if re < rs || re as usize > size {
                    return Err(out_of_bounds(e));
                }
                SliceItem::Range(rs as usize, re as usize)
            }
        };
        items.push(item);
    }
    Ok(items)
}

/// Geometry of a resolved slice over a packed source of known shape.
#[derive(Debug, Clone)]
pub(crate) struct Region {
    /// Per source dimension: selected extent (1 for an index).
    pub extents: SmallVec<[usize; 4]>,
    /// Per source dimension: whether it was indexed away.
    pub indexed: SmallVec<[bool; 4]>,
    /// Packed strides of the source.
    pub strides: Strides,
    /// Element offset of the first selected element.
    pub offset: usize,
    /// Result shape, indexed dimensions dropped.
    pub shape: Shape,
    /// Whether the region is one run of the packed source layout.
    pub contiguous: bool,
}

impl Region {
    pub fn of(items: &[SliceItem], dims: &[usize]) -> Result<Region> {
        if items.len() > dims.len() {
            return Err(TensaError::InvalidAxis {
                axis: items.len() - 1,
                ndim: dims.len(),
            });
        }
        let nd = dims.len();
        let mut starts: SmallVec<[usize; 4]> = smallvec![0; nd];
        let mut extents: SmallVec<[usize; 4]> = SmallVec::from_slice(dims);
        let mut indexed: SmallVec<[bool; 4]> = smallvec![false; nd];
        for (axis, item) in items.iter().enumerate() {
            let size = dims[axis];
            let out_of_bounds = |index: usize| TensaError::IndexOutOfBounds {
                axis,
                index: index as isize,
                size,
            };
            match *item {
                SliceItem::All => {}
                SliceItem::Index(i) if i < size => {
                    starts[axis] = i;
                    extents[axis] = 1;
                    indexed[axis] = true;
                }
                SliceItem::Index(i) => return Err(out_of_bounds(i)),
                SliceItem::Range(s, e) if s <= e && e <= size => {
                    starts[axis] = s;
                    extents[axis] = e - s;
                }
                SliceItem::Range(s, e) => return Err(out_of_bounds(if s > size { s } else { e })),
            }
        }

        let strides = contiguous_strides(dims);
        let offset = starts.iter().zip(&strides).map(|(s, st)| s * st).sum();
        let shape: Shape = extents
            .iter()
            .zip(&indexed)
            .filter(|(_, ix)| !**ix)
            .map(|(&e, _)| e)
            .collect::<Vec<_>>()
            .into();

        // one run iff every dim before the last partial one selects one element
        let last_partial = (0..nd).rev().find(|&d| extents[d] != dims[d]);
        let contiguous = shape.numel() == 0
            || last_partial.map_or(true, |k| extents[..k].iter().all(|&e| e == 1));

        Ok(Region {
            extents,
            indexed,
            strides,
            offset,
            shape,
            contiguous,
        })
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Strides for reading `value` broadcast over the region, in source rank.
    pub fn value_strides(&self, value: &Shape) -> Result<Strides> {
        if !value.broadcasts_to(&self.shape) {
            return Err(TensaError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: value.dims().to_vec(),
            });
        }
        let compact = broadcast_strides(value.dims(), self.shape.dims());
        let mut kept = compact.iter();
        Ok(self
            .indexed
            .iter()
            .map(|&ix| if ix { 0 } else { kept.next().copied().unwrap_or(0) })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_slice_macro() {
        let spec = slice![-1, 1..3, ..];
        assert_eq!(spec, [SliceArg::Index(-1), SliceArg::Range(1, 3), SliceArg::All]);
    }

    #[test]
    fn test_huge_usize_index_stays_out_of_range() {
        let huge = usize::MAX;
        assert_eq!(SliceArg::from(huge), SliceArg::Index(isize::MAX));
        let err = resolve(&[SliceArg::from(huge)], &[4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfBounds);

        let err = resolve(&[SliceArg::from(0..huge)], &[4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfBounds);
    }

    #[test]
    fn test_resolve_negative_and_padding() {
        let items = resolve(&slice![-1, -2..3], &[4, 3, 5]).unwrap();
        assert_eq!(
            items.as_slice(),
            &[SliceItem::Index(3), SliceItem::Range(1, 3), SliceItem::All]
        );
    }

    #[test]
    fn test_resolve_out_of_bounds() {
        let err = resolve(&slice![4], &[4]).unwrap_err();
        assert_eq!(err, TensaError::IndexOutOfBounds { axis: 0, index: 4, size: 4 });
        assert_eq!(resolve(&slice![-5], &[4]).unwrap_err().kind(), ErrorKind::IndexOutOfBounds);
        assert!(resolve(&slice![.., 2..1], &[4, 3]).is_err());
        assert!(resolve(&slice![0, 0], &[4]).is_err());
    }

    #[test]
    fn test_row_is_contiguous() {
        let r = Region::of(&[SliceItem::Index(1)], &[3, 4]).unwrap();
        assert!(r.contiguous);
        assert_eq!(r.offset, 4);
        assert_eq!(r.shape.dims(), &[4]);
    }

    #[test]
    fn test_column_is_not_contiguous() {
        let r = Region::of(&[SliceItem::All, SliceItem::Index(2)], &[3, 4]).unwrap();
        assert!(!r.contiguous);
        assert_eq!(r.shape.dims(), &[3]);
    }

    #[test]
    fn test_partial_last_dim_after_single_rows() {
        let r = Region::of(&[SliceItem::Index(2), SliceItem::Range(1, 3)], &[3, 4]).unwrap();
        assert!(r.contiguous);
        assert_eq!(r.offset, 9);

        let r = Region::of(&[SliceItem::Range(0, 2), SliceItem::Range(1, 3)], &[3, 4]).unwrap();
        assert!(!r.contiguous);
        assert_eq!(r.shape.dims(), &[2, 2]);
    }

    #[test]
    fn test_leading_range_is_contiguous() {
        let r = Region::of(&[SliceItem::Range(1, 3)], &[3, 4]).unwrap();
        assert!(r.contiguous);
        assert_eq!((r.offset, r.numel()), (4, 8));
    }

    #[test]
    fn test_value_strides_insert_indexed_dims() {
        let r = Region::of(&[SliceItem::All, SliceItem::Index(0)], &[3, 2]).unwrap();
        let s = r.value_strides(&Shape::new(&[3])).unwrap();
        assert_eq!(s.as_slice(), &[1, 0]);
        let s = r.value_strides(&Shape::scalar()).unwrap();
        assert_eq!(s.as_slice(), &[0, 0]);
        assert!(r.value_strides(&Shape::new(&[2])).is_err());
    }
}
