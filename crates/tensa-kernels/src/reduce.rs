//! Axis reductions.
//!
//! Reduced axes are always dropped from the result shape, whether one axis or
//! several are reduced.

use smallvec::{smallvec, SmallVec};

use crate::broadcast::{contiguous_strides, walk, Strides};
use crate::element::Element;

/// Dimensions left after removing `axes` from `dims`.
pub fn reduced_dims(dims: &[usize], axes: &[usize]) -> SmallVec<[usize; 4]> {
    dims.iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, &d)| d)
        .collect()
}

/// Strides mapping coordinates of `dims` onto the packed reduced result:
/// zero on every reduced axis, packed strides of the kept axes elsewhere.
pub fn reduced_strides(dims: &[usize], axes: &[usize]) -> Strides {
    let kept = reduced_dims(dims, axes);
    let kept_strides = contiguous_strides(&kept);
    let mut strides: Strides = smallvec![0; dims.len()];
    let mut k = 0;
    for (i, s) in strides.iter_mut().enumerate() {
        if !axes.contains(&i) {
            *s = kept_strides[k];
            k += 1;
        }
    }
    strides
}

/// Axes of `out_dims` that were broadcast from `src_dims`: leading axes
/// `src_dims` lacks, plus axes where it had size 1 and the output does not.
pub fn reduction_axes(src_dims: &[usize], out_dims: &[usize]) -> SmallVec<[usize; 4]> {
    let lead = out_dims.len() - src_dims.len();
    let mut axes: SmallVec<[usize; 4]> = (0..lead).collect();
    for (i, &d) in src_dims.iter().enumerate() {
        if d == 1 && out_dims[lead + i] != 1 {
            axes.push(lead + i);
        }
    }
    axes
}

/// Sum `values` (packed, shape `dims`) over `axes` into `out`.
///
/// `out` must hold `product(reduced_dims(dims, axes))` elements; it is
/// overwritten.
pub fn reduce_sum<T: Element>(values: &[T], dims: &[usize], axes: &[usize], out: &mut [T]) {
    debug_assert!(axes.iter().all(|&a| a < dims.len()), "reduce_sum: axis out of range");
    let strides = reduced_strides(dims, axes);
    out.fill(T::ZERO);
    walk(dims, &strides, |i, o| {
        out[o] += values[i];
    });
}

/// Sum a packed `from_dims` array down to `to_dims`, the inverse of
/// broadcasting `to_dims` up to `from_dims`.
pub fn sum_to_shape<T: Element>(values: &[T], from_dims: &[usize], to_dims: &[usize], out: &mut [T]) {
    let axes = reduction_axes(to_dims, from_dims);
    reduce_sum(values, from_dims, &axes, out);
}

/// Index and value of the first maximum, or `None` for an empty slice.
pub fn argmax<T: Element>(values: &[T]) -> Option<(usize, T)> {
    let mut best: Option<(usize, T)> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<f32> {
        (1..=16).map(|v| v as f32).collect()
    }

    #[test]
    fn test_reduce_axis0() {
        let mut out = [0.0f32; 4];
        reduce_sum(&grid(), &[4, 4], &[0], &mut out);
        assert_eq!(out, [28.0, 32.0, 36.0, 40.0]);
    }

    #[test]
    fn test_reduce_axis1() {
        let mut out = [0.0f32; 4];
        reduce_sum(&grid(), &[4, 4], &[1], &mut out);
        assert_eq!(out, [10.0, 26.0, 42.0, 58.0]);
    }

    #[test]
    fn test_reduce_all_axes() {
        let mut out = [0.0f32; 1];
        reduce_sum(&grid(), &[4, 4], &[0, 1], &mut out);
        assert_eq!(out, [136.0]);
    }

    #[test]
    fn test_reduced_dims_drop_axes() {
        assert_eq!(reduced_dims(&[2, 3, 4], &[1]).as_slice(), &[2, 4]);
        assert!(reduced_dims(&[2, 3], &[0, 1]).is_empty());
    }

    #[test]
    fn test_reduction_axes() {
        assert_eq!(reduction_axes(&[1, 4], &[3, 4]).as_slice(), &[0]);
        assert_eq!(reduction_axes(&[4], &[2, 3, 4]).as_slice(), &[0, 1]);
        assert_eq!(reduction_axes(&[2, 1], &[2, 1]).as_slice(), &[] as &[usize]);
    }

    #[test]
    fn test_sum_to_shape_keeps_size_one_layout() {
        // [2,3] -> [2,1]
        let v = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut out = [0.0f64; 2];
        sum_to_shape(&v, &[2, 3], &[2, 1], &mut out);
        assert_eq!(out, [6.0, 15.0]);
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[3.0f32, 7.0, 7.0, 1.0]), Some((1, 7.0)));
        assert_eq!(argmax::<f32>(&[]), None);
    }
}
