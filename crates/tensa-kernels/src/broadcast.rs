//! Zero-stride broadcast iteration.
//!
//! A broadcast operand is read through a stride array that is zero on every
//! dimension where it has size 1 (or no dimension at all) but the output does
//! not. Size-1 dimensions are never materialised.

use smallvec::{smallvec, SmallVec};

use crate::element::Element;
use crate::elementwise::{Binary, Operand};

/// Element strides, inline for up to 4 dimensions.
pub type Strides = SmallVec<[usize; 4]>;

/// Row-major strides of a packed array with `dims`.
pub fn contiguous_strides(dims: &[usize]) -> Strides {
    let mut strides: Strides = smallvec![0; dims.len()];
    let mut acc = 1;
    for i in (0..dims.len()).rev() {
        strides[i] = acc;
        acc *= dims[i];
    }
    strides
}

/// Strides for reading a packed `src_dims` array as if it had `out_dims`.
///
/// `src_dims` is right-aligned against `out_dims`; it must not have more
/// dimensions and every paired dimension must be equal or 1.
pub fn broadcast_strides(src_dims: &[usize], out_dims: &[usize]) -> Strides {
    assert!(
        src_dims.len() <= out_dims.len(),
        "broadcast_strides: source rank {} exceeds output rank {}",
        src_dims.len(),
        out_dims.len()
    );
    let lead = out_dims.len() - src_dims.len();
    let mut strides: Strides = smallvec![0; out_dims.len()];
    let mut acc = 1;
    for i in (0..src_dims.len()).rev() {
        let d = src_dims[i];
        let o = out_dims[lead + i];
        debug_assert!(d == o || d == 1, "dimension {d} does not broadcast to {o}");
        strides[lead + i] = if d == 1 && o != 1 { 0 } else { acc };
        acc *= d;
    }
    strides
}

/// Walk every coordinate of `dims` in row-major order, calling
/// `f(flat_index, offset)` with the offset through `strides`.
pub fn walk<F: FnMut(usize, usize)>(dims: &[usize], strides: &[usize], mut f: F) {
    walk2(dims, strides, strides, |i, o, _| f(i, o));
}

/// Like [`walk`] but tracks offsets into two strided operands at once.
pub fn walk2<F: FnMut(usize, usize, usize)>(dims: &[usize], sa: &[usize], sb: &[usize], mut f: F) {
    debug_assert!(sa.len() == dims.len() && sb.len() == dims.len());
    let n: usize = dims.iter().product();
    if n == 0 {
        return;
    }
    let nd = dims.len();
    let mut coord: SmallVec<[usize; 4]> = smallvec![0; nd];
    let (mut oa, mut ob) = (0usize, 0usize);
    for i in 0..n {
        f(i, oa, ob);
        let mut d = nd;
        while d > 0 {
            d -= 1;
            coord[d] += 1;
            oa += sa[d];
            ob += sb[d];
            if coord[d] < dims[d] {
                break;
            }
            oa -= sa[d] * dims[d];
            ob -= sb[d] * dims[d];
            coord[d] = 0;
        }
    }
}

/// `out = a op b` where `a` and `b` broadcast to `out_dims`.
pub fn broadcast_map<T: Element>(
    op: Binary,
    a: &[T],
    a_dims: &[usize],
    b: &[T],
    b_dims: &[usize],
    out: &mut [T],
    out_dims: &[usize],
) {
    let sa = broadcast_strides(a_dims, out_dims);
    let sb = broadcast_strides(b_dims, out_dims);
    walk2(out_dims, &sa, &sb, |i, ia, ib| {
        out[i] = op.apply(a[ia], b[ib]);
    });
}

/// Local gradient of a broadcast binary op, in the output shape:
/// `local[i] = grad[i] * d(a op b)/d(side)`.
///
/// The caller still has to sum `local` down to the operand's own shape.
#[allow(clippy::too_many_arguments)]
pub fn broadcast_partial<T: Element>(
    op: Binary,
    side: Operand,
    a: &[T],
    a_dims: &[usize],
    b: &[T],
    b_dims: &[usize],
    grad: &[T],
    out_dims: &[usize],
    local: &mut [T],
) {
    let sa = broadcast_strides(a_dims, out_dims);
    let sb = broadcast_strides(b_dims, out_dims);
    walk2(out_dims, &sa, &sb, |i, ia, ib| {
        local[i] = grad[i] * op.partial(side, a[ia], b[ib]);
    });
}

/// `dst[i] += src[offset(i)]` where `src` is read through `src_strides`
/// over the coordinates of `dst_dims`.
pub fn accumulate_strided<T: Element>(src: &[T], src_strides: &[usize], dst: &mut [T], dst_dims: &[usize]) {
    walk(dst_dims, src_strides, |i, o| {
        dst[i] += src[o];
    });
}

/// Copy `src` (broadcast from `src_dims`) into a packed `dst` of `dst_dims`.
pub fn expand_into<T: Element>(src: &[T], src_dims: &[usize], dst: &mut [T], dst_dims: &[usize]) {
    let strides = broadcast_strides(src_dims, dst_dims);
    walk(dst_dims, &strides, |i, o| {
        dst[i] = src[o];
    });
}
