//! The capability interface tensors compute through.
//!
//! A [`Backend`] is implemented once per (element type, device) pair and
//! selected by a tensor's type parameter. It owns both halves of the engine:
//! the memory manager (allocation, slicing with view-or-copy semantics,
//! broadcast writes) and kernel dispatch onto `tensa-kernels`.
//!
//! All methods take buffers plus caller-supplied shapes. Element counts are
//! the caller's responsibility; the kernels assert them.

use std::fmt;
use std::marker::PhantomData;

use tensa_kernels::broadcast::{self, walk, walk2};
use tensa_kernels::{elementwise, matmul, reduce, Binary, Element, Operand, Unary};
use tracing::debug;

use crate::device::Device;
use crate::error::TensaError;
use crate::shape::Shape;
use crate::slice::{Region, SliceItem};
use crate::storage::Buffer;
use crate::Result;

/// Result of [`Backend::get`].
#[derive(Debug, Clone)]
pub struct Slice<E: Element> {
    pub buffer: Buffer<E>,
    /// `false` iff `buffer` is a view into the sliced buffer.
    pub is_copy: bool,
    pub shape: Shape,
}

/// Memory manager and kernel dispatch for one (element type, device) pair.
///
/// Every method is an associated function: a backend carries no state, and
/// tensors name theirs through a type parameter.
pub trait Backend: fmt::Debug + Send + Sync + Sized + 'static {
    type Elem: Element;

    const DEVICE: Device;

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    /// Zeroed storage for `len` elements.
    fn allocate(len: usize) -> Buffer<Self::Elem>;

    /// Move host values into device storage.
    fn from_host(values: Vec<Self::Elem>) -> Buffer<Self::Elem>;

    /// Release a handle. Storage outlives it while other handles remain.
    fn free(buffer: Buffer<Self::Elem>);

    /// Select a region of `buffer` (packed, shape `shape`).
    ///
    /// Returns a view when the region is a single run of the packed layout and
    /// a fresh packed copy otherwise. Writes into a copy are not propagated;
    /// use [`Backend::set`] with the same items for that.
    fn get(items: &[SliceItem], buffer: &Buffer<Self::Elem>, shape: &Shape) -> Result<Slice<Self::Elem>>;

    /// Write `src`, broadcast to the region's shape, into the region of `dst`.
    fn set(
        items: &[SliceItem],
        dst: &Buffer<Self::Elem>,
        shape: &Shape,
        src: &Buffer<Self::Elem>,
        src_shape: &Shape,
    ) -> Result<()>;

    /// Like [`Backend::set`] but adds into the region.
    fn set_accumulate(
        items: &[SliceItem],
        dst: &Buffer<Self::Elem>,
        shape: &Shape,
        src: &Buffer<Self::Elem>,
        src_shape: &Shape,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Kernels
    // ------------------------------------------------------------------

    /// Set every element of `buffer` to `value`.
    fn fill(buffer: &Buffer<Self::Elem>, value: Self::Elem);

    /// Packed copy of `src` into `dst`; both must have the same length.
    fn copy(src: &Buffer<Self::Elem>, dst: &Buffer<Self::Elem>);

    /// `out = op(x)` elementwise.
    fn unary(op: Unary<Self::Elem>, x: &Buffer<Self::Elem>, out: &Buffer<Self::Elem>);

    /// `acc += grad * op'(x)`, where `y = op(x)`.
    fn unary_backward(
        op: Unary<Self::Elem>,
        x: &Buffer<Self::Elem>,
        y: &Buffer<Self::Elem>,
        grad: &Buffer<Self::Elem>,
        acc: &Buffer<Self::Elem>,
    );

    /// Same-shape `out = a op b`.
    fn binary(op: Binary, a: &Buffer<Self::Elem>, b: &Buffer<Self::Elem>, out: &Buffer<Self::Elem>);

    /// Same-shape `acc += grad * d(a op b)/d(side)`.
    fn binary_backward(
        op: Binary,
        side: Operand,
        a: &Buffer<Self::Elem>,
        b: &Buffer<Self::Elem>,
        grad: &Buffer<Self::Elem>,
        acc: &Buffer<Self::Elem>,
    );

    /// `out = a op b` with `a` and `b` broadcast to `out_shape`.
    #[allow(clippy::too_many_arguments)]
    fn broadcast(
        op: Binary,
        a: &Buffer<Self::Elem>,
        a_shape: &Shape,
        b: &Buffer<Self::Elem>,
        b_shape: &Shape,
        out: &Buffer<Self::Elem>,
        out_shape: &Shape,
    );

    /// Gradient of one operand of a broadcast binary op: the local gradient in
    /// `out_shape`, summed over exactly the axes that operand was broadcast
    /// along, accumulated into `acc`.
    #[allow(clippy::too_many_arguments)]
    fn broadcast_backward(
        op: Binary,
        side: Operand,
        a: &Buffer<Self::Elem>,
        a_shape: &Shape,
        b: &Buffer<Self::Elem>,
        b_shape: &Shape,
        grad: &Buffer<Self::Elem>,
        out_shape: &Shape,
        acc: &Buffer<Self::Elem>,
    ) -> Result<()>;

    /// `acc += grad`.
    fn accumulate(acc: &Buffer<Self::Elem>, grad: &Buffer<Self::Elem>);

    /// `acc += sum_to_shape(grad)`: reduce `grad` over the axes `acc_shape`
    /// broadcasts along, then add.
    fn accumulate_sum_to(
        acc: &Buffer<Self::Elem>,
        acc_shape: &Shape,
        grad: &Buffer<Self::Elem>,
        grad_shape: &Shape,
    ) -> Result<()>;

    /// `acc[i] += alpha * grad[reduced(i)]`: broadcast a reduction result back
    /// over the `axes` it dropped.
    fn accumulate_expanded(
        acc: &Buffer<Self::Elem>,
        acc_shape: &Shape,
        grad: &Buffer<Self::Elem>,
        axes: &[usize],
        alpha: Self::Elem,
    );

    /// Sum over `axes`, which are dropped from the result.
    fn reduce_sum(x: &Buffer<Self::Elem>, shape: &Shape, axes: &[usize], out: &Buffer<Self::Elem>);

    /// Sum of every element.
    fn sum(x: &Buffer<Self::Elem>) -> Self::Elem;

    /// `c = alpha * op(a) @ op(b) + beta * c`.
    #[allow(clippy::too_many_arguments)]
    fn gemm(
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
        alpha: Self::Elem,
        a: &Buffer<Self::Elem>,
        b: &Buffer<Self::Elem>,
        beta: Self::Elem,
        c: &Buffer<Self::Elem>,
    );

    /// Write the transpose of the `rows x cols` matrix `x` into `out`.
    fn transpose(x: &Buffer<Self::Elem>, rows: usize, cols: usize, out: &Buffer<Self::Elem>);

    /// Flat index and value of the first maximum; `None` when empty.
    fn argmax(x: &Buffer<Self::Elem>) -> Option<(usize, Self::Elem)>;

    /// `y += alpha * x`.
    fn axpy(alpha: Self::Elem, x: &Buffer<Self::Elem>, y: &Buffer<Self::Elem>);

    /// `out = a * scalar + b`.
    fn scale_add(a: &Buffer<Self::Elem>, scalar: Self::Elem, b: &Buffer<Self::Elem>, out: &Buffer<Self::Elem>);

    /// `out = a * b + c`.
    fn fma(a: &Buffer<Self::Elem>, b: &Buffer<Self::Elem>, c: &Buffer<Self::Elem>, out: &Buffer<Self::Elem>);

    /// `x *= scalar` in place.
    fn scale(x: &Buffer<Self::Elem>, scalar: Self::Elem);

    /// Inner product of two equal-length buffers.
    fn dot(a: &Buffer<Self::Elem>, b: &Buffer<Self::Elem>) -> Self::Elem;
}

/// Host backend for element type `E`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cpu<E>(PhantomData<E>);

/// Single-precision host backend; the default for [`Tensor`](crate::Tensor).
pub type CpuF32 = Cpu<f32>;
pub type CpuF64 = Cpu<f64>;

fn check_len<E: Element>(buffer: &Buffer<E>, shape: &Shape) -> Result<()> {
    if buffer.len() != shape.numel() {
        return Err(TensaError::ShapeMismatch {
            expected: shape.dims().to_vec(),
            got: vec![buffer.len()],
        });
    }
    Ok(())
}

fn scatter<E: Element>(
    items: &[SliceItem],
    dst: &Buffer<E>,
    shape: &Shape,
    src: &Buffer<E>,
    src_shape: &Shape,
    add: bool,
) -> Result<()> {
    check_len(dst, shape)?;
    check_len(src, src_shape)?;
    let region = Region::of(items, shape.dims())?;
    let src_strides = region.value_strides(src_shape)?;
    let values = src.read_for(dst);
    let mut out = dst.write();
    let base = region.offset;
    if add {
        walk2(&region.extents, &region.strides, &src_strides, |_, od, os| {
            out[base + od] += values[os];
        });
    } else {
        walk2(&region.extents, &region.strides, &src_strides, |_, od, os| {
            out[base + od] = values[os];
        });
    }
    Ok(())
}

impl<E: Element> Backend for Cpu<E> {
    type Elem = E;

    const DEVICE: Device = Device::Cpu;

    fn allocate(len: usize) -> Buffer<E> {
        Buffer::zeroed(len)
    }

    fn from_host(values: Vec<E>) -> Buffer<E> {
        Buffer::from_vec(values)
    }

    fn free(buffer: Buffer<E>) {
        buffer.free();
    }

    fn get(items: &[SliceItem], buffer: &Buffer<E>, shape: &Shape) -> Result<Slice<E>> {
        check_len(buffer, shape)?;
        let region = Region::of(items, shape.dims())?;
        if region.contiguous {
            let view = buffer.advanced(region.offset, region.numel())?;
            return Ok(Slice {
                buffer: view,
                is_copy: false,
                shape: region.shape,
            });
        }

        debug!(source = %shape, region = %region.shape, "slice is strided, copying");
        let src = buffer.read();
        let mut out = vec![E::ZERO; region.numel()];
        let base = region.offset;
        walk(&region.extents, &region.strides, |i, o| {
            out[i] = src[base + o];
        });
        Ok(Slice {
            buffer: Buffer::from_vec(out),
            is_copy: true,
            shape: region.shape,
        })
    }

    fn set(items: &[SliceItem], dst: &Buffer<E>, shape: &Shape, src: &Buffer<E>, src_shape: &Shape) -> Result<()> {
        scatter(items, dst, shape, src, src_shape, false)
    }

    fn set_accumulate(
        items: &[SliceItem],
        dst: &Buffer<E>,
        shape: &Shape,
        src: &Buffer<E>,
        src_shape: &Shape,
    ) -> Result<()> {
        scatter(items, dst, shape, src, src_shape, true)
    }

    fn fill(buffer: &Buffer<E>, value: E) {
        buffer.fill(value);
    }

    fn copy(src: &Buffer<E>, dst: &Buffer<E>) {
        let values = src.read_for(dst);
        dst.write().copy_from_slice(&values);
    }

    fn unary(op: Unary<E>, x: &Buffer<E>, out: &Buffer<E>) {
        let x = x.read_for(out);
        elementwise::unary_map(op, &x, &mut out.write());
    }

    fn unary_backward(op: Unary<E>, x: &Buffer<E>, y: &Buffer<E>, grad: &Buffer<E>, acc: &Buffer<E>) {
        let (x, y, grad) = (x.read_for(acc), y.read_for(acc), grad.read_for(acc));
        elementwise::unary_grad_acc(op, &x, &y, &grad, &mut acc.write());
    }

    fn binary(op: Binary, a: &Buffer<E>, b: &Buffer<E>, out: &Buffer<E>) {
        let (a, b) = (a.read_for(out), b.read_for(out));
        elementwise::binary_map(op, &a, &b, &mut out.write());
    }

    fn binary_backward(op: Binary, side: Operand, a: &Buffer<E>, b: &Buffer<E>, grad: &Buffer<E>, acc: &Buffer<E>) {
        let (a, b, grad) = (a.read_for(acc), b.read_for(acc), grad.read_for(acc));
        elementwise::binary_grad_acc(op, side, &a, &b, &grad, &mut acc.write());
    }

    fn broadcast(
        op: Binary,
        a: &Buffer<E>,
        a_shape: &Shape,
        b: &Buffer<E>,
        b_shape: &Shape,
        out: &Buffer<E>,
        out_shape: &Shape,
    ) {
        let (a, b) = (a.read_for(out), b.read_for(out));
        broadcast::broadcast_map(op, &a, a_shape.dims(), &b, b_shape.dims(), &mut out.write(), out_shape.dims());
    }

    fn broadcast_backward(
        op: Binary,
        side: Operand,
        a: &Buffer<E>,
        a_shape: &Shape,
        b: &Buffer<E>,
        b_shape: &Shape,
        grad: &Buffer<E>,
        out_shape: &Shape,
        acc: &Buffer<E>,
    ) -> Result<()> {
        let mut local = vec![E::ZERO; out_shape.numel()];
        {
            let (av, bv, g) = (a.read(), b.read(), grad.read());
            broadcast::broadcast_partial(
                op,
                side,
                &av,
                a_shape.dims(),
                &bv,
                b_shape.dims(),
                &g,
                out_shape.dims(),
                &mut local,
            );
        }
        let acc_shape = match side {
            Operand::Lhs => a_shape,
            Operand::Rhs => b_shape,
        };
        Self::accumulate_sum_to(acc, acc_shape, &Buffer::from_vec(local), out_shape)
    }

    fn accumulate(acc: &Buffer<E>, grad: &Buffer<E>) {
        let grad = grad.read_for(acc);
        elementwise::accumulate(&mut acc.write(), &grad);
    }

    fn accumulate_sum_to(acc: &Buffer<E>, acc_shape: &Shape, grad: &Buffer<E>, grad_shape: &Shape) -> Result<()> {
        check_len(acc, acc_shape)?;
        check_len(grad, grad_shape)?;
        if acc_shape == grad_shape {
            Self::accumulate(acc, grad);
            return Ok(());
        }
        if !acc_shape.broadcasts_to(grad_shape) {
            return Err(TensaError::ShapeMismatch {
                expected: acc_shape.dims().to_vec(),
                got: grad_shape.dims().to_vec(),
            });
        }
        let mut reduced = vec![E::ZERO; acc_shape.numel()];
        {
            let g = grad.read();
            reduce::sum_to_shape(&g, grad_shape.dims(), acc_shape.dims(), &mut reduced);
        }
        elementwise::accumulate(&mut acc.write(), &reduced);
        Ok(())
    }

    fn accumulate_expanded(acc: &Buffer<E>, acc_shape: &Shape, grad: &Buffer<E>, axes: &[usize], alpha: E) {
        let strides = reduce::reduced_strides(acc_shape.dims(), axes);
        let grad = grad.read_for(acc);
        let mut out = acc.write();
        walk(acc_shape.dims(), &strides, |i, o| {
            out[i] += alpha * grad[o];
        });
    }

    fn reduce_sum(x: &Buffer<E>, shape: &Shape, axes: &[usize], out: &Buffer<E>) {
        let x = x.read_for(out);
        reduce::reduce_sum(&x, shape.dims(), axes, &mut out.write());
    }

    fn sum(x: &Buffer<E>) -> E {
        elementwise::sum(&x.read())
    }

    fn gemm(
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
        alpha: E,
        a: &Buffer<E>,
        b: &Buffer<E>,
        beta: E,
        c: &Buffer<E>,
    ) {
        let (a, b) = (a.read_for(c), b.read_for(c));
        matmul::gemm(trans_a, trans_b, m, n, k, alpha, &a, &b, beta, &mut c.write());
    }

    fn transpose(x: &Buffer<E>, rows: usize, cols: usize, out: &Buffer<E>) {
        let x = x.read_for(out);
        matmul::transpose(&x, rows, cols, &mut out.write());
    }

    fn argmax(x: &Buffer<E>) -> Option<(usize, E)> {
        reduce::argmax(&x.read())
    }

    fn axpy(alpha: E, x: &Buffer<E>, y: &Buffer<E>) {
        let x = x.read_for(y);
        elementwise::axpy(alpha, &x, &mut y.write());
    }

    fn scale_add(a: &Buffer<E>, scalar: E, b: &Buffer<E>, out: &Buffer<E>) {
        let (a, b) = (a.read_for(out), b.read_for(out));
        elementwise::scale_add(&a, scalar, &b, &mut out.write());
    }

    fn fma(a: &Buffer<E>, b: &Buffer<E>, c: &Buffer<E>, out: &Buffer<E>) {
        let (a, b, c) = (a.read_for(out), b.read_for(out), c.read_for(out));
        elementwise::fma(&a, &b, &c, &mut out.write());
    }

    fn scale(x: &Buffer<E>, scalar: E) {
        elementwise::scale(&mut x.write(), scalar);
    }

    fn dot(a: &Buffer<E>, b: &Buffer<E>) -> E {
        elementwise::dot(&a.read(), &b.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> (Buffer<f32>, Shape) {
        (CpuF32::from_host((0..12).map(|v| v as f32).collect()), Shape::new(&[3, 4]))
    }

    #[test]
    fn test_get_row_is_view() {
        let (buf, shape) = grid();
        let s = CpuF32::get(&[SliceItem::Index(1)], &buf, &shape).unwrap();
        assert!(!s.is_copy);
        assert!(s.buffer.same_storage(&buf));
        assert_eq!(s.shape.dims(), &[4]);
        assert_eq!(s.buffer.to_vec(), vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_get_column_is_copy() {
        let (buf, shape) = grid();
        let s = CpuF32::get(&[SliceItem::All, SliceItem::Index(1)], &buf, &shape).unwrap();
        assert!(s.is_copy);
        assert!(!s.buffer.same_storage(&buf));
        assert_eq!(s.buffer.to_vec(), vec![1.0, 5.0, 9.0]);
    }

    #[test]
    fn test_get_out_of_bounds() {
        let (buf, shape) = grid();
        assert!(CpuF32::get(&[SliceItem::Index(3)], &buf, &shape).is_err());
        assert!(CpuF32::get(&[SliceItem::All, SliceItem::Range(2, 5)], &buf, &shape).is_err());
    }

    #[test]
    fn test_set_broadcasts_into_block() {
        let (buf, shape) = grid();
        let src = CpuF32::from_host(vec![-1.0, -2.0]);
        let items = [SliceItem::Range(1, 3), SliceItem::Range(2, 4)];
        CpuF32::set(&items, &buf, &shape, &src, &Shape::new(&[2])).unwrap();
        assert_eq!(
            buf.to_vec(),
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, -1.0, -2.0, 8.0, 9.0, -1.0, -2.0]
        );
    }

    #[test]
    fn test_set_rejects_wrong_shape() {
        let (buf, shape) = grid();
        let src = CpuF32::from_host(vec![1.0, 2.0, 3.0]);
        let err = CpuF32::set(&[SliceItem::Index(0)], &buf, &shape, &src, &Shape::new(&[3])).unwrap_err();
        assert!(matches!(err, TensaError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_set_accumulate_from_own_storage() {
        let (buf, shape) = grid();
        let row = CpuF32::get(&[SliceItem::Index(0)], &buf, &shape).unwrap();
        CpuF32::set_accumulate(&[SliceItem::Index(2)], &buf, &shape, &row.buffer, &row.shape).unwrap();
        assert_eq!(&buf.to_vec()[8..], &[8.0, 10.0, 12.0, 14.0]);
    }

    #[test]
    fn test_broadcast_backward_reduces_to_operand() {
        let a = CpuF64::from_host(vec![1.0; 6]);
        let b = CpuF64::from_host(vec![2.0, 3.0]);
        let g = CpuF64::from_host(vec![1.0; 6]);
        let acc = CpuF64::allocate(2);
        let (sa, sb, so) = (Shape::new(&[3, 2]), Shape::new(&[2]), Shape::new(&[3, 2]));
        CpuF64::broadcast_backward(Binary::Add, Operand::Rhs, &a, &sa, &b, &sb, &g, &so, &acc).unwrap();
        assert_eq!(acc.to_vec(), vec![3.0, 3.0]);
    }

    #[test]
    fn test_accumulate_expanded() {
        let acc = CpuF32::allocate(6);
        let g = CpuF32::from_host(vec![1.0, 2.0]);
        CpuF32::accumulate_expanded(&acc, &Shape::new(&[2, 3]), &g, &[1], 0.5);
        assert_eq!(acc.to_vec(), vec![0.5, 0.5, 0.5, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_optimizer_kernels() {
        let w = CpuF32::from_host(vec![1.0, 2.0]);
        let g = CpuF32::from_host(vec![10.0, 20.0]);
        CpuF32::axpy(-0.1, &g, &w);
        assert_eq!(w.to_vec(), vec![0.0, 0.0]);
        assert_eq!(CpuF32::dot(&g, &g), 500.0);
    }

    #[test]
    fn test_momentum_update_in_place() {
        let v = CpuF64::from_host(vec![1.0, -1.0]);
        let g = CpuF64::from_host(vec![0.25, 0.25]);
        // v = 0.5 v + g, written over its own input
        CpuF64::scale_add(&v, 0.5, &g, &v);
        assert_eq!(v.to_vec(), vec![0.75, -0.25]);

        let out = CpuF64::allocate(2);
        CpuF64::fma(&v, &g, &g, &out);
        assert_eq!(out.to_vec(), vec![0.4375, 0.1875]);

        CpuF64::scale(&out, 2.0);
        assert_eq!(out.to_vec(), vec![0.875, 0.375]);
    }
}
