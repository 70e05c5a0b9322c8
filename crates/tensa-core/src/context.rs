//! Operation records and their gradient rules.
//!
//! Every derived tensor that tracks gradients carries one [`Context`] naming
//! the operation that produced it and holding its source tensors. The
//! backward pass calls [`Context::backward`] once per tensor, after the
//! tensor's own gradient has received every downstream contribution. Rules
//! only ever add into source gradients.

use std::fmt;

use smallvec::{smallvec, SmallVec};
use tensa_kernels::{Binary, Element, Operand, Unary};

use crate::backend::Backend;
use crate::shape::Shape;
use crate::slice::SliceSpec;
use crate::tensor::Tensor;
use crate::Result;

pub enum Context<B: Backend> {
    /// Same-shape elementwise binary op.
    Binary { op: Binary, lhs: Tensor<B>, rhs: Tensor<B> },
    /// Elementwise binary op over broadcast-compatible, unequal shapes.
    Broadcast { op: Binary, lhs: Tensor<B>, rhs: Tensor<B> },
    Unary { op: Unary<B::Elem>, source: Tensor<B> },
    /// `[m, k] @ [k, n]`.
    MatMul { lhs: Tensor<B>, rhs: Tensor<B> },
    Transpose { source: Tensor<B> },
    /// `view`, `squeeze`, `unsqueeze`, `flatten`.
    Reshape { source: Tensor<B> },
    Select { source: Tensor<B>, items: SliceSpec },
    /// Copy of `target` with the region overwritten by `value`.
    SliceAssign { target: Tensor<B>, value: Tensor<B>, items: SliceSpec },
    Sum { source: Tensor<B> },
    SumAxes { source: Tensor<B>, axes: SmallVec<[usize; 4]> },
    Mean { source: Tensor<B> },
}

impl<B: Backend> Context<B> {
    /// Tensors this operation consumed, in operand order.
    pub fn sources(&self) -> SmallVec<[&Tensor<B>; 2]> {
        match self {
            Context::Binary { lhs, rhs, .. }
            | Context::Broadcast { lhs, rhs, .. }
            | Context::MatMul { lhs, rhs } => smallvec![lhs, rhs],
            Context::SliceAssign { target, value, .. } => smallvec![target, value],
            Context::Unary { source, .. }
            | Context::Transpose { source }
            | Context::Reshape { source }
            | Context::Select { source, .. }
            | Context::Sum { source }
            | Context::SumAxes { source, .. }
            | Context::Mean { source } => smallvec![source],
        }
    }

    /// Consume the record, yielding its sources.
    pub(crate) fn into_sources(self) -> SmallVec<[Tensor<B>; 2]> {
        match self {
            Context::Binary { lhs, rhs, .. }
            | Context::Broadcast { lhs, rhs, .. }
            | Context::MatMul { lhs, rhs } => smallvec![lhs, rhs],
            Context::SliceAssign { target, value, .. } => smallvec![target, value],
            Context::Unary { source, .. }
            | Context::Transpose { source }
            | Context::Reshape { source }
            | Context::Select { source, .. }
            | Context::Sum { source }
            | Context::SumAxes { source, .. }
            | Context::Mean { source } => smallvec![source],
        }
    }

    /// Add this operation's contribution to each source gradient, reading the
    /// gradient of `result`.
    pub(crate) fn backward(&self, result: &Tensor<B>) -> Result<()> {
        let Some(grad) = result.gradient() else {
            return Ok(());
        };
        let one = B::Elem::ONE;

        match self {
            Context::Binary { op, lhs, rhs } => {
                for (side, src) in [(Operand::Lhs, lhs), (Operand::Rhs, rhs)] {
                    if let Some(acc) = src.gradient() {
                        B::binary_backward(*op, side, lhs.values(), rhs.values(), grad, acc);
                    }
                }
            }
            Context::Broadcast { op, lhs, rhs } => {
                for (side, src) in [(Operand::Lhs, lhs), (Operand::Rhs, rhs)] {
                    if let Some(acc) = src.gradient() {
                        B::broadcast_backward(
                            *op,
                            side,
                            lhs.values(),
                            lhs.shape(),
                            rhs.values(),
                            rhs.shape(),
                            grad,
                            result.shape(),
                            acc,
                        )?;
                    }
                }
            }
            Context::Unary { op, source } => {
                if let Some(acc) = source.gradient() {
                    B::unary_backward(*op, source.values(), result.values(), grad, acc);
                }
            }
            Context::MatMul { lhs, rhs } => {
                let (m, k, n) = (lhs.dims()[0], lhs.dims()[1], rhs.dims()[1]);
                // dA = dC @ B^T
                if let Some(acc) = lhs.gradient() {
                    B::gemm(false, true, m, k, n, one, grad, rhs.values(), one, acc);
                }
                // dB = A^T @ dC
                if let Some(acc) = rhs.gradient() {
                    B::gemm(true, false, k, n, m, one, lhs.values(), grad, one, acc);
                }
            }
            Context::Transpose { source } => {
                if let Some(acc) = source.gradient() {
                    let (rows, cols) = (result.dims()[0], result.dims()[1]);
                    let back = B::allocate(rows * cols);
                    B::transpose(grad, rows, cols, &back);
                    B::accumulate(acc, &back);
                }
            }
            Context::Reshape { source } => {
                if let Some(acc) = source.gradient() {
                    if !acc.same_storage(grad) {
                        B::accumulate(acc, grad);
                    }
                }
            }
            Context::Select { source, items } => {
                if let Some(acc) = source.gradient() {
                    if !acc.same_storage(grad) {
                        B::set_accumulate(items, acc, source.shape(), grad, result.shape())?;
                    }
                }
            }
            Context::SliceAssign { target, value, items } => {
                if let Some(acc) = target.gradient() {
                    let passed = B::allocate(grad.len());
                    B::copy(grad, &passed);
                    let zero = B::from_host(vec![B::Elem::ZERO]);
                    B::set(items, &passed, result.shape(), &zero, &Shape::scalar())?;
                    B::accumulate(acc, &passed);
                }
                if let Some(acc) = value.gradient() {
                    let region = B::get(items, grad, result.shape())?;
                    B::accumulate_sum_to(acc, value.shape(), &region.buffer, &region.shape)?;
                }
            }
            Context::Sum { source } => {
                if let Some(acc) = source.gradient() {
                    B::accumulate_expanded(acc, source.shape(), grad, &all_axes(source.shape()), one);
                }
            }
            Context::SumAxes { source, axes } => {
                if let Some(acc) = source.gradient() {
                    B::accumulate_expanded(acc, source.shape(), grad, axes, one);
                }
            }
            Context::Mean { source } => {
                if let Some(acc) = source.gradient() {
                    let alpha = one / B::Elem::from_f64(source.numel() as f64);
                    B::accumulate_expanded(acc, source.shape(), grad, &all_axes(source.shape()), alpha);
                }
            }
        }
        Ok(())
    }
}

fn all_axes(shape: &Shape) -> SmallVec<[usize; 4]> {
    (0..shape.ndim()).collect()
}

impl<B: Backend> fmt::Display for Context<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Binary { op, .. } => f.write_str(op.name()),
            Context::Broadcast { op, .. } => write!(f, "broadcast_{}", op.name()),
            Context::Unary { op, .. } => f.write_str(op.name()),
            Context::MatMul { .. } => f.write_str("matmul"),
            Context::Transpose { .. } => f.write_str("transpose"),
            Context::Reshape { .. } => f.write_str("reshape"),
            Context::Select { .. } => f.write_str("select"),
            Context::SliceAssign { .. } => f.write_str("slice_assign"),
            Context::Sum { .. } => f.write_str("sum"),
            Context::SumAxes { .. } => f.write_str("sum_axes"),
            Context::Mean { .. } => f.write_str("mean"),
        }
    }
}

impl<B: Backend> fmt::Debug for Context<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: SmallVec<[_; 2]> = self.sources().iter().map(|s| s.id()).collect();
        write!(f, "{}{:?}", self, ids.as_slice())
    }
}
