//! Views, subscripts and slice assignment.
//!
//! Reshapes always alias their source. Subscripts alias it when the selected
//! region is one run of the packed layout and copy otherwise. An aliasing
//! result of a tracked tensor also aliases its gradient, so the two
//! accumulate into the same storage and the view's gradient rule has nothing
//! left to do.

use crate::backend::Backend;
use crate::context::Context;
use crate::error::TensaError;
use crate::shape::Shape;
use crate::slice::{self, SliceArg};
use crate::storage::Buffer;
use crate::tensor::Tensor;
use crate::Result;

impl<B: Backend> Tensor<B> {
    /// Same values under a new shape; one entry may be `-1` to be inferred.
    pub fn view(&self, shape: &[isize]) -> Result<Tensor<B>> {
        let shape = self.shape().resolve_view(shape)?;
        Ok(self.reshaped(shape))
    }

    /// Alias of [`Tensor::view`].
    pub fn reshape(&self, shape: &[isize]) -> Result<Tensor<B>> {
        self.view(shape)
    }

    /// Drop every size-1 dimension.
    pub fn squeeze(&self) -> Tensor<B> {
        let dims: Vec<usize> = self.dims().iter().copied().filter(|&d| d != 1).collect();
        self.reshaped(dims.into())
    }

    /// Drop `axis`, which must have size 1.
    pub fn squeeze_axis(&self, axis: usize) -> Result<Tensor<B>> {
        self.shape().check_axis(axis)?;
        if self.dims()[axis] != 1 {
            return Err(TensaError::ShapeMismatch {
                expected: vec![1],
                got: vec![self.dims()[axis]],
            });
        }
        Ok(self.reshaped(self.shape().without_axes(&[axis])))
    }

    /// Insert a size-1 dimension at `axis` (`0..=ndim`).
    pub fn unsqueeze(&self, axis: usize) -> Result<Tensor<B>> {
        let shape = self.shape().unsqueezed(axis)?;
        Ok(self.reshaped(shape))
    }

    pub fn flatten(&self) -> Tensor<B> {
        self.reshaped([self.numel()].into())
    }

    fn reshaped(&self, shape: Shape) -> Tensor<B> {
        debug_assert_eq!(shape.numel(), self.numel());
        Tensor::derived_view(
            self,
            shape,
            self.values().view(),
            self.gradient().map(Buffer::view),
            Context::Reshape { source: self.clone() },
        )
    }

    /// Subscript with one [`SliceArg`] per leading dimension.
    ///
    /// Indexed dimensions are dropped. The result shares storage with `self`
    /// iff the region is contiguous; see [`Backend::get`].
    pub fn select(&self, args: &[SliceArg]) -> Result<Tensor<B>> {
        let items = slice::resolve(args, self.dims())?;
        let region = B::get(&items, self.values(), self.shape())?;
        let gradient_view = match self.gradient() {
            Some(g) if !region.is_copy => Some(B::get(&items, g, self.shape())?.buffer),
            _ => None,
        };
        Ok(Tensor::derived_view(
            self,
            region.shape,
            region.buffer,
            gradient_view,
            Context::Select {
                source: self.clone(),
                items,
            },
        ))
    }

    /// `self[i]` along the first dimension; negative counts from the end.
    pub fn index(&self, i: isize) -> Result<Tensor<B>> {
        self.select(&[SliceArg::Index(i)])
    }

    /// Write `value` (broadcast to the region) into the selected region, in
    /// place.
    ///
    /// Writes land in every tensor sharing this storage. Fails with
    /// `NotImplemented` on a tensor that carries an operation record; use
    /// [`Tensor::slice_assign`] inside a graph. Writing through an untracked
    /// alias (a detached tensor, a view taken under [`NoGradGuard`]) succeeds,
    /// but any later backward pass through a record that reads this storage
    /// fails with `NotImplemented`.
    ///
    /// [`NoGradGuard`]: crate::NoGradGuard
    pub fn assign_(&self, args: &[SliceArg], value: &Tensor<B>) -> Result<()> {
        if let Some(ctx) = self.context() {
            return Err(TensaError::NotImplemented(format!(
                "in-place assignment into the result of `{ctx}`"
            )));
        }
        let items = slice::resolve(args, self.dims())?;
        B::set(&items, self.values(), self.shape(), value.values(), value.shape())
    }

    /// Fill every element with `value`, in place. Same restrictions as
    /// [`Tensor::assign_`].
    pub fn fill_(&self, value: B::Elem) -> Result<()> {
        let scalar = Tensor::<B>::scalar(value);
        self.assign_(&[], &scalar)
    }

    /// Copy of `self` with the selected region overwritten by `value`.
    ///
    /// The gradient w.r.t. `self` is the upstream gradient with the region
    /// zeroed; the gradient w.r.t. `value` is the upstream region, summed over
    /// any dimensions `value` was broadcast along.
    pub fn slice_assign(&self, args: &[SliceArg], value: &Tensor<B>) -> Result<Tensor<B>> {
        let items = slice::resolve(args, self.dims())?;
        let out = B::allocate(self.numel());
        B::copy(self.values(), &out);
        B::set(&items, &out, self.shape(), value.values(), value.shape())?;
        Ok(Tensor::derived(
            self.shape().clone(),
            out,
            Context::SliceAssign {
                target: self.clone(),
                value: value.clone(),
                items,
            },
        ))
    }
}
