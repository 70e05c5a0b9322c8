//! Tensor operations.
//!
//! Every operation returns a new tensor and, when any source tracks
//! gradients, records a [`Context`](crate::context::Context) on it. The only
//! in-place operation is [`Tensor::assign_`](crate::Tensor::assign_).

pub mod arithmetic;
pub mod reduction;
pub mod view;
