//! # tensa-kernels
//!
//! The numeric compute engine behind tensa tensors.
//!
//! Every kernel here works on raw slices plus shape/stride metadata supplied
//! by the caller. Nothing in this crate knows about tensors or graphs.
//!
//! Provides:
//! - [`Element`] trait for the supported numeric types (`f32`, `f64`)
//! - Elementwise unary/binary maps and their accumulating gradient kernels
//! - Zero-stride broadcast iteration
//! - Axis reductions and `argmax`
//! - Tiled GEMM with transpose flags
//! - Runtime SIMD detection with an AVX2+FMA `axpy` fast path

pub mod broadcast;
pub mod config;
pub mod element;
pub mod elementwise;
pub mod matmul;
pub mod reduce;
pub mod simd;

pub use broadcast::Strides;
pub use config::KernelConfig;
pub use element::{DType, Element};
pub use elementwise::{Binary, Operand, Unary};
pub use simd::SimdCapability;
