//! Convenience re-exports for common tensa-core types.
//!
//! ```rust
//! use tensa_core::prelude::*;
//! ```

pub use crate::slice;
pub use crate::{Backend, CpuF32, CpuF64, NoGradGuard, SliceArg, Tensor};
pub use crate::{DType, Device, Element, Shape};
pub use crate::{ErrorKind, Result, TensaError};
