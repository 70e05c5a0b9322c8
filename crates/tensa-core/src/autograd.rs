//! Reverse-mode gradient propagation.
//!
//! A backward pass runs once per call and keeps no state between calls:
//!
//! 1. Order every tensor reachable from the root through operation records,
//!    skipping tensors that do not require gradients, in post-order (each
//!    tensor after all of its sources).
//! 2. Refuse to run if any recorded operation's inputs were written in place
//!    since recording.
//! 3. Seed the root gradient with ones or a caller-supplied gradient.
//! 4. Walk the order in reverse, letting each tensor's [`Context`] add into
//!    its sources' gradients. Reversed post-order guarantees a tensor has
//!    received every downstream contribution before it propagates further.
//!
//! [`Context`]: crate::context::Context

use std::cell::Cell;
use std::collections::HashSet;

use tensa_kernels::Element;
use tracing::{debug, trace};

use crate::backend::Backend;
use crate::error::TensaError;
use crate::storage::BufferKind;
use crate::tensor::Tensor;
use crate::Result;

/// Tensors reachable from `root` (inclusive) that require gradients, each
/// after all of its sources.
///
/// Uses an explicit stack so long chains (unrolled recurrences) cannot
/// overflow the call stack.
pub fn topological_order<B: Backend>(root: &Tensor<B>) -> Vec<Tensor<B>> {
    let mut order = Vec::new();
    if !root.requires_grad() {
        return order;
    }
    let mut visited = HashSet::new();
    let mut stack = vec![(root.clone(), false)];

    while let Some((tensor, expanded)) = stack.pop() {
        if expanded {
            order.push(tensor);
            continue;
        }
        if !visited.insert(tensor.id()) {
            continue;
        }
        let sources: Vec<Tensor<B>> = tensor
            .context()
            .map(|ctx| {
                ctx.sources()
                    .into_iter()
                    .filter(|s| s.requires_grad() && !visited.contains(&s.id()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        stack.push((tensor, true));
        // reversed so the first operand is expanded first
        stack.extend(sources.into_iter().rev().map(|s| (s, false)));
    }
    order
}

/// Run a backward pass from `root`; see the module docs.
///
/// Gradients of leaves accumulate across calls. Gradients of intermediate
/// tensors are recomputed from zero on every call, so calling backward twice
/// on the same graph adds each leaf's contribution twice rather than four
/// times.
pub fn backward<B: Backend>(root: &Tensor<B>, upstream: Option<&Tensor<B>>) -> Result<()> {
    let root_grad = root.gradient().ok_or(TensaError::GradientNotTracked)?;
    if let Some(seed) = upstream {
        if seed.shape() != root.shape() {
            return Err(TensaError::ShapeMismatch {
                expected: root.dims().to_vec(),
                got: seed.dims().to_vec(),
            });
        }
    }

    let order = topological_order(root);
    debug!(nodes = order.len(), root = %root.shape(), "backward pass");
    for tensor in &order {
        tensor.check_saved_versions()?;
    }

    // Owned intermediate gradients start from zero; view gradients alias
    // their source's and are reset (or kept, for leaves) with it.
    for tensor in &order {
        if tensor.ptr_eq(root) || tensor.is_leaf() {
            continue;
        }
        if let Some(g) = tensor.gradient() {
            if g.kind() == BufferKind::Owned {
                B::fill(g, B::Elem::ZERO);
            }
        }
    }

    // Only an owned intermediate gradient was just reset; leaves and views
    // (which alias some other tensor's gradient) keep what they hold.
    let overwrite = !root.is_leaf() && root_grad.kind() == BufferKind::Owned;
    match (upstream, overwrite) {
        (Some(seed), true) => B::copy(seed.values(), root_grad),
        (Some(seed), false) => B::accumulate(root_grad, seed.values()),
        (None, true) => B::fill(root_grad, B::Elem::ONE),
        (None, false) => {
            let ones = B::from_host(vec![B::Elem::ONE; root.numel()]);
            B::accumulate(root_grad, &ones);
        }
    }

    for tensor in order.iter().rev() {
        if let Some(ctx) = tensor.context() {
            trace!(id = ?tensor.id(), op = %ctx, shape = %tensor.shape(), "propagate");
            ctx.backward(tensor)?;
        }
    }
    Ok(())
}

/// Leaves requiring gradients that `root` depends on, in traversal order.
pub fn parameters<B: Backend>(root: &Tensor<B>) -> Vec<Tensor<B>> {
    topological_order(root)
        .into_iter()
        .filter(Tensor::is_leaf)
        .collect()
}

// ============================================================================
// No-grad scope
// ============================================================================

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether operations on this thread currently record gradients.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|g| g.get())
}

fn set_grad_enabled(enabled: bool) -> bool {
    GRAD_ENABLED.with(|g| g.replace(enabled))
}

/// RAII guard that stops operations from recording gradients until dropped.
///
/// Used by optimizers and evaluation code that must not grow the graph.
///
/// ```
/// use tensa_core::{NoGradGuard, Tensor};
///
/// let w: Tensor = Tensor::ones(&[2]).with_grad();
/// let y = {
///     let _guard = NoGradGuard::new();
///     &w * &w
/// };
/// assert!(!y.requires_grad());
/// ```
pub struct NoGradGuard {
    prev: bool,
}

impl NoGradGuard {
    pub fn new() -> Self {
        Self {
            prev: set_grad_enabled(false),
        }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.prev);
    }
}
