//! # pathdist
//!
//! Discrepancy measures between continuous piecewise-linear paths, built as
//! differentiable primitives for shapelet-style time-series learning.
//!
//! This crate is intentionally small:
//!
//! - it implements **discrepancy computation**: reconcile two independently-batched
//!   path tensors on a shared time grid, optionally transform the difference with a
//!   learnable pseudometric, and reduce to a scalar distance per path pair,
//! - it treats the (log)signature transform as an injected black-box capability
//!   (see [`logsig::SignatureProvider`]),
//! - it does not provide shapelet search, training loops, or experiment tooling
//!   (those belong to the caller).
//!
//! ## Public invariants (must not change)
//!
//! - **Time grids are strictly increasing** with at least two knots; violations fail
//!   fast with [`Error::Shape`] before any tensor work.
//! - **Batch broadcast is outer-product shaped**: comparing a `(B1..., len, c)` batch
//!   against a `(B2..., len, c)` batch yields `(B1..., B2...)` — every element against
//!   every element, never elementwise alignment.
//! - **Determinism knobs are explicit**: learnable parameters are initialized from a
//!   caller-supplied seed.
//! - **Kernel choice is a performance contract**: the parallel and serial L2 kernels
//!   reduce each path in the same order and agree on the same input; parallelism never
//!   changes results.
//! - **Parameter mutation happens between calls**: `compute` is stateless and
//!   reentrant; the pseudometric parameter is only updated by the caller's optimizer,
//!   never concurrently with a read.
//!
//! ## Module map
//!
//! - `path`: shape plumbing (time grid checks, batch collapse/restore, outer broadcast)
//! - `pseudometric`: learnable linear transforms applied to difference vectors
//! - `kernel`: serial/parallel strategies for the L2 integral
//! - `l2`: direct L2 discrepancy with closed-form gradients
//! - `logsig`: logsignature-space discrepancy over an injected signature provider
//! - `burn_l2` (feature `burn`): the L2 integral in Burn tensor ops, for backends
//!   that want autodiff end to end

pub mod kernel;
pub mod l2;
pub mod logsig;
pub mod path;
pub mod pseudometric;

#[cfg(feature = "burn")]
pub mod burn_l2;

/// pathdist error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A tensor shape or time grid violated a call contract.
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    /// A configuration value was rejected at construction time.
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    /// A required external capability is absent.
    #[error("missing capability: {0}")]
    MissingCapability(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
