//! Burn-backed (opt-in) direct L2 discrepancy.
//!
//! The ndarray kernels in [`crate::kernel`] come with handwritten closed-form
//! gradients in [`crate::l2`]. This module is the autodiff counterpart: the same
//! segment integral expressed in Burn tensor ops, so a backend differentiates the
//! whole chain (paths and pseudometric) with no handwritten backward.
//!
//! Scope matches the crate's role as a primitive: the forward computation and a
//! pseudometric mirror, nothing more. Training loops belong to the caller.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;

/// Default burn backend for this crate's tests: ndarray + autodiff.
pub type BurnBackend = Autodiff<NdArray<f32>>;

/// Pseudometric over a Burn backend, mirroring [`crate::pseudometric::Pseudometric`].
#[derive(Debug, Clone)]
pub enum BurnMetric<B: Backend> {
    Identity,
    /// Elementwise scaling by a vector of shape `[channels]`.
    Diagonal(Tensor<B, 1>),
    /// Right-multiplication by a matrix of shape `[channels, channels]`.
    General(Tensor<B, 2>),
}

impl<B: Backend> BurnMetric<B> {
    /// Apply to the channel axis of `[batch, len, channels]` knot values.
    fn apply(&self, diff: Tensor<B, 3>) -> Tensor<B, 3> {
        match self {
            Self::Identity => diff,
            Self::Diagonal(a) => diff * a.clone().unsqueeze::<3>(),
            Self::General(a) => diff.matmul(a.clone().unsqueeze::<3>()),
        }
    }
}

/// `sqrt(∫ ||A(f - g)(t)||₂² dt)` over the shared grid.
///
/// Shapes:
/// - `times`: `[len]`, strictly increasing (not revalidated here — use the ndarray
///   entry points when inputs are untrusted)
/// - `path1`: `[batch, len, channels]`
/// - `path2`: `[len, channels]` (the single unbatched reference)
///
/// Returns `[batch]`. Every op is differentiable by the backend.
pub fn l2_discrepancy<B: Backend>(
    times: Tensor<B, 1>,
    path1: Tensor<B, 3>,
    path2: Tensor<B, 2>,
    metric: &BurnMetric<B>,
) -> Tensor<B, 1> {
    let [batch, len, channels] = path1.dims();

    let diff = path1 - path2.unsqueeze::<3>();
    let v = metric.apply(diff);

    // Per-knot squared norms and neighbour dot products over the channel axis.
    let sq: Tensor<B, 2> = v.clone().powf_scalar(2.0).sum_dim(2).squeeze(2);
    let head = v.clone().slice([0..batch, 0..len - 1, 0..channels]);
    let tail = v.slice([0..batch, 1..len, 0..channels]);
    let cross: Tensor<B, 2> = (head * tail).sum_dim(2).squeeze(2);

    let sq_head = sq.clone().slice([0..batch, 0..len - 1]);
    let sq_tail = sq.slice([0..batch, 1..len]);

    let dt = (times.clone().slice([1..len]) - times.slice([0..len - 1])).unsqueeze::<2>();

    let integral: Tensor<B, 1> = ((sq_head + cross + sq_tail) * dt / 3.0)
        .sum_dim(1)
        .squeeze(1);
    // The integrand is a square; clamp rounding noise before the sqrt.
    integral.clamp_min(0.0).sqrt()
}
