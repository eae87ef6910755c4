//! Shape plumbing for batched piecewise-linear paths.
//!
//! A path is stored as a tensor of shape `(batch..., len, channels)`: `channels`
//! values sampled at each of `len` time grid knots, extended to a continuous
//! function by linear interpolation. Batch dimensions are arbitrary (including
//! none), and the two sides of a discrepancy carry *independent* batch shapes, so
//! the helpers here do three jobs:
//!
//! - validate the shared time grid against a path's length axis,
//! - collapse arbitrary batch dimensions into a single one (and restore them),
//! - combine two independently-batched results into the full outer-product shape.

use crate::{Error, Result};
use ndarray::{Array3, ArrayD, ArrayView1, ArrayView2, ArrayView3, ArrayViewD, IxDyn};

/// Validate a shared time grid: finite, strictly increasing, at least two knots,
/// and matching the path's length axis.
pub fn check_times(times: &ArrayView1<f32>, expected_len: usize) -> Result<()> {
    if times.len() < 2 {
        return Err(Error::Shape("times must contain at least two knots"));
    }
    if times.len() != expected_len {
        return Err(Error::Shape("times length must match the path length axis"));
    }
    if times.iter().any(|t| !t.is_finite()) {
        return Err(Error::Shape("times must be finite"));
    }
    for i in 1..times.len() {
        if times[i] <= times[i - 1] {
            return Err(Error::Shape("times must be strictly increasing"));
        }
    }
    Ok(())
}

/// A batched path collapsed to a single batch axis, remembering where it came from.
#[derive(Debug, Clone)]
pub struct FlatPath {
    /// Collapsed data, shape `(prod(batch), len, channels)`.
    pub data: Array3<f32>,
    /// The original leading batch shape (possibly empty).
    pub batch_shape: Vec<usize>,
}

/// Collapse the leading batch dimensions of a `(batch..., len, channels)` tensor
/// into one axis.
///
/// A path with no batch dimensions collapses to a batch of one.
pub fn flatten_batch(path: &ArrayViewD<f32>) -> Result<FlatPath> {
    let ndim = path.ndim();
    if ndim < 2 {
        return Err(Error::Shape("path must have shape (batch..., len, channels)"));
    }
    let shape = path.shape();
    let (len, channels) = (shape[ndim - 2], shape[ndim - 1]);
    if channels == 0 {
        return Err(Error::Shape("path must have at least one channel"));
    }
    let batch_shape: Vec<usize> = shape[..ndim - 2].to_vec();
    let n: usize = batch_shape.iter().product();
    let data = path
        .to_owned()
        .into_shape_with_order((n, len, channels))
        .map_err(|_| Error::Shape("path could not be collapsed to (batch, len, channels)"))?;
    Ok(FlatPath { data, batch_shape })
}

/// Prepend the time grid as an extra leading channel of every path in the batch.
///
/// The time channel is identical across the batch; it only changes the function the
/// signature transform sees, turning a reparameterisation-invariant discrepancy into
/// a parameterisation-aware one.
pub fn augment_with_time(path: &ArrayView3<f32>, times: &ArrayView1<f32>) -> Array3<f32> {
    let (n, len, channels) = path.dim();
    let mut out = Array3::<f32>::zeros((n, len, channels + 1));
    for b in 0..n {
        for i in 0..len {
            out[[b, i, 0]] = times[i];
            for k in 0..channels {
                out[[b, i, k + 1]] = path[[b, i, k]];
            }
        }
    }
    out
}

/// Pairwise differences `a[i] - b[j]` between two independently-batched vector sets.
///
/// The result is outer-product shaped `(n1, n2, d)`: every row of `a` is compared
/// against every row of `b`. This is deliberately not elementwise broadcasting.
pub fn outer_difference(a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> Result<Array3<f32>> {
    if a.ncols() != b.ncols() {
        return Err(Error::Shape("vector dimensions must match"));
    }
    let (n1, n2, d) = (a.nrows(), b.nrows(), a.ncols());
    let mut out = Array3::<f32>::zeros((n1, n2, d));
    for i in 0..n1 {
        for j in 0..n2 {
            for k in 0..d {
                out[[i, j, k]] = a[[i, k]] - b[[j, k]];
            }
        }
    }
    Ok(out)
}

/// Reshape a flat result back to the batch shape recorded by [`flatten_batch`].
pub fn into_batched(values: Vec<f32>, batch_shape: &[usize]) -> Result<ArrayD<f32>> {
    ArrayD::from_shape_vec(IxDyn(batch_shape), values)
        .map_err(|_| Error::Shape("result length does not match the batch shape"))
}

/// Reshape a flat pairwise result to the concatenated shape `batch1 ⧺ batch2`.
pub fn into_outer_batched(
    values: Vec<f32>,
    batch1: &[usize],
    batch2: &[usize],
) -> Result<ArrayD<f32>> {
    let mut shape = Vec::with_capacity(batch1.len() + batch2.len());
    shape.extend_from_slice(batch1);
    shape.extend_from_slice(batch2);
    ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|_| Error::Shape("result length does not match the combined batch shape"))
}
