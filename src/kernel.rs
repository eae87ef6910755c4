//! Kernel strategies for the direct L2 discrepancy integral.
//!
//! The integral in [`crate::l2`] is independent across the batch axis, so the
//! per-path routine lives in one place and is exposed behind a small strategy
//! trait with two implementations:
//!
//! - [`SerialL2Kernel`]: a plain loop, the reference fallback.
//! - [`ParallelL2Kernel`]: the same routine fanned out over a rayon pool, so
//!   batched evaluation uses every core instead of serializing.
//!
//! Kernel choice is a performance contract, not a numerical one: both kernels
//! reduce each path in knot order with f64 accumulation, so they agree on the
//! same input.

use crate::pseudometric::Pseudometric;
use crate::Result;
use ndarray::{Array1, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

/// Strategy interface for the batched L2 discrepancy integral.
///
/// `path1` arrives with its batch dimensions already collapsed to a single axis,
/// `(batch, len, channels)`; `path2` is the single unbatched reference path,
/// `(len, channels)`. Implementations may assume the caller validated the time
/// grid and all shapes.
pub trait L2Kernel: Send + Sync {
    fn l2_discrepancy(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayView3<f32>,
        path2: &ArrayView2<f32>,
        metric: &Pseudometric,
    ) -> Result<Array1<f32>>;
}

/// Reference implementation: one path at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialL2Kernel;

/// Accelerated implementation: per-path integrals evaluated on a rayon pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelL2Kernel;

impl L2Kernel for SerialL2Kernel {
    fn l2_discrepancy(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayView3<f32>,
        path2: &ArrayView2<f32>,
        metric: &Pseudometric,
    ) -> Result<Array1<f32>> {
        let n = path1.dim().0;
        let mut out = Array1::<f32>::zeros(n);
        for b in 0..n {
            out[b] = path_discrepancy(times, &path1.index_axis(Axis(0), b), path2, metric)?;
        }
        Ok(out)
    }
}

impl L2Kernel for ParallelL2Kernel {
    fn l2_discrepancy(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayView3<f32>,
        path2: &ArrayView2<f32>,
        metric: &Pseudometric,
    ) -> Result<Array1<f32>> {
        let n = path1.dim().0;
        let values: Result<Vec<f32>> = (0..n)
            .into_par_iter()
            .map(|b| path_discrepancy(times, &path1.index_axis(Axis(0), b), path2, metric))
            .collect();
        Ok(Array1::from_vec(values?))
    }
}

/// The kernel used when the caller does not pick one explicitly.
pub fn default_kernel() -> Box<dyn L2Kernel> {
    Box::new(ParallelL2Kernel)
}

/// `sqrt(∫ ||A(f - g)(t)||₂² dt)` for a single path against the reference.
///
/// `A` is applied once, as a fixed linear operator on the channel axis of the knot
/// values — it has no time dependency, so this equals transforming the interpolant.
fn path_discrepancy(
    times: &ArrayView1<f32>,
    row: &ArrayView2<f32>,
    path2: &ArrayView2<f32>,
    metric: &Pseudometric,
) -> Result<f32> {
    let diff = row.to_owned() - path2;
    let v = if metric.is_identity() {
        diff
    } else {
        metric.apply_rows(&diff.view())?
    };
    let s = squared_integral(times, &v.view());
    // The integrand is a square; clamp rounding noise before the sqrt so identical
    // paths come out exactly zero.
    Ok(if s <= 0.0 { 0.0 } else { s.sqrt() as f32 })
}

/// Exact integral of the squared L2 norm of a piecewise-linear path.
///
/// On each segment the interpolant is linear in `t`, so the squared norm is a
/// quadratic and integrates in closed form:
/// `∫ = Σ_i (dt_i / 3) (|v_i|² + v_i·v_{i+1} + |v_{i+1}|²)`.
pub(crate) fn squared_integral(times: &ArrayView1<f32>, v: &ArrayView2<f32>) -> f64 {
    let (len, _) = v.dim();
    let mut acc = 0.0f64;
    let mut prev_sq = sq_norm(&v.row(0));
    for i in 0..len - 1 {
        let dt = (times[i + 1] - times[i]) as f64;
        let next_sq = sq_norm(&v.row(i + 1));
        let cross = dot(&v.row(i), &v.row(i + 1));
        acc += dt / 3.0 * (prev_sq + cross + next_sq);
        prev_sq = next_sq;
    }
    acc
}

fn sq_norm(v: &ArrayView1<f32>) -> f64 {
    v.iter().map(|&x| (x as f64) * (x as f64)).sum()
}

fn dot(a: &ArrayView1<f32>, b: &ArrayView1<f32>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64) * (y as f64))
        .sum()
}
