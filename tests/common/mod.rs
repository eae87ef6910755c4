//! Shared test support: a small exact logsignature provider.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use pathdist::logsig::SignatureProvider;
use pathdist::{Error, Result};

/// Exact logsignatures for piecewise-linear paths up to depth 2, via Chen's
/// identity: depth 1 is the total increment, depth 2 adds the Lévy areas.
///
/// Layout: `[increments (c); areas A_ij for i < j in lexicographic order]`.
pub struct ChenProvider;

impl SignatureProvider for ChenProvider {
    fn logsignature_channels(&self, channels: usize, depth: usize) -> Result<usize> {
        match depth {
            1 => Ok(channels),
            2 => Ok(channels + channels * (channels - 1) / 2),
            _ => Err(Error::MissingCapability(
                "ChenProvider supports depth 1 and 2 only",
            )),
        }
    }

    fn logsignature(&self, paths: &ArrayView3<f32>, depth: usize) -> Result<Array2<f32>> {
        let (n, len, channels) = paths.dim();
        let dim = self.logsignature_channels(channels, depth)?;
        let mut out = Array2::<f32>::zeros((n, dim));

        for b in 0..n {
            for c in 0..channels {
                out[[b, c]] = paths[[b, len - 1, c]] - paths[[b, 0, c]];
            }
            if depth == 2 {
                let mut slot = channels;
                for i in 0..channels {
                    for j in (i + 1)..channels {
                        let mut area = 0.0f64;
                        for k in 0..len - 1 {
                            let xi = (paths[[b, k, i]] - paths[[b, 0, i]]) as f64;
                            let xj = (paths[[b, k, j]] - paths[[b, 0, j]]) as f64;
                            let dxi = (paths[[b, k + 1, i]] - paths[[b, k, i]]) as f64;
                            let dxj = (paths[[b, k + 1, j]] - paths[[b, k, j]]) as f64;
                            area += xi * dxj - xj * dxi;
                        }
                        out[[b, slot]] = (0.5 * area) as f32;
                        slot += 1;
                    }
                }
            }
        }
        Ok(out)
    }

    fn logsignature_vjp(
        &self,
        paths: &ArrayView3<f32>,
        depth: usize,
        cotangents: &ArrayView2<f32>,
    ) -> Result<Array3<f32>> {
        let (n, len, channels) = paths.dim();
        let dim = self.logsignature_channels(channels, depth)?;
        if cotangents.dim() != (n, dim) {
            return Err(Error::Shape("cotangent shape mismatch"));
        }
        let mut out = Array3::<f32>::zeros((n, len, channels));

        for b in 0..n {
            // Increment part.
            for c in 0..channels {
                out[[b, len - 1, c]] += cotangents[[b, c]];
                out[[b, 0, c]] -= cotangents[[b, c]];
            }
            if depth == 2 {
                // Area part: differentiate
                //   A_ij = 0.5 Σ_k (x_k,i - x_0,i) dx_k,j - (x_k,j - x_0,j) dx_k,i
                // with dx_k,c = x_{k+1},c - x_k,c.
                let mut slot = channels;
                for i in 0..channels {
                    for j in (i + 1)..channels {
                        let w = 0.5 * cotangents[[b, slot]];
                        for k in 0..len - 1 {
                            let xi = paths[[b, k, i]] - paths[[b, 0, i]];
                            let xj = paths[[b, k, j]] - paths[[b, 0, j]];
                            let dxi = paths[[b, k + 1, i]] - paths[[b, k, i]];
                            let dxj = paths[[b, k + 1, j]] - paths[[b, k, j]];

                            // d/dx_k,i of the k-th summand, plus its appearance in dx.
                            out[[b, k, i]] += w * dxj;
                            out[[b, 0, i]] -= w * dxj;
                            out[[b, k + 1, j]] += w * xi;
                            out[[b, k, j]] -= w * xi;

                            out[[b, k, j]] -= w * dxi;
                            out[[b, 0, j]] += w * dxi;
                            out[[b, k + 1, i]] -= w * xj;
                            out[[b, k, i]] += w * xj;
                        }
                        slot += 1;
                    }
                }
            }
        }
        Ok(out)
    }
}
