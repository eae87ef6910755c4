//! Logsignature-space discrepancy between batched paths.
//!
//! This takes the logsignature of each path to a configurable depth (optionally
//! after augmenting with a time channel), forms every-against-every differences
//! over the two independent batch shapes, applies the learnable pseudometric, and
//! reduces with a p-norm:
//!
//! `||A (logsig(f, depth) − logsig(g, depth))||_p`
//!
//! The logsignature transform itself is a black box behind the
//! [`SignatureProvider`] trait — this crate never computes signatures. A provider
//! must be present at construction time; its absence is a configuration-time
//! failure, never a call-time one.
//!
//! Without time augmentation the discrepancy is reparameterisation invariant,
//! similar in spirit to dynamic time warping; with it, parameterisation matters.

use std::sync::Arc;

use crate::path::{augment_with_time, check_times, flatten_batch, into_outer_batched, outer_difference};
use crate::pseudometric::{MetricGrad, MetricKind, Pseudometric};
use crate::{Error, Result};
use ndarray::{Array1, Array2, Array3, ArrayD, ArrayView1, ArrayView2, ArrayView3, ArrayViewD, IxDyn};

/// Black-box provider of logsignature transforms.
///
/// The provider is purely functional: no state may be retained across calls.
/// Implementations typically wrap an external signature library or a native
/// kernel.
pub trait SignatureProvider: Send + Sync {
    /// Dimension of the logsignature of a `channels`-dimensional path truncated at
    /// `depth`.
    fn logsignature_channels(&self, channels: usize, depth: usize) -> Result<usize>;

    /// Logsignature of every path in the batch: `(batch, len, channels)` in,
    /// `(batch, dim)` out.
    fn logsignature(&self, paths: &ArrayView3<f32>, depth: usize) -> Result<Array2<f32>>;

    /// Reverse-mode derivative of [`Self::logsignature`]: pull `cotangents` of
    /// shape `(batch, dim)` back to path space `(batch, len, channels)`.
    ///
    /// Providers may decline; the default does. [`LogsignatureDiscrepancy`] only
    /// needs this for gradients with respect to the *paths* — the pseudometric
    /// parameter sits after the transform in the chain and never requires it.
    fn logsignature_vjp(
        &self,
        paths: &ArrayView3<f32>,
        depth: usize,
        cotangents: &ArrayView2<f32>,
    ) -> Result<Array3<f32>> {
        let _ = (paths, depth, cotangents);
        Err(Error::MissingCapability(
            "signature provider does not implement a derivative",
        ))
    }
}

/// Order of the norm reducing the transformed logsignature difference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PNorm {
    /// `||v||_p` for a finite `p >= 1`.
    Finite(f32),
    /// `max_j |v_j|`.
    Infinity,
}

impl Default for PNorm {
    fn default() -> Self {
        Self::Finite(2.0)
    }
}

impl PNorm {
    fn check(self) -> Result<()> {
        match self {
            Self::Finite(p) if p.is_finite() && p >= 1.0 => Ok(()),
            Self::Finite(_) => Err(Error::Config(
                "p must satisfy 1 <= p < inf (use PNorm::Infinity for the sup norm)",
            )),
            Self::Infinity => Ok(()),
        }
    }

    /// `||v||_p`, accumulated in f64.
    pub fn reduce(self, v: &ArrayView1<f32>) -> f32 {
        match self {
            Self::Finite(p) if p == 2.0 => {
                let s: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum();
                s.sqrt() as f32
            }
            Self::Finite(p) => {
                let p = p as f64;
                let s: f64 = v.iter().map(|&x| (x as f64).abs().powf(p)).sum();
                s.powf(1.0 / p) as f32
            }
            Self::Infinity => v.iter().fold(0.0f32, |m, &x| m.max(x.abs())),
        }
    }
}

/// `d||v||_p / dv`, with the zero subgradient at `v = 0`.
fn pnorm_grad(p: PNorm, v: &ArrayView1<f32>, norm: f32) -> Array1<f32> {
    let mut g = Array1::<f32>::zeros(v.len());
    if norm == 0.0 {
        return g;
    }
    match p {
        PNorm::Finite(p) if p == 2.0 => {
            for (gk, &vk) in g.iter_mut().zip(v.iter()) {
                *gk = vk / norm;
            }
        }
        PNorm::Finite(p) => {
            for (gk, &vk) in g.iter_mut().zip(v.iter()) {
                if vk != 0.0 {
                    *gk = vk.signum() * (vk.abs() / norm).powf(p - 1.0);
                }
            }
        }
        PNorm::Infinity => {
            // Subgradient at the (first) maximizing coordinate.
            let mut arg = 0usize;
            for (k, &vk) in v.iter().enumerate() {
                if vk.abs() > v[arg].abs() {
                    arg = k;
                }
            }
            g[arg] = v[arg].signum();
        }
    }
    g
}

/// Configuration for [`LogsignatureDiscrepancy`].
#[derive(Debug, Clone)]
pub struct LogsigConfig {
    /// Channels of the raw paths, before any time augmentation.
    pub in_channels: usize,
    /// Truncation depth of the logsignature transform.
    pub depth: usize,
    /// Norm order for the final reduction.
    pub p: PNorm,
    /// Whether to prepend the time grid as an extra channel before the transform.
    pub include_time: bool,
    /// Pseudometric shape applied to the logsignature difference.
    pub metric: MetricKind,
    /// Seed for the pseudometric init.
    pub seed: u64,
}

impl LogsigConfig {
    /// Defaults mirroring the common shapelet setup: `p = 2`, time augmentation
    /// on, general learned pseudometric.
    pub fn new(in_channels: usize, depth: usize) -> Self {
        Self {
            in_channels,
            depth,
            p: PNorm::default(),
            include_time: true,
            metric: MetricKind::General,
            seed: 0,
        }
    }
}

/// One side's logsignatures plus everything needed to undo the flattening.
struct SideLogsig {
    /// `(n, dim)` logsignature vectors.
    ls: Array2<f32>,
    /// The (possibly time-augmented) flattened paths fed to the provider.
    data: Array3<f32>,
    batch_shape: Vec<usize>,
}

/// The p-logsignature discrepancy with a learnable pseudometric.
pub struct LogsignatureDiscrepancy {
    cfg: LogsigConfig,
    metric: Pseudometric,
    provider: Arc<dyn SignatureProvider>,
    logsig_dim: usize,
}

impl LogsignatureDiscrepancy {
    /// Construct, failing fast on an absent provider or invalid configuration.
    ///
    /// The pseudometric parameter is created here with dimension
    /// `logsignature_channels(C', depth)` (C' includes the time channel when
    /// enabled) and never resized afterwards.
    pub fn new(
        cfg: LogsigConfig,
        provider: Option<Arc<dyn SignatureProvider>>,
    ) -> Result<Self> {
        let provider = provider.ok_or(Error::MissingCapability(
            "a signature provider is required for logsignature discrepancies",
        ))?;
        if cfg.in_channels == 0 {
            return Err(Error::Config("in_channels must be >= 1"));
        }
        if cfg.depth == 0 {
            return Err(Error::Config("depth must be >= 1"));
        }
        cfg.p.check()?;
        let channels = cfg.in_channels + usize::from(cfg.include_time);
        let logsig_dim = provider.logsignature_channels(channels, cfg.depth)?;
        let metric = Pseudometric::new(cfg.metric, logsig_dim, cfg.seed)?;
        Ok(Self {
            cfg,
            metric,
            provider,
            logsig_dim,
        })
    }

    pub fn config(&self) -> &LogsigConfig {
        &self.cfg
    }

    /// Dimension of the logsignature vectors this discrepancy works in.
    pub fn logsig_dim(&self) -> usize {
        self.logsig_dim
    }

    pub fn metric(&self) -> &Pseudometric {
        &self.metric
    }

    /// Mutable access to the pseudometric, for the caller's optimizer and
    /// checkpoint restore. Must not overlap with a `compute` call.
    pub fn metric_mut(&mut self) -> &mut Pseudometric {
        &mut self.metric
    }

    /// Channel agreement between the two paths, checked before any tensor work.
    fn check_channels(&self, path1: &ArrayViewD<f32>, path2: &ArrayViewD<f32>) -> Result<()> {
        if path1.ndim() < 2 || path2.ndim() < 2 {
            return Err(Error::Shape("paths must have shape (batch..., len, channels)"));
        }
        let c1 = path1.shape()[path1.ndim() - 1];
        let c2 = path2.shape()[path2.ndim() - 1];
        if c1 != c2 {
            return Err(Error::Shape("path1 and path2 must have the same channel count"));
        }
        if c1 != self.cfg.in_channels {
            return Err(Error::Shape("paths do not match the configured channel count"));
        }
        Ok(())
    }

    /// Flatten one side, augment with time if configured, and run the provider.
    fn side_logsig(&self, times: &ArrayView1<f32>, path: &ArrayViewD<f32>) -> Result<SideLogsig> {
        let flat = flatten_batch(path)?;
        let (n, len, _channels) = flat.data.dim();
        check_times(times, len)?;
        let data = if self.cfg.include_time {
            augment_with_time(&flat.data.view(), times)
        } else {
            flat.data
        };
        let ls = self.provider.logsignature(&data.view(), self.cfg.depth)?;
        if ls.dim() != (n, self.logsig_dim) {
            return Err(Error::Shape(
                "signature provider returned an unexpected logsignature shape",
            ));
        }
        Ok(SideLogsig {
            ls,
            data,
            batch_shape: flat.batch_shape,
        })
    }

    /// Compute the discrepancy for every pair across the two batches.
    ///
    /// - `times`: shared grid, shape `(len,)`.
    /// - `path1`: shape `(B1..., len, channels)`.
    /// - `path2`: shape `(B2..., len, channels)`.
    ///
    /// Returns a tensor of shape `(B1..., B2...)`: full outer broadcast, every
    /// `path1` element against every `path2` element.
    pub fn compute(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayViewD<f32>,
        path2: &ArrayViewD<f32>,
    ) -> Result<ArrayD<f32>> {
        self.check_channels(path1, path2)?;
        let side1 = self.side_logsig(times, path1)?;
        let side2 = self.side_logsig(times, path2)?;

        let diff = outer_difference(&side1.ls.view(), &side2.ls.view())?;
        let (n1, n2, dim) = diff.dim();
        let rows = diff
            .into_shape_with_order((n1 * n2, dim))
            .map_err(|_| Error::Shape("pairwise differences could not be flattened"))?;
        let v = self.metric.apply_rows(&rows.view())?;

        let mut values = Vec::with_capacity(n1 * n2);
        for row in v.rows() {
            values.push(self.cfg.p.reduce(&row));
        }
        into_outer_batched(values, &side1.batch_shape, &side2.batch_shape)
    }

    /// Gradient of `Σ cotangent ⊙ compute(...)` with respect to the pseudometric
    /// parameter. `Ok(None)` for the identity metric.
    ///
    /// Does not require the provider to implement a derivative.
    pub fn vjp_metric(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayViewD<f32>,
        path2: &ArrayViewD<f32>,
        cotangent: &ArrayViewD<f32>,
    ) -> Result<Option<MetricGrad>> {
        let (side1, side2, cot) = self.pairwise_setup(times, path1, path2, cotangent)?;
        let dim = self.logsig_dim;

        let mut grad = match &self.metric {
            Pseudometric::Identity => return Ok(None),
            Pseudometric::Diagonal(_) => MetricGrad::Diagonal(Array1::zeros(dim)),
            Pseudometric::General(_) => MetricGrad::General(Array2::zeros((dim, dim))),
        };

        self.for_each_pair(&side1, &side2, &cot, |q, dndv, w, _dldq| {
            match &mut grad {
                MetricGrad::Diagonal(gd) => {
                    for k in 0..dim {
                        gd[k] += w * q[k] * dndv[k];
                    }
                }
                MetricGrad::General(ga) => {
                    // v = q A, so dL/dA = qᵀ (w · dn/dv).
                    for k in 0..dim {
                        let qk = q[k];
                        for j in 0..dim {
                            ga[[k, j]] += w * qk * dndv[j];
                        }
                    }
                }
            }
        })?;

        Ok(Some(grad))
    }

    /// Gradients of `Σ cotangent ⊙ compute(...)` with respect to both paths,
    /// chain-ruled through [`SignatureProvider::logsignature_vjp`].
    ///
    /// Fails with [`Error::MissingCapability`] if the provider declines. When time
    /// augmentation is on, the time channel's cotangent is dropped — the grid is
    /// an input, not a learnable.
    pub fn vjp_paths(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayViewD<f32>,
        path2: &ArrayViewD<f32>,
        cotangent: &ArrayViewD<f32>,
    ) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
        let (side1, side2, cot) = self.pairwise_setup(times, path1, path2, cotangent)?;
        let (n1, n2) = cot.dim();
        let dim = self.logsig_dim;

        let mut cot1 = Array2::<f32>::zeros((n1, dim));
        let mut cot2 = Array2::<f32>::zeros((n2, dim));
        self.for_each_pair_indexed(&side1, &side2, &cot, |i, j, _q, _dndv, w, dldq| {
            for k in 0..dim {
                cot1[[i, k]] += w * dldq[k];
                cot2[[j, k]] -= w * dldq[k];
            }
        })?;

        let g1 = self
            .provider
            .logsignature_vjp(&side1.data.view(), self.cfg.depth, &cot1.view())?;
        let g2 = self
            .provider
            .logsignature_vjp(&side2.data.view(), self.cfg.depth, &cot2.view())?;

        let g1 = self.strip_time_and_restore(g1, path1.shape())?;
        let g2 = self.strip_time_and_restore(g2, path2.shape())?;
        Ok((g1, g2))
    }

    /// Shared validation and forward recomputation for the vjp entry points.
    fn pairwise_setup(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayViewD<f32>,
        path2: &ArrayViewD<f32>,
        cotangent: &ArrayViewD<f32>,
    ) -> Result<(SideLogsig, SideLogsig, Array2<f32>)> {
        self.check_channels(path1, path2)?;
        let side1 = self.side_logsig(times, path1)?;
        let side2 = self.side_logsig(times, path2)?;

        let mut expected = side1.batch_shape.clone();
        expected.extend_from_slice(&side2.batch_shape);
        if cotangent.shape() != expected.as_slice() {
            return Err(Error::Shape("cotangent must have the output's batch shape"));
        }
        let (n1, n2) = (side1.ls.nrows(), side2.ls.nrows());
        let cot = cotangent
            .to_owned()
            .into_shape_with_order((n1, n2))
            .map_err(|_| Error::Shape("cotangent could not be flattened"))?;
        Ok((side1, side2, cot))
    }

    fn for_each_pair(
        &self,
        side1: &SideLogsig,
        side2: &SideLogsig,
        cot: &Array2<f32>,
        mut f: impl FnMut(&Array1<f32>, &Array1<f32>, f32, &Array1<f32>),
    ) -> Result<()> {
        self.for_each_pair_indexed(side1, side2, cot, |_i, _j, q, dndv, w, dldq| {
            f(q, dndv, w, dldq)
        })
    }

    /// Recompute the forward pass pair by pair and hand each pair's pieces to `f`:
    /// the raw difference `q`, the norm gradient `dn/dv`, the cotangent weight, and
    /// `dn/dq` (the norm gradient pulled back through the pseudometric).
    fn for_each_pair_indexed(
        &self,
        side1: &SideLogsig,
        side2: &SideLogsig,
        cot: &Array2<f32>,
        mut f: impl FnMut(usize, usize, &Array1<f32>, &Array1<f32>, f32, &Array1<f32>),
    ) -> Result<()> {
        let (n1, n2) = cot.dim();
        for i in 0..n1 {
            for j in 0..n2 {
                let w = cot[[i, j]];
                if w == 0.0 {
                    continue;
                }
                let q = side1.ls.row(i).to_owned() - side2.ls.row(j);
                let v = self.metric.apply_vec(&q.view())?;
                let norm = self.cfg.p.reduce(&v.view());
                let dndv = pnorm_grad(self.cfg.p, &v.view(), norm);
                // v = q A, so dn/dq = A · dn/dv.
                let dldq = match &self.metric {
                    Pseudometric::Identity => dndv.clone(),
                    Pseudometric::Diagonal(a) => dndv.clone() * a,
                    Pseudometric::General(a) => a.dot(&dndv),
                };
                f(i, j, &q, &dndv, w, &dldq);
            }
        }
        Ok(())
    }

    /// Drop the time channel cotangent (if present) and restore the original
    /// batch shape of a provider gradient.
    fn strip_time_and_restore(
        &self,
        grad: Array3<f32>,
        original_shape: &[usize],
    ) -> Result<ArrayD<f32>> {
        let channels = grad.dim().2;
        let expected_channels = self.cfg.in_channels + usize::from(self.cfg.include_time);
        if channels != expected_channels {
            return Err(Error::Shape(
                "signature provider returned an unexpected gradient shape",
            ));
        }
        let stripped = if self.cfg.include_time {
            grad.slice(ndarray::s![.., .., 1..]).to_owned()
        } else {
            grad.as_standard_layout().into_owned()
        };
        stripped
            .into_shape_with_order(IxDyn(original_shape))
            .map_err(|_| Error::Shape("gradient could not be restored to the path shape"))
    }
}

impl core::fmt::Debug for LogsignatureDiscrepancy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LogsignatureDiscrepancy")
            .field("in_channels", &self.cfg.in_channels)
            .field("depth", &self.cfg.depth)
            .field("p", &self.cfg.p)
            .field("include_time", &self.cfg.include_time)
            .field("metric", &self.metric.kind())
            .field("logsig_dim", &self.logsig_dim)
            .finish()
    }
}
