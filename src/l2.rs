//! Direct L2 discrepancy between piecewise-linear paths.
//!
//! For a batch of paths `f` and a single reference path `g` (a shapelet) sampled on
//! a shared strictly increasing grid, this computes
//! `sqrt(∫ ||A(f(t) − g(t))||₂² dt)` exactly, segment by segment, where `A` is the
//! learnable pseudometric. The asymmetry is deliberate: `path2` carries **no**
//! batch dimensions, because the shapelet transform compares one candidate shapelet
//! against a batch of path windows.
//!
//! `A` is applied once to the knot values of the difference path. It has no time
//! dependency, so this commutes with both the interpolation and the integral; see
//! [`crate::pseudometric`].
//!
//! The integral itself lives in [`crate::kernel`] behind a strategy trait; the
//! default is the rayon-parallel kernel, with the serial kernel as the reference
//! fallback.

use crate::kernel::{default_kernel, L2Kernel};
use crate::path::{check_times, flatten_batch, into_batched};
use crate::pseudometric::{MetricGrad, MetricKind, Pseudometric};
use crate::{Error, Result};
use ndarray::{s, Array2, Array3, ArrayD, ArrayView1, ArrayView2, ArrayViewD, Axis, Ix2, IxDyn};

/// The direct L2 path discrepancy with a learnable pseudometric.
pub struct L2Discrepancy {
    in_channels: usize,
    metric: Pseudometric,
    kernel: Box<dyn L2Kernel>,
}

impl L2Discrepancy {
    /// Construct with the default (parallel) kernel.
    ///
    /// The pseudometric parameter is created here, with dimension `in_channels`,
    /// and never resized afterwards.
    pub fn new(in_channels: usize, metric: MetricKind, seed: u64) -> Result<Self> {
        Self::with_kernel(in_channels, metric, seed, default_kernel())
    }

    /// Like [`Self::new`], but with an explicit kernel strategy.
    pub fn with_kernel(
        in_channels: usize,
        metric: MetricKind,
        seed: u64,
        kernel: Box<dyn L2Kernel>,
    ) -> Result<Self> {
        if in_channels == 0 {
            return Err(Error::Config("in_channels must be >= 1"));
        }
        let metric = Pseudometric::new(metric, in_channels, seed)?;
        Ok(Self {
            in_channels,
            metric,
            kernel,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn metric(&self) -> &Pseudometric {
        &self.metric
    }

    /// Mutable access to the pseudometric, for the caller's optimizer and
    /// checkpoint restore. Must not overlap with a `compute` call.
    pub fn metric_mut(&mut self) -> &mut Pseudometric {
        &mut self.metric
    }

    /// Shape checks shared by [`Self::compute`] and [`Self::vjp`]; all of them run
    /// before any tensor work.
    fn checked_reference<'a>(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayViewD<f32>,
        path2: &ArrayViewD<'a, f32>,
    ) -> Result<ArrayView2<'a, f32>> {
        if path2.ndim() != 2 {
            return Err(Error::Shape(
                "path2 must be a single path with no batch dimensions",
            ));
        }
        let p2 = path2
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|_| Error::Shape("path2 must have shape (len, channels)"))?;
        if path1.ndim() < 2 {
            return Err(Error::Shape("path1 must have shape (batch..., len, channels)"));
        }
        let shape = path1.shape();
        let (len, channels) = (shape[shape.len() - 2], shape[shape.len() - 1]);
        if channels != p2.ncols() {
            return Err(Error::Shape("path1 and path2 must have the same channel count"));
        }
        if channels != self.in_channels {
            return Err(Error::Shape("paths do not match the configured channel count"));
        }
        if p2.nrows() != len {
            return Err(Error::Shape("path1 and path2 must share the time axis"));
        }
        check_times(times, len)?;
        Ok(p2)
    }

    /// Compute the discrepancy for every path in the batch.
    ///
    /// - `times`: shared grid, shape `(len,)`.
    /// - `path1`: shape `(batch..., len, channels)`.
    /// - `path2`: shape `(len, channels)` — exactly, see the module docs.
    ///
    /// Returns a tensor of `path1`'s batch shape.
    pub fn compute(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayViewD<f32>,
        path2: &ArrayViewD<f32>,
    ) -> Result<ArrayD<f32>> {
        let p2 = self.checked_reference(times, path1, path2)?;
        let flat = flatten_batch(path1)?;
        let values = self
            .kernel
            .l2_discrepancy(times, &flat.data.view(), &p2, &self.metric)?;
        into_batched(values.to_vec(), &flat.batch_shape)
    }

    /// Closed-form reverse-mode gradients for [`Self::compute`].
    ///
    /// `cotangent` must have the output's shape (`path1`'s batch shape); the result
    /// is the gradient of `Σ cotangent ⊙ compute(...)`. Where a discrepancy is
    /// exactly zero the sqrt is not differentiable and the element contributes the
    /// zero subgradient.
    pub fn vjp(
        &self,
        times: &ArrayView1<f32>,
        path1: &ArrayViewD<f32>,
        path2: &ArrayViewD<f32>,
        cotangent: &ArrayViewD<f32>,
    ) -> Result<L2Vjp> {
        let p2 = self.checked_reference(times, path1, path2)?;
        let flat = flatten_batch(path1)?;
        let (n, len, channels) = flat.data.dim();

        if cotangent.shape() != flat.batch_shape.as_slice() {
            return Err(Error::Shape("cotangent must have the output's batch shape"));
        }
        let cot = cotangent
            .to_owned()
            .into_shape_with_order(n)
            .map_err(|_| Error::Shape("cotangent could not be flattened"))?;

        let mut grad1 = Array3::<f32>::zeros((n, len, channels));
        let mut grad2 = Array2::<f32>::zeros((len, channels));
        let mut metric_grad = match &self.metric {
            Pseudometric::Identity => None,
            Pseudometric::Diagonal(_) => Some(MetricGrad::Diagonal(ndarray::Array1::zeros(channels))),
            Pseudometric::General(_) => {
                Some(MetricGrad::General(Array2::zeros((channels, channels))))
            }
        };

        for b in 0..n {
            let row = flat.data.index_axis(Axis(0), b);
            let u = row.to_owned() - &p2;
            let v = self.metric.apply_rows(&u.view())?;
            let s = crate::kernel::squared_integral(times, &v.view());
            if s <= 0.0 {
                continue;
            }
            let d = s.sqrt() as f32;
            let scale = cot[b] / (2.0 * d);

            // g = d(scale · S)/dv from the segment sums
            // S = Σ_i (dt_i/3)(|v_i|² + v_i·v_{i+1} + |v_{i+1}|²).
            let mut g = Array2::<f32>::zeros((len, channels));
            for i in 0..len - 1 {
                let dt3 = (times[i + 1] - times[i]) / 3.0;
                for k in 0..channels {
                    let vi = v[[i, k]];
                    let vj = v[[i + 1, k]];
                    g[[i, k]] += dt3 * (2.0 * vi + vj);
                    g[[i + 1, k]] += dt3 * (2.0 * vj + vi);
                }
            }
            g.mapv_inplace(|x| x * scale);

            // Pull g back through the pseudometric: v = u A, so dL/du = g Aᵀ.
            let du = match &self.metric {
                Pseudometric::Identity => g.clone(),
                Pseudometric::Diagonal(a) => g.clone() * a,
                Pseudometric::General(a) => g.dot(&a.t()),
            };

            match &mut metric_grad {
                Some(MetricGrad::Diagonal(gd)) => {
                    for i in 0..len {
                        for k in 0..channels {
                            gd[k] += u[[i, k]] * g[[i, k]];
                        }
                    }
                }
                Some(MetricGrad::General(ga)) => {
                    // dL/dA = uᵀ g.
                    for i in 0..len {
                        for k in 0..channels {
                            let uk = u[[i, k]];
                            for j in 0..channels {
                                ga[[k, j]] += uk * g[[i, j]];
                            }
                        }
                    }
                }
                None => {}
            }

            grad1.slice_mut(s![b, .., ..]).assign(&du);
            grad2 -= &du;
        }

        let path1_grad = grad1
            .into_shape_with_order(IxDyn(path1.shape()))
            .map_err(|_| Error::Shape("gradient could not be restored to the path shape"))?;
        Ok(L2Vjp {
            path1: path1_grad,
            path2: grad2,
            metric: metric_grad,
        })
    }
}

impl core::fmt::Debug for L2Discrepancy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("L2Discrepancy")
            .field("in_channels", &self.in_channels)
            .field("metric", &self.metric.kind())
            .finish()
    }
}

/// Gradients of `Σ cotangent ⊙ compute(...)` with respect to inputs and parameter.
#[derive(Debug, Clone)]
pub struct L2Vjp {
    /// Gradient with respect to `path1`, same shape as `path1`.
    pub path1: ArrayD<f32>,
    /// Gradient with respect to `path2`, shape `(len, channels)`.
    pub path2: Array2<f32>,
    /// Gradient with respect to the pseudometric parameter (`None` for identity).
    pub metric: Option<MetricGrad>,
}
