//! Learnable pseudometric transforms.
//!
//! A discrepancy can be sharpened by a learned linear map `A` applied to the
//! difference vector before the norm reduction. Three shapes are supported:
//! identity (no parameter allocated, apply short-circuits), a learned diagonal
//! (elementwise scaling), and a learned square matrix.
//!
//! `A` has no time dependency, so for piecewise-linear difference paths it commutes
//! with linear interpolation: transforming the knot values is the same as
//! transforming the interpolant. The L2 kernels rely on this to apply `A` once per
//! knot instead of per segment.

use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Which pseudometric shape to learn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// No transform.
    Identity,
    /// Learned elementwise scaling.
    Diagonal,
    /// Learned square matrix.
    General,
}

impl Default for MetricKind {
    fn default() -> Self {
        Self::General
    }
}

impl core::str::FromStr for MetricKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "identity" => Ok(Self::Identity),
            "diagonal" => Ok(Self::Diagonal),
            "general" => Ok(Self::General),
            _ => Err(Error::Config(
                "metric kind must be one of 'identity', 'diagonal', 'general'",
            )),
        }
    }
}

/// A learnable linear map on difference vectors.
///
/// The variants own their parameter directly; the caller's checkpointing mechanism
/// is free to read and restore it. Updates must happen strictly between `compute`
/// calls.
#[derive(Debug, Clone)]
pub enum Pseudometric {
    /// Identity: `apply` returns its input unchanged and no parameter exists.
    Identity,
    /// Elementwise scaling by a learned vector of length `dim`.
    Diagonal(Array1<f32>),
    /// Right-multiplication by a learned `dim × dim` matrix (row-vector convention).
    General(Array2<f32>),
}

impl Pseudometric {
    /// Initialize a pseudometric of the given kind acting on vectors of length `dim`.
    ///
    /// - `Diagonal` entries start uniformly in `[0.9, 1.1]` (near-identity scaling).
    /// - `General` entries use a fan-in scaled uniform init, `U(-1/sqrt(dim), 1/sqrt(dim))`.
    pub fn new(kind: MetricKind, dim: usize, seed: u64) -> Result<Self> {
        if dim == 0 {
            return Err(Error::Config("pseudometric dimension must be >= 1"));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Ok(match kind {
            MetricKind::Identity => Self::Identity,
            MetricKind::Diagonal => {
                let mut a = Array1::<f32>::zeros(dim);
                for x in a.iter_mut() {
                    *x = rng.random_range(0.9..1.1);
                }
                Self::Diagonal(a)
            }
            MetricKind::General => {
                let bound = (1.0 / dim as f32).sqrt();
                let mut a = Array2::<f32>::zeros((dim, dim));
                for x in a.iter_mut() {
                    *x = rng.random_range(-bound..bound);
                }
                Self::General(a)
            }
        })
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Identity => MetricKind::Identity,
            Self::Diagonal(_) => MetricKind::Diagonal,
            Self::General(_) => MetricKind::General,
        }
    }

    /// The parameter dimension, or `None` for the identity (nothing allocated).
    pub fn dim(&self) -> Option<usize> {
        match self {
            Self::Identity => None,
            Self::Diagonal(a) => Some(a.len()),
            Self::General(a) => Some(a.nrows()),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Check that this pseudometric can act on vectors of length `dim`.
    pub fn check_dim(&self, dim: usize) -> Result<()> {
        match self.dim() {
            Some(d) if d != dim => Err(Error::Shape(
                "pseudometric dimension does not match the vector dimension",
            )),
            _ => Ok(()),
        }
    }

    /// Apply the transform to every vector along the last axis of `rows`.
    ///
    /// `General` uses the row-vector convention `v = u A`, i.e. `v_j = Σ_i u_i A[i, j]`.
    pub fn apply_rows(&self, rows: &ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_dim(rows.ncols())?;
        Ok(match self {
            Self::Identity => rows.to_owned(),
            Self::Diagonal(a) => rows.to_owned() * a,
            Self::General(a) => rows.dot(a),
        })
    }

    /// [`Self::apply_rows`] for a single vector.
    pub fn apply_vec(&self, u: &ArrayView1<f32>) -> Result<Array1<f32>> {
        self.check_dim(u.len())?;
        Ok(match self {
            Self::Identity => u.to_owned(),
            Self::Diagonal(a) => u.to_owned() * a,
            Self::General(a) => u.dot(a),
        })
    }

    /// One SGD step on the parameter.
    ///
    /// This is the external learning procedure's mutation entry point; it must only
    /// run between `compute` calls.
    pub fn sgd_step(&mut self, grad: &MetricGrad, lr: f32) -> Result<()> {
        if !lr.is_finite() {
            return Err(Error::Config("lr must be finite"));
        }
        match (self, grad) {
            (Self::Diagonal(a), MetricGrad::Diagonal(g)) if a.len() == g.len() => {
                *a -= &(g * lr);
                Ok(())
            }
            (Self::General(a), MetricGrad::General(g)) if a.dim() == g.dim() => {
                *a -= &(g * lr);
                Ok(())
            }
            _ => Err(Error::Shape(
                "gradient shape does not match the pseudometric parameter",
            )),
        }
    }
}

/// Gradient of a scalar loss with respect to the pseudometric parameter.
///
/// The identity variant has no parameter, so no gradient variant exists for it;
/// vjp entry points return `None` in that case.
#[derive(Debug, Clone)]
pub enum MetricGrad {
    Diagonal(Array1<f32>),
    General(Array2<f32>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn from_str_accepts_the_three_kinds_and_nothing_else() {
        assert_eq!("identity".parse::<MetricKind>().unwrap(), MetricKind::Identity);
        assert_eq!("diagonal".parse::<MetricKind>().unwrap(), MetricKind::Diagonal);
        assert_eq!("general".parse::<MetricKind>().unwrap(), MetricKind::General);
        assert!(matches!(
            "bogus".parse::<MetricKind>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn zero_dim_is_rejected() {
        assert!(matches!(
            Pseudometric::new(MetricKind::Diagonal, 0, 0),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn init_ranges_match_the_schemes() {
        let dim = 32;
        match Pseudometric::new(MetricKind::Diagonal, dim, 7).unwrap() {
            Pseudometric::Diagonal(a) => {
                assert_eq!(a.len(), dim);
                assert!(a.iter().all(|&x| (0.9..1.1).contains(&x)));
            }
            _ => unreachable!(),
        }
        let bound = (1.0 / dim as f32).sqrt();
        match Pseudometric::new(MetricKind::General, dim, 7).unwrap() {
            Pseudometric::General(a) => {
                assert_eq!(a.dim(), (dim, dim));
                assert!(a.iter().all(|&x| x.abs() <= bound));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn init_is_deterministic_in_the_seed() {
        let a = Pseudometric::new(MetricKind::General, 8, 42).unwrap();
        let b = Pseudometric::new(MetricKind::General, 8, 42).unwrap();
        match (a, b) {
            (Pseudometric::General(a), Pseudometric::General(b)) => assert_eq!(a, b),
            _ => unreachable!(),
        }
    }

    #[test]
    fn apply_matches_manual_computation() {
        let u = Array1::from_vec(vec![1.0f32, -2.0, 0.5]);

        let id = Pseudometric::Identity;
        assert_eq!(id.apply_vec(&u.view()).unwrap(), u);

        let diag = Pseudometric::Diagonal(Array1::from_vec(vec![2.0f32, 3.0, -1.0]));
        assert_eq!(
            diag.apply_vec(&u.view()).unwrap(),
            Array1::from_vec(vec![2.0f32, -6.0, -0.5])
        );

        let a = Array2::from_shape_vec(
            (3, 3),
            vec![1.0f32, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
        )
        .unwrap();
        let gen = Pseudometric::General(a);
        // v_j = Σ_i u_i A[i, j]
        assert_eq!(
            gen.apply_vec(&u.view()).unwrap(),
            Array1::from_vec(vec![1.5f32, -2.0, 0.5])
        );
    }

    #[test]
    fn dim_mismatch_is_a_shape_error() {
        let diag = Pseudometric::Diagonal(Array1::from_vec(vec![1.0f32, 1.0]));
        let u = Array1::from_vec(vec![1.0f32, 2.0, 3.0]);
        assert!(matches!(diag.apply_vec(&u.view()), Err(Error::Shape(_))));
    }

    #[test]
    fn sgd_step_rejects_mismatched_grads() {
        let mut diag = Pseudometric::Diagonal(Array1::from_vec(vec![1.0f32, 1.0]));
        let bad = MetricGrad::General(Array2::zeros((2, 2)));
        assert!(diag.sgd_step(&bad, 0.1).is_err());

        let mut id = Pseudometric::Identity;
        let g = MetricGrad::Diagonal(Array1::zeros(2));
        assert!(id.sgd_step(&g, 0.1).is_err());

        let g = MetricGrad::Diagonal(Array1::from_vec(vec![1.0f32, -1.0]));
        diag.sgd_step(&g, 0.5).unwrap();
        match diag {
            Pseudometric::Diagonal(a) => {
                assert_eq!(a, Array1::from_vec(vec![0.5f32, 1.5]));
            }
            _ => unreachable!(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_apply_is_linear(
            dim in 1usize..8,
            seed in any::<u64>(),
            raw_u in prop::collection::vec(-5.0f32..5.0f32, 8),
            raw_w in prop::collection::vec(-5.0f32..5.0f32, 8),
        ) {
            let u = Array1::from_vec(raw_u[..dim].to_vec());
            let w = Array1::from_vec(raw_w[..dim].to_vec());

            for kind in [MetricKind::Identity, MetricKind::Diagonal, MetricKind::General] {
                let m = Pseudometric::new(kind, dim, seed).unwrap();
                let lhs = m.apply_vec(&(&u + &w).view()).unwrap();
                let rhs = m.apply_vec(&u.view()).unwrap() + m.apply_vec(&w.view()).unwrap();
                for k in 0..dim {
                    let tol = 1e-4 * (1.0 + rhs[k].abs());
                    prop_assert!((lhs[k] - rhs[k]).abs() <= tol);
                }
            }
        }
    }
}
