/*!
Gaussian-mixture target distributions used as analytic ground truth when checking
sampler traces.

A [`TargetDistribution`] is built once from a list of [`MixtureComponent`]s. At
construction every covariance is factorised (Cholesky), so the inverse covariance,
the log normalising constant and the CDF parameters are derived exactly once and
re-used by every density or CDF evaluation.

# Examples

```rust
use bmc_diagnostics::distributions::{MixtureComponent, TargetDistribution};

let target = TargetDistribution::new(vec![
    MixtureComponent::isotropic(vec![0.0, 0.0], 1.0, 0.5),
    MixtureComponent::isotropic(vec![3.0, 3.0], 2.0, 0.5),
])?;
let p = target.density(&[0.5, -0.5])?;
let f = target.cdf(&[0.0, 0.0])?;
assert!(p > 0.0 && (0.0..=1.0).contains(&f));
# Ok::<(), bmc_diagnostics::Error>(())
```
*/

use nalgebra::{Cholesky, DMatrix, DVector};
use ndarray::{Array1, ArrayView2};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{Error, Result};
use crate::mvn;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;
const SYMMETRY_TOLERANCE: f64 = 1e-12;

/// One weighted multivariate normal component, as given by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureComponent {
    pub mean: Vec<f64>,
    /// Row-major `d × d` covariance.
    pub covariance: Vec<Vec<f64>>,
    pub weight: f64,
}

impl MixtureComponent {
    /// A component with covariance `variance · I`.
    pub fn isotropic(mean: Vec<f64>, variance: f64, weight: f64) -> Self {
        let d = mean.len();
        let covariance = (0..d)
            .map(|i| (0..d).map(|j| if i == j { variance } else { 0.0 }).collect())
            .collect();
        Self {
            mean,
            covariance,
            weight,
        }
    }
}

/// A component with its derived constants.
#[derive(Debug, Clone)]
struct Prepared {
    weight: f64,
    mean: DVector<f64>,
    precision: DMatrix<f64>,
    chol_l: DMatrix<f64>,
    log_norm: f64,
    std_dev: Vec<f64>,
    /// Correlation coefficient, only meaningful for two dimensions.
    rho: f64,
}

impl Prepared {
    fn new(index: usize, c: &MixtureComponent, dim: usize) -> Result<Self> {
        if c.mean.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: c.mean.len(),
            });
        }
        if !(c.weight.is_finite() && c.weight > 0.0 && c.weight <= 1.0) {
            return Err(Error::invalid(format!(
                "component {index}: weight {} is outside (0, 1]",
                c.weight
            )));
        }
        if c.mean.iter().any(|m| !m.is_finite()) {
            return Err(Error::invalid(format!(
                "component {index}: mean has non-finite entries"
            )));
        }
        if c.covariance.len() != dim || c.covariance.iter().any(|row| row.len() != dim) {
            return Err(Error::invalid(format!(
                "component {index}: covariance must be {dim}x{dim}"
            )));
        }
        let cov = DMatrix::from_fn(dim, dim, |i, j| c.covariance[i][j]);
        if cov.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid(format!(
                "component {index}: covariance has non-finite entries"
            )));
        }
        let scale = cov.amax().max(1.0);
        for i in 0..dim {
            for j in (i + 1)..dim {
                if (cov[(i, j)] - cov[(j, i)]).abs() > SYMMETRY_TOLERANCE * scale {
                    return Err(Error::invalid(format!(
                        "component {index}: covariance is not symmetric"
                    )));
                }
            }
        }
        let chol = Cholesky::new(cov.clone()).ok_or_else(|| {
            Error::invalid(format!(
                "component {index}: covariance is not positive definite"
            ))
        })?;
        let chol_l = chol.l();
        let log_det: f64 = 2.0 * chol_l.diagonal().iter().map(|l| l.ln()).sum::<f64>();
        let log_norm = -0.5 * (dim as f64 * (2.0 * PI).ln() + log_det);
        let std_dev: Vec<f64> = (0..dim).map(|i| cov[(i, i)].sqrt()).collect();
        let rho = if dim == 2 {
            cov[(0, 1)] / (std_dev[0] * std_dev[1])
        } else {
            0.0
        };

        Ok(Self {
            weight: c.weight,
            mean: DVector::from_column_slice(&c.mean),
            precision: chol.inverse(),
            chol_l,
            log_norm,
            std_dev,
            rho,
        })
    }

    /// Mahalanobis form `(x-μ)ᵗ Σ⁻¹ (x-μ)` for a finite point.
    fn quad_form(&self, x: &[f64]) -> f64 {
        let diff = DVector::from_column_slice(x) - &self.mean;
        let q = (diff.transpose() * &self.precision * &diff)[(0, 0)];
        q.max(0.0)
    }

    fn log_density(&self, x: &[f64]) -> f64 {
        self.log_norm - 0.5 * self.quad_form(x)
    }

    fn cdf(&self, x: &[f64]) -> f64 {
        match x.len() {
            1 => mvn::phi((x[0] - self.mean[0]) / self.std_dev[0]),
            2 => mvn::bvn_cdf(
                (x[0] - self.mean[0]) / self.std_dev[0],
                (x[1] - self.mean[1]) / self.std_dev[1],
                self.rho,
            ),
            _ => {
                let upper = DVector::from_column_slice(x) - &self.mean;
                mvn::genz_cdf(&self.chol_l, &upper, mvn::GENZ_DRAWS)
            }
        }
    }
}

/// An immutable mixture of multivariate normals.
#[derive(Debug, Clone)]
pub struct TargetDistribution {
    dim: usize,
    components: Vec<MixtureComponent>,
    prepared: Vec<Prepared>,
}

impl TargetDistribution {
    /// Validates the components and precomputes their constants.
    ///
    /// Fails with [`Error::InvalidParameter`] when the list is empty, a weight is
    /// outside `(0, 1]`, the weights do not sum to one, or a covariance is not
    /// symmetric positive-definite. Components of differing dimension yield
    /// [`Error::DimensionMismatch`].
    pub fn new(components: Vec<MixtureComponent>) -> Result<Self> {
        let first = components
            .first()
            .ok_or_else(|| Error::invalid("mixture needs at least one component"))?;
        let dim = first.mean.len();
        if dim == 0 {
            return Err(Error::invalid("mixture dimension must be at least 1"));
        }
        let prepared = components
            .iter()
            .enumerate()
            .map(|(i, c)| Prepared::new(i, c, dim))
            .collect::<Result<Vec<_>>>()?;
        let total: f64 = components.iter().map(|c| c.weight).sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::invalid(format!(
                "mixture weights sum to {total}, expected 1"
            )));
        }
        tracing::debug!(dim, n_components = components.len(), "built target mixture");
        Ok(Self {
            dim,
            components,
            prepared,
        })
    }

    /// The asymmetric three-Gaussian mixture used in the reference experiments:
    /// equal weights, covariances `0.5·I`, `I`, `2·I`, means `(4√3−1, 1)`,
    /// `(−4√3−1, 1)` and `(2, −10)`.
    pub fn reference() -> Result<Self> {
        Self::new(reference_components())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn components(&self) -> &[MixtureComponent] {
        &self.components
    }

    fn check_point(&self, x: &[f64]) -> Result<()> {
        if x.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                found: x.len(),
            });
        }
        if x.iter().any(|v| v.is_nan()) {
            return Err(Error::invalid("point has NaN coordinates"));
        }
        Ok(())
    }

    /// Mixture density at `x`. Far-tail points underflow to `0.0`; points with an
    /// infinite coordinate have density `0.0`.
    pub fn density(&self, x: &[f64]) -> Result<f64> {
        self.check_point(x)?;
        if x.iter().any(|v| v.is_infinite()) {
            return Ok(0.0);
        }
        Ok(self
            .prepared
            .iter()
            .map(|c| c.weight * c.log_density(x).exp())
            .sum())
    }

    /// Log of the mixture density, computed with log-sum-exp so it stays finite
    /// where [`density`](Self::density) underflows.
    pub fn log_density(&self, x: &[f64]) -> Result<f64> {
        self.check_point(x)?;
        if x.iter().any(|v| v.is_infinite()) {
            return Ok(f64::NEG_INFINITY);
        }
        let terms: Vec<f64> = self
            .prepared
            .iter()
            .map(|c| c.weight.ln() + c.log_density(x))
            .collect();
        let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max == f64::NEG_INFINITY {
            return Ok(max);
        }
        Ok(max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln())
    }

    /// Mixture CDF `P(X ≤ x)` using the joint CDF of every component.
    pub fn cdf(&self, x: &[f64]) -> Result<f64> {
        self.check_point(x)?;
        let p: f64 = self.prepared.iter().map(|c| c.weight * c.cdf(x)).sum();
        Ok(p.clamp(0.0, 1.0))
    }

    fn batch<F>(&self, points: ArrayView2<f64>, f: F) -> Result<Array1<f64>>
    where
        F: Fn(&Self, &[f64]) -> Result<f64> + Sync,
    {
        if points.ncols() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                found: points.ncols(),
            });
        }
        let rows: Vec<Vec<f64>> = points.outer_iter().map(|r| r.to_vec()).collect();
        let values = rows
            .par_iter()
            .map(|r| f(self, r.as_slice()))
            .collect::<Result<Vec<f64>>>()?;
        Ok(Array1::from(values))
    }

    /// Densities of many points, one per row of `points`.
    pub fn density_batch(&self, points: ArrayView2<f64>) -> Result<Array1<f64>> {
        self.batch(points, Self::density)
    }

    /// CDF values of many points, one per row of `points`.
    pub fn cdf_batch(&self, points: ArrayView2<f64>) -> Result<Array1<f64>> {
        self.batch(points, Self::cdf)
    }

    /// Draws one exact sample: a component by weight, then `μ + L z`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let r: f64 = rng.gen();
        let mut cum = 0.0;
        let mut chosen = self.prepared.len() - 1;
        for (i, c) in self.prepared.iter().enumerate() {
            cum += c.weight;
            if r < cum {
                chosen = i;
                break;
            }
        }
        let c = &self.prepared[chosen];
        let z = DVector::from_fn(self.dim, |_, _| rng.sample::<f64, _>(StandardNormal));
        (&c.mean + &c.chol_l * z).iter().copied().collect()
    }

    pub fn sample_n<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Vec<f64>> {
        (0..n).map(|_| self.sample(rng)).collect()
    }
}

/// Components of [`TargetDistribution::reference`].
pub fn reference_components() -> Vec<MixtureComponent> {
    let s3 = 3.0_f64.sqrt();
    let w = 1.0 / 3.0;
    vec![
        MixtureComponent::isotropic(vec![4.0 * s3 - 1.0, 1.0], 0.5, w),
        MixtureComponent::isotropic(vec![-4.0 * s3 - 1.0, 1.0], 1.0, w),
        MixtureComponent::isotropic(vec![2.0, -10.0], 2.0, w),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use rand::{rngs::SmallRng, SeedableRng};

    fn standard_normal_2d() -> TargetDistribution {
        TargetDistribution::new(vec![MixtureComponent::isotropic(vec![0.0, 0.0], 1.0, 1.0)])
            .unwrap()
    }

    #[test]
    fn density_of_standard_normal_at_origin() {
        let d = standard_normal_2d().density(&[0.0, 0.0]).unwrap();
        assert_abs_diff_eq!(d, 1.0 / (2.0 * PI), epsilon = 1e-15);
    }

    #[test]
    fn density_matches_closed_form_with_correlation() {
        let cov = vec![vec![4.0, 2.0], vec![2.0, 3.0]];
        let target = TargetDistribution::new(vec![MixtureComponent {
            mean: vec![1.0, -1.0],
            covariance: cov,
            weight: 1.0,
        }])
        .unwrap();
        // det = 8, inverse = [[3, -2], [-2, 4]] / 8
        let (dx, dy) = (0.5_f64, 1.5_f64);
        let q = (3.0 * dx * dx - 4.0 * dx * dy + 4.0 * dy * dy) / 8.0;
        let expected = (-0.5 * q).exp() / (2.0 * PI * 8.0_f64.sqrt());
        let got = target.density(&[1.5, 0.5]).unwrap();
        assert_abs_diff_eq!(got, expected, epsilon = 1e-14);
        assert_abs_diff_eq!(
            target.log_density(&[1.5, 0.5]).unwrap(),
            expected.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn far_tail_underflows_to_zero() {
        let target = TargetDistribution::reference().unwrap();
        let d = target.density(&[1e6, -1e6]).unwrap();
        assert_eq!(d, 0.0);
        let lp = target.log_density(&[1e6, -1e6]).unwrap();
        assert!(lp.is_finite() && lp < -1e9);
        assert_eq!(target.density(&[f64::INFINITY, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn rejects_non_positive_definite_covariance() {
        let res = TargetDistribution::new(vec![MixtureComponent {
            mean: vec![0.0, 0.0],
            covariance: vec![vec![1.0, 2.0], vec![2.0, 1.0]],
            weight: 1.0,
        }]);
        assert!(matches!(res, Err(Error::InvalidParameter(_))), "{res:?}");
    }

    #[test]
    fn rejects_asymmetric_covariance() {
        let res = TargetDistribution::new(vec![MixtureComponent {
            mean: vec![0.0, 0.0],
            covariance: vec![vec![1.0, 0.1], vec![0.0, 1.0]],
            weight: 1.0,
        }]);
        assert!(matches!(res, Err(Error::InvalidParameter(_))), "{res:?}");
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let res = TargetDistribution::new(vec![
            MixtureComponent::isotropic(vec![0.0], 1.0, 0.5),
            MixtureComponent::isotropic(vec![1.0], 1.0, 0.4),
        ]);
        assert!(matches!(res, Err(Error::InvalidParameter(_))), "{res:?}");
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let res = TargetDistribution::new(vec![
            MixtureComponent::isotropic(vec![0.0], 1.0, 0.5),
            MixtureComponent::isotropic(vec![1.0, 0.0], 1.0, 0.5),
        ]);
        assert!(matches!(res, Err(Error::DimensionMismatch { .. })), "{res:?}");
    }

    #[test]
    fn point_of_wrong_length_is_rejected() {
        let target = TargetDistribution::reference().unwrap();
        assert!(matches!(
            target.density(&[1.0, 2.0, 3.0]),
            Err(Error::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn cdf_of_isotropic_component_factorises() {
        let target = standard_normal_2d();
        let f = target.cdf(&[0.3, -0.7]).unwrap();
        assert_abs_diff_eq!(f, mvn::phi(0.3) * mvn::phi(-0.7), epsilon = 1e-14);
    }

    #[test]
    fn one_dimensional_cdf_is_closed_form() {
        let target =
            TargetDistribution::new(vec![MixtureComponent::isotropic(vec![1.0], 4.0, 1.0)])
                .unwrap();
        assert_abs_diff_eq!(target.cdf(&[1.0]).unwrap(), 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(target.cdf(&[3.0]).unwrap(), mvn::phi(1.0), epsilon = 1e-15);
    }

    #[test]
    fn batch_evaluation_matches_pointwise() {
        let target = TargetDistribution::reference().unwrap();
        let points = arr2(&[[0.0, 0.0], [5.9, 1.0], [2.0, -10.0], [-7.9, 1.2]]);
        let dens = target.density_batch(points.view()).unwrap();
        let cdfs = target.cdf_batch(points.view()).unwrap();
        for (i, row) in points.outer_iter().enumerate() {
            let row = row.to_vec();
            assert_eq!(dens[i], target.density(&row).unwrap());
            assert_eq!(cdfs[i], target.cdf(&row).unwrap());
        }
    }

    #[test]
    fn samples_reproduce_mixture_mean() {
        let target = TargetDistribution::reference().unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let samples = target.sample_n(30_000, &mut rng);
        let n = samples.len() as f64;
        let mean_x = samples.iter().map(|s| s[0]).sum::<f64>() / n;
        let mean_y = samples.iter().map(|s| s[1]).sum::<f64>() / n;
        // Exact mixture mean: ((4√3−1) + (−4√3−1) + 2) / 3 = 0, (1 + 1 − 10) / 3
        assert_abs_diff_eq!(mean_x, 0.0, epsilon = 0.15);
        assert_abs_diff_eq!(mean_y, -8.0 / 3.0, epsilon = 0.15);
    }
}
