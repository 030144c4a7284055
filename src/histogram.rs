//! Fixed-range 2D histograms of particle positions.
//!
//! Bins are half-open `[edge_k, edge_{k+1})` except the last one on each axis,
//! which is closed so a value exactly at `hi` is counted. Points outside
//! `[lo, hi]` on either axis are dropped.

use ndarray::{Array1, Array2};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};

use crate::distributions::TargetDistribution;
use crate::error::{Error, Result};

/// Square binning grid: `bins × bins` cells over `[lo, hi]²`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramConfig {
    pub range: [f64; 2],
    pub bins: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            range: [-30.0, 30.0],
            bins: 100,
        }
    }
}

impl HistogramConfig {
    pub fn validate(&self) -> Result<()> {
        let [lo, hi] = self.range;
        if self.bins == 0 {
            return Err(Error::invalid("histogram needs at least one bin"));
        }
        if !(lo.is_finite() && hi.is_finite()) || lo >= hi {
            return Err(Error::invalid(format!(
                "histogram range [{lo}, {hi}] is empty or not finite"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2D {
    /// Counts indexed `[x_bin, y_bin]`.
    pub counts: Array2<u64>,
    /// `bins + 1` edges, shared by both axes.
    pub edges: Array1<f64>,
    /// Points that fell outside the range.
    pub dropped: usize,
}

impl Histogram2D {
    pub fn bins(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn total(&self) -> u64 {
        self.counts.sum()
    }

    pub fn max_count(&self) -> u64 {
        self.counts.max().copied().unwrap_or(0)
    }

    pub fn bin_width(&self) -> f64 {
        self.edges[1] - self.edges[0]
    }

    pub fn bin_centers(&self) -> Array1<f64> {
        let n = self.bins();
        Array1::from_shape_fn(n, |k| 0.5 * (self.edges[k] + self.edges[k + 1]))
    }

    /// Counts a perfect sampler would produce for `n` draws from `target`,
    /// approximating each cell's mass by `density(center) · area`.
    pub fn expected_counts(&self, target: &TargetDistribution, n: usize) -> Result<Array2<f64>> {
        if target.dim() != 2 {
            return Err(Error::DimensionMismatch {
                expected: 2,
                found: target.dim(),
            });
        }
        let centers = self.bin_centers();
        let area = self.bin_width().powi(2);
        let bins = self.bins();
        let mut expected = Array2::<f64>::zeros((bins, bins));
        for ((i, j), cell) in expected.indexed_iter_mut() {
            *cell = n as f64 * area * target.density(&[centers[i], centers[j]])?;
        }
        Ok(expected)
    }
}

/// Bin edges `lo + k·(hi−lo)/bins` for `k` in `0..=bins`, with the last edge
/// pinned to `hi`.
pub fn bin_edges(config: &HistogramConfig) -> Array1<f64> {
    let [lo, hi] = config.range;
    let bins = config.bins;
    let width = (hi - lo) / bins as f64;
    Array1::from_shape_fn(bins + 1, |k| if k == bins { hi } else { lo + k as f64 * width })
}

/// The bin holding `v`, or `None` when `v` is outside `range` or NaN.
fn bin_index(v: f64, range: [f64; 2], edges: &Array1<f64>) -> Option<usize> {
    let bins = edges.len() - 1;
    let [lo, hi] = range;
    if !(lo..=hi).contains(&v) {
        return None;
    }
    if v == hi {
        return Some(bins - 1);
    }
    let mut k = (((v - lo) / (hi - lo)) * bins as f64) as usize;
    k = k.min(bins - 1);
    // Agree with the stored edges where the division rounds across a boundary.
    if v < edges[k] {
        k -= 1;
    } else if k + 1 < bins && v >= edges[k + 1] {
        k += 1;
    }
    Some(k)
}

/// Bins 2D points into an equal-width `bins × bins` grid over `[lo, hi]²`.
pub fn build_2d(points: &[[f64; 2]], config: &HistogramConfig) -> Result<Histogram2D> {
    config.validate()?;
    let edges = bin_edges(config);
    let mut counts = Array2::<u64>::zeros((config.bins, config.bins));
    let mut dropped = 0;
    for &[x, y] in points {
        match (
            bin_index(x, config.range, &edges),
            bin_index(y, config.range, &edges),
        ) {
            (Some(i), Some(j)) => counts[[i, j]] += 1,
            _ => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, total = points.len(), "points outside histogram range");
    }
    Ok(Histogram2D {
        counts,
        edges,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::MixtureComponent;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn config(lo: f64, hi: f64, bins: usize) -> HistogramConfig {
        HistogramConfig {
            range: [lo, hi],
            bins,
        }
    }

    #[test]
    fn edges_are_equally_spaced() {
        let edges = bin_edges(&config(-1.0, 1.0, 4));
        assert_eq!(edges.to_vec(), vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn counts_sum_to_in_range_points() {
        let mut rng = SmallRng::seed_from_u64(42);
        // Some points fall outside [-1, 1] on purpose.
        let points: Vec<[f64; 2]> = (0..100)
            .map(|_| [rng.gen_range(-1.2..1.2), rng.gen_range(-1.2..1.2)])
            .collect();
        let inside = points
            .iter()
            .filter(|p| p.iter().all(|v| (-1.0..=1.0).contains(v)))
            .count();
        let hist = build_2d(&points, &config(-1.0, 1.0, 10)).unwrap();
        assert_eq!(hist.total() as usize, inside);
        assert_eq!(hist.dropped, points.len() - inside);
        assert_eq!(hist.counts.dim(), (10, 10));
    }

    #[test]
    fn uniform_points_all_inside() {
        let mut rng = SmallRng::seed_from_u64(3);
        let points: Vec<[f64; 2]> = (0..100)
            .map(|_| [rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)])
            .collect();
        let hist = build_2d(&points, &config(0.0, 10.0, 10)).unwrap();
        assert_eq!(hist.total(), 100);
        assert_eq!(hist.dropped, 0);
    }

    #[test]
    fn upper_edge_goes_to_last_bin_and_bins_are_half_open() {
        let points = [[1.0, 1.0], [0.0, 0.0], [0.5, 0.25], [1.0000001, 0.5]];
        let hist = build_2d(&points, &config(0.0, 1.0, 4)).unwrap();
        assert_eq!(hist.counts[[3, 3]], 1);
        assert_eq!(hist.counts[[0, 0]], 1);
        // 0.5 is the left edge of bin 2; 0.25 the left edge of bin 1.
        assert_eq!(hist.counts[[2, 1]], 1);
        assert_eq!(hist.total(), 3);
        assert_eq!(hist.dropped, 1);
    }

    #[test]
    fn configured_bounds_decide_membership() {
        // 49 steps of 1/49 land just below 1.0.
        let hist = build_2d(&[[1.0, 1.0]], &config(0.0, 1.0, 49)).unwrap();
        assert_eq!(hist.edges[49], 1.0);
        assert_eq!(hist.counts[[48, 48]], 1);
        assert_eq!(hist.dropped, 0);

        // Here the computed last edge would overshoot 0.7.
        let above = f64::from_bits(0.7f64.to_bits() + 1);
        let hist = build_2d(&[[above, 0.0], [0.7, 0.0]], &config(-2.5, 0.7, 7)).unwrap();
        assert_eq!(hist.edges[7], 0.7);
        assert_eq!(hist.total(), 1);
        assert_eq!(hist.dropped, 1);
        assert_eq!(hist.counts.row(6).sum(), 1);
    }

    #[test]
    fn nan_points_are_dropped() {
        let hist = build_2d(&[[f64::NAN, 0.0], [0.0, 0.0]], &config(-1.0, 1.0, 2)).unwrap();
        assert_eq!(hist.total(), 1);
        assert_eq!(hist.dropped, 1);
    }

    #[test]
    fn invalid_configuration() {
        assert!(matches!(
            build_2d(&[], &config(0.0, 1.0, 0)),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            build_2d(&[], &config(1.0, 1.0, 5)),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn expected_counts_integrate_to_sample_size() {
        let target =
            TargetDistribution::new(vec![MixtureComponent::isotropic(vec![0.0, 0.0], 1.0, 1.0)])
                .unwrap();
        let hist = build_2d(&[], &config(-8.0, 8.0, 160)).unwrap();
        let expected = hist.expected_counts(&target, 1_000).unwrap();
        assert_abs_diff_eq!(expected.sum(), 1_000.0, epsilon = 1.0);
        assert_eq!(hist.max_count(), 0);
    }
}
