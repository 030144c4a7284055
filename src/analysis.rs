//! The full diagnostic pass over one parsed trace.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::AnalysisConfig;
use crate::distributions::TargetDistribution;
use crate::error::Result;
use crate::histogram::{build_2d, Histogram2D};
use crate::ks_test::{ks_statistic, KsResult};
use crate::stats::{
    compute_cross_moments, compute_mean_across_particles, effective_sample_size,
    potential_scale_reduction, MomentSeries,
};
use crate::trace::Trace;

const SUBSAMPLE_SEED: u64 = 42;

/// KS sample cap used by the command line tool unless overridden.
pub const DEFAULT_KS_SUBSAMPLE: usize = 5_000;

/// Every derived structure of one run.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub moments: BTreeMap<u64, MomentSeries>,
    pub mean_moment: MomentSeries,
    pub histogram: Histogram2D,
    pub ks: KsResult,
    /// `None` for a single-particle trace.
    pub rhat: Option<Vec<f64>>,
    /// `None` for a single-particle trace.
    pub ess: Option<Vec<f64>>,
    pub summary: Summary,
}

/// Scalar results, suitable for printing as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub n_particles: usize,
    pub n_records: usize,
    pub final_mean_moment: Option<f64>,
    pub histogram_total: u64,
    pub histogram_dropped: usize,
    pub ks_statistic: f64,
    pub ks_p_value: f64,
    pub ks_samples: usize,
    pub rhat: Option<Vec<f64>>,
    pub ess: Option<Vec<f64>>,
}

/// Picks `n` of `samples` with a fixed seed, or all of them when `n` is `None`
/// or not smaller than the pool.
pub fn subsample(samples: Vec<Vec<f64>>, n: Option<usize>) -> Vec<Vec<f64>> {
    match n {
        Some(n) if n < samples.len() => {
            let mut indices: Vec<usize> = (0..samples.len()).collect();
            indices.shuffle(&mut SmallRng::seed_from_u64(SUBSAMPLE_SEED));
            indices[..n].iter().map(|&i| samples[i].clone()).collect()
        }
        _ => samples,
    }
}

/// Runs moments, histogram, KS, R̂ and ESS on `trace`.
///
/// `ks_subsample` caps the number of pooled states used by the KS check, whose
/// cost grows quadratically with the sample count; `None` uses them all.
/// Particles of unequal length are an error. R̂ and ESS are only computed
/// with two or more particles.
pub fn analyze(
    trace: &Trace,
    target: &TargetDistribution,
    config: &AnalysisConfig,
    ks_subsample: Option<usize>,
) -> Result<Analysis> {
    config.check_particle_count(trace);

    let [m1, m2] = config.moment_dims;
    let moments = compute_cross_moments(trace, m1, m2)?;
    let mean_moment = compute_mean_across_particles(&moments)?;

    let [h1, h2] = config.histogram_dims;
    let histogram = build_2d(&trace.pooled_points(h1, h2)?, &config.histogram)?;
    if histogram.dropped > 0 {
        tracing::warn!(
            dropped = histogram.dropped,
            "states outside the histogram range were not counted"
        );
    }

    let samples = subsample(trace.pooled_samples(), ks_subsample);
    let ks = ks_statistic(&samples, |x| target.cdf(x))?;

    let (rhat, ess) = if trace.n_particles() >= 2 {
        (
            Some(potential_scale_reduction(trace)?.to_vec()),
            Some(effective_sample_size(trace)?.to_vec()),
        )
    } else {
        tracing::debug!("single particle, no between-particle statistics");
        (None, None)
    };

    let summary = Summary {
        n_particles: trace.n_particles(),
        n_records: trace.n_records(),
        final_mean_moment: mean_moment.last().copied(),
        histogram_total: histogram.total(),
        histogram_dropped: histogram.dropped,
        ks_statistic: ks.statistic,
        ks_p_value: ks.p_value,
        ks_samples: ks.n,
        rhat: rhat.clone(),
        ess: ess.clone(),
    };
    tracing::info!(
        particles = summary.n_particles,
        records = summary.n_records,
        ks = summary.ks_statistic,
        p_value = summary.ks_p_value,
        "analysis finished"
    );

    Ok(Analysis {
        moments,
        mean_moment,
        histogram,
        ks,
        rhat,
        ess,
        summary,
    })
}
