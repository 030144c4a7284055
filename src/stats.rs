//! Running cross-moments and between-particle convergence statistics.

use ndarray::prelude::*;
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::trace::Trace;

/// Running estimate for prefix lengths `1..=N`.
pub type MomentSeries = Vec<f64>;

/// Running cross-moment `M(t) = (1/t) Σ_{s≤t} x_s[dim1] · x_s[dim2]` for every
/// particle of `trace`.
///
/// The running sum adds the products in the same order as the direct formula,
/// so each `M(t)` is bit-identical to recomputing the prefix sum from scratch.
pub fn compute_cross_moments(
    trace: &Trace,
    dim1: usize,
    dim2: usize,
) -> Result<BTreeMap<u64, MomentSeries>> {
    trace.check_dim(dim1)?;
    trace.check_dim(dim2)?;

    let series: BTreeMap<u64, MomentSeries> = trace
        .particles()
        .par_iter()
        .map(|(&id, samples)| (id, running_cross_moment(samples, dim1, dim2)))
        .collect();
    tracing::debug!(particles = series.len(), dim1, dim2, "computed cross moments");
    Ok(series)
}

fn running_cross_moment(samples: &[Vec<f64>], dim1: usize, dim2: usize) -> MomentSeries {
    let mut sum = 0.0;
    samples
        .iter()
        .enumerate()
        .map(|(i, x)| {
            sum += x[dim1] * x[dim2];
            sum / (i + 1) as f64
        })
        .collect()
}

/// Elementwise mean of the per-particle series, summed in ascending id order.
///
/// Every series must have the same length; nothing is truncated or padded.
pub fn compute_mean_across_particles(series: &BTreeMap<u64, MomentSeries>) -> Result<MomentSeries> {
    let len = series
        .values()
        .next()
        .map(Vec::len)
        .ok_or_else(|| Error::invalid("no particle series to average"))?;
    if let Some((&id, s)) = series.iter().find(|(_, s)| s.len() != len) {
        return Err(Error::LengthMismatch {
            id,
            expected: len,
            found: s.len(),
        });
    }

    let n = series.len() as f64;
    let mut total = vec![0.0; len];
    for s in series.values() {
        for (acc, v) in total.iter_mut().zip(s) {
            *acc += v;
        }
    }
    Ok(total.into_iter().map(|v| v / n).collect())
}

/// Per-particle `n × d` chains, all of the same length `n ≥ 2`, from at least
/// two particles.
fn equal_length_chains(trace: &Trace, what: &str) -> Result<Vec<Array2<f64>>> {
    let m = trace.n_particles();
    if m < 2 {
        return Err(Error::invalid(format!(
            "{what} needs at least 2 particles, got {m}"
        )));
    }
    let mut particles = trace.particles().iter();
    let n = particles.next().map(|(_, s)| s.len()).unwrap_or(0);
    if let Some((&id, s)) = particles.find(|(_, s)| s.len() != n) {
        return Err(Error::LengthMismatch {
            id,
            expected: n,
            found: s.len(),
        });
    }
    if n < 2 {
        return Err(Error::invalid(format!(
            "{what} needs at least 2 states per particle, got {n}"
        )));
    }

    let d = trace.dimension();
    Ok(trace
        .particles()
        .values()
        .map(|samples| Array2::from_shape_fn((n, d), |(i, k)| samples[i][k]))
        .collect())
}

/// Mean within-chain variance `W` and the pooled estimate
/// `var⁺ = (n−1)/n · W + B/n`, per dimension.
fn variance_terms(chains: &[Array2<f64>]) -> (Array1<f64>, Array1<f64>) {
    let m = chains.len();
    let (n, d) = chains[0].dim();
    // chains x params
    let mut mean = Array2::<f64>::zeros((m, d));
    let mut sm2 = Array2::<f64>::zeros((m, d));
    for (j, chain) in chains.iter().enumerate() {
        let chain_mean = chain.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let dev = chain - &chain_mean.view().insert_axis(Axis(0));
        let var = dev.mapv(|v| v * v).sum_axis(Axis(0)) / (n as f64 - 1.0);
        mean.row_mut(j).assign(&chain_mean);
        sm2.row_mut(j).assign(&var);
    }

    let n = n as f64;
    let mean_chain = mean.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
    let between = (&mean - &mean_chain.insert_axis(Axis(0)))
        .mapv(|v| v * v)
        .sum_axis(Axis(0))
        * (n / (m as f64 - 1.0));
    let within = sm2.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
    let var_plus = &within * ((n - 1.0) / n) + &between * (1.0 / n);
    (within, var_plus)
}

/// Gelman–Rubin potential scale reduction per feature dimension, treating every
/// particle as one chain.
///
/// With `m` particles of `n` states each: `W` is the mean within-particle
/// variance, `B = n/(m−1) Σ (meanⱼ − mean)²`, and `R̂ = sqrt(((n−1)/n · W + B/n) / W)`.
pub fn potential_scale_reduction(trace: &Trace) -> Result<Array1<f64>> {
    let chains = equal_length_chains(trace, "potential scale reduction")?;
    let (within, var_plus) = variance_terms(&chains);
    Ok((var_plus / within).mapv(f64::sqrt))
}

/// Multi-chain effective sample size per feature dimension.
///
/// Autocorrelations come from the variogram
/// `V_t = 1/(m(n−t)) Σⱼ Σ_{i≥t} (x_{i,j} − x_{i−t,j})²` as
/// `ρ_t = 1 − V_t / (2 var⁺)`, summed from lag 1 until the first negative one.
/// `ESS = m·n / (1 + 2 Σ ρ_t)`. Dimensions on which every state is equal give NaN.
pub fn effective_sample_size(trace: &Trace) -> Result<Array1<f64>> {
    let chains = equal_length_chains(trace, "effective sample size")?;
    let (_, var_plus) = variance_terms(&chains);
    let m = chains.len();
    let (n, d) = chains[0].dim();
    let total = (m * n) as f64;

    let ess: Vec<f64> = (0..d)
        .into_par_iter()
        .map(|k| {
            let vp = var_plus[k];
            if !(vp > 0.0) {
                return f64::NAN;
            }
            let mut rho_sum = 0.0;
            for t in 1..n {
                let sq: f64 = chains
                    .iter()
                    .map(|chain| {
                        let col = chain.column(k);
                        col.slice(s![t..])
                            .iter()
                            .zip(col.slice(s![..n - t]).iter())
                            .map(|(a, b)| (a - b).powi(2))
                            .sum::<f64>()
                    })
                    .sum();
                let rho = 1.0 - sq / ((m * (n - t)) as f64 * 2.0 * vp);
                if rho < 0.0 {
                    break;
                }
                rho_sum += rho;
            }
            total / (1.0 + 2.0 * rho_sum)
        })
        .collect();
    tracing::debug!(?ess, "effective sample size");
    Ok(Array1::from(ess))
}
