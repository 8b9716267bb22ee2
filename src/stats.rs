use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Streaming mean and standard deviation (Welford's algorithm).
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: if self.n_vals > 0 { self.mean } else { f64::NAN },
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

/// What to do with missing (NaN) values.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Drop missing values before computing statistics.
    Skip,
    /// Fail on the first missing value.
    Reject,
}

/// Dispersion statistics of a sample of parasite burdens.
///
/// Statistics that are undefined for the sample are `None`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    /// Number of values used.
    pub n: usize,
    pub mean: f64,
    /// Sample variance.
    pub var: f64,
    /// Variance-to-mean ratio, undefined when the mean is zero.
    pub dispersion: Option<f64>,
    /// Negative-binomial k, undefined unless the sample is over-dispersed.
    pub k: Option<f64>,
    /// Gini coefficient, undefined when all values are zero.
    pub gini: Option<f64>,
    /// Share of the total held by the largest values.
    pub top_share: Option<f64>,
    /// Standard error of the mean of a correlated series.
    pub sem: Option<f64>,
    /// Fraction of the series the marginal standard error rule would discard.
    pub mser_burn_in: f64,
}

impl Aggregate {
    /// Compute all statistics of `vals`.
    ///
    /// `top_fraction` selects how many of the largest values enter
    /// [`Aggregate::top_share`] (0.2 tests the 80:20 rule).
    ///
    /// # Errors
    /// Returns an error if fewer than two values remain, if a value is
    /// negative or infinite, or if a value is missing under
    /// [`MissingPolicy::Reject`].
    pub fn from_values(vals: &[f64], missing: MissingPolicy, top_fraction: f64) -> Result<Self> {
        let mut kept = Vec::with_capacity(vals.len());
        for (i_val, &val) in vals.iter().enumerate() {
            if val.is_nan() {
                match missing {
                    MissingPolicy::Skip => continue,
                    MissingPolicy::Reject => bail!("value {i_val} is missing"),
                }
            }
            if val < 0.0 || val.is_infinite() {
                bail!("value {i_val} must be finite and non-negative, but is {val}");
            }
            kept.push(val);
        }

        let n = kept.len();
        if n < 2 {
            bail!("insufficient data: at least 2 values are required, but {n} remain");
        }

        let mean = compute_mean(&kept);
        let var = compute_var(&kept);

        let dispersion = (mean > 0.0).then(|| var / mean);
        let k = (var > mean).then(|| mean.powi(2) / (var - mean));

        let sem = compute_sem(&kept);
        let mser_burn_in = compute_opt_i_equil(&kept) as f64 / n as f64;

        Ok(Self {
            n,
            mean,
            var,
            dispersion,
            k,
            gini: compute_gini(&kept),
            top_share: compute_top_share(&kept, top_fraction),
            sem: sem.is_finite().then_some(sem),
            mser_burn_in,
        })
    }

    /// Convenience wrapper for integer burdens.
    pub fn from_counts(counts: &[u64], top_fraction: f64) -> Result<Self> {
        let vals: Vec<f64> = counts.iter().map(|&count| count as f64).collect();
        Self::from_values(&vals, MissingPolicy::Reject, top_fraction)
    }
}

fn compute_mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

fn compute_var(vals: &[f64]) -> f64 {
    let n_vals = vals.len();
    if n_vals < 2 {
        return f64::NAN;
    }
    let mean = compute_mean(vals);
    vals.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / (n_vals - 1) as f64
}

/// Gini coefficient of non-negative values: `(2 Σ i x_(i) / Σ x − (m + 1)) / m`.
fn compute_gini(vals: &[f64]) -> Option<f64> {
    let sum: f64 = vals.iter().sum();
    if sum <= 0.0 {
        return None;
    }
    let mut sorted = vals.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n_vals = sorted.len() as f64;
    let rank_sum: f64 = sorted
        .iter()
        .enumerate()
        .map(|(idx, &val)| (idx + 1) as f64 * val)
        .sum();
    Some((2.0 * rank_sum / sum - (n_vals + 1.0)) / n_vals)
}

/// Share of the total held by the `ceil(fraction * m)` largest values.
fn compute_top_share(vals: &[f64], fraction: f64) -> Option<f64> {
    let sum: f64 = vals.iter().sum();
    if sum <= 0.0 {
        return None;
    }
    let mut sorted = vals.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let n_top = ((fraction * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    Some(sorted[..n_top].iter().sum::<f64>() / sum)
}

/// Compute the standard error of the mean (SEM) using the Flyvbjerg-Petersen blocking method
fn compute_sem(vals: &[f64]) -> f64 {
    let mut blk_vals = vals.to_vec();
    let mut n_vals = blk_vals.len();
    let mut sem2_ests = Vec::new();
    let mut sem2_errs = Vec::new();

    while n_vals >= 2 {
        let sem2_est = compute_var(&blk_vals) / n_vals as f64;
        let sem2_err = sem2_est * (2.0 / (n_vals as f64 - 1.0)).sqrt();
        sem2_ests.push(sem2_est);
        sem2_errs.push(sem2_err);

        blk_vals = blk_vals
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect();
        n_vals = blk_vals.len();
    }

    // First blocking level that is not significantly below any later one.
    for (idx, &sem2_est) in sem2_ests.iter().enumerate() {
        let max_low = sem2_ests[idx..]
            .iter()
            .zip(sem2_errs[idx..].iter())
            .map(|(s, e)| s - e)
            .fold(f64::NEG_INFINITY, f64::max);

        if sem2_est >= max_low {
            return sem2_est.sqrt();
        }
    }

    sem2_ests.last().copied().unwrap_or(f64::NAN).sqrt()
}

/// Compute the optimal equilibration index using the marginal standard error rule
fn compute_opt_i_equil(vals: &[f64]) -> usize {
    let n_vals = vals.len();
    let mut min_mse = f64::INFINITY;
    let mut opt_i_equil = 0;
    let n_idxs = n_vals.ilog2() + 1;

    for idx in 0..n_idxs {
        let i_equil = n_vals / 2_usize.pow(n_idxs - idx);
        let tail = &vals[i_equil..];
        let n_tail = tail.len();
        if n_tail < 2 {
            continue;
        }

        let mse = compute_var(tail) * (n_tail - 1) as f64 / n_tail.pow(2) as f64;

        if mse < min_mse {
            min_mse = mse;
            opt_i_equil = i_equil;
        }
    }

    opt_i_equil
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(vals: &[f64]) -> Aggregate {
        Aggregate::from_values(vals, MissingPolicy::Reject, 0.2).expect("valid sample")
    }

    #[test]
    fn mean_and_sample_variance() {
        let res = agg(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(res.n, 8);
        assert!((res.mean - 5.0).abs() < 1e-12);
        assert!((res.var - 32.0 / 7.0).abs() < 1e-12);
        assert!((res.dispersion.unwrap() - 32.0 / 35.0).abs() < 1e-12);
        // Under-dispersed: k undefined.
        assert_eq!(res.k, None);
    }

    #[test]
    fn k_of_over_dispersed_sample() {
        let res = agg(&[0.0, 0.0, 0.0, 10.0]);
        // mean 2.5, var 25
        assert!((res.k.unwrap() - 6.25 / 22.5).abs() < 1e-12);
        assert!((res.dispersion.unwrap() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn k_undefined_when_variance_equals_mean() {
        let res = agg(&[1.0, 3.0]);
        assert_eq!(res.mean, 2.0);
        assert_eq!(res.var, 2.0);
        assert_eq!(res.k, None);
        assert_eq!(res.dispersion, Some(1.0));
    }

    #[test]
    fn dispersion_undefined_for_zero_mean() {
        let res = agg(&[0.0, 0.0, 0.0]);
        assert_eq!(res.mean, 0.0);
        assert_eq!(res.dispersion, None);
        assert_eq!(res.k, None);
        assert_eq!(res.gini, None);
        assert_eq!(res.top_share, None);
    }

    #[test]
    fn gini_values() {
        assert_eq!(agg(&[5.0, 5.0, 5.0, 5.0]).gini, Some(0.0));
        let gini = agg(&[0.0, 0.0, 0.0, 10.0]).gini.unwrap();
        assert!((gini - 0.75).abs() < 1e-12);
        // Order does not matter.
        let gini = agg(&[10.0, 0.0, 0.0, 0.0]).gini.unwrap();
        assert!((gini - 0.75).abs() < 1e-12);
    }

    #[test]
    fn top_share_of_skewed_sample() {
        let mut vals = vec![1.0; 8];
        vals.extend([46.0, 46.0]);
        // The top two values hold 92 of 100.
        let share = agg(&vals).top_share.unwrap();
        assert!((share - 0.92).abs() < 1e-12);

        let share = agg(&[3.0, 3.0, 3.0, 3.0, 3.0]).top_share.unwrap();
        assert!((share - 0.2).abs() < 1e-12);
    }

    #[test]
    fn insufficient_data() {
        assert!(Aggregate::from_values(&[], MissingPolicy::Reject, 0.2).is_err());
        assert!(Aggregate::from_values(&[3.0], MissingPolicy::Reject, 0.2).is_err());
        assert!(Aggregate::from_values(&[3.0, f64::NAN], MissingPolicy::Skip, 0.2).is_err());
    }

    #[test]
    fn missing_value_policy() {
        let vals = [1.0, f64::NAN, 3.0];
        assert!(Aggregate::from_values(&vals, MissingPolicy::Reject, 0.2).is_err());
        let res = Aggregate::from_values(&vals, MissingPolicy::Skip, 0.2).expect("two values");
        assert_eq!(res.n, 2);
        assert_eq!(res.mean, 2.0);
    }

    #[test]
    fn rejects_negative_and_infinite_values() {
        assert!(Aggregate::from_values(&[1.0, -1.0], MissingPolicy::Skip, 0.2).is_err());
        assert!(Aggregate::from_values(&[1.0, f64::INFINITY], MissingPolicy::Skip, 0.2).is_err());
    }

    #[test]
    fn counts_wrapper() {
        let res = Aggregate::from_counts(&[0, 0, 0, 10], 0.2).expect("valid counts");
        assert!((res.gini.unwrap() - 0.75).abs() < 1e-12);
        assert_eq!(res.top_share, Some(1.0));
    }

    #[test]
    fn sem_of_constant_series_is_zero() {
        let res = agg(&[4.0; 64]);
        assert_eq!(res.sem, Some(0.0));
    }

    #[test]
    fn mser_discards_transient() {
        // Transient decay followed by a flat plateau.
        let mut vals: Vec<f64> = (0..32).map(|i| 100.0 - 3.0 * i as f64).collect();
        vals.extend((0..96).map(|i| 5.0 + (i % 2) as f64));
        let burn_in = agg(&vals).mser_burn_in;
        assert!(burn_in >= 0.25, "burn-in fraction {burn_in}");
    }

    #[test]
    fn accumulator_report() {
        let mut acc = Accumulator::new();
        for val in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.add(val);
        }
        let report = acc.report();
        assert_eq!(report.n_vals, 8);
        assert!((report.mean - 5.0).abs() < 1e-12);
        assert!((report.std_dev - (32.0_f64 / 7.0).sqrt()).abs() < 1e-12);

        assert!(Accumulator::new().report().mean.is_nan());
    }
}
