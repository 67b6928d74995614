//! Paired significance tests between two models' daily returns.
//!
//! Daily returns are the consecutive percentage changes of each NAV series.
//! The two series are aligned by position and truncated to the shorter one.

use crate::analytics::{mean, period_returns};
use crate::batch::find_result;
use crate::engine::BacktestResult;
use crate::error::{BacktestError, Result};
use crate::panel::quantile;
use crate::policy::PolicyKind;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use tracing::{debug, info};

/// Largest sample for which the exact signed-rank distribution is used.
pub const WILCOXON_EXACT_MAX: usize = 50;

/// Default bootstrap draws.
pub const DEFAULT_N_BOOT: usize = 10_000;

/// Settings for the statistical comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_model_a")]
    pub model_a: String,
    #[serde(default = "default_model_b")]
    pub model_b: String,
    #[serde(default = "default_capital")]
    pub capital: f64,
    #[serde(default = "default_n_boot")]
    pub n_boot: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_model_a() -> String {
    PolicyKind::MomentumTilt.label().to_string()
}

fn default_model_b() -> String {
    PolicyKind::EqualWeight.label().to_string()
}

fn default_capital() -> f64 {
    500.0
}

fn default_n_boot() -> usize {
    DEFAULT_N_BOOT
}

fn default_seed() -> u64 {
    42
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            model_a: default_model_a(),
            model_b: default_model_b(),
            capital: default_capital(),
            n_boot: default_n_boot(),
            seed: default_seed(),
        }
    }
}

/// Outcome of a two-sided paired t test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    pub statistic: f64,
    pub p_value: f64,
    pub df: f64,
}

/// Outcome of a two-sided Wilcoxon signed-rank test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WilcoxonTest {
    /// min(W+, W-)
    pub statistic: f64,
    pub p_value: f64,
    /// Non-zero differences used.
    pub n: usize,
    /// True when the exact null distribution was used.
    pub exact: bool,
}

/// One row of the statistical tests table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub model_a: String,
    pub model_b: String,
    pub capital: f64,
    pub n: usize,
    pub t_stat: f64,
    pub p_val: f64,
    pub wilcoxon_stat: f64,
    pub p_wilcoxon: f64,
}

/// Percentile interval of the bootstrapped cumulative-return difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapInterval {
    pub model_a: String,
    pub model_b: String,
    pub capital: f64,
    pub n_boot: usize,
    /// Difference on the original sample.
    pub observed: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Daily returns of `model_a` and `model_b` at `capital`, aligned by position.
pub fn paired_returns(
    results: &[BacktestResult],
    model_a: &str,
    model_b: &str,
    capital: f64,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let lookup = |model: &str| {
        find_result(results, model, capital).ok_or_else(|| {
            BacktestError::DataError(format!(
                "No results for model {} at capital {}",
                model, capital
            ))
        })
    };
    let mut a = period_returns(&lookup(model_a)?.navs());
    let mut b = period_returns(&lookup(model_b)?.navs());

    let n = a.len().min(b.len());
    if a.len() != b.len() {
        debug!(
            "Truncating paired returns to {} ({} has {}, {} has {})",
            n,
            model_a,
            a.len(),
            model_b,
            b.len()
        );
    }
    a.truncate(n);
    b.truncate(n);
    Ok((a, b))
}

fn sample_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Paired Student t test on `a - b`, df = n - 1.
pub fn paired_t_test(a: &[f64], b: &[f64]) -> Result<TTest> {
    check_paired(a, b, 2)?;

    let diffs: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    let n = diffs.len() as f64;
    let statistic = mean(&diffs) / (sample_std(&diffs) / n.sqrt());
    let df = n - 1.0;

    let p_value = if statistic.is_nan() {
        f64::NAN
    } else {
        let dist = StudentsT::new(0.0, 1.0, df)
            .map_err(|e| BacktestError::InvalidInput(format!("t distribution: {}", e)))?;
        (2.0 * (1.0 - dist.cdf(statistic.abs()))).min(1.0)
    };

    Ok(TTest {
        statistic,
        p_value,
        df,
    })
}

/// Wilcoxon signed-rank test on `a - b`.
///
/// Zero differences are dropped. Without ties and with at most
/// [`WILCOXON_EXACT_MAX`] differences the exact null distribution is used,
/// otherwise the normal approximation with tie correction.
pub fn wilcoxon_signed_rank(a: &[f64], b: &[f64]) -> Result<WilcoxonTest> {
    check_paired(a, b, 1)?;

    let diffs: Vec<f64> = a
        .iter()
        .zip(b)
        .map(|(x, y)| x - y)
        .filter(|d| *d != 0.0)
        .collect();
    let n = diffs.len();
    if n == 0 {
        return Err(BacktestError::InsufficientData {
            required: 1,
            available: 0,
        });
    }

    let abs: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
    let (ranks, tie_sizes) = average_ranks(&abs);

    let w_plus: f64 = diffs
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| r)
        .sum();
    let total = (n * (n + 1)) as f64 / 2.0;
    let statistic = w_plus.min(total - w_plus);

    let has_ties = tie_sizes.iter().any(|&t| t > 1);
    if n <= WILCOXON_EXACT_MAX && !has_ties {
        let p_value = (2.0 * exact_signed_rank_cdf(n, statistic)).min(1.0);
        return Ok(WilcoxonTest {
            statistic,
            p_value,
            n,
            exact: true,
        });
    }

    let nf = n as f64;
    let expected = nf * (nf + 1.0) / 4.0;
    let tie_term: f64 = tie_sizes
        .iter()
        .map(|&t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum::<f64>();
    let variance = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_term / 48.0;

    let p_value = if variance > 0.0 {
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| BacktestError::InvalidInput(format!("normal distribution: {}", e)))?;
        let z = (statistic - expected) / variance.sqrt();
        (2.0 * normal.cdf(-z.abs())).min(1.0)
    } else {
        f64::NAN
    };

    Ok(WilcoxonTest {
        statistic,
        p_value,
        n,
        exact: false,
    })
}

fn check_paired(a: &[f64], b: &[f64], required: usize) -> Result<()> {
    if a.len() != b.len() {
        return Err(BacktestError::InvalidInput(format!(
            "Paired samples differ in length: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    if a.len() < required {
        return Err(BacktestError::InsufficientData {
            required,
            available: a.len(),
        });
    }
    Ok(())
}

/// 1-based ranks with ties sharing their average rank, plus tie group sizes.
fn average_ranks(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));

    let mut ranks = vec![0.0; values.len()];
    let mut tie_sizes = Vec::new();
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1..=end
        let avg = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg;
        }
        tie_sizes.push(end - start);
        start = end;
    }
    (ranks, tie_sizes)
}

/// P(W <= w) under the null for `n` untied non-zero differences.
fn exact_signed_rank_cdf(n: usize, w: f64) -> f64 {
    let max_sum = n * (n + 1) / 2;
    // counts[s] = number of rank subsets summing to s
    let mut counts = vec![0.0_f64; max_sum + 1];
    counts[0] = 1.0;
    for rank in 1..=n {
        for s in (rank..=max_sum).rev() {
            counts[s] += counts[s - rank];
        }
    }

    let limit = w.floor().max(0.0) as usize;
    let below: f64 = counts.iter().take(limit.min(max_sum) + 1).sum();
    below / 2f64.powi(n as i32)
}

/// Run both paired tests for `model_a` against `model_b` at `capital`.
pub fn paired_tests(
    results: &[BacktestResult],
    model_a: &str,
    model_b: &str,
    capital: f64,
) -> Result<TestResult> {
    let (a, b) = paired_returns(results, model_a, model_b, capital)?;
    let t = paired_t_test(&a, &b)?;
    let w = wilcoxon_signed_rank(&a, &b)?;

    info!(
        "{} vs {} at capital {}: t={:.4} (p={:.4}), W={} (p={:.4})",
        model_a, model_b, capital, t.statistic, t.p_value, w.statistic, w.p_value
    );

    Ok(TestResult {
        model_a: model_a.to_string(),
        model_b: model_b.to_string(),
        capital,
        n: a.len(),
        t_stat: t.statistic,
        p_val: t.p_value,
        wilcoxon_stat: w.statistic,
        p_wilcoxon: w.p_value,
    })
}

fn cumulative(returns: &[f64], idx: &[usize]) -> f64 {
    idx.iter().map(|&i| 1.0 + returns[i]).product::<f64>() - 1.0
}

/// 95% percentile interval of `cum(model_a) - cum(model_b)`.
///
/// Each draw resamples day indices with replacement, the same indices for
/// both models, and compounds the resampled daily returns:
/// `cum = prod(1 + r[i]) - 1`. The statistic is a compounded return, not a
/// product of resampled NAV levels, so it stays on the same scale as
/// `PerformanceMetrics::cumulative_return` whatever the capital level.
pub fn bootstrap_cum_diff(
    results: &[BacktestResult],
    model_a: &str,
    model_b: &str,
    capital: f64,
    n_boot: usize,
    seed: u64,
) -> Result<BootstrapInterval> {
    if n_boot == 0 {
        return Err(BacktestError::InvalidInput(
            "Bootstrap needs at least one draw".to_string(),
        ));
    }
    let (a, b) = paired_returns(results, model_a, model_b, capital)?;
    let n = a.len();
    if n == 0 {
        return Err(BacktestError::InsufficientData {
            required: 1,
            available: 0,
        });
    }

    let all: Vec<usize> = (0..n).collect();
    let observed = cumulative(&a, &all) - cumulative(&b, &all);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut idx = vec![0usize; n];
    let mut diffs: Vec<f64> = (0..n_boot)
        .map(|_| {
            for slot in idx.iter_mut() {
                *slot = rng.gen_range(0..n);
            }
            cumulative(&a, &idx) - cumulative(&b, &idx)
        })
        .collect();
    diffs.sort_by(|x, y| x.total_cmp(y));

    let interval = BootstrapInterval {
        model_a: model_a.to_string(),
        model_b: model_b.to_string(),
        capital,
        n_boot,
        observed,
        lower: quantile(&diffs, 0.025),
        upper: quantile(&diffs, 0.975),
    };
    info!(
        "95% CI for cum_return {} - {}: [{:.3}, {:.3}]",
        model_a, model_b, interval.lower, interval.upper
    );
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NavRecord;
    use chrono::NaiveDate;

    fn result(model: &str, capital: f64, returns: &[f64]) -> BacktestResult {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut records = vec![NavRecord {
            date: start,
            nav: capital,
            turnover: 0.0,
        }];
        let mut nav = capital;
        for (i, r) in returns.iter().enumerate() {
            nav *= 1.0 + r;
            records.push(NavRecord {
                date: start + chrono::Duration::days(i as i64),
                nav,
                turnover: 0.0,
            });
        }
        BacktestResult {
            model: model.to_string(),
            starting_capital: capital,
            slippage_rate: 0.0,
            records,
        }
    }

    #[test]
    fn test_bootstrap_compounds_returns_not_nav_levels() {
        // Constant daily returns: every resample compounds to the same value
        let results = vec![
            result("momentum_tilt", 5000.0, &[0.01; 4]),
            result("equal_weight", 5000.0, &[0.0; 4]),
        ];
        let ci = bootstrap_cum_diff(&results, "momentum_tilt", "equal_weight", 5000.0, 200, 7)
            .unwrap();
        let expected = 1.01f64.powi(4) - 1.0;
        assert!((ci.observed - expected).abs() < 1e-9);
        assert!((ci.lower - expected).abs() < 1e-9);
        assert!((ci.upper - expected).abs() < 1e-9);
    }

    #[test]
    fn test_t_test_known_value() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [0.0; 5];
        let t = paired_t_test(&a, &b).unwrap();
        assert!((t.statistic - 4.242640687).abs() < 1e-6);
        assert_eq!(t.df, 4.0);
        assert!((t.p_value - 0.01324).abs() < 1e-3);
    }

    #[test]
    fn test_t_test_identical_is_nan() {
        let a = [0.01, 0.02, 0.03];
        let t = paired_t_test(&a, &a).unwrap();
        assert!(t.statistic.is_nan());
        assert!(t.p_value.is_nan());
    }

    #[test]
    fn test_t_test_needs_two() {
        assert!(matches!(
            paired_t_test(&[1.0], &[0.0]),
            Err(BacktestError::InsufficientData { .. })
        ));
        assert!(paired_t_test(&[1.0, 2.0], &[0.0]).is_err());
    }

    #[test]
    fn test_wilcoxon_exact_all_positive() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let w = wilcoxon_signed_rank(&a, &[0.0; 5]).unwrap();
        assert!(w.exact);
        assert_eq!(w.statistic, 0.0);
        assert!((w.p_value - 0.0625).abs() < 1e-12);
    }

    #[test]
    fn test_wilcoxon_exact_mixed_signs() {
        let a = [1.0, -2.0, 3.0, 4.0, 5.0];
        let w = wilcoxon_signed_rank(&a, &[0.0; 5]).unwrap();
        assert_eq!(w.statistic, 2.0);
        assert!((w.p_value - 6.0 / 32.0).abs() < 1e-12);
    }

    #[test]
    fn test_wilcoxon_drops_zero_differences() {
        let a = [1.0, 2.0, 0.0, 3.0];
        let w = wilcoxon_signed_rank(&a, &[0.0; 4]).unwrap();
        assert_eq!(w.n, 3);
        assert!((w.p_value - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_wilcoxon_ties_use_normal() {
        let a = [1.0, 1.0, 2.0, -3.0, 4.0, 4.0];
        let w = wilcoxon_signed_rank(&a, &[0.0; 6]).unwrap();
        assert!(!w.exact);
        assert!(w.p_value > 0.0 && w.p_value <= 1.0);
    }

    #[test]
    fn test_wilcoxon_all_zero_fails() {
        assert!(wilcoxon_signed_rank(&[1.0, 2.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_average_ranks() {
        let (ranks, ties) = average_ranks(&[3.0, 1.0, 3.0, 2.0]);
        assert_eq!(ranks, vec![3.5, 1.0, 3.5, 2.0]);
        assert_eq!(ties, vec![1, 1, 2]);
    }

    #[test]
    fn test_exact_cdf_sums_to_one() {
        assert!((exact_signed_rank_cdf(6, 21.0) - 1.0).abs() < 1e-12);
        assert!((exact_signed_rank_cdf(3, 0.0) - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_paired_returns_alignment() {
        let results = vec![
            result("momentum_tilt", 500.0, &[0.01, 0.02, -0.01]),
            result("equal_weight", 500.0, &[0.0, 0.01]),
        ];
        let (a, b) = paired_returns(&results, "momentum_tilt", "equal_weight", 500.0).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert!((a[1] - 0.02).abs() < 1e-12);
        assert!((b[1] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_paired_tests_missing_model() {
        let results = vec![result("equal_weight", 500.0, &[0.01, 0.02])];
        assert!(paired_tests(&results, "momentum_tilt", "equal_weight", 500.0).is_err());
        assert!(paired_tests(&results, "equal_weight", "equal_weight", 2500.0).is_err());
    }

    #[test]
    fn test_paired_tests_row() {
        let results = vec![
            result("momentum_tilt", 500.0, &[0.02, 0.01, 0.03, -0.01, 0.02]),
            result("equal_weight", 500.0, &[0.01, 0.00, 0.01, -0.02, 0.00]),
        ];
        let row = paired_tests(&results, "momentum_tilt", "equal_weight", 500.0).unwrap();
        assert_eq!(row.n, 5);
        assert!(row.t_stat > 0.0);
        assert!(row.p_val > 0.0 && row.p_val < 1.0);
        assert!(row.p_wilcoxon > 0.0 && row.p_wilcoxon <= 1.0);
    }

    #[test]
    fn test_bootstrap_reproducible_and_ordered() {
        let results = vec![
            result("momentum_tilt", 500.0, &[0.02, 0.01, 0.03, -0.01, 0.02]),
            result("equal_weight", 500.0, &[0.01, 0.00, 0.01, -0.02, 0.00]),
        ];
        let a = bootstrap_cum_diff(&results, "momentum_tilt", "equal_weight", 500.0, 500, 7).unwrap();
        let b = bootstrap_cum_diff(&results, "momentum_tilt", "equal_weight", 500.0, 500, 7).unwrap();
        assert_eq!(a, b);
        assert!(a.lower <= a.upper);
        // a beats b every day, so every resample is positive
        assert!(a.lower > 0.0);
        assert!(a.observed > 0.0);
    }

    #[test]
    fn test_bootstrap_identical_models() {
        let results = vec![
            result("momentum_tilt", 500.0, &[0.02, -0.01]),
            result("equal_weight", 500.0, &[0.02, -0.01]),
        ];
        let ci = bootstrap_cum_diff(&results, "momentum_tilt", "equal_weight", 500.0, 100, 1).unwrap();
        assert_eq!(ci.lower, 0.0);
        assert_eq!(ci.upper, 0.0);
    }

    #[test]
    fn test_bootstrap_zero_draws() {
        let results = vec![result("equal_weight", 500.0, &[0.01])];
        assert!(bootstrap_cum_diff(&results, "equal_weight", "equal_weight", 500.0, 0, 1).is_err());
    }
}
