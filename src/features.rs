//! Signal computation over the master panel.
//!
//! Two signals are derived per ticker and stored on the panel:
//!
//! - **momentum_60**: trailing close-to-close return over the momentum window
//!   (`close[t] / close[t - w] - 1`).
//! - **vol_30**: sample standard deviation (n - 1) of the daily `return`
//!   column over the volatility window.
//!
//! Both are undefined (NaN) until their window is full. The column names are
//! fixed regardless of the configured window lengths.
//!
//! # Example
//!
//! ```
//! use panelbt::features::rolling_std;
//!
//! let returns = [0.01, -0.01, 0.01, -0.01];
//! let vol = rolling_std(&returns, 2);
//! assert!(vol[0].is_nan());
//! assert!(vol[1] > 0.0);
//! ```

use crate::error::{BacktestError, Result};
use crate::panel::Panel;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Names of the signal columns a policy can read, in feature-matrix order.
pub const SIGNAL_COLUMNS: [&str; 2] = ["momentum_60", "vol_30"];

/// Configuration for signal computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Lookback in observations for momentum.
    #[serde(default = "default_momentum_window")]
    pub momentum_window: usize,
    /// Rolling window in observations for volatility.
    #[serde(default = "default_vol_window")]
    pub vol_window: usize,
}

fn default_momentum_window() -> usize {
    60
}

fn default_vol_window() -> usize {
    30
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            momentum_window: default_momentum_window(),
            vol_window: default_vol_window(),
        }
    }
}

impl SignalConfig {
    /// Check window lengths.
    pub fn validate(&self) -> Result<()> {
        if self.momentum_window == 0 {
            return Err(BacktestError::ConfigError(
                "momentum_window must be at least 1".to_string(),
            ));
        }
        if self.vol_window < 2 {
            return Err(BacktestError::ConfigError(
                "vol_window must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counts of undefined signal cells after computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCoverage {
    pub cells: usize,
    pub undefined_momentum: usize,
    pub undefined_vol: usize,
}

/// Trailing percentage change over `window` observations.
pub fn momentum(closes: &[f64], window: usize) -> Vec<f64> {
    (0..closes.len())
        .map(|t| {
            if window == 0 || t < window {
                f64::NAN
            } else {
                closes[t] / closes[t - window] - 1.0
            }
        })
        .collect()
}

/// Rolling sample standard deviation; NaN unless the whole window is defined.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window < 2 {
        return out;
    }

    for t in (window - 1)..values.len() {
        let slice = &values[t + 1 - window..=t];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
        out[t] = var.sqrt();
    }
    out
}

/// Compute `momentum_60` and `vol_30` for every ticker in place.
///
/// Early dates without enough history are left as NaN; policies must cope
/// with them.
pub fn compute_signals(panel: &mut Panel, config: &SignalConfig) -> Result<SignalCoverage> {
    config.validate()?;

    let mut coverage = SignalCoverage::default();
    for idx in 0..panel.num_tickers() {
        let series = panel.series_mut(idx);
        let closes: Vec<f64> = series.iter().map(|o| o.close).collect();
        let returns: Vec<f64> = series.iter().map(|o| o.ret).collect();

        let mom = momentum(&closes, config.momentum_window);
        let vol = rolling_std(&returns, config.vol_window);

        for ((obs, m), v) in series.iter_mut().zip(mom).zip(vol) {
            obs.momentum_60 = m;
            obs.vol_30 = v;
            coverage.cells += 1;
            coverage.undefined_momentum += m.is_nan() as usize;
            coverage.undefined_vol += v.is_nan() as usize;
        }
    }

    if coverage.undefined_momentum > 0 || coverage.undefined_vol > 0 {
        debug!(
            "Insufficient history: {} momentum and {} volatility cells undefined of {}",
            coverage.undefined_momentum, coverage.undefined_vol, coverage.cells
        );
    }
    info!(
        "Computed signals (momentum window {}, vol window {}) for {} tickers",
        config.momentum_window,
        config.vol_window,
        panel.num_tickers()
    );
    Ok(coverage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::DEFAULT_RETURN_CLIP;
    use crate::types::Bar;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn panel_with_closes(closes: &[f64]) -> Panel {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(start + chrono::Duration::days(i as i64), c, c, c, c, 1.0)
            })
            .collect();
        let mut map = BTreeMap::new();
        map.insert("SPY".to_string(), bars);
        Panel::from_bars(&map, DEFAULT_RETURN_CLIP).unwrap()
    }

    #[test]
    fn test_momentum() {
        let closes = [100.0, 110.0, 121.0, 99.0];
        let m = momentum(&closes, 2);
        assert!(m[0].is_nan());
        assert!(m[1].is_nan());
        assert!((m[2] - 0.21).abs() < 1e-12);
        assert!((m[3] - (99.0 / 110.0 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_momentum_nan_close_propagates() {
        let closes = [f64::NAN, 100.0, 110.0];
        let m = momentum(&closes, 1);
        assert!(m[1].is_nan());
        assert!((m[2] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_rolling_std_sample() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let s = rolling_std(&values, 3);
        assert!(s[0].is_nan());
        assert!(s[1].is_nan());
        // std of [1,2,3] with ddof=1 is 1.0
        assert!((s[2] - 1.0).abs() < 1e-12);
        assert!((s[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rolling_std_requires_full_window() {
        let values = [f64::NAN, 0.01, 0.02, 0.03];
        let s = rolling_std(&values, 3);
        assert!(s[2].is_nan());
        assert!(s[3].is_finite());
    }

    #[test]
    fn test_compute_signals_on_panel() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
        let mut panel = panel_with_closes(&closes);
        let coverage = compute_signals(&mut panel, &SignalConfig::default()).unwrap();

        let spy = panel.series("SPY").unwrap();
        assert!(spy[59].momentum_60.is_nan());
        assert!((spy[60].momentum_60 - (160.0 / 100.0 - 1.0)).abs() < 1e-12);
        // First return is undefined, so the first full window ends at index 30
        assert!(spy[29].vol_30.is_nan());
        assert!(spy[30].vol_30.is_finite());

        assert_eq!(coverage.cells, 100);
        assert_eq!(coverage.undefined_momentum, 60);
        assert_eq!(coverage.undefined_vol, 30);
    }

    #[test]
    fn test_invalid_windows() {
        let mut panel = panel_with_closes(&[1.0, 2.0]);
        let config = SignalConfig {
            momentum_window: 0,
            vol_window: 30,
        };
        assert!(compute_signals(&mut panel, &config).is_err());
        let config = SignalConfig {
            momentum_window: 60,
            vol_window: 1,
        };
        assert!(compute_signals(&mut panel, &config).is_err());
    }
}
