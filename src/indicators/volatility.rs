//! Volatility: Bollinger Bands and ATR.

use serde::{Deserialize, Serialize};

use super::trend::true_range;
use super::{mean, require, IndicatorError, IndicatorResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Where the last close sits between the bands, clamped to `[0, 1]`.
    pub position: f64,
}

/// Bands at `k` sample standard deviations around the `period` SMA.
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> IndicatorResult<Bollinger> {
    let n = closes.len();
    require(n, period)?;
    if period < 2 {
        return Err(IndicatorError::InvalidParameter(
            "bollinger period must be at least 2".into(),
        ));
    }
    let window = &closes[n - period..];
    let middle = mean(window);
    let var = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / (period - 1) as f64;
    let sd = var.sqrt();
    if sd == 0.0 {
        return Err(IndicatorError::Degenerate("zero variance"));
    }
    let (upper, lower) = (middle + k * sd, middle - k * sd);
    Ok(Bollinger {
        upper,
        middle,
        lower,
        position: ((closes[n - 1] - lower) / (upper - lower)).clamp(0.0, 1.0),
    })
}

/// Wilder-smoothed average true range.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> IndicatorResult<f64> {
    let n = closes.len();
    require(n, period + 1)?;
    let tr: Vec<f64> = (1..n)
        .map(|i| true_range(highs[i], lows[i], closes[i - 1]))
        .collect();
    let p = period as f64;
    let mut atr = mean(&tr[..period]);
    for t in &tr[period..] {
        atr = (atr * (p - 1.0) + t) / p;
    }
    Ok(atr)
}
