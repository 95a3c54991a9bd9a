//! Momentum oscillators: RSI, Stochastic, Williams %R, CCI, momentum, ROC.

use serde::{Deserialize, Serialize};

use super::{highest, lowest, mean, require, IndicatorResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

/// RSI over the last `period` price changes, simple averages.
pub fn rsi(closes: &[f64], period: usize) -> IndicatorResult<f64> {
    let n = closes.len();
    require(n, period + 1)?;
    let (mut gain, mut loss) = (0.0, 0.0);
    for w in closes[n - period - 1..].windows(2) {
        let d = w[1] - w[0];
        if d > 0.0 {
            gain += d;
        } else {
            loss -= d;
        }
    }
    if loss == 0.0 {
        return Ok(if gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = gain / loss;
    Ok(100.0 - 100.0 / (1.0 + rs))
}

fn percent_k(highs: &[f64], lows: &[f64], close: f64) -> f64 {
    let (hh, ll) = (highest(highs), lowest(lows));
    if hh > ll {
        (close - ll) / (hh - ll) * 100.0
    } else {
        50.0
    }
}

/// %K over `k_period`, %D as the mean of the last `d_period` %K values.
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k_period: usize,
    d_period: usize,
) -> IndicatorResult<Stochastic> {
    let n = closes.len();
    require(n, k_period + d_period - 1)?;
    let ks: Vec<f64> = (n - d_period..n)
        .map(|end| {
            let start = end + 1 - k_period;
            percent_k(&highs[start..=end], &lows[start..=end], closes[end])
        })
        .collect();
    Ok(Stochastic {
        k: ks[ks.len() - 1],
        d: mean(&ks),
    })
}

/// Williams %R in `[-100, 0]`.
pub fn williams_r(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> IndicatorResult<f64> {
    let n = closes.len();
    require(n, period)?;
    let (hh, ll) = (highest(&highs[n - period..]), lowest(&lows[n - period..]));
    if hh > ll {
        Ok((hh - closes[n - 1]) / (hh - ll) * -100.0)
    } else {
        Ok(-50.0)
    }
}

/// Commodity Channel Index on typical price, 0.015 constant.
pub fn cci(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> IndicatorResult<f64> {
    let n = closes.len();
    require(n, period)?;
    let tp: Vec<f64> = (n - period..n)
        .map(|i| (highs[i] + lows[i] + closes[i]) / 3.0)
        .collect();
    let avg = mean(&tp);
    let dev = tp.iter().map(|x| (x - avg).abs()).sum::<f64>() / period as f64;
    if dev == 0.0 {
        return Ok(0.0);
    }
    Ok((tp[tp.len() - 1] - avg) / (0.015 * dev))
}

/// Absolute change over `period` bars.
pub fn momentum(closes: &[f64], period: usize) -> IndicatorResult<f64> {
    let n = closes.len();
    require(n, period + 1)?;
    Ok(closes[n - 1] - closes[n - 1 - period])
}

/// Percent change over `period` bars.
pub fn roc(closes: &[f64], period: usize) -> IndicatorResult<f64> {
    let n = closes.len();
    require(n, period + 1)?;
    let prev = closes[n - 1 - period];
    if prev == 0.0 {
        return Ok(0.0);
    }
    Ok((closes[n - 1] / prev - 1.0) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_extremes_and_flat() {
        let up: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let down: Vec<f64> = up.iter().rev().copied().collect();
        assert_eq!(rsi(&up, 14).unwrap(), 100.0);
        assert_eq!(rsi(&down, 14).unwrap(), 0.0);
        assert_eq!(rsi(&[5.0; 20], 14).unwrap(), 50.0);
        assert!(rsi(&up[..14], 14).is_err());
    }

    #[test]
    fn rsi_balanced_moves_is_fifty() {
        let zigzag: Vec<f64> = (0..15).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        assert!((rsi(&zigzag, 14).unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn stochastic_and_williams_at_top_of_range() {
        let v: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let s = stochastic(&v, &v, &v, 14, 3).unwrap();
        assert_eq!(s.k, 100.0);
        assert_eq!(s.d, 100.0);
        assert_eq!(williams_r(&v, &v, &v, 14).unwrap(), 0.0);
        let flat = [3.0; 20];
        assert_eq!(williams_r(&flat, &flat, &flat, 14).unwrap(), -50.0);
    }

    #[test]
    fn cci_momentum_roc() {
        let flat = [10.0; 25];
        assert_eq!(cci(&flat, &flat, &flat, 20).unwrap(), 0.0);
        let v: Vec<f64> = (1..=25).map(|i| i as f64).collect();
        assert!(cci(&v, &v, &v, 20).unwrap() > 100.0);
        assert_eq!(momentum(&v, 10).unwrap(), 10.0);
        assert!((roc(&v, 12).unwrap() - (25.0 / 13.0 - 1.0) * 100.0).abs() < 1e-9);
    }
}
