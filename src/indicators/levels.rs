//! Price levels: Fibonacci retracements and classic pivot points.

use serde::{Deserialize, Serialize};

use super::{highest, lowest, require, IndicatorResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Fibonacci {
    pub high: f64,
    pub low: f64,
    pub level_236: f64,
    pub level_382: f64,
    pub level_500: f64,
    pub level_618: f64,
    pub level_786: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pivots {
    pub pivot: f64,
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

/// Retracements measured down from the high of the trailing `lookback` bars.
pub fn fibonacci(highs: &[f64], lows: &[f64], lookback: usize) -> IndicatorResult<Fibonacci> {
    let n = highs.len();
    require(n, 1)?;
    let from = n.saturating_sub(lookback);
    let (high, low) = (highest(&highs[from..]), lowest(&lows[from..]));
    let at = |r: f64| high - (high - low) * r;
    Ok(Fibonacci {
        high,
        low,
        level_236: at(0.236),
        level_382: at(0.382),
        level_500: at(0.5),
        level_618: at(0.618),
        level_786: at(0.786),
    })
}

/// Classic floor pivots from one bar.
pub fn pivots(high: f64, low: f64, close: f64) -> Pivots {
    let pivot = (high + low + close) / 3.0;
    let range = high - low;
    Pivots {
        pivot,
        r1: 2.0 * pivot - low,
        s1: 2.0 * pivot - high,
        r2: pivot + range,
        s2: pivot - range,
        r3: high + 2.0 * (pivot - low),
        s3: low - 2.0 * (high - pivot),
    }
}
