//! Volume indicators: On-Balance Volume and Money Flow Index.

use serde::{Deserialize, Serialize};

use super::{require, IndicatorError, IndicatorResult};

/// Bars the OBV trend looks back over.
const OBV_TREND_BARS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObvTrend {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Obv {
    pub value: f64,
    pub trend: ObvTrend,
}

pub fn obv(closes: &[f64], volumes: &[f64]) -> IndicatorResult<Obv> {
    let n = closes.len();
    require(n, 2)?;
    let mut series = Vec::with_capacity(n);
    let mut acc = 0.0;
    series.push(acc);
    for i in 1..n {
        if closes[i] > closes[i - 1] {
            acc += volumes[i];
        } else if closes[i] < closes[i - 1] {
            acc -= volumes[i];
        }
        series.push(acc);
    }
    let back = OBV_TREND_BARS.min(n - 1);
    let delta = acc - series[n - 1 - back];
    let trend = if delta > 0.0 {
        ObvTrend::Rising
    } else if delta < 0.0 {
        ObvTrend::Falling
    } else {
        ObvTrend::Flat
    };
    Ok(Obv { value: acc, trend })
}

/// Money Flow Index over the last `period` typical-price changes.
pub fn mfi(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    volumes: &[f64],
    period: usize,
) -> IndicatorResult<f64> {
    let n = closes.len();
    require(n, period + 1)?;
    let tp = |i: usize| (highs[i] + lows[i] + closes[i]) / 3.0;
    let (mut pos, mut neg) = (0.0, 0.0);
    for i in n - period..n {
        let (cur, prev) = (tp(i), tp(i - 1));
        let flow = cur * volumes[i];
        if cur > prev {
            pos += flow;
        } else if cur < prev {
            neg += flow;
        }
    }
    if pos + neg == 0.0 {
        return Err(IndicatorError::Degenerate("no money flow"));
    }
    if neg == 0.0 {
        return Ok(100.0);
    }
    Ok(100.0 - 100.0 / (1.0 + pos / neg))
}
