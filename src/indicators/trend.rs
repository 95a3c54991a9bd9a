//! Trend indicators: moving averages, MACD, ADX, Ichimoku, Parabolic SAR.

use serde::{Deserialize, Serialize};

use super::{highest, lowest, mean, require, IndicatorResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Ichimoku {
    pub tenkan: f64,
    pub kijun: f64,
    pub senkou_a: f64,
    pub senkou_b: f64,
    /// Close 26 bars back, which the lagging span is compared against.
    pub chikou_ref: f64,
}

impl Ichimoku {
    pub fn cloud_top(&self) -> f64 {
        self.senkou_a.max(self.senkou_b)
    }

    pub fn cloud_bottom(&self) -> f64 {
        self.senkou_a.min(self.senkou_b)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ParabolicSar {
    pub value: f64,
    pub uptrend: bool,
}

pub fn sma(values: &[f64], period: usize) -> IndicatorResult<f64> {
    require(values.len(), period)?;
    Ok(mean(&values[values.len() - period..]))
}

/// EMA seeded with the SMA of the first `period` values.
/// The output starts at index `period - 1` of the input.
pub fn ema_series(values: &[f64], period: usize) -> IndicatorResult<Vec<f64>> {
    require(values.len(), period)?;
    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = mean(&values[..period]);
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(prev);
    for v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    Ok(out)
}

pub fn ema(values: &[f64], period: usize) -> IndicatorResult<f64> {
    let series = ema_series(values, period)?;
    Ok(series[series.len() - 1])
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> IndicatorResult<Macd> {
    require(closes.len(), slow + signal - 1)?;
    let fast_s = ema_series(closes, fast)?;
    let slow_s = ema_series(closes, slow)?;
    let offset = slow - fast;
    let line: Vec<f64> = slow_s
        .iter()
        .enumerate()
        .map(|(i, s)| fast_s[i + offset] - s)
        .collect();
    let signal_line = ema(&line, signal)?;
    let macd = line[line.len() - 1];
    Ok(Macd {
        macd,
        signal: signal_line,
        histogram: macd - signal_line,
    })
}

/// Wilder's ADX with +DI/-DI.
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> IndicatorResult<Adx> {
    let n = closes.len();
    require(n, 2 * period)?;

    let mut tr = Vec::with_capacity(n - 1);
    let mut pdm = Vec::with_capacity(n - 1);
    let mut mdm = Vec::with_capacity(n - 1);
    for i in 1..n {
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        pdm.push(if up > down && up > 0.0 { up } else { 0.0 });
        mdm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(true_range(highs[i], lows[i], closes[i - 1]));
    }

    let p = period as f64;
    let mut s_tr: f64 = tr[..period].iter().sum();
    let mut s_pdm: f64 = pdm[..period].iter().sum();
    let mut s_mdm: f64 = mdm[..period].iter().sum();

    let di = |s_dm: f64, s_tr: f64| if s_tr > 0.0 { 100.0 * s_dm / s_tr } else { 0.0 };
    let dx = |pdi: f64, mdi: f64| {
        let sum = pdi + mdi;
        if sum > 0.0 {
            100.0 * (pdi - mdi).abs() / sum
        } else {
            0.0
        }
    };

    let (mut pdi, mut mdi) = (di(s_pdm, s_tr), di(s_mdm, s_tr));
    let mut dxs = vec![dx(pdi, mdi)];
    for i in period..tr.len() {
        s_tr = s_tr - s_tr / p + tr[i];
        s_pdm = s_pdm - s_pdm / p + pdm[i];
        s_mdm = s_mdm - s_mdm / p + mdm[i];
        pdi = di(s_pdm, s_tr);
        mdi = di(s_mdm, s_tr);
        dxs.push(dx(pdi, mdi));
    }

    let mut adx = mean(&dxs[..period]);
    for d in &dxs[period..] {
        adx = (adx * (p - 1.0) + d) / p;
    }
    Ok(Adx {
        adx,
        plus_di: pdi,
        minus_di: mdi,
    })
}

pub(crate) fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

/// Ichimoku lines from the current bar, 9/26/52 windows.
pub fn ichimoku(highs: &[f64], lows: &[f64], closes: &[f64]) -> IndicatorResult<Ichimoku> {
    let n = closes.len();
    require(n, 52)?;
    let mid = |w: usize| (highest(&highs[n - w..]) + lowest(&lows[n - w..])) / 2.0;
    let tenkan = mid(9);
    let kijun = mid(26);
    Ok(Ichimoku {
        tenkan,
        kijun,
        senkou_a: (tenkan + kijun) / 2.0,
        senkou_b: mid(52),
        chikou_ref: closes[n - 1 - 26],
    })
}

/// Single pass Parabolic SAR with trend flips.
pub fn parabolic_sar(highs: &[f64], lows: &[f64], step: f64, cap: f64) -> IndicatorResult<ParabolicSar> {
    let n = highs.len();
    require(n, 2)?;

    let mut up = highs[1] >= highs[0];
    let mut sar = if up { lows[0] } else { highs[0] };
    let mut ep = if up { highs[0] } else { lows[0] };
    let mut af = step;

    for i in 1..n {
        sar += af * (ep - sar);
        if up {
            sar = sar.min(lows[i - 1]);
            if i >= 2 {
                sar = sar.min(lows[i - 2]);
            }
            if lows[i] < sar {
                up = false;
                sar = ep;
                ep = lows[i];
                af = step;
            } else if highs[i] > ep {
                ep = highs[i];
                af = (af + step).min(cap);
            }
        } else {
            sar = sar.max(highs[i - 1]);
            if i >= 2 {
                sar = sar.max(highs[i - 2]);
            }
            if highs[i] > sar {
                up = true;
                sar = ep;
                ep = highs[i];
                af = step;
            } else if lows[i] < ep {
                ep = lows[i];
                af = (af + step).min(cap);
            }
        }
    }

    Ok(ParabolicSar {
        value: sar,
        uptrend: up,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorError;

    fn ramp(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn sma_and_ema_on_ramp() {
        let v = ramp(20);
        assert_eq!(sma(&v, 5).unwrap(), 18.0);
        // seeded with SMA(1..=5) = 3, then tracks the ramp with a lag
        let e = ema_series(&v, 5).unwrap();
        assert_eq!(e.len(), 16);
        assert_eq!(e[0], 3.0);
        assert!(e[15] < 20.0 && e[15] > 17.0);
        assert!(matches!(
            sma(&v, 21),
            Err(IndicatorError::InsufficientData { required: 21, provided: 20 })
        ));
    }

    #[test]
    fn macd_is_positive_in_uptrend() {
        let v: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let m = macd(&v, 12, 26, 9).unwrap();
        assert!(m.macd > 0.0);
        assert!((m.histogram - (m.macd - m.signal)).abs() < 1e-12);
        assert!(macd(&v[..33], 12, 26, 9).is_err());
    }

    #[test]
    fn adx_reads_direction() {
        let highs: Vec<f64> = (0..40).map(|i| 101.0 + i as f64).collect();
        let lows: Vec<f64> = (0..40).map(|i| 99.0 + i as f64).collect();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let a = adx(&highs, &lows, &closes, 14).unwrap();
        assert!(a.plus_di > a.minus_di);
        assert!(a.adx > 50.0, "steady climb is a strong trend: {}", a.adx);
    }

    #[test]
    fn psar_follows_uptrend_and_flips() {
        let highs: Vec<f64> = (0..30).map(|i| 11.0 + i as f64).collect();
        let lows: Vec<f64> = (0..30).map(|i| 9.0 + i as f64).collect();
        let up = parabolic_sar(&highs, &lows, 0.02, 0.2).unwrap();
        assert!(up.uptrend);
        assert!(up.value < lows[29]);

        let mut h2 = highs.clone();
        let mut l2 = lows.clone();
        h2.extend((0..5).map(|i| 30.0 - 5.0 * i as f64));
        l2.extend((0..5).map(|i| 28.0 - 5.0 * i as f64));
        let down = parabolic_sar(&h2, &l2, 0.02, 0.2).unwrap();
        assert!(!down.uptrend);
    }

    #[test]
    fn ichimoku_needs_52_bars() {
        let v = ramp(52);
        let i = ichimoku(&v, &v, &v).unwrap();
        assert_eq!(i.tenkan, (52.0 + 44.0) / 2.0);
        assert_eq!(i.chikou_ref, 26.0);
        assert!(ichimoku(&v[..51], &v[..51], &v[..51]).is_err());
    }
}
