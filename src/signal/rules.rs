//! Piecewise rules mapping each indicator family to a score in `[-1, 1]`.
//!
//! Positive is bullish. Oscillators read mean-reverting (overbought is
//! bearish); trend indicators read trend-following.

use crate::indicators::{IndicatorSet, ObvTrend};

/// Family score plus any human-readable notes it raised.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleScore {
    pub score: f64,
    pub notes: Vec<&'static str>,
}

impl RuleScore {
    fn new(score: f64) -> Self {
        Self {
            score: score.clamp(-1.0, 1.0),
            notes: Vec::new(),
        }
    }

    fn note(mut self, cond: bool, note: &'static str) -> Self {
        if cond {
            self.notes.push(note);
        }
        self
    }
}

/// +1 / -1 / 0 by comparison.
fn signed(a: f64, b: f64) -> f64 {
    if a > b {
        1.0
    } else if a < b {
        -1.0
    } else {
        0.0
    }
}

/// RSI ≥ 70 → -0.8, ≤ 30 → +0.8, linear in between.
pub fn rsi(value: f64) -> RuleScore {
    let score = if value >= 70.0 {
        -0.8
    } else if value <= 30.0 {
        0.8
    } else {
        -(value - 50.0) / 20.0 * 0.8
    };
    RuleScore::new(score)
        .note(value >= 70.0, "RSI overbought")
        .note(value <= 30.0, "RSI oversold")
}

pub fn macd(s: &IndicatorSet) -> RuleScore {
    let m = &s.macd;
    let score = 0.5 * signed(m.macd, m.signal) + 0.3 * signed(m.histogram, 0.0) + 0.2 * signed(m.macd, 0.0);
    RuleScore::new(score)
        .note(m.macd > m.signal && m.histogram > 0.0, "MACD bullish crossover")
        .note(m.macd < m.signal && m.histogram < 0.0, "MACD bearish crossover")
}

/// Near the lower band is bullish, near the upper band bearish.
pub fn bollinger(s: &IndicatorSet) -> RuleScore {
    let p = s.bollinger.position.clamp(0.0, 1.0);
    RuleScore::new((0.5 - p) / 0.5 * 0.7)
        .note(p >= 0.95, "price at upper Bollinger band")
        .note(p <= 0.05, "price at lower Bollinger band")
}

/// Four ±0.25 terms; the 50/200 term is skipped when SMA 200 fell back.
pub fn moving_averages(s: &IndicatorSet) -> RuleScore {
    let mut score = 0.25 * signed(s.last_price, s.sma_20)
        + 0.25 * signed(s.sma_20, s.sma_50)
        + 0.25 * signed(s.ema_12, s.ema_26);
    let long_term = !s.fell_back("sma_200");
    if long_term {
        score += 0.25 * signed(s.sma_50, s.sma_200);
    }
    RuleScore::new(score)
        .note(long_term && s.sma_50 > s.sma_200, "golden cross regime")
        .note(long_term && s.sma_50 < s.sma_200, "death cross regime")
}

pub fn stochastic(s: &IndicatorSet) -> RuleScore {
    let k = s.stochastic.k;
    RuleScore::new((-(k - 50.0) / 30.0 * 0.8).clamp(-0.8, 0.8))
        .note(k >= 80.0, "stochastic overbought")
        .note(k <= 20.0, "stochastic oversold")
}

pub fn williams_r(s: &IndicatorSet) -> RuleScore {
    let wr = s.williams_r;
    RuleScore::new((-(wr + 50.0) / 30.0 * 0.8).clamp(-0.8, 0.8))
        .note(wr >= -20.0, "Williams %R overbought")
        .note(wr <= -80.0, "Williams %R oversold")
}

pub fn cci(s: &IndicatorSet) -> RuleScore {
    RuleScore::new((-s.cci / 100.0 * 0.6).clamp(-0.6, 0.6))
        .note(s.cci >= 100.0, "CCI overbought")
        .note(s.cci <= -100.0, "CCI oversold")
}

/// Trend strength above ADX 20, signed by which DI leads.
pub fn adx(s: &IndicatorSet) -> RuleScore {
    let a = &s.adx;
    let strength = ((a.adx - 20.0) / 30.0).clamp(0.0, 1.0);
    RuleScore::new(strength * signed(a.plus_di, a.minus_di) * 0.8)
        .note(a.adx >= 40.0, "strong trend")
        .note(a.adx < 20.0, "no clear trend")
}

pub fn ichimoku(s: &IndicatorSet) -> RuleScore {
    let i = &s.ichimoku;
    let price = s.last_price;
    let cloud = if price > i.cloud_top() {
        0.5
    } else if price < i.cloud_bottom() {
        -0.5
    } else {
        0.0
    };
    let score = cloud + 0.3 * signed(i.tenkan, i.kijun) + 0.2 * signed(price, i.chikou_ref);
    RuleScore::new(score)
        .note(cloud > 0.0, "price above Ichimoku cloud")
        .note(cloud < 0.0, "price below Ichimoku cloud")
}

pub fn momentum(s: &IndicatorSet) -> RuleScore {
    RuleScore::new((s.roc / 10.0).clamp(-0.7, 0.7) + 0.3 * signed(s.momentum, 0.0))
        .note(s.roc >= 10.0, "strong upside momentum")
        .note(s.roc <= -10.0, "strong downside momentum")
}

pub fn volume(s: &IndicatorSet) -> RuleScore {
    let obv = match s.obv.trend {
        ObvTrend::Rising => 0.4,
        ObvTrend::Falling => -0.4,
        ObvTrend::Flat => 0.0,
    };
    let mfi = (-(s.mfi - 50.0) / 30.0 * 0.6).clamp(-0.6, 0.6);
    RuleScore::new(obv + mfi)
        .note(s.mfi >= 80.0, "MFI overbought")
        .note(s.mfi <= 20.0, "MFI oversold")
}

pub fn parabolic_sar(s: &IndicatorSet) -> RuleScore {
    if s.parabolic_sar.uptrend {
        RuleScore::new(0.6)
    } else {
        RuleScore::new(-0.6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_examples() {
        assert!((rsi(75.0).score + 0.8).abs() < 1e-12);
        assert!((rsi(25.0).score - 0.8).abs() < 1e-12);
        assert_eq!(rsi(50.0).score, 0.0);
        assert!((rsi(60.0).score + 0.4).abs() < 1e-12);
        assert_eq!(rsi(75.0).notes, vec!["RSI overbought"]);
    }

    #[test]
    fn signed_handles_ties() {
        assert_eq!(signed(1.0, 1.0), 0.0);
        assert_eq!(signed(2.0, 1.0), 1.0);
        assert_eq!(signed(0.0, 1.0), -1.0);
    }
}
