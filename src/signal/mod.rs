//! Composite signal scoring.
//!
//! [`SignalScorer::score`] is a pure function of the [`IndicatorSet`]: every
//! family is scored by its rule in [`rules`], families whose indicator took a
//! neutral fallback are dropped, and the rest are combined with the
//! renormalized [`SignalWeights`].

pub mod rules;
pub mod weights;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::indicators::IndicatorSet;
use rules::RuleScore;
pub use weights::SignalWeights;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    MovingAverages,
    Macd,
    Rsi,
    Volume,
    Adx,
    Ichimoku,
    Bollinger,
    Momentum,
    Stochastic,
    Cci,
    WilliamsR,
    ParabolicSar,
}

impl Family {
    pub const ALL: [Family; 12] = [
        Family::MovingAverages,
        Family::Macd,
        Family::Rsi,
        Family::Volume,
        Family::Adx,
        Family::Ichimoku,
        Family::Bollinger,
        Family::Momentum,
        Family::Stochastic,
        Family::Cci,
        Family::WilliamsR,
        Family::ParabolicSar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Family::MovingAverages => "moving_averages",
            Family::Macd => "macd",
            Family::Rsi => "rsi",
            Family::Volume => "volume",
            Family::Adx => "adx",
            Family::Ichimoku => "ichimoku",
            Family::Bollinger => "bollinger",
            Family::Momentum => "momentum",
            Family::Stochastic => "stochastic",
            Family::Cci => "cci",
            Family::WilliamsR => "williams_r",
            Family::ParabolicSar => "parabolic_sar",
        }
    }

    /// The indicator whose fallback drops this family.
    fn anchor(self) -> &'static str {
        match self {
            Family::MovingAverages => "sma_20",
            Family::Volume => "mfi",
            Family::Momentum => "roc",
            other => other.name(),
        }
    }

    fn rule(self, s: &IndicatorSet) -> RuleScore {
        match self {
            Family::MovingAverages => rules::moving_averages(s),
            Family::Macd => rules::macd(s),
            Family::Rsi => rules::rsi(s.rsi),
            Family::Volume => rules::volume(s),
            Family::Adx => rules::adx(s),
            Family::Ichimoku => rules::ichimoku(s),
            Family::Bollinger => rules::bollinger(s),
            Family::Momentum => rules::momentum(s),
            Family::Stochastic => rules::stochastic(s),
            Family::Cci => rules::cci(s),
            Family::WilliamsR => rules::williams_r(s),
            Family::ParabolicSar => rules::parabolic_sar(s),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl Direction {
    /// Bucket edges are inclusive on the lower bound.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.6 {
            Direction::StrongBuy
        } else if score >= 0.2 {
            Direction::Buy
        } else if score >= -0.2 {
            Direction::Neutral
        } else if score >= -0.6 {
            Direction::Sell
        } else {
            Direction::StrongSell
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositeSignal {
    pub entity: String,
    pub direction: Direction,
    pub score: f64,
    /// Family name to its score in `[-1, 1]`, for the families that scored.
    pub breakdown: BTreeMap<String, f64>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SignalScorer {
    weights: SignalWeights,
}

impl SignalScorer {
    pub fn new(weights: SignalWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SignalWeights {
        &self.weights
    }

    pub fn score(&self, set: &IndicatorSet) -> CompositeSignal {
        let active: Vec<Family> = Family::ALL
            .iter()
            .copied()
            .filter(|f| !set.fell_back(f.anchor()))
            .collect();

        let mut breakdown = BTreeMap::new();
        let mut notes = Vec::new();
        let mut score = 0.0;
        for (family, weight) in self.weights.normalized(&active) {
            let r = family.rule(set);
            score += weight * r.score;
            breakdown.insert(family.name().to_string(), r.score);
            notes.extend(r.notes.iter().map(|n| n.to_string()));
        }
        let score = if score.is_finite() {
            score.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        CompositeSignal {
            entity: set.entity.clone(),
            direction: Direction::from_score(score),
            score,
            breakdown,
            notes,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::indicators::*;
    use std::collections::BTreeSet;

    /// Every family reads exactly zero.
    pub(crate) fn neutral_set(price: f64) -> IndicatorSet {
        IndicatorSet {
            entity: "BTC".into(),
            timestamp: 1,
            last_price: price,
            rsi: 50.0,
            macd: Macd {
                macd: 0.0,
                signal: 0.0,
                histogram: 0.0,
            },
            bollinger: Bollinger {
                upper: price + 1.0,
                middle: price,
                lower: price - 1.0,
                position: 0.5,
            },
            sma_20: price,
            sma_50: price,
            sma_200: price,
            ema_12: price,
            ema_26: price,
            stochastic: Stochastic { k: 50.0, d: 50.0 },
            williams_r: -50.0,
            atr: 1.0,
            adx: Adx {
                adx: 15.0,
                plus_di: 20.0,
                minus_di: 20.0,
            },
            cci: 0.0,
            momentum: 0.0,
            roc: 0.0,
            mfi: 50.0,
            obv: Obv {
                value: 0.0,
                trend: ObvTrend::Flat,
            },
            fibonacci: Fibonacci {
                high: price,
                low: price,
                level_236: price,
                level_382: price,
                level_500: price,
                level_618: price,
                level_786: price,
            },
            pivots: levels::pivots(price, price, price),
            ichimoku: Ichimoku {
                tenkan: price,
                kijun: price,
                senkou_a: price,
                senkou_b: price,
                chikou_ref: price,
            },
            parabolic_sar: ParabolicSar {
                value: price,
                uptrend: true,
            },
            // keep PSAR out so the baseline is exactly zero
            fallbacks: BTreeSet::from(["parabolic_sar".to_string()]),
        }
    }

    fn max_bullish(price: f64) -> IndicatorSet {
        let mut s = neutral_set(price);
        s.rsi = 10.0;
        s.macd = Macd {
            macd: 2.0,
            signal: 1.0,
            histogram: 1.0,
        };
        s.bollinger.position = 0.0;
        s.sma_20 = price - 1.0;
        s.sma_50 = price - 2.0;
        s.sma_200 = price - 3.0;
        s.ema_12 = price - 1.0;
        s.ema_26 = price - 2.0;
        s.stochastic = Stochastic { k: 0.0, d: 5.0 };
        s.williams_r = -100.0;
        s.adx = Adx {
            adx: 60.0,
            plus_di: 40.0,
            minus_di: 10.0,
        };
        s.cci = -300.0;
        s.momentum = 5.0;
        s.roc = 20.0;
        s.mfi = 0.0;
        s.obv.trend = ObvTrend::Rising;
        s.ichimoku = Ichimoku {
            tenkan: price - 1.0,
            kijun: price - 2.0,
            senkou_a: price - 3.0,
            senkou_b: price - 4.0,
            chikou_ref: price - 5.0,
        };
        s.fallbacks.clear();
        s
    }

    #[test]
    fn neutral_set_scores_zero() {
        let sig = SignalScorer::default().score(&neutral_set(100.0));
        assert_eq!(sig.score, 0.0);
        assert_eq!(sig.direction, Direction::Neutral);
        assert!(!sig.breakdown.contains_key("parabolic_sar"));
        assert_eq!(sig.breakdown.len(), 11);
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = SignalScorer::default();
        let set = max_bullish(100.0);
        let a = scorer.score(&set);
        let b = scorer.score(&set);
        assert_eq!(a, b);
    }

    #[test]
    fn score_stays_in_bounds_at_extremes() {
        let scorer = SignalScorer::default();
        let bull = scorer.score(&max_bullish(100.0));
        assert!(bull.score <= 1.0 && bull.score > 0.6, "{}", bull.score);
        assert_eq!(bull.direction, Direction::StrongBuy);
        assert!(bull.notes.iter().any(|n| n == "RSI oversold"));

        let mut weird = max_bullish(100.0);
        weird.rsi = f64::INFINITY;
        weird.cci = f64::NEG_INFINITY;
        let s = scorer.score(&weird).score;
        assert!((-1.0..=1.0).contains(&s));
    }

    #[test]
    fn direction_bucket_edges_are_exact() {
        assert_eq!(Direction::from_score(0.6), Direction::StrongBuy);
        assert_eq!(Direction::from_score(0.5999), Direction::Buy);
        assert_eq!(Direction::from_score(0.2), Direction::Buy);
        assert_eq!(Direction::from_score(0.1999), Direction::Neutral);
        assert_eq!(Direction::from_score(-0.2), Direction::Neutral);
        assert_eq!(Direction::from_score(-0.2001), Direction::Sell);
        assert_eq!(Direction::from_score(-0.6), Direction::Sell);
        assert_eq!(Direction::from_score(-0.6001), Direction::StrongSell);
        assert_eq!(Direction::from_score(1.0), Direction::StrongBuy);
        assert_eq!(Direction::from_score(-1.0), Direction::StrongSell);
    }

    #[test]
    fn single_active_family_carries_full_weight() {
        let mut s = neutral_set(100.0);
        s.rsi = 80.0;
        s.fallbacks = Family::ALL
            .iter()
            .filter(|f| **f != Family::Rsi)
            .map(|f| f.anchor().to_string())
            .collect();
        let sig = SignalScorer::default().score(&s);
        assert!((sig.score + 0.8).abs() < 1e-12);
        assert_eq!(sig.direction, Direction::StrongSell);
        assert_eq!(sig.breakdown.len(), 1);
    }

    #[test]
    fn everything_dropped_is_neutral() {
        let mut s = neutral_set(100.0);
        s.fallbacks = Family::ALL.iter().map(|f| f.anchor().to_string()).collect();
        let sig = SignalScorer::default().score(&s);
        assert_eq!(sig.score, 0.0);
        assert!(sig.breakdown.is_empty());
    }
}
