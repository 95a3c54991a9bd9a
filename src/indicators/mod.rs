//! Technical indicator engine.
//!
//! [`IndicatorEngine::compute`] needs at least [`MIN_SAMPLES`] prices and then
//! always returns a full [`IndicatorSet`]: an indicator whose own window is
//! longer than the series (or whose inputs are degenerate, e.g. a flat price)
//! takes its neutral value and is listed in [`IndicatorSet::fallbacks`].
//!
//! | indicator        | params          | neutral value          |
//! |------------------|-----------------|------------------------|
//! | RSI              | 14              | 50                     |
//! | MACD             | 12 / 26 / 9     | 0 / 0 / 0              |
//! | Bollinger        | 20, 2σ          | bands = price, pos 0.5 |
//! | SMA              | 20 / 50 / 200   | last price             |
//! | EMA              | 12 / 26         | last price             |
//! | Stochastic       | 14, 3           | 50 / 50                |
//! | Williams %R      | 14              | -50                    |
//! | ATR              | 14              | 0                      |
//! | ADX, ±DI         | 14              | 25, 0 / 0              |
//! | CCI              | 20              | 0                      |
//! | Momentum / ROC   | 10 / 12         | 0 / 0                  |
//! | MFI              | 14              | 50                     |
//! | OBV              | trend over 10   | 0, flat                |
//! | Fibonacci        | trailing 50     | all levels = price     |
//! | Pivots           | latest bar      | all levels = price     |
//! | Ichimoku         | 9 / 26 / 52     | all lines = price      |
//! | Parabolic SAR    | 0.02 step, 0.2  | price, uptrend         |

pub mod levels;
pub mod momentum;
pub mod trend;
pub mod volatility;
pub mod volume;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::trace;

use crate::error::PipelineError;
use crate::series::PriceSeries;

pub use levels::{Fibonacci, Pivots};
pub use momentum::Stochastic;
pub use trend::{Adx, Ichimoku, Macd, ParabolicSar};
pub use volatility::Bollinger;
pub use volume::{Obv, ObvTrend};

/// Fewest samples [`IndicatorEngine::compute`] accepts.
pub const MIN_SAMPLES: usize = 50;

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("need {required} samples, got {provided}")]
    InsufficientData { required: usize, provided: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("degenerate input: {0}")]
    Degenerate(&'static str),
}

pub type IndicatorResult<T> = Result<T, IndicatorError>;

pub(crate) fn require(provided: usize, required: usize) -> IndicatorResult<()> {
    if required == 0 {
        return Err(IndicatorError::InvalidParameter("period must be positive".into()));
    }
    if provided < required {
        return Err(IndicatorError::InsufficientData { required, provided });
    }
    Ok(())
}

/// Collects the names of indicators that took their neutral value.
#[derive(Default)]
struct Fallbacks(BTreeSet<String>);

impl Fallbacks {
    fn settle<T>(&mut self, name: &str, res: IndicatorResult<T>, neutral: T) -> T {
        match res {
            Ok(v) => v,
            Err(e) => {
                trace!(target: "pipeline", indicator = name, error = %e, "neutral fallback");
                self.0.insert(name.to_string());
                neutral
            }
        }
    }
}

fn finite(res: IndicatorResult<f64>) -> IndicatorResult<f64> {
    match res {
        Ok(v) if !v.is_finite() => Err(IndicatorError::Degenerate("non-finite result")),
        other => other,
    }
}

pub(crate) fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

pub(crate) fn highest(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::MIN, f64::max)
}

pub(crate) fn lowest(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::MAX, f64::min)
}

/// Snapshot of every indicator for one entity at the series' last timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSet {
    pub entity: String,
    pub timestamp: u64,
    pub last_price: f64,
    pub rsi: f64,
    pub macd: Macd,
    pub bollinger: Bollinger,
    pub sma_20: f64,
    pub sma_50: f64,
    pub sma_200: f64,
    pub ema_12: f64,
    pub ema_26: f64,
    pub stochastic: Stochastic,
    pub williams_r: f64,
    pub atr: f64,
    pub adx: Adx,
    pub cci: f64,
    pub momentum: f64,
    pub roc: f64,
    pub mfi: f64,
    pub obv: Obv,
    pub fibonacci: Fibonacci,
    pub pivots: Pivots,
    pub ichimoku: Ichimoku,
    pub parabolic_sar: ParabolicSar,
    /// Indicators that took their neutral value.
    pub fallbacks: BTreeSet<String>,
}

impl IndicatorSet {
    pub fn fell_back(&self, indicator: &str) -> bool {
        self.fallbacks.contains(indicator)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndicatorEngine {
    min_samples: usize,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self {
            min_samples: MIN_SAMPLES,
        }
    }
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&self, series: &PriceSeries) -> Result<IndicatorSet, PipelineError> {
        let n = series.len();
        let last = match series.last() {
            Some(l) if n >= self.min_samples => *l,
            _ => {
                return Err(PipelineError::InsufficientData {
                    required: self.min_samples,
                    provided: n,
                })
            }
        };

        let closes = series.closes();
        let highs = series.highs();
        let lows = series.lows();
        let volumes = series.volumes();
        let price = last.price;

        let mut fb = Fallbacks::default();

        let rsi = fb.settle("rsi", finite(momentum::rsi(&closes, 14)), 50.0);
        let sma_20 = fb.settle("sma_20", finite(trend::sma(&closes, 20)), price);
        let sma_50 = fb.settle("sma_50", finite(trend::sma(&closes, 50)), price);
        let sma_200 = fb.settle("sma_200", finite(trend::sma(&closes, 200)), price);
        let ema_12 = fb.settle("ema_12", finite(trend::ema(&closes, 12)), price);
        let ema_26 = fb.settle("ema_26", finite(trend::ema(&closes, 26)), price);
        let williams_r = fb.settle("williams_r", finite(momentum::williams_r(&highs, &lows, &closes, 14)), -50.0);
        let atr = fb.settle("atr", finite(volatility::atr(&highs, &lows, &closes, 14)), 0.0);
        let cci = fb.settle("cci", finite(momentum::cci(&highs, &lows, &closes, 20)), 0.0);
        let momentum_10 = fb.settle("momentum", finite(momentum::momentum(&closes, 10)), 0.0);
        let roc = fb.settle("roc", finite(momentum::roc(&closes, 12)), 0.0);
        let mfi = fb.settle("mfi", finite(volume::mfi(&highs, &lows, &closes, &volumes, 14)), 50.0);

        let macd = fb.settle("macd", trend::macd(&closes, 12, 26, 9), Macd {
            macd: 0.0,
            signal: 0.0,
            histogram: 0.0,
        });
        let bollinger = fb.settle(
            "bollinger",
            volatility::bollinger(&closes, 20, 2.0),
            Bollinger {
                upper: price,
                middle: price,
                lower: price,
                position: 0.5,
            },
        );
        let stochastic = fb.settle(
            "stochastic",
            momentum::stochastic(&highs, &lows, &closes, 14, 3),
            Stochastic { k: 50.0, d: 50.0 },
        );
        let adx = fb.settle(
            "adx",
            trend::adx(&highs, &lows, &closes, 14),
            Adx {
                adx: 25.0,
                plus_di: 0.0,
                minus_di: 0.0,
            },
        );
        let obv = fb.settle(
            "obv",
            volume::obv(&closes, &volumes),
            Obv {
                value: 0.0,
                trend: ObvTrend::Flat,
            },
        );
        let fibonacci = fb.settle(
            "fibonacci",
            levels::fibonacci(&highs, &lows, 50),
            Fibonacci {
                high: price,
                low: price,
                level_236: price,
                level_382: price,
                level_500: price,
                level_618: price,
                level_786: price,
            },
        );
        let ichimoku = fb.settle(
            "ichimoku",
            trend::ichimoku(&highs, &lows, &closes),
            Ichimoku {
                tenkan: price,
                kijun: price,
                senkou_a: price,
                senkou_b: price,
                chikou_ref: price,
            },
        );
        let parabolic_sar = fb.settle(
            "parabolic_sar",
            trend::parabolic_sar(&highs, &lows, 0.02, 0.2),
            ParabolicSar {
                value: price,
                uptrend: true,
            },
        );
        let pivots = levels::pivots(last.high(), last.low(), price);

        Ok(IndicatorSet {
            entity: series.entity().to_string(),
            timestamp: last.timestamp,
            last_price: price,
            rsi,
            macd,
            bollinger,
            sma_20,
            sma_50,
            sma_200,
            ema_12,
            ema_26,
            stochastic,
            williams_r,
            atr,
            adx,
            cci,
            momentum: momentum_10,
            roc,
            mfi,
            obv,
            fibonacci,
            pivots,
            ichimoku,
            parabolic_sar,
            fallbacks: fb.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::PriceSample;

    fn wave(n: usize) -> PriceSeries {
        PriceSeries::from_samples(
            "BTC",
            500,
            (0..n).map(|i| {
                let p = 100.0 + (i as f64 / 5.0).sin() * 5.0 + i as f64 * 0.1;
                let mut s = PriceSample::new(i as u64 * 60, p, 10.0 + (i % 7) as f64);
                s.high = Some(p + 1.0);
                s.low = Some(p - 1.0);
                s
            }),
        )
    }

    #[test]
    fn forty_nine_samples_is_insufficient() {
        let engine = IndicatorEngine::new();
        assert!(matches!(
            engine.compute(&wave(49)),
            Err(PipelineError::InsufficientData {
                required: 50,
                provided: 49
            })
        ));
        assert!(engine.compute(&wave(50)).is_ok());
    }

    #[test]
    fn short_series_records_window_fallbacks() {
        let set = IndicatorEngine::new().compute(&wave(50)).unwrap();
        assert!(set.fell_back("sma_200"));
        assert!(set.fell_back("ichimoku"));
        assert!(!set.fell_back("rsi"));
        assert!(!set.fell_back("macd"));
        assert_eq!(set.sma_200, set.last_price);
        assert_eq!(set.ichimoku.tenkan, set.last_price);
    }

    #[test]
    fn long_series_has_no_fallbacks() {
        let set = IndicatorEngine::new().compute(&wave(260)).unwrap();
        assert!(set.fallbacks.is_empty(), "{:?}", set.fallbacks);
        assert!((0.0..=100.0).contains(&set.rsi));
        assert!((0.0..=1.0).contains(&set.bollinger.position));
        assert!((-100.0..=0.0).contains(&set.williams_r));
        assert!(set.atr > 0.0);
        assert_eq!(set.timestamp, 259 * 60);
    }

    #[test]
    fn flat_volume_free_feed_falls_back_to_neutral() {
        let series =
            PriceSeries::from_samples("ETH", 200, (0..60).map(|i| PriceSample::new(i, 42.0, 0.0)));
        let set = IndicatorEngine::new().compute(&series).unwrap();
        assert_eq!(set.rsi, 50.0);
        assert!(set.fell_back("bollinger"));
        assert_eq!(set.bollinger.position, 0.5);
        assert!(set.fell_back("mfi"));
        assert_eq!(set.mfi, 50.0);
        assert_eq!(set.stochastic, Stochastic { k: 50.0, d: 50.0 });
        assert_eq!(set.pivots.pivot, 42.0);
    }
}
