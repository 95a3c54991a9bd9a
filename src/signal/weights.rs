//! Family weights for the composite signal.
//!
//! The documented table sums to 1.20, so weights are treated as relative and
//! divided by the sum over the families that actually scored. Overrides can
//! come from the `[signal_weights]` table in the pipeline config.

use serde::{Deserialize, Serialize};

use super::Family;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalWeights {
    pub moving_averages: f64,
    pub macd: f64,
    pub rsi: f64,
    pub volume: f64,
    pub adx: f64,
    pub ichimoku: f64,
    pub bollinger: f64,
    pub momentum: f64,
    pub stochastic: f64,
    pub cci: f64,
    pub williams_r: f64,
    pub parabolic_sar: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            moving_averages: 0.18,
            macd: 0.15,
            rsi: 0.12,
            volume: 0.12,
            adx: 0.10,
            ichimoku: 0.10,
            bollinger: 0.10,
            momentum: 0.08,
            stochastic: 0.08,
            cci: 0.06,
            williams_r: 0.06,
            parabolic_sar: 0.05,
        }
    }
}

impl SignalWeights {
    pub fn get(&self, family: Family) -> f64 {
        let w = match family {
            Family::MovingAverages => self.moving_averages,
            Family::Macd => self.macd,
            Family::Rsi => self.rsi,
            Family::Volume => self.volume,
            Family::Adx => self.adx,
            Family::Ichimoku => self.ichimoku,
            Family::Bollinger => self.bollinger,
            Family::Momentum => self.momentum,
            Family::Stochastic => self.stochastic,
            Family::Cci => self.cci,
            Family::WilliamsR => self.williams_r,
            Family::ParabolicSar => self.parabolic_sar,
        };
        if w.is_finite() {
            w.max(0.0)
        } else {
            0.0
        }
    }

    /// Effective weights over `families`, summing to 1.0 (empty if all are zero).
    pub fn normalized(&self, families: &[Family]) -> Vec<(Family, f64)> {
        let total: f64 = families.iter().map(|f| self.get(*f)).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        families.iter().map(|f| (*f, self.get(*f) / total)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_normalizes_to_one() {
        let w = SignalWeights::default();
        let eff = w.normalized(&Family::ALL);
        let sum: f64 = eff.iter().map(|(_, x)| x).sum();
        assert!((sum - 1.0).abs() < 1e-12);
        // relative order is kept: moving averages stay the heaviest
        let ma = eff.iter().find(|(f, _)| *f == Family::MovingAverages).unwrap().1;
        assert!((ma - 0.18 / 1.20).abs() < 1e-12);
    }

    #[test]
    fn dropping_families_renormalizes() {
        let w = SignalWeights::default();
        let eff = w.normalized(&[Family::Rsi, Family::Macd]);
        assert!((eff[0].1 - 0.12 / 0.27).abs() < 1e-12);
        assert!((eff[1].1 - 0.15 / 0.27).abs() < 1e-12);
    }

    #[test]
    fn negative_or_nan_weights_count_as_zero() {
        let w = SignalWeights {
            rsi: -1.0,
            macd: f64::NAN,
            ..Default::default()
        };
        assert!(w.normalized(&[Family::Rsi, Family::Macd]).is_empty());
    }
}
