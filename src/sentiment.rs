//! Lexicon sentiment scoring for article and post text.
//!
//! Produces a `(sentiment, confidence)` pair per text: sentiment in `[-1, 1]`
//! from the summed term weights, confidence in `[0, 1]` from how many terms
//! matched plus an engagement bonus for social posts. Text with no matched
//! term gets zero confidence and therefore carries no weight downstream.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

static LEXICON: Lazy<HashMap<&'static str, i32>> = Lazy::new(|| {
    [
        // bullish
        ("moon", 3),
        ("pump", 2),
        ("bull", 2),
        ("bullish", 3),
        ("rally", 2),
        ("rallies", 2),
        ("surge", 3),
        ("surges", 3),
        ("soar", 3),
        ("soars", 3),
        ("rise", 1),
        ("rises", 1),
        ("up", 1),
        ("gain", 2),
        ("gains", 2),
        ("growth", 2),
        ("positive", 2),
        ("strong", 2),
        ("breakout", 2),
        ("adoption", 1),
        ("approval", 2),
        ("approved", 2),
        ("upgrade", 1),
        ("record", 1),
        ("outperform", 2),
        // bearish
        ("dump", -2),
        ("bear", -2),
        ("bearish", -3),
        ("down", -1),
        ("fall", -1),
        ("falls", -1),
        ("crash", -3),
        ("crashes", -3),
        ("plunge", -3),
        ("plunges", -3),
        ("negative", -2),
        ("weak", -2),
        ("drop", -2),
        ("drops", -2),
        ("loss", -2),
        ("losses", -2),
        ("hack", -3),
        ("hacked", -3),
        ("exploit", -3),
        ("lawsuit", -2),
        ("ban", -2),
        ("sell-off", -2),
        ("selloff", -2),
        ("fraud", -3),
        ("liquidation", -2),
        ("liquidations", -2),
        // uncertainty leans slightly negative
        ("volatile", -1),
        ("uncertain", -1),
        ("unclear", -1),
    ]
    .into_iter()
    .collect()
});

/// Normalization constant for the compound score (same shape as VADER).
const ALPHA: f64 = 15.0;

/// Scored text: sentiment in [-1, 1], confidence in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextSentiment {
    pub sentiment: f64,
    pub confidence: f64,
    pub matched_terms: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_score(&self, w: &str) -> i32 {
        *LEXICON.get(w).unwrap_or(&0)
    }

    /// Returns the raw summed score and matched-term count.
    /// A negator within the previous 1..=3 tokens flips a term's sign.
    pub fn raw_score(&self, text: &str) -> (i32, usize) {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut score: i32 = 0;
        let mut matched = 0usize;

        for i in 0..tokens.len() {
            let base = self.word_score(tokens[i].as_str());
            if base == 0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            score += if negated { -base } else { base };
            matched += 1;
        }

        (score, matched)
    }

    /// Score a text; `engagement` (likes, retweets, upvotes) raises confidence.
    pub fn score(&self, text: &str, engagement: Option<u64>) -> TextSentiment {
        let (raw, matched) = self.raw_score(text);
        if matched == 0 {
            return TextSentiment {
                sentiment: 0.0,
                confidence: 0.0,
                matched_terms: 0,
            };
        }

        let raw = raw as f64;
        let sentiment = (raw / (raw * raw + ALPHA).sqrt()).clamp(-1.0, 1.0);

        let term_conf = (matched as f64 / 4.0).min(1.0) * 0.8;
        // engagement weight capped at 10x, as the social feeds are noisy
        let engagement_bonus = engagement
            .map(|e| (e as f64 / 100.0).min(10.0) / 10.0 * 0.2)
            .unwrap_or(0.0);

        TextSentiment {
            sentiment,
            confidence: (term_conf + engagement_bonus).clamp(0.0, 1.0),
            matched_terms: matched,
        }
    }
}

/// Alphanumeric lower-case tokens; keeps `-` so `sell-off` survives.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .map(|t| t.trim_matches('-'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "won't"
            | "can't"
            | "cannot"
            | "without"
            | "hardly"
    )
}
