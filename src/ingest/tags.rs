//! Entity tag extraction: maps free text to the tracked symbols it mentions.
//!
//! Matches, case-insensitively: bare symbol tokens (`btc`), cashtags
//! (`$BTC`), hashtags (`#btc`, `#Bitcoin`) and known full names
//! (`Bitcoin`, `Sonic Labs`). Output is uppercase, sorted and deduplicated.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A tracked entity and the names it goes by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntitySpec {
    pub symbol: String,
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug)]
struct CompiledEntity {
    symbol: String,
    names: Vec<Regex>,
    squashed_names: Vec<String>,
}

#[derive(Debug)]
pub struct EntityCatalog {
    entities: Vec<CompiledEntity>,
    re_token: Regex,
    re_cashtag: Regex,
    re_hashtag: Regex,
}

impl EntityCatalog {
    pub fn new(specs: &[EntitySpec]) -> Self {
        let entities = specs
            .iter()
            .filter(|s| !s.symbol.trim().is_empty())
            .map(|s| CompiledEntity {
                symbol: s.symbol.trim().to_ascii_uppercase(),
                names: s
                    .names
                    .iter()
                    .filter(|n| !n.trim().is_empty())
                    .filter_map(|n| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(n.trim()))).ok())
                    .collect(),
                squashed_names: s
                    .names
                    .iter()
                    .map(|n| squash(n))
                    .filter(|n| !n.is_empty())
                    .collect(),
            })
            .collect();

        Self {
            entities,
            re_token: Regex::new(r"(?u)\b\w+\b").expect("token regex"),
            re_cashtag: Regex::new(r"(?i)\$([a-z][a-z0-9]{0,9})\b").expect("cashtag regex"),
            re_hashtag: Regex::new(r"(?i)#([a-z0-9_]+)\b").expect("hashtag regex"),
        }
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.symbol.as_str())
    }

    /// Symbols mentioned in `text`.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut found = BTreeSet::new();
        if text.is_empty() {
            return Vec::new();
        }

        let tokens: BTreeSet<String> = self
            .re_token
            .find_iter(text)
            .map(|m| m.as_str().to_ascii_uppercase())
            .collect();
        let cashtags: BTreeSet<String> = self
            .re_cashtag
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_uppercase())
            .collect();
        let hashtags: BTreeSet<String> = self
            .re_hashtag
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
            .collect();

        for e in &self.entities {
            let by_symbol = tokens.contains(&e.symbol) || cashtags.contains(&e.symbol);
            let by_hashtag = hashtags
                .iter()
                .any(|h| h.eq_ignore_ascii_case(&e.symbol) || e.squashed_names.iter().any(|n| n == h));
            let by_name = e.names.iter().any(|re| re.is_match(text));
            if by_symbol || by_hashtag || by_name {
                found.insert(e.symbol.clone());
            }
        }

        found.into_iter().collect()
    }
}

/// "Sonic Labs" -> "soniclabs", for hashtag comparison.
fn squash(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
