// src/config.rs
//! Pipeline configuration (TOML).
//!
//! Lookup order for [`PipelineConfig::load_default`]:
//! 1) `$PIPELINE_CONFIG_PATH` (must exist)
//! 2) `config/pipeline.toml`
//! 3) built-in defaults
//!
//! Then the `ANALYSIS_*` env overrides are applied and everything is sanitized.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::aggregate::scheduler::ScheduleCfg;
use crate::aggregate::AggregatorCfg;
use crate::bridge::BridgeConfig;
use crate::ingest::fetcher::SourceFetcher;
use crate::ingest::providers::{build_provider, http_client};
use crate::ingest::tags::{EntityCatalog, EntitySpec};
use crate::ingest::types::{Source, SourceKind};
use crate::series::MIN_LOOKBACK;
use crate::signal::SignalWeights;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_DEADLINE_MS: &str = "ANALYSIS_DEADLINE_MS";
pub const ENV_CACHE_TTL_SECS: &str = "ANALYSIS_CACHE_TTL_SECS";
pub const ENV_PROGRAM: &str = "ANALYSIS_PROGRAM";

fn default_entities() -> Vec<EntitySpec> {
    [
        ("BTC", &["Bitcoin"][..]),
        ("ETH", &["Ethereum", "Ether"][..]),
        ("SONIC", &["Sonic Labs"][..]),
    ]
    .into_iter()
    .map(|(symbol, names)| EntitySpec {
        symbol: symbol.to_string(),
        names: names.iter().map(|n| n.to_string()).collect(),
    })
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestSettings {
    pub fetch_timeout_secs: u64,
    pub max_parallel: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
            max_parallel: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregateSettings {
    pub window_secs: u64,
    pub sample_ttl_secs: u64,
    /// Price samples kept per entity; never below 200.
    pub lookback: usize,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self {
            window_secs: 86_400,
            sample_ttl_secs: 3_600,
            lookback: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleSettings {
    pub ingest_secs: u64,
    pub aggregate_secs: u64,
    pub cleanup_secs: u64,
    pub analysis_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            ingest_secs: 600,
            aggregate_secs: 900,
            cleanup_secs: 86_400,
            analysis_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeSettings {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub deadline_ms: u64,
    pub cache_ttl_secs: u64,
    pub fallback_memo_secs: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            program: "python3".into(),
            args: vec!["analysis/run_analysis.py".into()],
            working_dir: None,
            deadline_ms: 15_000,
            cache_ttl_secs: 300,
            fallback_memo_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub entities: Vec<EntitySpec>,
    pub sources: Vec<Source>,
    pub ingest: IngestSettings,
    pub aggregate: AggregateSettings,
    pub schedule: ScheduleSettings,
    pub bridge: BridgeSettings,
    pub signal_weights: SignalWeights,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            entities: default_entities(),
            sources: Vec::new(),
            ingest: IngestSettings::default(),
            aggregate: AggregateSettings::default(),
            schedule: ScheduleSettings::default(),
            bridge: BridgeSettings::default(),
            signal_weights: SignalWeights::default(),
        }
    }
}

/// Findings from [`PipelineConfig::check`]. Errors make the config unusable.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConfigReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

fn positive_or(v: u64, fallback: u64) -> u64 {
    if v == 0 {
        fallback
    } else {
        v
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Resolve the file, apply env overrides, sanitize.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display()));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_CONFIG_PATH))?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Malformed values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(ENV_DEADLINE_MS) {
            match v.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.bridge.deadline_ms = ms,
                _ => warn!(var = ENV_DEADLINE_MS, value = %v, "ignoring invalid override"),
            }
        }
        if let Ok(v) = std::env::var(ENV_CACHE_TTL_SECS) {
            match v.trim().parse::<u64>() {
                Ok(secs) => self.bridge.cache_ttl_secs = secs,
                Err(_) => warn!(var = ENV_CACHE_TTL_SECS, value = %v, "ignoring invalid override"),
            }
        }
        if let Ok(v) = std::env::var(ENV_PROGRAM) {
            if !v.trim().is_empty() {
                self.bridge.program = v.trim().to_string();
            }
        }
    }

    pub fn sanitize(&mut self) {
        let mut seen = HashSet::new();
        self.entities.retain_mut(|e| {
            e.symbol = e.symbol.trim().to_ascii_uppercase();
            !e.symbol.is_empty() && seen.insert(e.symbol.clone())
        });
        if self.entities.is_empty() {
            self.entities = default_entities();
        }

        let d = IngestSettings::default();
        self.ingest.fetch_timeout_secs = positive_or(self.ingest.fetch_timeout_secs, d.fetch_timeout_secs);
        self.ingest.max_parallel = self.ingest.max_parallel.max(1);

        let d = AggregateSettings::default();
        self.aggregate.window_secs = positive_or(self.aggregate.window_secs, d.window_secs);
        self.aggregate.sample_ttl_secs = positive_or(self.aggregate.sample_ttl_secs, d.sample_ttl_secs);
        self.aggregate.lookback = self.aggregate.lookback.max(MIN_LOOKBACK);

        let d = ScheduleSettings::default();
        self.schedule.ingest_secs = positive_or(self.schedule.ingest_secs, d.ingest_secs);
        self.schedule.aggregate_secs = positive_or(self.schedule.aggregate_secs, d.aggregate_secs);
        self.schedule.cleanup_secs = positive_or(self.schedule.cleanup_secs, d.cleanup_secs);
        self.schedule.analysis_secs = positive_or(self.schedule.analysis_secs, d.analysis_secs);

        let d = BridgeSettings::default();
        self.bridge.deadline_ms = positive_or(self.bridge.deadline_ms, d.deadline_ms);

        for s in &mut self.sources {
            s.rate_limit_per_window = s.rate_limit_per_window.max(1);
            if s.window.is_zero() {
                s.window = Duration::from_secs(60);
            }
            if let Some(e) = s.entity.as_mut() {
                *e = e.trim().to_ascii_uppercase();
            }
        }
    }

    /// Validate what sanitizing cannot fix and flag missing optional pieces.
    pub fn check(&self) -> ConfigReport {
        let mut report = ConfigReport::default();
        if self.sources.is_empty() {
            report.warnings.push("no sources configured; ingestion will produce nothing".into());
        }

        let mut ids = HashSet::new();
        for s in &self.sources {
            if !ids.insert(s.id.as_str()) {
                report.errors.push(format!("duplicate source id `{}`", s.id));
            }
            if s.endpoint.trim().is_empty() {
                report.errors.push(format!("source `{}` has an empty endpoint", s.id));
            }
            if s.kind == SourceKind::PriceFeed {
                match s.entity.as_deref() {
                    None => report.errors.push(format!("price feed `{}` has no entity", s.id)),
                    Some(e) if !self.entities.iter().any(|x| x.symbol == e) => report
                        .warnings
                        .push(format!("price feed `{}` tracks untracked entity {e}", s.id)),
                    Some(_) => {}
                }
            }
            if let Some(var) = s.api_key_env.as_deref() {
                let present = std::env::var(var).map(|v| !v.trim().is_empty()).unwrap_or(false);
                if !present {
                    report
                        .warnings
                        .push(format!("source `{}`: {var} is not set; requests go unauthenticated", s.id));
                }
            }
        }

        let program = Path::new(&self.bridge.program);
        if program.components().count() > 1 && !program.exists() {
            report.warnings.push(format!(
                "analysis program {} not found; every analysis will be a fallback",
                program.display()
            ));
        }
        report
    }

    pub fn entity_symbols(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.symbol.clone()).collect()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest.fetch_timeout_secs)
    }

    pub fn analysis_every(&self) -> Duration {
        Duration::from_secs(self.schedule.analysis_secs)
    }

    pub fn aggregator_cfg(&self) -> AggregatorCfg {
        AggregatorCfg {
            window: Duration::from_secs(self.aggregate.window_secs),
            sample_ttl: Duration::from_secs(self.aggregate.sample_ttl_secs),
            max_parallel: self.ingest.max_parallel,
        }
    }

    pub fn schedule_cfg(&self) -> ScheduleCfg {
        ScheduleCfg {
            ingest_every: Duration::from_secs(self.schedule.ingest_secs),
            aggregate_every: Duration::from_secs(self.schedule.aggregate_secs),
            cleanup_every: Duration::from_secs(self.schedule.cleanup_secs),
        }
    }

    pub fn bridge_cfg(&self) -> BridgeConfig {
        BridgeConfig {
            deadline: Duration::from_millis(self.bridge.deadline_ms),
            cache_ttl: Duration::from_secs(self.bridge.cache_ttl_secs),
            fallback_memo: Duration::from_secs(self.bridge.fallback_memo_secs),
        }
    }

    /// One fetcher per configured source, sharing an HTTP client and the entity catalog.
    pub fn build_fetchers(&self) -> Result<Vec<SourceFetcher>> {
        let catalog = Arc::new(EntityCatalog::new(&self.entities));
        let client = http_client(self.fetch_timeout())?;
        self.sources
            .iter()
            .map(|s| {
                let provider = build_provider(s, catalog.clone(), client.clone())
                    .with_context(|| format!("building provider for `{}`", s.id))?;
                Ok(SourceFetcher::new(s.clone(), provider, self.fetch_timeout()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const SAMPLE: &str = r#"
        [[entities]]
        symbol = " btc "
        names = ["Bitcoin"]

        [[entities]]
        symbol = "BTC"

        [ingest]
        max_parallel = 0

        [aggregate]
        lookback = 50

        [schedule]
        ingest_secs = 0

        [signal_weights]
        rsi = 0.5

        [[sources]]
        id = "cg-btc"
        kind = "price_feed"
        endpoint = "https://example.invalid/btc"
        rate_limit_per_window = 0
        window = 60
        entity = "btc"
    "#;

    #[test]
    fn parse_and_sanitize() {
        let cfg = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.entity_symbols(), vec!["BTC"]);
        assert_eq!(cfg.ingest.max_parallel, 1);
        assert_eq!(cfg.aggregate.lookback, MIN_LOOKBACK);
        assert_eq!(cfg.schedule.ingest_secs, 600);
        assert_eq!(cfg.signal_weights.rsi, 0.5);
        assert_eq!(cfg.signal_weights.macd, 0.15);
        assert_eq!(cfg.sources[0].rate_limit_per_window, 1);
        assert_eq!(cfg.sources[0].entity.as_deref(), Some("BTC"));
    }

    #[test]
    fn defaults_track_three_entities() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.entity_symbols(), vec!["BTC", "ETH", "SONIC"]);
        assert_eq!(cfg.bridge_cfg(), BridgeConfig::default());
    }

    #[test]
    fn check_reports_errors_and_warnings() {
        let mut cfg = PipelineConfig::default();
        cfg.sources.push(Source {
            id: "feed".into(),
            kind: SourceKind::PriceFeed,
            endpoint: String::new(),
            rate_limit_per_window: 5,
            window: Duration::from_secs(60),
            api_key_env: Some("MSP_TEST_SURELY_UNSET_KEY".into()),
            entity: None,
        });
        cfg.sources.push(cfg.sources[0].clone());
        let report = cfg.check();
        assert!(!report.is_ok());
        assert!(report.errors.iter().any(|e| e.contains("duplicate source id")));
        assert!(report.errors.iter().any(|e| e.contains("empty endpoint")));
        assert!(report.errors.iter().any(|e| e.contains("has no entity")));
        assert!(report.warnings.iter().any(|w| w.contains("MSP_TEST_SURELY_UNSET_KEY")));
    }

    #[serial_test::serial]
    #[test]
    fn default_lookup_and_env_overrides() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_DEADLINE_MS);
        env::remove_var(ENV_CACHE_TTL_SECS);
        env::remove_var(ENV_PROGRAM);

        // no file anywhere: built-in defaults
        let cfg = PipelineConfig::load_default().unwrap();
        assert_eq!(cfg, {
            let mut d = PipelineConfig::default();
            d.sanitize();
            d
        });

        // config/pipeline.toml is picked up
        fs::create_dir_all("config").unwrap();
        fs::write(DEFAULT_CONFIG_PATH, "[bridge]\ndeadline_ms = 2000\n").unwrap();
        assert_eq!(PipelineConfig::load_default().unwrap().bridge.deadline_ms, 2000);

        // env overrides win; junk is ignored
        env::set_var(ENV_DEADLINE_MS, "500");
        env::set_var(ENV_CACHE_TTL_SECS, "not-a-number");
        env::set_var(ENV_PROGRAM, "/usr/bin/analysis");
        let cfg = PipelineConfig::load_default().unwrap();
        assert_eq!(cfg.bridge.deadline_ms, 500);
        assert_eq!(cfg.bridge.cache_ttl_secs, 300);
        assert_eq!(cfg.bridge.program, "/usr/bin/analysis");

        // explicit path that does not exist is an error
        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(PipelineConfig::load_default().is_err());

        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_DEADLINE_MS);
        env::remove_var(ENV_CACHE_TTL_SECS);
        env::remove_var(ENV_PROGRAM);
        env::set_current_dir(old).unwrap();
    }
}
