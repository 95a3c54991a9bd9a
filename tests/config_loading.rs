// tests/config_loading.rs
use std::path::Path;

use market_signal_pipeline::config::PipelineConfig;
use market_signal_pipeline::ingest::types::SourceKind;
use market_signal_pipeline::signal::SignalWeights;

#[test]
fn shipped_config_is_valid() {
    let cfg = PipelineConfig::load_from(Path::new("config/pipeline.toml")).unwrap();
    assert_eq!(cfg.entity_symbols(), vec!["BTC", "ETH", "SONIC"]);
    assert_eq!(cfg.signal_weights, SignalWeights::default());
    assert_eq!(cfg.bridge_cfg().deadline.as_millis(), 15_000);

    let report = cfg.check();
    assert!(report.is_ok(), "{:?}", report.errors);

    // every tracked entity has a price feed
    for sym in cfg.entity_symbols() {
        assert!(
            cfg.sources
                .iter()
                .any(|s| s.kind == SourceKind::PriceFeed && s.entity.as_deref() == Some(sym.as_str())),
            "no price feed for {sym}"
        );
    }

    // building providers needs no network
    assert_eq!(cfg.build_fetchers().unwrap().len(), cfg.sources.len());
}

#[test]
fn broken_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, "[ingest]\nmax_parallel = \"four\"\n").unwrap();
    let err = PipelineConfig::load_from(&path).unwrap_err();
    assert!(format!("{err:#}").contains("pipeline.toml"));
}
