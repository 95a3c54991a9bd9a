//! Market signal pipeline binary.
//!
//! ```text
//! market-signal-pipeline analyze [SYMS..]   one ingest+aggregate cycle, then one analysis (JSON on stdout)
//! market-signal-pipeline monitor [SYMS..]   run the schedulers and an analysis loop until Ctrl-C
//! market-signal-pipeline check              validate the configuration
//! ```

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_signal_pipeline::metrics::Metrics;
use market_signal_pipeline::{
    AnalysisBridge, Aggregator, Cache, InMemoryCache, InMemoryStore, IndicatorEngine,
    Pipeline, PipelineConfig, ProcessAnalyzer, RecordStore, Scheduler, SignalScorer,
};

const USAGE: &str = "usage: market-signal-pipeline <analyze|monitor|check> [SYMBOL..]";

const DEFAULT_FILTER: &str =
    "market_signal_pipeline=info,ingest=info,aggregate=info,bridge=info,pipeline=info,warn";

/// Logs go to stderr so `analyze` output stays pipeable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

struct App {
    aggregator: Arc<Aggregator>,
    pipeline: Pipeline,
}

fn build(cfg: &PipelineConfig) -> Result<App> {
    let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new(cfg.aggregate.lookback));
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());

    let fetchers = cfg.build_fetchers()?;
    let aggregator = Arc::new(Aggregator::new(
        fetchers,
        store.clone(),
        cache.clone(),
        cfg.aggregator_cfg(),
    ));

    let mut analyzer = ProcessAnalyzer::new(&cfg.bridge.program).with_args(cfg.bridge.args.clone());
    if let Some(dir) = &cfg.bridge.working_dir {
        analyzer = analyzer.with_working_dir(dir);
    }
    let bridge = Arc::new(AnalysisBridge::new(
        Arc::new(analyzer),
        cache.clone(),
        cfg.bridge_cfg(),
    ));

    let pipeline = Pipeline::new(
        store,
        cache,
        IndicatorEngine::new(),
        SignalScorer::new(cfg.signal_weights),
        bridge,
    );
    Ok(App {
        aggregator,
        pipeline,
    })
}

fn symbols(cfg: &PipelineConfig, args: Vec<String>) -> Vec<String> {
    if args.is_empty() {
        return cfg.entity_symbols();
    }
    let tracked = cfg.entity_symbols();
    for a in &args {
        if !tracked.iter().any(|t| t.eq_ignore_ascii_case(a)) {
            warn!(symbol = %a, "symbol is not in the entity catalog; text records will not be tagged for it");
        }
    }
    args
}

async fn analyze(cfg: PipelineConfig, args: Vec<String>) -> Result<()> {
    let _metrics = Metrics::init(Metrics::listen_addr_from_env()?, &cfg.bridge_cfg())?;
    let app = build(&cfg)?;
    let syms = symbols(&cfg, args);

    let (ingested, aggregated) = app.aggregator.run_cycle(&syms).await?;
    info!(
        records = ingested.records,
        prices = ingested.prices_appended,
        texts = ingested.texts_buffered,
        samples = aggregated.written.len(),
        "cycle finished"
    );

    let result = app.pipeline.analyze(&syms).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("encoding analysis result")?
    );
    Ok(())
}

async fn monitor(cfg: PipelineConfig, args: Vec<String>) -> Result<()> {
    let _metrics = Metrics::init(Metrics::listen_addr_from_env()?, &cfg.bridge_cfg())?;
    let app = build(&cfg)?;
    let syms = symbols(&cfg, args);

    let scheduler = Scheduler::start(app.aggregator.clone(), syms.clone(), cfg.schedule_cfg());
    info!(sources = app.aggregator.source_count(), entities = ?syms, "monitoring");

    let mut every = tokio::time::interval(cfg.analysis_every());
    every.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick is immediate; give the first ingest cycle a head start
    every.tick().await;

    loop {
        tokio::select! {
            _ = every.tick() => {
                match app.pipeline.analyze(&syms).await {
                    Ok(result) => info!(
                        source = ?result.source,
                        overall_confidence = result.overall_confidence,
                        content_hash = %result.content_hash,
                        "periodic analysis"
                    ),
                    Err(e) => error!(error = %e, "periodic analysis failed"),
                }
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "ctrl-c handler failed; shutting down");
                }
                break;
            }
        }
    }

    info!("shutting down");
    app.pipeline.bridge().shutdown();
    scheduler.shutdown().await;
    Ok(())
}

fn check(cfg: &PipelineConfig) -> Result<()> {
    let report = cfg.check();
    println!(
        "entities: {}\nsources: {}",
        cfg.entity_symbols().join(" "),
        cfg.sources.len()
    );
    for s in &cfg.sources {
        let key = match s.api_key_env.as_deref() {
            None => "no key needed".to_string(),
            Some(var) if std::env::var(var).is_ok_and(|v| !v.trim().is_empty()) => format!("{var} set"),
            Some(var) => format!("{var} missing"),
        };
        println!("  {:<20} {:?} ({key})", s.id, s.kind);
    }
    for w in &report.warnings {
        println!("warning: {w}");
    }
    for e in &report.errors {
        println!("error: {e}");
    }
    if !report.is_ok() {
        bail!("configuration has {} error(s)", report.errors.len());
    }
    println!("ok");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut args = std::env::args().skip(1);
    let cmd = args.next().unwrap_or_else(|| "analyze".to_string());
    let rest: Vec<String> = args.collect();

    if matches!(cmd.as_str(), "-h" | "--help" | "help") {
        println!("{USAGE}");
        return Ok(());
    }

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    match cmd.as_str() {
        "analyze" => analyze(cfg, rest).await,
        "monitor" => monitor(cfg, rest).await,
        "check" => check(&cfg),
        other => bail!("unknown command `{other}`\n{USAGE}"),
    }
}
