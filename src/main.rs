//! News Signal Pipeline — Binary Entrypoint
//! Wires the feed, classifier, stores, sinks, and the metrics endpoint,
//! then runs the pipeline until the feed ends or Ctrl-C.
//!
//! Feed comes from `NEWS_FEED_PATH` (JSON lines) or stdin. Classifier is
//! the HTTP provider (`CLASSIFIER_API_KEY`), or a deterministic local one
//! with `CLASSIFIER_TEST_MODE=mock`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crypto_news_signals::classifier::{
    ClassificationResult, DynClassifier, HttpClassifier, ScriptedClassifier,
};
use crypto_news_signals::config::PipelineConfig;
use crypto_news_signals::event::Sentiment;
use crypto_news_signals::feed::JsonlFeed;
use crypto_news_signals::metrics::Metrics;
use crypto_news_signals::pipeline::Pipeline;
use crypto_news_signals::sink::SinkMux;
use crypto_news_signals::store::JsonlStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// `CLASSIFIER_TEST_MODE=mock` forces a deterministic local classifier;
/// otherwise `CLASSIFIER_API_KEY` selects the HTTP provider.
fn build_classifier() -> Result<DynClassifier> {
    if std::env::var("CLASSIFIER_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(ScriptedClassifier::always(mock_result())));
    }
    let api_key = std::env::var("CLASSIFIER_API_KEY")
        .context("CLASSIFIER_API_KEY is not set (or use CLASSIFIER_TEST_MODE=mock)")?;
    let model = std::env::var("CLASSIFIER_MODEL").ok();
    Ok(Arc::new(HttpClassifier::new(api_key, model.as_deref())))
}

fn mock_result() -> ClassificationResult {
    ClassificationResult {
        economic: 30.0,
        crypto: 75.0,
        privacy: 5.0,
        instability: 15.0,
        sentiment: Sentiment::Bullish,
        confidence: 0.8,
        overall_relevance: 72.0,
        summary: "mock classification".to_string(),
        key_entities: vec!["btc".to_string()],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = PipelineConfig::load_default().context("loading pipeline config")?;
    info!(windows = ?config.window_hours, "pipeline config loaded");

    let metrics = Metrics::init();
    let metrics_addr =
        std::env::var("METRICS_ADDR").unwrap_or_else(|_| "127.0.0.1:9100".to_string());
    let listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("binding metrics listener on {metrics_addr}"))?;
    info!(%metrics_addr, "metrics endpoint up");
    let metrics_router = metrics.router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, metrics_router).await {
            warn!(error = %e, "metrics server stopped");
        }
    });

    let classifier = build_classifier()?;
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let store = Arc::new(JsonlStore::new(data_dir));
    let sink = Arc::new(SinkMux::from_env());
    let pipeline = Pipeline::new(config, classifier, store, sink)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, draining pipeline");
            let _ = shutdown_tx.send(true);
        }
        // Keep the sender alive so the pipeline only stops on the flag.
        std::future::pending::<()>().await;
    });

    let report = match std::env::var("NEWS_FEED_PATH") {
        Ok(path) => {
            info!(%path, "reading feed from file");
            let feed = JsonlFeed::open(&path).await?;
            pipeline.run(feed, shutdown_rx).await?
        }
        Err(_) => {
            info!("reading feed from stdin (JSON lines)");
            pipeline.run(JsonlFeed::stdin(), shutdown_rx).await?
        }
    };
    info!(?report, "pipeline finished");
    Ok(())
}
