//! Signal delivery: tracing log, webhook POST, fan-out mux.
//!
//! A sink is invoked at most once per evaluation tick per window length.
//! Delivery failures are contained per sink; they never travel back into
//! the pipeline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::signal::TradingSignal;

#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn on_signal(&self, signal: &TradingSignal) -> Result<()>;
}

/// Logs each signal through tracing; the default sink.
pub struct LogSink;

#[async_trait]
impl SignalSink for LogSink {
    async fn on_signal(&self, signal: &TradingSignal) -> Result<()> {
        info!(
            signal_type = ?signal.signal_type,
            strength = signal.strength,
            confidence = signal.confidence,
            window_hours = signal.source_window.window_hours,
            "trading signal"
        );
        Ok(())
    }
}

/// POSTs each signal as JSON to a webhook, with bounded retries and
/// exponential backoff.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }
}

#[async_trait]
impl SignalSink for WebhookSink {
    async fn on_signal(&self, signal: &TradingSignal) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(signal)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("signal webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("signal webhook request failed: {e}"));
                }
            }
        }
    }
}

/// Fans one signal out to every configured sink. A failing sink is logged
/// and skipped; the others still get the signal.
pub struct SinkMux {
    sinks: Vec<Arc<dyn SignalSink>>,
}

impl SinkMux {
    pub fn new(sinks: Vec<Arc<dyn SignalSink>>) -> Self {
        Self { sinks }
    }

    /// Log sink always; `SIGNAL_WEBHOOK_URL` adds a webhook sink.
    pub fn from_env() -> Self {
        let mut sinks: Vec<Arc<dyn SignalSink>> = vec![Arc::new(LogSink)];
        if let Ok(url) = std::env::var("SIGNAL_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                sinks.push(Arc::new(WebhookSink::new(url)));
            }
        }
        Self { sinks }
    }
}

#[async_trait]
impl SignalSink for SinkMux {
    async fn on_signal(&self, signal: &TradingSignal) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.on_signal(signal).await {
                warn!(error = %e, "signal sink delivery failed");
            }
        }
        Ok(())
    }
}

/// Test sink capturing every delivered signal.
#[derive(Debug, Default)]
pub struct MemorySink {
    signals: Mutex<Vec<TradingSignal>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<TradingSignal> {
        self.signals.lock().expect("sink mutex poisoned").clone()
    }
}

#[async_trait]
impl SignalSink for MemorySink {
    async fn on_signal(&self, signal: &TradingSignal) -> Result<()> {
        self.signals
            .lock()
            .expect("sink mutex poisoned")
            .push(signal.clone());
        Ok(())
    }
}
