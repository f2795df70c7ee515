//! # Pipeline Coordinator
//! Owns the concurrency topology: feed -> bounded ingest queue ->
//! classification worker pool -> single-owner aggregation stage -> signal
//! sink.
//!
//! Backpressure: workers bound classification concurrency; when they fall
//! behind, items queue up to `queue_depth`, beyond which the oldest queued
//! item is dropped and counted — the feed is never blocked indefinitely.
//! The aggregation stage is a single task, so window mutations are
//! serialized and signal emission is strictly time-ordered across ticks.
//! Per-item failures never abort the run; only a permanently unavailable
//! feed is fatal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::classifier::{ClassificationResult, DynClassifier, NewsClassifier};
use crate::config::PipelineConfig;
use crate::error::{ClassifyError, DropReason, PipelineError};
use crate::event::{EventBuilder, RawItem};
use crate::feed::NewsFeed;
use crate::metrics::describe_pipeline_metrics;
use crate::signal::SignalEmitter;
use crate::sink::SignalSink;
use crate::store::EventStore;
use crate::window::{InsertOutcome, WindowManager};

/// Counters accumulated over one run. Shared across the coordinator, the
/// workers, and the aggregation stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub items_ingested: AtomicU64,
    pub queue_overflow_drops: AtomicU64,
    pub classify_transient_failures: AtomicU64,
    pub classify_malformed_failures: AtomicU64,
    pub duplicates: AtomicU64,
    pub late_drops: AtomicU64,
    pub events_built: AtomicU64,
    pub evaluations: AtomicU64,
    pub signals_emitted: AtomicU64,
    pub signals_suppressed: AtomicU64,
}

/// Point-in-time copy of the run counters, returned when the run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub items_ingested: u64,
    pub queue_overflow_drops: u64,
    pub classify_transient_failures: u64,
    pub classify_malformed_failures: u64,
    pub duplicates: u64,
    pub late_drops: u64,
    pub events_built: u64,
    pub evaluations: u64,
    pub signals_emitted: u64,
    pub signals_suppressed: u64,
}

impl PipelineStats {
    fn snapshot(&self) -> PipelineReport {
        PipelineReport {
            items_ingested: self.items_ingested.load(Ordering::Relaxed),
            queue_overflow_drops: self.queue_overflow_drops.load(Ordering::Relaxed),
            classify_transient_failures: self.classify_transient_failures.load(Ordering::Relaxed),
            classify_malformed_failures: self.classify_malformed_failures.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            late_drops: self.late_drops.load(Ordering::Relaxed),
            events_built: self.events_built.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            signals_emitted: self.signals_emitted.load(Ordering::Relaxed),
            signals_suppressed: self.signals_suppressed.load(Ordering::Relaxed),
        }
    }
}

// ------------------------------------------------------------
// Bounded ingest queue (drop-oldest on overflow)
// ------------------------------------------------------------

struct IngestQueue {
    depth: usize,
    items: Mutex<VecDeque<RawItem>>,
    ready: Notify,
    closed: AtomicBool,
}

impl IngestQueue {
    fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            items: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Push one item; returns the oldest queued item if it had to drop it.
    fn push(&self, item: RawItem) -> Option<RawItem> {
        let dropped = {
            let mut q = self.items.lock().expect("ingest queue mutex poisoned");
            let dropped = if q.len() == self.depth {
                q.pop_front()
            } else {
                None
            };
            q.push_back(item);
            dropped
        };
        self.ready.notify_one();
        dropped
    }

    /// No more pushes; wake every waiting worker so it can drain and exit.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.notify_waiters();
    }

    /// Pop the next item, waiting while the queue is open and empty.
    /// `None` once the queue is closed and drained.
    async fn pop(&self) -> Option<RawItem> {
        loop {
            if let Some(item) = self
                .items
                .lock()
                .expect("ingest queue mutex poisoned")
                .pop_front()
            {
                return Some(item);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.ready.notified().await;
        }
    }
}

// ------------------------------------------------------------
// Bounded-attempt classification
// ------------------------------------------------------------

/// Explicit retry loop per item: per-call timeout, exponential backoff on
/// transient failures, immediate drop on malformed responses. `None`
/// means the item is absent from all aggregates.
async fn classify_with_retry(
    classifier: &dyn NewsClassifier,
    item: &RawItem,
    call_timeout: Duration,
    max_attempts: u32,
    backoff_ms: u64,
    stats: &PipelineStats,
) -> Option<ClassificationResult> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match timeout(call_timeout, classifier.classify(item)).await {
            Ok(res) => res,
            Err(_) => Err(ClassifyError::Transient(format!(
                "classification timed out after {call_timeout:?}"
            ))),
        };

        match outcome {
            Ok(result) => return Some(result),
            Err(err) if !err.is_retryable() => {
                warn!(source_id = %item.source_id, error = %err, "dropping item on malformed classification");
                counter!("classify_malformed_total").increment(1);
                stats
                    .classify_malformed_failures
                    .fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(err) => {
                if attempt >= max_attempts {
                    warn!(
                        source_id = %item.source_id,
                        attempts = attempt,
                        error = %err,
                        "dropping item after exhausted classification retries"
                    );
                    counter!("classify_transient_total").increment(1);
                    stats
                        .classify_transient_failures
                        .fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                debug!(source_id = %item.source_id, attempt, error = %err, "transient classification failure, retrying");
                counter!("classify_retries_total").increment(1);
                sleep(Duration::from_millis(backoff_ms << (attempt - 1))).await;
            }
        }
    }
}

// ------------------------------------------------------------
// Aggregation stage (single owner of builder + windows + emitters)
// ------------------------------------------------------------

struct AggregationStage {
    builder: EventBuilder,
    windows: WindowManager,
    emitters: Vec<(u32, SignalEmitter)>,
    store: Arc<dyn EventStore>,
    sink: Arc<dyn SignalSink>,
    stats: Arc<PipelineStats>,
}

impl AggregationStage {
    fn new(
        config: &PipelineConfig,
        store: Arc<dyn EventStore>,
        sink: Arc<dyn SignalSink>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let builder = EventBuilder::new(
            config.significance_threshold,
            config.confidence_threshold,
            config.dedup_horizon,
        );
        let windows =
            WindowManager::new(&config.window_hours, config.late_tolerance(), config.gates());
        let emitters = config
            .window_hours
            .iter()
            .map(|h| (*h, SignalEmitter::new(config.cooldown_secs)))
            .collect();
        Self {
            builder,
            windows,
            emitters,
            store,
            sink,
            stats,
        }
    }

    async fn handle_scored(&mut self, item: RawItem, cls: ClassificationResult) {
        let now = Utc::now();
        match self.builder.build(&item, &cls) {
            Ok(Some(event)) => {
                counter!("events_built_total").increment(1);
                self.stats.events_built.fetch_add(1, Ordering::Relaxed);
                // Storage is fire-and-forget for correctness; a failed
                // append must not take the pipeline down.
                if let Err(e) = self.store.append_event(&event).await {
                    warn!(error = %format!("{e:#}"), "event append failed");
                }
                let event = Arc::new(event);
                for (hours, outcome) in self.windows.insert(&event, now) {
                    if outcome == InsertOutcome::Late {
                        counter!("events_late_dropped_total").increment(1);
                        self.stats.late_drops.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            source_id = %event.source_id,
                            window_hours = hours,
                            reason = DropReason::LateArrival.as_str(),
                            "late arrival dropped"
                        );
                    }
                }
            }
            Ok(None) => {
                counter!("events_duplicate_total").increment(1);
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(
                    source_id = %item.source_id,
                    reason = DropReason::Duplicate.as_str(),
                    "duplicate item dropped"
                );
            }
            Err(err) => {
                counter!("classify_malformed_total").increment(1);
                self.stats
                    .classify_malformed_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(source_id = %item.source_id, error = %err, "dropping item at event builder");
            }
        }
    }

    /// One evaluation pass over every window lane. With `emit` false
    /// (shutdown flush) aggregates are still persisted but the emitter is
    /// not consulted, so shutdown never produces a spurious signal.
    async fn evaluate(&mut self, emit: bool) {
        let now = Utc::now();
        counter!("window_evaluations_total").increment(1);
        self.stats.evaluations.fetch_add(1, Ordering::Relaxed);

        for agg in self.windows.evaluate(now) {
            gauge!("window_event_count", "window_hours" => agg.window_hours.to_string())
                .set(agg.total_news_items as f64);
            if let Err(e) = self.store.upsert_aggregate(&agg).await {
                warn!(error = %format!("{e:#}"), "aggregate upsert failed");
            }
            if !emit {
                continue;
            }
            let Some(emitter) = self
                .emitters
                .iter_mut()
                .find_map(|(h, em)| (*h == agg.window_hours).then_some(em))
            else {
                continue;
            };

            let suppressed_before = emitter.suppressed();
            match emitter.evaluate(&agg, now) {
                Some(signal) => {
                    counter!("signals_emitted_total").increment(1);
                    self.stats.signals_emitted.fetch_add(1, Ordering::Relaxed);
                    info!(
                        signal_type = ?signal.signal_type,
                        window_hours = agg.window_hours,
                        overall_sentiment = agg.overall_sentiment,
                        strength = signal.strength,
                        confidence = signal.confidence,
                        "emitting trading signal"
                    );
                    if let Err(e) = self.sink.on_signal(&signal).await {
                        warn!(error = %format!("{e:#}"), "signal sink failed");
                    }
                }
                None if emitter.suppressed() > suppressed_before => {
                    counter!("signals_suppressed_total").increment(1);
                    self.stats.signals_suppressed.fetch_add(1, Ordering::Relaxed);
                    debug!(window_hours = agg.window_hours, "signal suppressed by cooldown");
                }
                None => {}
            }
        }
    }
}

// ------------------------------------------------------------
// Pipeline
// ------------------------------------------------------------

pub struct Pipeline {
    config: PipelineConfig,
    classifier: DynClassifier,
    store: Arc<dyn EventStore>,
    sink: Arc<dyn SignalSink>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        classifier: DynClassifier,
        store: Arc<dyn EventStore>,
        sink: Arc<dyn SignalSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            classifier,
            store,
            sink,
        })
    }

    /// Run until the feed is exhausted or `shutdown` flips to true (a
    /// dropped shutdown sender also stops the run). Returns the run's
    /// counter report.
    pub async fn run<F: NewsFeed>(
        &self,
        mut feed: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<PipelineReport, PipelineError> {
        describe_pipeline_metrics();
        let stats = Arc::new(PipelineStats::default());
        let queue = Arc::new(IngestQueue::new(self.config.queue_depth));
        let (scored_tx, scored_rx) =
            mpsc::channel::<(RawItem, ClassificationResult)>(self.config.classification_concurrency * 2);

        let mut workers: Vec<JoinHandle<()>> = (0..self.config.classification_concurrency)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let classifier = Arc::clone(&self.classifier);
                let tx = scored_tx.clone();
                let stats = Arc::clone(&stats);
                let call_timeout = self.config.classification_timeout();
                let max_attempts = self.config.max_retry_attempts;
                let backoff_ms = self.config.retry_backoff_ms;
                tokio::spawn(async move {
                    while let Some(item) = queue.pop().await {
                        let scored = classify_with_retry(
                            classifier.as_ref(),
                            &item,
                            call_timeout,
                            max_attempts,
                            backoff_ms,
                            &stats,
                        )
                        .await;
                        if let Some(result) = scored {
                            if tx.send((item, result)).await.is_err() {
                                return;
                            }
                        }
                    }
                    debug!(worker, "classification worker drained");
                })
            })
            .collect();
        drop(scored_tx);

        let mut stage = AggregationStage::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
            Arc::clone(&stats),
        );
        let eval_every = self.config.evaluation_interval();
        let aggregation = tokio::spawn(async move {
            let mut rx = scored_rx;
            let mut ticker = interval(eval_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate first tick carries no data
            loop {
                tokio::select! {
                    scored = rx.recv() => match scored {
                        Some((item, cls)) => stage.handle_scored(item, cls).await,
                        None => break,
                    },
                    _ = ticker.tick() => stage.evaluate(true).await,
                }
            }
            // Final flush persists aggregates without consulting the
            // emitter: shutdown must not emit a spurious signal.
            stage.evaluate(false).await;
        });

        // Ingestion loop runs on the caller's task.
        let mut feed_failures = 0u32;
        let mut shutdown_requested = false;
        let fatal = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested, stopping ingestion");
                        shutdown_requested = true;
                        break None;
                    }
                }
                next = feed.next_item() => match next {
                    Ok(Some(item)) => {
                        feed_failures = 0;
                        counter!("pipeline_items_ingested_total").increment(1);
                        stats.items_ingested.fetch_add(1, Ordering::Relaxed);
                        if let Some(dropped) = queue.push(item) {
                            counter!("pipeline_queue_dropped_total").increment(1);
                            stats.queue_overflow_drops.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                source_id = %dropped.source_id,
                                reason = DropReason::QueueOverflow.as_str(),
                                "ingest queue full, dropping oldest"
                            );
                        }
                    }
                    Ok(None) => {
                        info!(feed = feed.name(), "feed exhausted");
                        break None;
                    }
                    Err(err) => {
                        feed_failures += 1;
                        if feed_failures >= self.config.max_retry_attempts {
                            break Some(PipelineError::FeedUnavailable {
                                attempts: feed_failures,
                                message: format!("{err:#}"),
                            });
                        }
                        warn!(
                            error = %format!("{err:#}"),
                            attempt = feed_failures,
                            "feed error, backing off"
                        );
                        sleep(Duration::from_millis(
                            self.config.retry_backoff_ms << (feed_failures - 1),
                        ))
                        .await;
                    }
                }
            }
        };

        // Drain. On shutdown (or a fatal feed error) workers get the grace
        // period to finish in-flight calls, then the rest are abandoned.
        // A naturally exhausted feed drains fully: every call is already
        // bounded by the per-call timeout.
        queue.close();
        if shutdown_requested || fatal.is_some() {
            let deadline = Instant::now() + self.config.shutdown_grace();
            for worker in &mut workers {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if timeout(remaining, &mut *worker).await.is_err() {
                    worker.abort();
                    warn!("classification worker abandoned at shutdown");
                }
            }
        } else {
            for worker in workers {
                if let Err(e) = worker.await {
                    warn!(error = %e, "classification worker join error");
                }
            }
        }
        if let Err(e) = aggregation.await {
            warn!(error = %e, "aggregation stage join error");
        }

        let report = stats.snapshot();
        match fatal {
            Some(err) => Err(err),
            None => {
                info!(?report, "pipeline run complete");
                Ok(report)
            }
        }
    }
}
