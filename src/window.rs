//! # Window Aggregator
//! Sliding event windows, one buffer per configured window length, and the
//! pure aggregate computation over a window's retained event set.
//!
//! Buffers are ordered by `observed_at`. Out-of-order arrival is accepted
//! up to a bounded lateness tolerance; anything older is dropped as a late
//! arrival and counted, never silently merged. Eviction happens on the
//! evaluation tick, independent of ingestion rate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{NewsEvent, Sentiment};
use crate::topics::{top_topics, TopicCount, MAX_TOPICS};

/// Gates applied when deriving `is_actionable` on an aggregate. Three
/// independent checks, all required, so a single high-confidence outlier
/// in a thin window cannot trigger a signal.
#[derive(Debug, Clone, Copy)]
pub struct AggregateGates {
    /// Minimum `significant_news_count` (inclusive).
    pub min_volume_floor: usize,
    /// `|overall_sentiment|` must exceed this.
    pub actionability_threshold: f64,
    /// `sentiment_strength` must exceed this.
    pub strength_floor: f64,
}

/// Point-in-time snapshot of one window. A pure function of the event set
/// whose `observed_at` falls in `[window_start, window_end)`: recomputing
/// over the same closed set is deterministic and idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub window_hours: u32,

    /// Confidence-weighted signed sentiment in [-100,100].
    pub overall_sentiment: f64,
    /// Relevance-weighted average confidence scaled to [0,100].
    pub sentiment_strength: f64,

    pub total_news_items: usize,
    pub significant_news_count: usize,
    pub bullish_count: usize,
    pub bearish_count: usize,
    pub neutral_count: usize,

    // `None` when no events contribute; never coerced to zero.
    pub avg_economic_score: Option<f64>,
    pub avg_crypto_score: Option<f64>,
    pub avg_privacy_score: Option<f64>,
    pub avg_instability_score: Option<f64>,

    pub top_topics: Vec<TopicCount>,
    pub is_actionable: bool,
}

impl WindowAggregate {
    /// Compute the aggregate for `[window_end - window_hours, window_end)`
    /// over `events`. Events outside the interval are ignored.
    ///
    /// Each event contributes `direction(sentiment) * confidence *
    /// overall_relevance`; the signed sum is normalized by the sum of
    /// weights (neutral events count in the denominator). An empty window
    /// yields zero sentiment and is never actionable.
    pub fn compute(
        window_hours: u32,
        window_end: DateTime<Utc>,
        events: &[Arc<NewsEvent>],
        gates: &AggregateGates,
    ) -> Self {
        let window_start = window_end - ChronoDuration::hours(i64::from(window_hours));

        let in_window: Vec<&Arc<NewsEvent>> = events
            .iter()
            .filter(|ev| ev.observed_at >= window_start && ev.observed_at < window_end)
            .collect();

        let mut bullish = 0usize;
        let mut bearish = 0usize;
        let mut neutral = 0usize;
        let mut significant = 0usize;

        let mut signed_sum = 0.0f64;
        let mut weight_sum = 0.0f64;
        let mut relevance_sum = 0.0f64;

        let mut economic_sum = 0.0f64;
        let mut crypto_sum = 0.0f64;
        let mut privacy_sum = 0.0f64;
        let mut instability_sum = 0.0f64;

        for ev in &in_window {
            match ev.sentiment {
                Sentiment::Bullish => bullish += 1,
                Sentiment::Bearish => bearish += 1,
                Sentiment::Neutral => neutral += 1,
            }
            if ev.is_significant {
                significant += 1;
            }

            let weight = ev.confidence * ev.overall_relevance;
            signed_sum += ev.sentiment.direction() * weight;
            weight_sum += weight;
            relevance_sum += ev.overall_relevance;

            economic_sum += ev.economic;
            crypto_sum += ev.crypto;
            privacy_sum += ev.privacy;
            instability_sum += ev.instability;
        }

        let total = in_window.len();
        let overall_sentiment = if weight_sum > 0.0 {
            100.0 * signed_sum / weight_sum
        } else {
            0.0
        };
        let sentiment_strength = if relevance_sum > 0.0 {
            100.0 * weight_sum / relevance_sum
        } else {
            0.0
        };

        let avg = |sum: f64| if total > 0 { Some(sum / total as f64) } else { None };

        let is_actionable = total > 0
            && significant >= gates.min_volume_floor
            && overall_sentiment.abs() > gates.actionability_threshold
            && sentiment_strength > gates.strength_floor;

        let owned: Vec<Arc<NewsEvent>> = in_window.iter().map(|ev| Arc::clone(*ev)).collect();

        Self {
            window_start,
            window_end,
            window_hours,
            overall_sentiment,
            sentiment_strength,
            total_news_items: total,
            significant_news_count: significant,
            bullish_count: bullish,
            bearish_count: bearish,
            neutral_count: neutral,
            avg_economic_score: avg(economic_sum),
            avg_crypto_score: avg(crypto_sum),
            avg_privacy_score: avg(privacy_sum),
            avg_instability_score: avg(instability_sum),
            top_topics: top_topics(&owned, MAX_TOPICS),
            is_actionable,
        }
    }
}

/// Outcome of a buffer insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Older than the lateness tolerance; dropped and counted.
    Late,
}

/// Ordered event buffer for one configured window length.
#[derive(Debug)]
pub struct WindowBuffer {
    hours: u32,
    window: ChronoDuration,
    tolerance: ChronoDuration,
    buf: VecDeque<Arc<NewsEvent>>,
    latest_seen: Option<DateTime<Utc>>,
    late_drops: u64,
}

impl WindowBuffer {
    pub fn new(hours: u32, tolerance: ChronoDuration) -> Self {
        Self {
            hours,
            window: ChronoDuration::hours(i64::from(hours)),
            tolerance,
            buf: VecDeque::new(),
            latest_seen: None,
            late_drops: 0,
        }
    }

    pub fn hours(&self) -> u32 {
        self.hours
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn late_drops(&self) -> u64 {
        self.late_drops
    }

    /// Insert in `observed_at` order. An event older than the tolerance
    /// relative to the latest-seen timestamp, or already outside the
    /// retained window plus tolerance at `now`, is a late arrival.
    pub fn insert(&mut self, ev: Arc<NewsEvent>, now: DateTime<Utc>) -> InsertOutcome {
        let ts = ev.observed_at;
        let outside_window = ts + self.tolerance + self.window < now;
        let behind_stream = self
            .latest_seen
            .is_some_and(|latest| ts + self.tolerance < latest);
        if outside_window || behind_stream {
            self.late_drops += 1;
            return InsertOutcome::Late;
        }

        if self.latest_seen.is_none_or(|latest| ts > latest) {
            self.latest_seen = Some(ts);
        }

        // Out-of-order arrivals sit near the back; walk from there.
        let mut idx = self.buf.len();
        while idx > 0 && self.buf[idx - 1].observed_at > ts {
            idx -= 1;
        }
        self.buf.insert(idx, ev);
        InsertOutcome::Inserted
    }

    /// Drop events that fell out of `[now - window, now)`. Returns how
    /// many were evicted.
    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let before = self.buf.len();
        while let Some(front) = self.buf.front() {
            if front.observed_at < cutoff {
                self.buf.pop_front();
            } else {
                break;
            }
        }
        before - self.buf.len()
    }

    /// Aggregate the retained set as of `window_end`.
    pub fn aggregate(&self, window_end: DateTime<Utc>, gates: &AggregateGates) -> WindowAggregate {
        let events: Vec<Arc<NewsEvent>> = self.buf.iter().cloned().collect();
        WindowAggregate::compute(self.hours, window_end, &events, gates)
    }
}

/// Explicit owner of one buffer per configured window length — never an
/// ambient global table. All mutations go through the per-lane mutex; the
/// aggregation stage is the single writer, so evaluation always reads a
/// stable point-in-time view.
#[derive(Debug)]
pub struct WindowManager {
    lanes: Vec<Mutex<WindowBuffer>>,
    gates: AggregateGates,
}

impl WindowManager {
    pub fn new(window_hours: &[u32], tolerance: ChronoDuration, gates: AggregateGates) -> Self {
        let lanes = window_hours
            .iter()
            .map(|h| Mutex::new(WindowBuffer::new(*h, tolerance)))
            .collect();
        Self { lanes, gates }
    }

    pub fn window_lengths(&self) -> Vec<u32> {
        self.lanes
            .iter()
            .map(|l| l.lock().expect("window mutex poisoned").hours())
            .collect()
    }

    /// Fan one event into every lane. Returns per-lane outcomes in
    /// configured order.
    pub fn insert(&self, ev: &Arc<NewsEvent>, now: DateTime<Utc>) -> Vec<(u32, InsertOutcome)> {
        self.lanes
            .iter()
            .map(|lane| {
                let mut buf = lane.lock().expect("window mutex poisoned");
                (buf.hours(), buf.insert(Arc::clone(ev), now))
            })
            .collect()
    }

    /// Evict then aggregate every lane, in configured order.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Vec<WindowAggregate> {
        self.lanes
            .iter()
            .map(|lane| {
                let mut buf = lane.lock().expect("window mutex poisoned");
                buf.evict(now);
                buf.aggregate(now, &self.gates)
            })
            .collect()
    }

    /// Retained event count per lane (diagnostics/metrics).
    pub fn event_counts(&self) -> Vec<(u32, usize)> {
        self.lanes
            .iter()
            .map(|lane| {
                let buf = lane.lock().expect("window mutex poisoned");
                (buf.hours(), buf.len())
            })
            .collect()
    }

    /// Total late-arrival drops across lanes.
    pub fn late_drops(&self) -> u64 {
        self.lanes
            .iter()
            .map(|lane| lane.lock().expect("window mutex poisoned").late_drops())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn gates() -> AggregateGates {
        AggregateGates {
            min_volume_floor: 2,
            actionability_threshold: 20.0,
            strength_floor: 25.0,
        }
    }

    fn event(id: &str, ts: DateTime<Utc>, sentiment: Sentiment, conf: f64, rel: f64) -> Arc<NewsEvent> {
        Arc::new(NewsEvent {
            source_id: id.to_string(),
            observed_at: ts,
            author: "a".to_string(),
            url: None,
            text: "text".to_string(),
            engagement_score: 0.0,
            economic: 40.0,
            crypto: 60.0,
            privacy: 10.0,
            instability: 20.0,
            sentiment,
            confidence: conf,
            overall_relevance: rel,
            summary: String::new(),
            key_entities: vec![],
            is_significant: rel >= 70.0 && conf >= 0.6,
        })
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap()
    }

    #[test]
    fn out_of_order_arrivals_end_up_time_sorted() {
        let now = t0();
        let mut buf = WindowBuffer::new(24, ChronoDuration::minutes(15));
        buf.insert(event("a", now - ChronoDuration::minutes(5), Sentiment::Neutral, 0.5, 50.0), now);
        buf.insert(event("b", now - ChronoDuration::minutes(10), Sentiment::Neutral, 0.5, 50.0), now);
        buf.insert(event("c", now - ChronoDuration::minutes(1), Sentiment::Neutral, 0.5, 50.0), now);
        let order: Vec<&str> = buf.buf.iter().map(|e| e.source_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn arrival_behind_the_stream_beyond_tolerance_is_late() {
        let now = t0();
        let mut buf = WindowBuffer::new(24, ChronoDuration::minutes(15));
        assert_eq!(
            buf.insert(event("fresh", now, Sentiment::Neutral, 0.5, 50.0), now),
            InsertOutcome::Inserted
        );
        // 20 minutes behind the latest-seen timestamp: outside tolerance.
        let outcome = buf.insert(
            event("stale", now - ChronoDuration::minutes(20), Sentiment::Neutral, 0.5, 50.0),
            now,
        );
        assert_eq!(outcome, InsertOutcome::Late);
        assert_eq!(buf.late_drops(), 1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn arrival_older_than_window_plus_tolerance_is_late() {
        let now = t0();
        let mut buf = WindowBuffer::new(1, ChronoDuration::minutes(15));
        let outcome = buf.insert(
            event("old", now - ChronoDuration::minutes(80), Sentiment::Bearish, 0.95, 95.0),
            now,
        );
        assert_eq!(outcome, InsertOutcome::Late);
        assert!(buf.is_empty());
    }

    #[test]
    fn eviction_drops_expired_events_only() {
        let start = t0();
        let mut buf = WindowBuffer::new(1, ChronoDuration::minutes(15));
        buf.insert(event("a", start, Sentiment::Neutral, 0.5, 50.0), start);
        buf.insert(event("b", start + ChronoDuration::minutes(50), Sentiment::Neutral, 0.5, 50.0), start + ChronoDuration::minutes(50));
        let evicted = buf.evict(start + ChronoDuration::minutes(70));
        assert_eq!(evicted, 1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn empty_window_aggregates_to_zero_and_is_not_actionable() {
        let agg = WindowAggregate::compute(24, t0(), &[], &gates());
        assert_eq!(agg.overall_sentiment, 0.0);
        assert_eq!(agg.sentiment_strength, 0.0);
        assert_eq!(agg.total_news_items, 0);
        assert!(!agg.is_actionable);
        assert_eq!(agg.avg_economic_score, None);
        assert!(agg.top_topics.is_empty());
    }

    #[test]
    fn counts_always_partition_the_total() {
        let now = t0();
        let events = vec![
            event("a", now - ChronoDuration::hours(1), Sentiment::Bullish, 0.9, 80.0),
            event("b", now - ChronoDuration::hours(2), Sentiment::Bearish, 0.7, 60.0),
            event("c", now - ChronoDuration::hours(3), Sentiment::Neutral, 0.4, 30.0),
            event("d", now - ChronoDuration::hours(4), Sentiment::Bullish, 0.8, 90.0),
        ];
        let agg = WindowAggregate::compute(24, now, &events, &gates());
        assert_eq!(
            agg.bullish_count + agg.bearish_count + agg.neutral_count,
            agg.total_news_items
        );
        assert_eq!(agg.total_news_items, 4);
    }

    #[test]
    fn recomputation_over_the_same_set_is_identical() {
        let now = t0();
        let events = vec![
            event("a", now - ChronoDuration::hours(1), Sentiment::Bullish, 0.9, 80.0),
            event("b", now - ChronoDuration::hours(2), Sentiment::Bearish, 0.7, 60.0),
        ];
        let first = WindowAggregate::compute(24, now, &events, &gates());
        let second = WindowAggregate::compute(24, now, &events, &gates());
        assert_eq!(first, second);
    }

    #[test]
    fn aggregate_ignores_events_outside_the_interval() {
        let now = t0();
        let events = vec![
            event("in", now - ChronoDuration::hours(1), Sentiment::Bullish, 0.9, 80.0),
            event("out", now - ChronoDuration::hours(30), Sentiment::Bullish, 0.9, 80.0),
        ];
        let agg = WindowAggregate::compute(24, now, &events, &gates());
        assert_eq!(agg.total_news_items, 1);
    }

    #[test]
    fn manager_fans_events_into_every_lane() {
        let now = t0();
        let mgr = WindowManager::new(&[1, 24], ChronoDuration::minutes(15), gates());
        assert_eq!(mgr.window_lengths(), vec![1, 24]);

        let ev = event("a", now - ChronoDuration::minutes(30), Sentiment::Bullish, 0.9, 80.0);
        let outcomes = mgr.insert(&ev, now);
        assert_eq!(outcomes, vec![(1, InsertOutcome::Inserted), (24, InsertOutcome::Inserted)]);
        assert_eq!(mgr.event_counts(), vec![(1, 1), (24, 1)]);

        let aggs = mgr.evaluate(now);
        assert_eq!(aggs.len(), 2);
        assert_eq!(aggs[0].window_hours, 1);
        assert_eq!(aggs[0].total_news_items, 1);
        assert_eq!(aggs[1].window_hours, 24);
        assert_eq!(aggs[1].total_news_items, 1);
    }

    #[test]
    fn manager_counts_late_drops_per_lane() {
        let now = t0();
        let mgr = WindowManager::new(&[1, 24], ChronoDuration::minutes(15), gates());
        // 90 minutes old: late for the 1h lane, fine for the 24h lane.
        let ev = event("old", now - ChronoDuration::minutes(90), Sentiment::Bearish, 0.9, 80.0);
        let outcomes = mgr.insert(&ev, now);
        assert_eq!(outcomes, vec![(1, InsertOutcome::Late), (24, InsertOutcome::Inserted)]);
        assert_eq!(mgr.late_drops(), 1);
        assert_eq!(mgr.event_counts(), vec![(1, 0), (24, 1)]);
    }
}
