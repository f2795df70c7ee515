//! Raw feed items, classified news events, and the event builder.
//!
//! The builder is the only place a `NewsEvent` is created: it deduplicates
//! by `source_id` against a bounded recent-id set, re-checks the scoring
//! contract, derives `is_significant`, and hands out an immutable event.
//! No I/O happens here.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ClassificationResult;
use crate::error::ClassifyError;

/// Normalized item from the upstream feed. The raw network client is out
/// of scope; this is the shape it hands us. The feed is at-least-once, so
/// the same `source_id` may arrive more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub source_id: String,
    pub text: String,
    pub author: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub engagement_score: f64,
    pub observed_at: DateTime<Utc>,
}

/// Sentiment label from the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    /// Signed direction used by the aggregate math.
    pub fn direction(self) -> f64 {
        match self {
            Sentiment::Bullish => 1.0,
            Sentiment::Bearish => -1.0,
            Sentiment::Neutral => 0.0,
        }
    }
}

/// A classified news event. Immutable once built; flows downstream into
/// the window buffers and the append store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEvent {
    pub source_id: String,
    pub observed_at: DateTime<Utc>,
    pub author: String,
    pub url: Option<String>,
    pub text: String,
    pub engagement_score: f64,

    // Category scores, each in [0,100].
    pub economic: f64,
    pub crypto: f64,
    pub privacy: f64,
    pub instability: f64,

    pub sentiment: Sentiment,
    /// In [0,1].
    pub confidence: f64,
    /// In [0,100].
    pub overall_relevance: f64,

    pub summary: String,
    pub key_entities: Vec<String>,
    /// Relevance and confidence both clear their thresholds.
    pub is_significant: bool,
}

/// Builds immutable `NewsEvent`s from raw items plus classifier output.
///
/// Owns the bounded recent-id set used for `source_id` deduplication. The
/// set is capped at `dedup_horizon` entries; configure it to cover at
/// least the largest window at expected feed rates.
#[derive(Debug)]
pub struct EventBuilder {
    significance_threshold: f64,
    confidence_threshold: f64,
    horizon: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl EventBuilder {
    pub fn new(
        significance_threshold: f64,
        confidence_threshold: f64,
        dedup_horizon: usize,
    ) -> Self {
        let horizon = dedup_horizon.max(1);
        Self {
            significance_threshold,
            confidence_threshold,
            horizon,
            seen: HashSet::with_capacity(horizon.min(16_384)),
            order: VecDeque::with_capacity(horizon.min(16_384)),
        }
    }

    /// Build an event, or `Ok(None)` for a duplicate `source_id`.
    ///
    /// Duplicates are decided before anything else, so redelivered items
    /// are idempotent. Range validation runs even though the adapter
    /// already validated: a result outside the contract fails with
    /// `MalformedResponse`, produces no event, and the id is not retained.
    pub fn build(
        &mut self,
        item: &RawItem,
        cls: &ClassificationResult,
    ) -> Result<Option<NewsEvent>, ClassifyError> {
        if self.seen.contains(&item.source_id) {
            return Ok(None);
        }
        cls.validate()?;
        self.remember(item.source_id.clone());

        let is_significant = cls.overall_relevance >= self.significance_threshold
            && cls.confidence >= self.confidence_threshold;

        Ok(Some(NewsEvent {
            source_id: item.source_id.clone(),
            observed_at: item.observed_at,
            author: item.author.clone(),
            url: item.url.clone(),
            text: item.text.clone(),
            engagement_score: item.engagement_score,
            economic: cls.economic,
            crypto: cls.crypto,
            privacy: cls.privacy,
            instability: cls.instability,
            sentiment: cls.sentiment,
            confidence: cls.confidence,
            overall_relevance: cls.overall_relevance,
            summary: cls.summary.clone(),
            key_entities: cls.key_entities.clone(),
            is_significant,
        }))
    }

    fn remember(&mut self, id: String) {
        if self.order.len() == self.horizon {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.seen.insert(id);
    }

    /// Number of ids currently tracked (diagnostics).
    pub fn tracked_ids(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassificationResult;
    use chrono::TimeZone;

    fn item(id: &str) -> RawItem {
        RawItem {
            source_id: id.to_string(),
            text: "Exchange reserves dropping fast".to_string(),
            author: "whale_watch".to_string(),
            url: None,
            engagement_score: 120.0,
            observed_at: Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap(),
        }
    }

    fn result(confidence: f64, relevance: f64) -> ClassificationResult {
        ClassificationResult {
            economic: 40.0,
            crypto: 80.0,
            privacy: 5.0,
            instability: 10.0,
            sentiment: Sentiment::Bullish,
            confidence,
            overall_relevance: relevance,
            summary: "reserves down".to_string(),
            key_entities: vec!["btc".to_string()],
        }
    }

    #[test]
    fn duplicate_source_id_yields_no_second_event() {
        let mut b = EventBuilder::new(70.0, 0.6, 100);
        let first = b.build(&item("t1"), &result(0.9, 80.0)).unwrap();
        let second = b.build(&item("t1"), &result(0.9, 80.0)).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(b.tracked_ids(), 1);
    }

    #[test]
    fn horizon_evicts_oldest_id_first() {
        let mut b = EventBuilder::new(70.0, 0.6, 2);
        b.build(&item("a"), &result(0.9, 80.0)).unwrap();
        b.build(&item("b"), &result(0.9, 80.0)).unwrap();
        b.build(&item("c"), &result(0.9, 80.0)).unwrap(); // evicts "a"
        assert_eq!(b.tracked_ids(), 2);
        // "a" fell out of the horizon, so it builds again.
        assert!(b.build(&item("a"), &result(0.9, 80.0)).unwrap().is_some());
        // "c" is still inside it.
        assert!(b.build(&item("c"), &result(0.9, 80.0)).unwrap().is_none());
    }

    #[test]
    fn significance_requires_both_thresholds() {
        let mut b = EventBuilder::new(70.0, 0.6, 100);
        let ev = b.build(&item("x"), &result(0.9, 80.0)).unwrap().unwrap();
        assert!(ev.is_significant);
        let ev = b.build(&item("y"), &result(0.5, 80.0)).unwrap().unwrap();
        assert!(!ev.is_significant);
        let ev = b.build(&item("z"), &result(0.9, 69.9)).unwrap().unwrap();
        assert!(!ev.is_significant);
        // Boundary values count as significant.
        let ev = b.build(&item("w"), &result(0.6, 70.0)).unwrap().unwrap();
        assert!(ev.is_significant);
    }

    #[test]
    fn out_of_range_result_builds_nothing_and_forgets_the_id() {
        let mut b = EventBuilder::new(70.0, 0.6, 100);
        let err = b.build(&item("bad"), &result(1.4, 80.0)).unwrap_err();
        assert!(matches!(err, ClassifyError::MalformedResponse(_)));
        // The id was not retained, so a corrected redelivery still builds.
        assert!(b.build(&item("bad"), &result(0.9, 80.0)).unwrap().is_some());
    }
}
