//! Topic extraction for window aggregates.
//!
//! Ranked counts of classifier entities, falling back to filtered text
//! tokens for events the classifier returned no entities for. Ordering is
//! deterministic so recomputing over the same event set is idempotent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::event::NewsEvent;

/// Upper bound on `top_topics` in an aggregate.
pub const MAX_TOPICS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: usize,
}

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "this", "that", "with", "from", "have", "has", "will", "are", "was", "were",
        "been", "its", "their", "they", "them", "about", "into", "over", "after", "before",
        "more", "than", "just", "amid", "says", "said", "would", "could", "should", "there",
        "here", "what", "when", "your", "ours",
    ]
    .into_iter()
    .collect()
});

/// Ranked topics over the window's events: count descending, then topic
/// ascending, truncated to `cap`.
pub fn top_topics(events: &[Arc<NewsEvent>], cap: usize) -> Vec<TopicCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for ev in events {
        if ev.key_entities.is_empty() {
            for tok in tokenize(&ev.text) {
                if keep_token(&tok) {
                    *counts.entry(tok).or_default() += 1;
                }
            }
        } else {
            for ent in &ev.key_entities {
                let t = ent.trim().to_ascii_lowercase();
                if !t.is_empty() {
                    *counts.entry(t).or_default() += 1;
                }
            }
        }
    }

    let mut ranked: Vec<TopicCount> = counts
        .into_iter()
        .map(|(topic, count)| TopicCount { topic, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.topic.cmp(&b.topic)));
    ranked.truncate(cap);
    ranked
}

/// Alphanumeric tokens, lower-case.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
}

fn keep_token(tok: &str) -> bool {
    tok.len() >= 4 && !STOPWORDS.contains(tok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Sentiment;
    use chrono::Utc;

    fn event(text: &str, entities: &[&str]) -> Arc<NewsEvent> {
        Arc::new(NewsEvent {
            source_id: format!("id-{text}"),
            observed_at: Utc::now(),
            author: "a".to_string(),
            url: None,
            text: text.to_string(),
            engagement_score: 0.0,
            economic: 0.0,
            crypto: 0.0,
            privacy: 0.0,
            instability: 0.0,
            sentiment: Sentiment::Neutral,
            confidence: 0.5,
            overall_relevance: 50.0,
            summary: String::new(),
            key_entities: entities.iter().map(|e| e.to_string()).collect(),
            is_significant: false,
        })
    }

    #[test]
    fn entities_rank_above_and_ties_break_alphabetically() {
        let evs = vec![
            event("x", &["ETF", "SEC"]),
            event("y", &["etf"]),
            event("z", &["sec"]),
        ];
        let topics = top_topics(&evs, MAX_TOPICS);
        assert_eq!(topics[0].topic, "etf");
        assert_eq!(topics[0].count, 2);
        assert_eq!(topics[1].topic, "sec");
        assert_eq!(topics[1].count, 2);
    }

    #[test]
    fn text_tokens_fill_in_when_entities_are_missing() {
        let evs = vec![event("halving supply shock, the halving again", &[])];
        let topics = top_topics(&evs, MAX_TOPICS);
        assert_eq!(topics[0].topic, "halving");
        assert_eq!(topics[0].count, 2);
        assert!(topics.iter().all(|t| t.topic != "the"));
    }

    #[test]
    fn cap_bounds_the_list() {
        let evs = vec![event("x", &["a1", "b1", "c1", "d1", "e1", "f1", "g1", "h1", "i1"])];
        assert_eq!(top_topics(&evs, 3).len(), 3);
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(top_topics(&[], MAX_TOPICS).is_empty());
    }
}
