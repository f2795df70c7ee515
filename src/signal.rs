//! # Signal Emitter
//! Maps window aggregates to trading signals with cooldown hysteresis.
//!
//! The emitter owns only its own short memory (last signal type and time),
//! never event data. Per window-length stream the state machine is
//! `IDLE -> SIGNALED(type, since) -> IDLE` on cooldown expiry or reversal;
//! there is no terminal state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::window::WindowAggregate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Buy,
    Sell,
}

impl SignalType {
    pub fn is_reversal_of(self, other: SignalType) -> bool {
        self != other
    }
}

/// Reference to the aggregate that triggered a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceWindow {
    pub window_hours: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub timestamp: DateTime<Utc>,
    pub signal_type: SignalType,
    /// In [0,100]; the aggregate's sentiment strength.
    pub strength: f64,
    /// In [0,1]; saturates toward 1.0 as significant volume grows.
    pub confidence: f64,
    pub source_window: SourceWindow,
}

/// Volume confidence: `n / (n + 3)` over the significant count.
pub fn volume_confidence(significant_count: usize) -> f64 {
    let n = significant_count as f64;
    n / (n + 3.0)
}

/// Cooldown gate plus direction mapping for one window-length stream.
/// - First actionable aggregate always emits.
/// - Inside the cooldown, a same-direction repeat is suppressed.
/// - An opposite-direction signal passes immediately: a reversal is
///   always surfaced.
#[derive(Debug, Clone)]
pub struct SignalEmitter {
    cooldown: ChronoDuration,
    last_signal_at: Option<DateTime<Utc>>,
    last_signal_type: Option<SignalType>,
    suppressed: u64,
}

impl SignalEmitter {
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
            last_signal_at: None,
            last_signal_type: None,
            suppressed: 0,
        }
    }

    /// Map an aggregate to at most one signal. Mutates the hysteresis
    /// state only when a signal is actually emitted.
    pub fn evaluate(&mut self, agg: &WindowAggregate, now: DateTime<Utc>) -> Option<TradingSignal> {
        if !agg.is_actionable {
            return None;
        }
        let kind = if agg.overall_sentiment > 0.0 {
            SignalType::Buy
        } else if agg.overall_sentiment < 0.0 {
            SignalType::Sell
        } else {
            return None;
        };

        if !self.should_emit(kind, now) {
            self.suppressed += 1;
            return None;
        }

        self.last_signal_at = Some(now);
        self.last_signal_type = Some(kind);

        Some(TradingSignal {
            timestamp: now,
            signal_type: kind,
            strength: agg.sentiment_strength,
            confidence: volume_confidence(agg.significant_news_count),
            source_window: SourceWindow {
                window_hours: agg.window_hours,
                window_start: agg.window_start,
                window_end: agg.window_end,
            },
        })
    }

    fn should_emit(&self, kind: SignalType, now: DateTime<Utc>) -> bool {
        match (self.last_signal_at, self.last_signal_type) {
            (Some(at), Some(last)) => {
                now.signed_duration_since(at) >= self.cooldown || kind.is_reversal_of(last)
            }
            _ => true,
        }
    }

    /// Signals suppressed by the cooldown since construction.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn last_signal(&self) -> Option<(SignalType, DateTime<Utc>)> {
        match (self.last_signal_type, self.last_signal_at) {
            (Some(kind), Some(at)) => Some((kind, at)),
            _ => None,
        }
    }
}
