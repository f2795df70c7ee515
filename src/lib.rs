// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod feed;
pub mod metrics;
pub mod pipeline;
pub mod signal;
pub mod sink;
pub mod store;
pub mod topics;
pub mod window;

// ---- Re-exports for stable public API ----
pub use crate::classifier::{
    ClassificationResult, DynClassifier, HttpClassifier, NewsClassifier, ScriptedClassifier,
    ScriptedOutcome,
};
pub use crate::config::PipelineConfig;
pub use crate::error::{ClassifyError, DropReason, PipelineError};
pub use crate::event::{EventBuilder, NewsEvent, RawItem, Sentiment};
pub use crate::feed::{JsonlFeed, NewsFeed, StaticFeed};
pub use crate::pipeline::{Pipeline, PipelineReport};
pub use crate::signal::{SignalEmitter, SignalType, SourceWindow, TradingSignal};
pub use crate::sink::{LogSink, MemorySink, SignalSink, SinkMux, WebhookSink};
pub use crate::store::{EventStore, JsonlStore, MemoryStore};
pub use crate::window::{
    AggregateGates, InsertOutcome, WindowAggregate, WindowBuffer, WindowManager,
};
