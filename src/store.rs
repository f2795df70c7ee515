//! Persistence seam: append events, upsert aggregate snapshots.
//!
//! The pipeline never reads its own writes back; all windowed state lives
//! in memory for the pipeline's lifetime. Storage failures are logged by
//! the caller and never abort the run.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::event::NewsEvent;
use crate::window::WindowAggregate;

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_event(&self, event: &NewsEvent) -> Result<()>;
    async fn upsert_aggregate(&self, aggregate: &WindowAggregate) -> Result<()>;
}

/// JSON-lines journal under a data directory. `events.jsonl` is pure
/// append; `aggregates.jsonl` appends snapshots where the latest line per
/// `(window_hours, window_end)` wins on replay.
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn append_line(&self, file: &str, json: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating data dir {}", self.dir.display()))?;
        let path = self.dir.join(file);
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        f.write_all(json.as_bytes()).await?;
        f.write_all(b"\n").await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for JsonlStore {
    async fn append_event(&self, event: &NewsEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("serializing news event")?;
        self.append_line("events.jsonl", json).await
    }

    async fn upsert_aggregate(&self, aggregate: &WindowAggregate) -> Result<()> {
        let json = serde_json::to_string(aggregate).context("serializing window aggregate")?;
        self.append_line("aggregates.jsonl", json).await
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<Vec<NewsEvent>>,
    aggregates: Mutex<Vec<WindowAggregate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NewsEvent> {
        self.events.lock().expect("store mutex poisoned").clone()
    }

    pub fn aggregates(&self) -> Vec<WindowAggregate> {
        self.aggregates.lock().expect("store mutex poisoned").clone()
    }

    /// Most recent aggregate snapshot for one window length.
    pub fn latest_aggregate(&self, window_hours: u32) -> Option<WindowAggregate> {
        self.aggregates
            .lock()
            .expect("store mutex poisoned")
            .iter()
            .rev()
            .find(|a| a.window_hours == window_hours)
            .cloned()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append_event(&self, event: &NewsEvent) -> Result<()> {
        self.events
            .lock()
            .expect("store mutex poisoned")
            .push(event.clone());
        Ok(())
    }

    async fn upsert_aggregate(&self, aggregate: &WindowAggregate) -> Result<()> {
        self.aggregates
            .lock()
            .expect("store mutex poisoned")
            .push(aggregate.clone());
        Ok(())
    }
}
