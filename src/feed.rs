//! Feed seam: the pipeline consumes a normalized item sequence.
//!
//! The raw network client (rate-limited HTTP/streaming polling) lives
//! outside this crate; whatever it is, it hands the pipeline `RawItem`s
//! through this trait. Delivery is at-least-once, so the same `source_id`
//! may show up more than once.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::event::RawItem;

#[async_trait]
pub trait NewsFeed: Send {
    /// Next item, or `Ok(None)` once the feed is exhausted. Errors are
    /// per-item: the coordinator retries past them with backoff.
    async fn next_item(&mut self) -> Result<Option<RawItem>>;
    fn name(&self) -> &'static str;
}

/// JSON-lines feed over any buffered reader (file or stdin). Blank lines
/// are skipped; a malformed line is an error the coordinator retries past.
pub struct JsonlFeed<R> {
    reader: R,
    line_no: u64,
}

impl JsonlFeed<BufReader<tokio::fs::File>> {
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening feed file {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl JsonlFeed<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> JsonlFeed<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> NewsFeed for JsonlFeed<R> {
    async fn next_item(&mut self) -> Result<Option<RawItem>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading feed line")?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let item: RawItem = serde_json::from_str(trimmed)
                .with_context(|| format!("feed line {} is not a RawItem", self.line_no))?;
            return Ok(Some(item));
        }
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

/// In-memory feed for tests and fixtures. With `hold_open`, the feed
/// pends after the last item instead of ending, so a test can exercise
/// evaluation ticks and shutdown.
pub struct StaticFeed {
    items: VecDeque<RawItem>,
    hold_open: bool,
}

impl StaticFeed {
    pub fn new(items: Vec<RawItem>) -> Self {
        Self {
            items: items.into(),
            hold_open: false,
        }
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl NewsFeed for StaticFeed {
    async fn next_item(&mut self) -> Result<Option<RawItem>> {
        if let Some(item) = self.items.pop_front() {
            return Ok(Some(item));
        }
        if self.hold_open {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn jsonl_feed_parses_lines_and_skips_blanks() {
        let now = Utc::now();
        let line = serde_json::to_string(&RawItem {
            source_id: "tw-1".into(),
            text: "BTC up".into(),
            author: "anon".into(),
            url: None,
            engagement_score: 3.0,
            observed_at: now,
        })
        .unwrap();
        let data = format!("\n{line}\n\n");
        let mut feed = JsonlFeed::new(BufReader::new(data.as_bytes()));
        let item = feed.next_item().await.unwrap().unwrap();
        assert_eq!(item.source_id, "tw-1");
        assert!(feed.next_item().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn jsonl_feed_surfaces_bad_lines_then_moves_on() {
        let now = Utc::now();
        let good = serde_json::to_string(&RawItem {
            source_id: "tw-2".into(),
            text: "ok".into(),
            author: "anon".into(),
            url: None,
            engagement_score: 0.0,
            observed_at: now,
        })
        .unwrap();
        let data = format!("not json\n{good}\n");
        let mut feed = JsonlFeed::new(BufReader::new(data.as_bytes()));
        assert!(feed.next_item().await.is_err());
        let item = feed.next_item().await.unwrap().unwrap();
        assert_eq!(item.source_id, "tw-2");
    }

    #[tokio::test]
    async fn static_feed_drains_then_ends() {
        let now = Utc::now();
        let mut feed = StaticFeed::new(vec![RawItem {
            source_id: "one".into(),
            text: "t".into(),
            author: "a".into(),
            url: None,
            engagement_score: 0.0,
            observed_at: now,
        }]);
        assert!(feed.next_item().await.unwrap().is_some());
        assert!(feed.next_item().await.unwrap().is_none());
    }
}
