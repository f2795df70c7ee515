//! Pipeline configuration: TOML file with env-path override, validated on
//! load. Every tuning knob the pipeline recognizes lives here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::window::AggregateGates;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Window lengths maintained in parallel, in hours.
    pub window_hours: Vec<u32>,
    /// Evaluation tick period, independent of ingestion rate.
    pub evaluation_interval_secs: u64,

    // Event significance (both must clear).
    pub significance_threshold: f64,
    pub confidence_threshold: f64,

    // Actionability gates.
    pub actionability_threshold: f64,
    pub min_volume_floor: usize,
    pub strength_floor: f64,

    /// Same-direction signals inside this period are suppressed.
    pub cooldown_secs: i64,

    // Classification worker pool.
    pub classification_concurrency: usize,
    pub classification_timeout_secs: u64,
    pub max_retry_attempts: u32,
    pub retry_backoff_ms: u64,

    /// Out-of-order arrival slack relative to the latest-seen timestamp.
    pub late_arrival_tolerance_secs: i64,
    /// Recent-id set capacity for source_id dedup. Size it to cover at
    /// least the largest window at expected feed rates.
    pub dedup_horizon: usize,
    /// Pending-item queue depth; on overflow the oldest queued item drops.
    pub queue_depth: usize,
    /// How long in-flight classification may keep draining at shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_hours: vec![1, 24],
            evaluation_interval_secs: 60,
            significance_threshold: 70.0,
            confidence_threshold: 0.6,
            actionability_threshold: 20.0,
            min_volume_floor: 2,
            strength_floor: 25.0,
            cooldown_secs: 3600,
            classification_concurrency: 4,
            classification_timeout_secs: 10,
            max_retry_attempts: 3,
            retry_backoff_ms: 500,
            late_arrival_tolerance_secs: 900,
            dedup_horizon: 10_000,
            queue_depth: 256,
            shutdown_grace_secs: 5,
        }
    }
}

impl PipelineConfig {
    /// Load using env var + fallbacks:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        let cfg = Self::default();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config from {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_hours.is_empty() {
            bail!("window_hours must name at least one window");
        }
        if self.window_hours.iter().any(|h| *h == 0) {
            bail!("window_hours entries must be positive");
        }
        let mut sorted = self.window_hours.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != self.window_hours.len() {
            bail!("window_hours entries must be distinct");
        }
        if !(0.0..=100.0).contains(&self.significance_threshold) {
            bail!("significance_threshold must be in [0,100]");
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!("confidence_threshold must be in [0,1]");
        }
        if !(0.0..=100.0).contains(&self.actionability_threshold) {
            bail!("actionability_threshold must be in [0,100]");
        }
        if !(0.0..=100.0).contains(&self.strength_floor) {
            bail!("strength_floor must be in [0,100]");
        }
        if self.evaluation_interval_secs == 0 {
            bail!("evaluation_interval_secs must be positive");
        }
        if self.classification_concurrency == 0 {
            bail!("classification_concurrency must be positive");
        }
        if self.classification_timeout_secs == 0 {
            bail!("classification_timeout_secs must be positive");
        }
        if !(1..=10).contains(&self.max_retry_attempts) {
            bail!("max_retry_attempts must be in 1..=10");
        }
        if self.retry_backoff_ms == 0 {
            bail!("retry_backoff_ms must be positive");
        }
        if self.late_arrival_tolerance_secs < 0 {
            bail!("late_arrival_tolerance_secs must be non-negative");
        }
        if self.dedup_horizon == 0 {
            bail!("dedup_horizon must be positive");
        }
        if self.queue_depth == 0 {
            bail!("queue_depth must be positive");
        }
        Ok(())
    }

    pub fn gates(&self) -> AggregateGates {
        AggregateGates {
            min_volume_floor: self.min_volume_floor,
            actionability_threshold: self.actionability_threshold,
            strength_floor: self.strength_floor,
        }
    }

    pub fn late_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.late_arrival_tolerance_secs)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn classification_timeout(&self) -> Duration {
        Duration::from_secs(self.classification_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
