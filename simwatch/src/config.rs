//! Pipeline configuration
//!
//! All the empirical constants of the monitoring pipeline live here so they
//! can be tuned per deployment. Every field has a default, so an empty YAML
//! document is a valid configuration.

use crate::data::ThrottleTable;
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default address of the simulation server.
pub static DEFAULT_SERVER_URL: &str = "tcp://127.0.0.1:5000";

/// Host-frame delays used to re-arm the consumer step depending on the
/// data queue backlog.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RearmPolicy {
    /// Backlog above which the step runs again on the very next frame.
    pub busy_above: usize,
    pub busy_frames: u64,
    /// Delay used when the queue is non-empty but not busy.
    pub backlog_frames: u64,
    /// Delay used when the queue is empty.
    pub idle_frames: u64,
}

impl Default for RearmPolicy {
    fn default() -> Self {
        RearmPolicy {
            busy_above: 10,
            busy_frames: 1,
            backlog_frames: 2,
            idle_frames: 10,
        }
    }
}

impl RearmPolicy {
    pub fn frames_for(&self, queued: usize) -> u64 {
        if queued > self.busy_above {
            self.busy_frames
        } else if queued > 0 {
            self.backlog_frames
        } else {
            self.idle_frames
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub server_url: String,
    /// Capacity of the data ingestion queue.
    pub data_capacity: usize,
    /// Capacity of the status ingestion queue.
    pub status_capacity: usize,
    /// Maximum data items drained per consumer step.
    pub batch_size: usize,
    /// Minimum update interval given to a freshly opened monitor, in seconds.
    pub default_interval_s: f64,
    pub throttle: ThrottleTable,
    /// No frame request is issued after a render while this many data items
    /// (or more) are still queued.
    pub request_gate: usize,
    /// Delay between a render pass and the follow-up frame request.
    pub request_delay_ms: u64,
    pub rearm: RearmPolicy,
    /// Period of the dead-target sweep, in host frames.
    pub sweep_every_frames: u64,
    /// Period of the queue health check, in host frames.
    pub health_every_frames: u64,
    /// Queue health compacts the data queue above this many items.
    pub compact_above: usize,
    /// Number of points kept in a scalar monitor's history trace.
    pub history_len: usize,
    /// Static node type to server node name table, used when no server
    /// listing has mapped a node yet.
    pub type_names: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            server_url: DEFAULT_SERVER_URL.to_string(),
            data_capacity: 100,
            status_capacity: 50,
            batch_size: 5,
            default_interval_s: 0.1,
            throttle: ThrottleTable::default(),
            request_gate: 20,
            request_delay_ms: 20,
            rearm: RearmPolicy::default(),
            sweep_every_frames: 100,
            health_every_frames: 60,
            compact_above: 50,
            history_len: 1000,
            type_names: default_type_names(),
        }
    }
}

pub fn default_type_names() -> BTreeMap<String, String> {
    [
        ("PSF", "psf"),
        ("AtmoPropagation", "prop"),
        ("ModulatedPyramid", "pyramid"),
        ("ModalAnalysis", "modal_analysis"),
        ("CCD", "detector"),
        ("PyrSlopec", "slopec"),
        ("Modalrec", "rec"),
        ("Integrator", "control"),
        ("DM", "dm"),
        ("AtmoEvolution", "atmo"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_capacity == 0 || self.status_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be non-zero".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be non-zero".into()));
        }
        if !(self.default_interval_s >= 0.0) {
            return Err(ConfigError::Invalid(
                "default_interval_s must be a non-negative number".into(),
            ));
        }
        if self.rearm.busy_frames == 0
            || self.rearm.backlog_frames == 0
            || self.rearm.idle_frames == 0
        {
            return Err(ConfigError::Invalid("re-arm delays must be at least one frame".into()));
        }
        if self.sweep_every_frames == 0 || self.health_every_frames == 0 {
            return Err(ConfigError::Invalid("housekeeping periods must be non-zero".into()));
        }
        self.throttle.validate().map_err(ConfigError::Invalid)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs_f64(self.default_interval_s)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = PipelineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.data_capacity, 100);
        assert_eq!(config.status_capacity, 50);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.request_gate, 20);
        assert_eq!(config.type_names.get("PSF").map(String::as_str), Some("psf"));
    }

    #[test]
    fn partial_override() {
        let config = PipelineConfig::from_yaml_str(
            "batch_size: 8\nrearm:\n  idle_frames: 30\nserver_url: tcp://sim:9000\n",
        )
        .unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.rearm.idle_frames, 30);
        assert_eq!(config.rearm.busy_frames, 1);
        assert_eq!(config.server_url, "tcp://sim:9000");
    }

    #[test]
    fn zero_batch_is_rejected() {
        assert!(matches!(
            PipelineConfig::from_yaml_str("batch_size: 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rearm_frames_follow_backlog() {
        let rearm = RearmPolicy::default();
        assert_eq!(rearm.frames_for(11), 1);
        assert_eq!(rearm.frames_for(10), 2);
        assert_eq!(rearm.frames_for(1), 2);
        assert_eq!(rearm.frames_for(0), 10);
    }
}
