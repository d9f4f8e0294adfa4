//! Firewall Configuration

use crate::error::{FirewallError, FirewallResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Worker topology and run length
    pub pipeline: PipelineConfig,
    /// Hash table sizing
    pub tables: TableConfig,
    /// Synthetic traffic parameters
    pub traffic: TrafficConfig,
}

impl FirewallConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> FirewallResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> FirewallResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the drivers cannot run with
    pub fn validate(&self) -> FirewallResult<()> {
        self.pipeline.validate()?;
        self.tables.validate()?;
        self.traffic.validate()
    }
}

fn require_nonzero(name: &str, value: usize) -> FirewallResult<()> {
    if value == 0 {
        return Err(FirewallError::Config(format!("{} must be greater than zero", name)));
    }
    Ok(())
}

fn require_fraction(name: &str, value: f64) -> FirewallResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(FirewallError::Config(format!(
            "{} must lie in [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

fn require_positive(name: &str, value: f64) -> FirewallResult<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(FirewallError::Config(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Pipeline topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Head workers (N)
    pub head_workers: usize,
    /// Cache-miss workers (M)
    pub cache_miss_workers: usize,
    /// Slots per queue
    pub queue_capacity: usize,
    /// Packets allowed between dispatch and completion
    pub in_flight_budget: usize,
    /// Wall-clock run length
    pub duration_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            head_workers: 8,
            cache_miss_workers: 4,
            queue_capacity: 50,
            in_flight_budget: 256,
            duration_ms: 5000,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> FirewallResult<()> {
        require_nonzero("pipeline.head_workers", self.head_workers)?;
        require_nonzero("pipeline.cache_miss_workers", self.cache_miss_workers)?;
        require_nonzero("pipeline.queue_capacity", self.queue_capacity)?;
        require_nonzero("pipeline.in_flight_budget", self.in_flight_budget)
    }
}

/// Striped table sizing for the address table and permission caches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub address_initial_capacity: usize,
    pub address_stripes: usize,
    pub address_max_bucket_size: usize,
    pub cache_initial_capacity: usize,
    pub cache_max_bucket_size: usize,
    /// Cache bucket capacity above which a cache is replaced
    pub cache_ceiling: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            address_initial_capacity: 10,
            address_stripes: 10,
            address_max_bucket_size: 5,
            cache_initial_capacity: 10,
            cache_max_bucket_size: 5,
            cache_ceiling: 128,
        }
    }
}

impl TableConfig {
    fn validate(&self) -> FirewallResult<()> {
        require_nonzero("tables.address_initial_capacity", self.address_initial_capacity)?;
        require_nonzero("tables.address_stripes", self.address_stripes)?;
        require_nonzero("tables.address_max_bucket_size", self.address_max_bucket_size)?;
        require_nonzero("tables.cache_initial_capacity", self.cache_initial_capacity)?;
        require_nonzero("tables.cache_max_bucket_size", self.cache_max_bucket_size)?;
        require_nonzero("tables.cache_ceiling", self.cache_ceiling)
    }
}

/// Largest `mean_window`; config ranges stay within `i32` width
pub const MAX_WINDOW: u32 = i32::MAX as u32 / 2;

/// Synthetic traffic parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Addresses are drawn from `[0, 2^address_log)`
    pub address_log: u32,
    /// `2^trains_log` packet trains are active at once
    pub trains_log: u32,
    pub mean_train_size: f64,
    pub mean_trains_per_comm: f64,
    /// Mean width of a config packet's range
    pub mean_window: u32,
    pub mean_comms_per_address: u32,
    /// Mean fingerprint iterations per data packet
    pub mean_work: f64,
    pub config_fraction: f64,
    /// Probability that a config packet blocks its address as a sender
    pub png_fraction: f64,
    pub accepting_fraction: f64,
    pub seed: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            address_log: 11,
            trains_log: 12,
            mean_train_size: 5.0,
            mean_trains_per_comm: 1.0,
            mean_window: 3,
            mean_comms_per_address: 3,
            mean_work: 3822.0,
            config_fraction: 0.24,
            png_fraction: 0.04,
            accepting_fraction: 0.96,
            seed: 0,
        }
    }
}

impl TrafficConfig {
    /// Number of distinct addresses
    pub fn address_space(&self) -> u64 {
        1u64 << self.address_log
    }

    /// Config packets applied before timing starts: `(2^address_log)^1.5`
    pub fn warm_up_count(&self) -> u64 {
        (self.address_space() as f64).powf(1.5).floor() as u64
    }

    fn validate(&self) -> FirewallResult<()> {
        if self.address_log == 0 || self.address_log > 30 {
            return Err(FirewallError::Config(format!(
                "traffic.address_log must lie in [1, 30], got {}",
                self.address_log
            )));
        }
        if self.trains_log > 24 {
            return Err(FirewallError::Config(format!(
                "traffic.trains_log must be at most 24, got {}",
                self.trains_log
            )));
        }
        if self.mean_window > MAX_WINDOW {
            return Err(FirewallError::Config(format!(
                "traffic.mean_window must be at most {}, got {}",
                MAX_WINDOW, self.mean_window
            )));
        }
        require_positive("traffic.mean_train_size", self.mean_train_size)?;
        if self.mean_trains_per_comm < 1.0 || !self.mean_trains_per_comm.is_finite() {
            return Err(FirewallError::Config(format!(
                "traffic.mean_trains_per_comm must be at least 1, got {}",
                self.mean_trains_per_comm
            )));
        }
        require_nonzero("traffic.mean_comms_per_address", self.mean_comms_per_address as usize)?;
        require_positive("traffic.mean_work", self.mean_work)?;
        require_fraction("traffic.config_fraction", self.config_fraction)?;
        require_fraction("traffic.png_fraction", self.png_fraction)?;
        require_fraction("traffic.accepting_fraction", self.accepting_fraction)
    }
}
