use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::bandwidth::BandwidthChangeGate;

const ENV_PREFIX: &str = "BWALLOC";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("bwe change threshold must be within [0, 1), got {0}")]
    InvalidThreshold(f64),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("onstage preferred height ({preferred}) exceeds onstage ideal height ({ideal})")]
    InvalidOnstageHeights { preferred: u32, ideal: u32 },
}

/// Allocator settings, captured once when a controller is built.
#[derive(Clone, Debug, Deserialize, serde::Serialize, PartialEq)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Fraction of the previous estimate a decrease must reach to trigger a reallocation.
    pub bwe_change_threshold: f64,
    /// Longest time allowed between two allocations before the watchdog forces one.
    pub max_time_between_calculations_ms: u64,
    /// How often the watchdog task checks for stale allocations.
    pub watchdog_period_ms: u64,
    /// Forward the lowest layer of the top priority source even when it doesn't fit.
    pub force_forward_top_priority: bool,
    pub thumbnail_max_height: u32,
    pub onstage_ideal_height: u32,
    pub onstage_preferred_height: u32,
    pub onstage_preferred_frame_rate: f64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            bwe_change_threshold: BandwidthChangeGate::DEFAULT_THRESHOLD,
            max_time_between_calculations_ms: 15_000,
            watchdog_period_ms: 1_000,
            force_forward_top_priority: true,
            thumbnail_max_height: 180,
            onstage_ideal_height: 720,
            onstage_preferred_height: 360,
            onstage_preferred_frame_rate: 30.0,
        }
    }
}

impl AllocatorConfig {
    /// Loads defaults, then the optional TOML file, then `BWALLOC__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let cfg: AllocatorConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.bwe_change_threshold) {
            return Err(ConfigError::InvalidThreshold(self.bwe_change_threshold));
        }
        if self.max_time_between_calculations_ms == 0 {
            return Err(ConfigError::ZeroDuration("max_time_between_calculations_ms"));
        }
        if self.watchdog_period_ms == 0 {
            return Err(ConfigError::ZeroDuration("watchdog_period_ms"));
        }
        if self.onstage_preferred_height > self.onstage_ideal_height {
            return Err(ConfigError::InvalidOnstageHeights {
                preferred: self.onstage_preferred_height,
                ideal: self.onstage_ideal_height,
            });
        }
        Ok(())
    }

    pub fn max_time_between_calculations(&self) -> Duration {
        Duration::from_millis(self.max_time_between_calculations_ms)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_millis(self.watchdog_period_ms)
    }

    pub fn bandwidth_gate(&self) -> BandwidthChangeGate {
        BandwidthChangeGate::new(self.bwe_change_threshold)
    }
}
