use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where rasters produced for cacheable elements go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Retain rasters in the connected store (STORING passes).
    Store,
    /// Hand rasters to an external consumer (EXPORTING passes).
    Export,
}

// Key point:
// Serializable
// Comparable
// Explicit defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetainConfig {
    pub version: String,
    pub cache_id: String,
    pub setup_id: String,
    pub output: OutputMode,
    pub prescan: bool,
    /// Abandon the scan once unique pages exceed this share of scanned pages.
    /// 100 disables the limit.
    pub scan_limit_percent: u32,
    pub scan_limit_min_pages: u32,
    /// Sliding window size; `None` keeps the whole chunk in memory.
    pub window_pages: Option<u32>,
    pub max_scan_nodes: usize,
    pub max_marks_per_page: usize,
    pub large_image_pixels: u64,
    pub significant_area: f64,
    pub merge_lookahead: usize,
    pub max_resource_depth: usize,
    pub poll_interval_ms: u64,
}

impl RetainConfig {
    pub fn v0() -> Self {
        Self {
            version: "1".into(),
            cache_id: "default".into(),
            setup_id: "default".into(),
            output: OutputMode::Store,
            prescan: false,
            scan_limit_percent: 50,
            scan_limit_min_pages: 2,
            window_pages: None,
            max_scan_nodes: 1_000_000,
            max_marks_per_page: 1_000_000,
            large_image_pixels: 1024 * 1024,
            significant_area: 4.0,
            merge_lookahead: 8,
            max_resource_depth: 64,
            poll_interval_ms: 50,
        }
    }

    /// Parse a JSON document; missing fields take their `v0()` value.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: RetainConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_limit_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "scan_limit_percent must be <= 100, got {}",
                self.scan_limit_percent
            )));
        }
        if self.window_pages == Some(0) {
            return Err(ConfigError::Invalid("window_pages must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.max_scan_nodes == 0 || self.max_marks_per_page == 0 {
            return Err(ConfigError::Invalid("node and mark ceilings must be positive".into()));
        }
        if !(self.significant_area >= 0.0) {
            return Err(ConfigError::Invalid("significant_area must be a non-negative number".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RetainConfig {
    fn default() -> Self {
        Self::v0()
    }
}
