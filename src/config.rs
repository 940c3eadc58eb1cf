//! Kernel configuration
//!
//! Everything tunable about a kernel instance: the monitor layout, the frame
//! metrics the window server lays windows out with, and a few limits.
//! Loaded from JSON; every field has a default so partial documents work.

use crate::user::geometry::Rect;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Full monitor area in virtual-screen coordinates
    pub rect: Rect,
    /// Area not covered by shell bars; defaults to `rect`
    #[serde(default)]
    pub work_area: Option<Rect>,
}

impl MonitorConfig {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            work_area: None,
        }
    }

    pub fn work_area(&self) -> Rect {
        self.work_area.unwrap_or(self.rect)
    }
}

/// Frame metrics, in pixels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub caption_height: i32,
    pub border_width: i32,
    /// Sizing frame thickness of resizable windows
    pub frame_width: i32,
    /// Width of each caption button
    pub caption_button_width: i32,
    /// How far inside the frame the sizing edges reach
    pub sizing_margin: i32,
}

impl MetricsConfig {
    /// Offset between successive default-placed windows
    pub fn cascade_step(&self) -> i32 {
        self.caption_height + self.frame_width
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            caption_height: 19,
            border_width: 1,
            frame_width: 4,
            caption_button_width: 18,
            sizing_margin: 4,
        }
    }
}

/// Kernel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub monitors: Vec<MonitorConfig>,
    pub metrics: MetricsConfig,
    /// Posted messages a process queue holds before posts fail
    pub max_queue_len: usize,
    /// Nested window-procedure dispatch limit
    pub max_dispatch_depth: usize,
    /// Budget for a hit-test sent to another process
    pub hit_test_timeout_ms: u64,
    pub trace_enabled: bool,
    pub trace_buffer: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            monitors: vec![MonitorConfig::new(Rect::new(0, 0, 1024, 768))],
            metrics: MetricsConfig::default(),
            max_queue_len: 10_000,
            max_dispatch_depth: 64,
            hit_test_timeout_ms: 200,
            trace_enabled: false,
            trace_buffer: crate::kernel::trace::TRACE_BUFFER_SIZE,
        }
    }
}

impl KernelConfig {
    /// A single monitor of the given size at the origin
    pub fn with_screen(width: i32, height: i32) -> Self {
        Self {
            monitors: vec![MonitorConfig::new(Rect::new(0, 0, width, height))],
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: KernelConfig =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitors.is_empty() {
            return Err(ConfigError::NoMonitors);
        }
        for (index, monitor) in self.monitors.iter().enumerate() {
            if monitor.rect.is_empty() || monitor.work_area().is_empty() {
                return Err(ConfigError::EmptyMonitor(index));
            }
        }
        if self.max_queue_len == 0 {
            return Err(ConfigError::ZeroLimit("max_queue_len"));
        }
        if self.max_dispatch_depth == 0 {
            return Err(ConfigError::ZeroLimit("max_dispatch_depth"));
        }
        Ok(())
    }

    /// Work area of the primary (first) monitor
    pub fn primary_work_area(&self) -> Rect {
        self.monitors
            .first()
            .map(|m| m.work_area())
            .unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    NoMonitors,
    EmptyMonitor(usize),
    ZeroLimit(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::NoMonitors => write!(f, "at least one monitor is required"),
            ConfigError::EmptyMonitor(i) => write!(f, "monitor {} has an empty area", i),
            ConfigError::ZeroLimit(name) => write!(f, "{} must be non-zero", name),
        }
    }
}

impl std::error::Error for ConfigError {}
