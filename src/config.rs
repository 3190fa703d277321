// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to its defaults, so a missing file or a missing
// key never stops the demo from starting.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::frame::{AcquireMode, FrameLoopSettings};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub compute: ComputeConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Pipeline".to_string(),
            width: 600,
            height: 600,
        }
    }
}

/// Graphics and frame pacing settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// "timeline" or "fence"
    pub acquire_mode: String,
    /// Timeout for every CPU wait; 0 waits forever
    pub wait_timeout_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.1, 0.1, 0.1, 1.0],
            max_frames_in_flight: 2,
            acquire_mode: "timeline".to_string(),
            wait_timeout_ms: 2000,
        }
    }
}

/// Mandelbrot generator settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub image_width: u32,
    pub image_height: u32,
    /// Zoom progress per frame
    pub zoom_speed: f32,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            image_width: 600,
            image_height: 600,
            zoom_speed: 0.0005,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_to_file: false,
            log_file: "frame_pipeline.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Get acquire lifecycle of the presentation gate
    pub fn get_acquire_mode(&self) -> AcquireMode {
        match self.graphics.acquire_mode.to_lowercase().as_str() {
            "timeline" => AcquireMode::Timeline,
            "fence" => AcquireMode::Fence,
            _ => {
                log::warn!(
                    "Unknown acquire mode '{}', defaulting to timeline",
                    self.graphics.acquire_mode
                );
                AcquireMode::Timeline
            }
        }
    }

    /// Wait timeout in nanoseconds, `u64::MAX` when waits are unbounded
    pub fn wait_timeout_ns(&self) -> u64 {
        match self.graphics.wait_timeout_ms {
            0 => u64::MAX,
            ms => ms.saturating_mul(1_000_000),
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.max(1)
    }

    pub fn frame_loop_settings(&self) -> FrameLoopSettings {
        FrameLoopSettings {
            frames_in_flight: self.frames_in_flight(),
            acquire_mode: self.get_acquire_mode(),
            timeout_ns: self.wait_timeout_ns(),
        }
    }
}
