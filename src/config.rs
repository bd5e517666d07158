//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! display-config.toml file. It provides a centralized way to configure the
//! companion server, panel geometry, and refresh/backoff timing.

use crate::panel::PixelDepth;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Application configuration loaded from display-config.toml
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Companion server configuration
    pub server: ServerConfig,
    /// Panel geometry and pixel format
    pub display: DisplayConfig,
    /// Cycle timing, staleness, and backoff policy
    pub refresh: RefreshConfig,
    /// Persistent state location
    pub store: StoreConfig,
}

/// Companion server configuration
#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Base URL of the data server (no trailing slash)
    pub base_url: String,
    /// Device identifier sent as the X-Device-ID header
    pub device_id: String,
    /// Request timeout in seconds for every fetch
    pub timeout_secs: u64,
}

/// Panel geometry and pixel format
#[derive(Debug, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// Panel width in pixels
    pub width: u32,
    /// Panel height in pixels
    pub height: u32,
    /// Native bits per pixel: 1 (B/W) or 4 (16-level grayscale)
    pub bits_per_pixel: u8,
}

impl DisplayConfig {
    /// Native pixel depth; anything other than 4 bpp is treated as 1 bpp.
    pub fn depth(&self) -> PixelDepth {
        match self.bits_per_pixel {
            4 => PixelDepth::Gray4,
            _ => PixelDepth::Mono,
        }
    }
}

/// Cycle timing, staleness, and backoff policy
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshConfig {
    /// Nominal seconds between cycles
    pub cycle_seconds: u64,
    /// Cycles between forced full refreshes (template staleness period)
    pub full_refresh_period: u32,
    /// Wall-clock ceiling in minutes: force a full repaint at least this
    /// often even when every cycle diffs clean
    pub full_ceiling_minutes: i64,
    /// Maximum sleep in seconds once backoff has kicked in
    pub max_sleep_seconds: u64,
    /// Refuse the template decode allocation below this much free memory
    pub min_free_kib: u64,
}

impl RefreshConfig {
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(self.cycle_seconds)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_seconds)
    }
}

/// Persistent state location
#[derive(Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Path of the JSON state file (cycle counter + last-rendered regions)
    pub state_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                base_url: "http://localhost:3000".to_string(),
                device_id: "TD000000".to_string(),
                timeout_secs: 15,
            },
            display: DisplayConfig {
                width: 800,  // Waveshare 7.5" panel
                height: 480, // Waveshare 7.5" panel
                bits_per_pixel: 1,
            },
            refresh: RefreshConfig {
                cycle_seconds: 30,
                full_refresh_period: 5,
                full_ceiling_minutes: 10,
                max_sleep_seconds: 480,
                min_free_kib: 512,
            },
            store: StoreConfig {
                state_path: "/var/tmp/transit-display-state.json".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from display-config.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path("display-config.toml")
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    eprintln!("Loaded configuration for server: {}", config.server.base_url);
                    config
                }
                Err(e) => {
                    eprintln!("Warning: Invalid config file format: {}", e);
                    eprintln!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                eprintln!("Info: No config file found, using default configuration");
                Self::default()
            }
        }
    }

    /// Save current configuration to display-config.toml
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write("display-config.toml", contents)?;
        eprintln!("Configuration saved to display-config.toml");
        Ok(())
    }
}
