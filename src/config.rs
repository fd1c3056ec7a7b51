//! Configuration loading.
//!
//! Settings come from, in increasing priority: built-in defaults, a JSON
//! file (`--config`, or `config.json` in the barlight config directory),
//! and `BARLIGHT_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::frame::FrameSize;
use crate::matrix::WiringLayout;
use crate::sandbox::SandboxLimits;
use crate::scheduler::SchedulerOptions;
use crate::transport::TransportEndpoint;

/// Configuration for barlight.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Fixture dimensions.
    pub frame: FrameSize,
    /// Target frames per second.
    pub framerate: u32,
    /// Reverse the bar order when wiring.
    pub flip_x: bool,
    /// Reverse the LED order inside bars when wiring.
    pub flip_y: bool,
    /// Brightness at startup.
    pub brightness: u8,
    /// How to reach the LED controller.
    pub driver: TransportEndpoint,
    /// Listen address of the control WebSocket.
    pub control_addr: String,
    /// Directory of `<id>.json` animation definitions.
    pub animations_dir: PathBuf,
    /// Per-frame budget for animation code, in milliseconds.
    pub frame_timeout_ms: u64,
    /// Budget for loading animation code, in milliseconds.
    pub compile_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let animations_dir = dirs::data_dir()
            .map(|d| d.join("barlight").join("animations"))
            .unwrap_or_else(|| PathBuf::from("animations"));
        let limits = SandboxLimits::default();

        Self {
            frame: FrameSize::default(),
            framerate: 30,
            flip_x: false,
            flip_y: false,
            brightness: 50,
            driver: TransportEndpoint::Datagram {
                ip: "192.168.178.74".to_string(),
                port: 4210,
            },
            control_addr: "0.0.0.0:8080".to_string(),
            animations_dir,
            frame_timeout_ms: millis(limits.frame_timeout),
            compile_timeout_ms: millis(limits.compile_timeout),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Directory holding `config.json`.
    ///
    /// `BARLIGHT_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("BARLIGHT_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("barlight"))
    }

    /// Load from `path`, or from the default location if it exists, then
    /// apply environment overrides and validate.
    ///
    /// An explicit `path` must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = Self::config_dir()?.join("config.json");
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    log::debug!(
                        "[config] {} not found, using defaults",
                        default_path.display()
                    );
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        log::info!("[config] Loaded {}", path.display());
        Ok(config)
    }

    /// Apply `BARLIGHT_*` overrides read through `lookup`.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            let parsed = value.parse().ok();
            if parsed.is_none() {
                log::warn!("[config] Ignoring {key}={value}: not a valid value");
            }
            parsed
        }

        if let Some(width) = parsed("BARLIGHT_WIDTH", lookup("BARLIGHT_WIDTH")) {
            self.frame.width = width;
        }
        if let Some(height) = parsed("BARLIGHT_HEIGHT", lookup("BARLIGHT_HEIGHT")) {
            self.frame.height = height;
        }
        if let Some(framerate) = parsed("BARLIGHT_FRAMERATE", lookup("BARLIGHT_FRAMERATE")) {
            self.framerate = framerate;
        }
        if let Some(brightness) = parsed("BARLIGHT_BRIGHTNESS", lookup("BARLIGHT_BRIGHTNESS")) {
            self.brightness = brightness;
        }
        if let Some(flip) = parsed("BARLIGHT_FLIP_X", lookup("BARLIGHT_FLIP_X")) {
            self.flip_x = flip;
        }
        if let Some(flip) = parsed("BARLIGHT_FLIP_Y", lookup("BARLIGHT_FLIP_Y")) {
            self.flip_y = flip;
        }
        if let Some(addr) = lookup("BARLIGHT_CONTROL_ADDR") {
            self.control_addr = addr;
        }
        if let Some(dir) = lookup("BARLIGHT_ANIMATIONS_DIR") {
            self.animations_dir = PathBuf::from(dir);
        }
        if let Some(driver) = lookup("BARLIGHT_DRIVER") {
            match serde_json::from_str(&driver) {
                Ok(endpoint) => self.driver = endpoint,
                Err(e) => log::warn!("[config] Ignoring BARLIGHT_DRIVER: {e}"),
            }
        }
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.frame.width == 0 || self.frame.height == 0 {
            bail!(
                "frame size must be non-zero, got {}x{}",
                self.frame.width,
                self.frame.height
            );
        }
        if self.framerate == 0 {
            bail!("framerate must be at least 1");
        }
        if self.frame_timeout_ms == 0 || self.compile_timeout_ms == 0 {
            bail!("sandbox timeouts must be non-zero");
        }
        self.control_addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("invalid control_addr {}", self.control_addr))?;
        match &self.driver {
            TransportEndpoint::Stream { baud: 0, .. } => bail!("serial baud rate must be non-zero"),
            TransportEndpoint::Datagram { ip, .. } | TransportEndpoint::Socket { ip, .. }
                if ip.trim().is_empty() =>
            {
                bail!("driver ip must not be empty")
            }
            _ => {}
        }
        Ok(())
    }

    /// Wiring parameters for the transport.
    #[must_use]
    pub fn layout(&self) -> WiringLayout {
        WiringLayout {
            rows: self.frame.height,
            cols: self.frame.width,
            flip_x: self.flip_x,
            flip_y: self.flip_y,
        }
    }

    /// Parameters for the scheduler.
    #[must_use]
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            size: self.frame,
            framerate: self.framerate,
            brightness: self.brightness,
            sandbox: SandboxLimits {
                frame_timeout: Duration::from_millis(self.frame_timeout_ms),
                compile_timeout: Duration::from_millis(self.compile_timeout_ms),
                ..SandboxLimits::default()
            },
        }
    }
}
