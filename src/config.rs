//! Configuration for the focus rail host.
//!
//! Every field has a default, so an empty file (or a missing section) is a
//! valid configuration.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8000"
//!
//! [motor]
//! dir_pin = 17
//! step_pin = 27
//! sleep_pin = 22
//! max_speed_hz = 20000.0
//! max_steps_per_move = 1000000
//!
//! [burst]
//! output_dir = "/srv/bursts"
//! settle_ms = 100
//! max_images = 1000
//!
//! [stacking]
//! command = "focus-stack"
//! args = ["--align"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub motor: MotorConfig,
    #[serde(default)]
    pub burst: BurstConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub stacking: StackingConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// Stepper driver wiring and motion limits. Speeds are in microsteps per
/// second, accelerations in microsteps per second squared.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotorConfig {
    #[serde(default = "default_dir_pin")]
    pub dir_pin: u8,
    #[serde(default = "default_step_pin")]
    pub step_pin: u8,
    #[serde(default = "default_sleep_pin")]
    pub sleep_pin: u8,
    #[serde(default = "default_pulse_width_us")]
    pub pulse_width_us: u64,
    #[serde(default = "default_wake_delay_ms")]
    pub wake_delay_ms: u64,
    #[serde(default = "default_min_speed_hz")]
    pub min_speed_hz: f64,
    #[serde(default = "default_max_speed_hz")]
    pub max_speed_hz: f64,
    #[serde(default = "default_max_acceleration")]
    pub max_acceleration: f64,
    #[serde(default = "default_speed_hz")]
    pub default_speed_hz: f64,
    #[serde(default = "default_acceleration")]
    pub default_acceleration: f64,
    /// Longest single move, in microsteps.
    #[serde(default = "default_max_steps_per_move")]
    pub max_steps_per_move: u64,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            dir_pin: default_dir_pin(),
            step_pin: default_step_pin(),
            sleep_pin: default_sleep_pin(),
            pulse_width_us: default_pulse_width_us(),
            wake_delay_ms: default_wake_delay_ms(),
            min_speed_hz: default_min_speed_hz(),
            max_speed_hz: default_max_speed_hz(),
            max_acceleration: default_max_acceleration(),
            default_speed_hz: default_speed_hz(),
            default_acceleration: default_acceleration(),
            max_steps_per_move: default_max_steps_per_move(),
        }
    }
}

impl MotorConfig {
    pub fn pulse_width(&self) -> Duration {
        Duration::from_micros(self.pulse_width_us)
    }

    pub fn wake_delay(&self) -> Duration {
        Duration::from_millis(self.wake_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BurstConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Upper bound on a whole run. No bound when absent.
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            settle_ms: default_settle_ms(),
            max_duration_secs: None,
            max_images: default_max_images(),
        }
    }
}

impl BurstConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraConfig {
    #[serde(default = "default_frame_side")]
    pub width: u32,
    #[serde(default = "default_frame_side")]
    pub height: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: default_frame_side(),
            height: default_frame_side(),
            frame_rate: default_frame_rate(),
        }
    }
}

/// External focus-stacking command. The burst directory is appended as the
/// last argument.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StackingConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Simulated,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HardwareConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Multiplier applied to every simulated delay; 0 disables sleeping.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            time_scale: default_time_scale(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.motor;
        let positive = [
            ("motor.min_speed_hz", m.min_speed_hz),
            ("motor.max_speed_hz", m.max_speed_hz),
            ("motor.max_acceleration", m.max_acceleration),
            ("motor.default_speed_hz", m.default_speed_hz),
            ("motor.default_acceleration", m.default_acceleration),
            ("camera.frame_rate", self.camera.frame_rate),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }
        if m.default_speed_hz > m.max_speed_hz {
            return Err(ConfigError::Invalid(
                "motor.default_speed_hz exceeds motor.max_speed_hz".to_string(),
            ));
        }
        if m.default_acceleration > m.max_acceleration {
            return Err(ConfigError::Invalid(
                "motor.default_acceleration exceeds motor.max_acceleration".to_string(),
            ));
        }
        if m.max_steps_per_move == 0 {
            return Err(ConfigError::Invalid("motor.max_steps_per_move must be > 0".to_string()));
        }
        if self.burst.max_images < 2 {
            return Err(ConfigError::Invalid("burst.max_images must be at least 2".to_string()));
        }
        if !(self.hardware.time_scale.is_finite() && self.hardware.time_scale >= 0.0) {
            return Err(ConfigError::Invalid("hardware.time_scale must be >= 0".to_string()));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid("camera dimensions must be non-zero".to_string()));
        }
        if matches!(&self.stacking.command, Some(cmd) if cmd.trim().is_empty()) {
            return Err(ConfigError::Invalid("stacking.command must not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_bind() -> String { "0.0.0.0:8000".to_string() }
fn default_dir_pin() -> u8 { 17 }
fn default_step_pin() -> u8 { 27 }
fn default_sleep_pin() -> u8 { 22 }
fn default_pulse_width_us() -> u64 { 1 }
fn default_wake_delay_ms() -> u64 { 1 }
fn default_min_speed_hz() -> f64 { 10.0 }
fn default_max_speed_hz() -> f64 { 20_000.0 }
fn default_max_acceleration() -> f64 { 200_000.0 }
fn default_speed_hz() -> f64 { 1000.0 }
fn default_acceleration() -> f64 { 1000.0 }
fn default_max_steps_per_move() -> u64 { 1_000_000 }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }
fn default_settle_ms() -> u64 { 100 }
fn default_max_images() -> usize { 1000 }
fn default_frame_side() -> u32 { 1500 }
fn default_frame_rate() -> f64 { 10.0 }
fn default_backend() -> BackendKind { BackendKind::Simulated }
fn default_time_scale() -> f64 { 1.0 }

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            return Err(ConfigError::Io(e));
        }
    };
    let config: Config = match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to parse config TOML: {}", e);
            return Err(ConfigError::Toml(e));
        }
    };
    config.validate()?;
    Ok(config)
}
