// src/hardware/mod.rs
pub mod simulated;

pub use simulated::SimulatedBackend;

use crate::config::{BackendKind, Config};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Hardware backend unavailable: {0}")]
    Unavailable(String),
    #[error("Not initialized")]
    NotInitialized,
    #[error("Pin write failed on pin {pin}: {reason}")]
    PinWrite { pin: u8, reason: String },
}

/// Physical direction of travel along the rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn from_delta(delta: i64) -> Self {
        if delta >= 0 { Direction::Forward } else { Direction::Reverse }
    }

    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }
}

/// Pin-level interface to a step/dir stepper driver.
///
/// Implementations own the pin semantics; the motion code only asks for a
/// direction, a pulse, or a delay. All methods take `&self` because the
/// step loop runs on a blocking thread while other tasks may query the
/// backend.
pub trait HardwareBackend: Send + Sync {
    /// Claim pins and put the driver to sleep. Called once at startup.
    fn initialize(&self) -> Result<(), HardwareError>;

    fn set_direction(&self, direction: Direction) -> Result<(), HardwareError>;

    /// Drive the driver's sleep pin: `true` wakes it, `false` puts it to sleep.
    fn set_awake(&self, awake: bool) -> Result<(), HardwareError>;

    /// Emit one step pulse.
    fn pulse(&self) -> Result<(), HardwareError>;

    /// Block the calling thread for `duration`.
    fn delay(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn shutdown(&self) -> Result<(), HardwareError>;
}

/// Build and initialize the backend selected in the configuration.
///
/// Failure here is fatal: callers abort startup rather than run with a
/// half-initialized driver.
pub fn connect(config: &Config) -> Result<Arc<dyn HardwareBackend>, HardwareError> {
    let backend: Arc<dyn HardwareBackend> = match config.hardware.backend {
        BackendKind::Simulated => Arc::new(SimulatedBackend::from_config(config)),
    };
    tracing::info!(
        "Initializing {:?} backend (DIR: GPIO{}, STEP: GPIO{}, SLEEP: GPIO{})",
        config.hardware.backend,
        config.motor.dir_pin,
        config.motor.step_pin,
        config.motor.sleep_pin
    );
    backend.initialize()?;
    Ok(backend)
}
