// src/hardware/simulated.rs - Step/dir driver stand-in for machines without GPIO
use super::{Direction, HardwareBackend, HardwareError};
use crate::config::Config;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type PulseHook = Box<dyn Fn(u64) + Send + Sync>;

/// Records pin activity instead of driving pins.
///
/// Delays are scaled by `time_scale` (0 disables sleeping), which lets tests
/// run full moves instantly. An optional hook is called after every pulse
/// with the running pulse count.
pub struct SimulatedBackend {
    time_scale: f64,
    pulse_width: Duration,
    fail_initialize: bool,
    initialized: AtomicBool,
    awake: AtomicBool,
    direction: Mutex<Direction>,
    pulses: AtomicU64,
    forward_pulses: AtomicU64,
    on_pulse: Option<PulseHook>,
}

impl SimulatedBackend {
    pub fn new(time_scale: f64) -> Self {
        Self {
            time_scale,
            pulse_width: Duration::from_micros(1),
            fail_initialize: false,
            initialized: AtomicBool::new(false),
            awake: AtomicBool::new(false),
            direction: Mutex::new(Direction::Forward),
            pulses: AtomicU64::new(0),
            forward_pulses: AtomicU64::new(0),
            on_pulse: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut backend = Self::new(config.hardware.time_scale);
        backend.pulse_width = config.motor.pulse_width();
        backend
    }

    /// A backend whose `initialize` reports the driver as unreachable.
    pub fn unreachable() -> Self {
        Self { fail_initialize: true, ..Self::new(0.0) }
    }

    pub fn with_pulse_hook(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_pulse = Some(Box::new(hook));
        self
    }

    pub fn pulse_count(&self) -> u64 {
        self.pulses.load(Ordering::SeqCst)
    }

    /// Forward pulses minus reverse pulses since creation.
    pub fn net_steps(&self) -> i64 {
        let forward = self.forward_pulses.load(Ordering::SeqCst) as i64;
        let total = self.pulses.load(Ordering::SeqCst) as i64;
        forward - (total - forward)
    }

    pub fn is_awake(&self) -> bool {
        self.awake.load(Ordering::SeqCst)
    }

    fn direction(&self) -> Direction {
        *self.direction.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HardwareBackend for SimulatedBackend {
    fn initialize(&self) -> Result<(), HardwareError> {
        if self.fail_initialize {
            return Err(HardwareError::Unavailable(
                "simulated driver configured as unreachable".to_string(),
            ));
        }
        self.awake.store(false, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        tracing::debug!("Simulated backend initialized");
        Ok(())
    }

    fn set_direction(&self, direction: Direction) -> Result<(), HardwareError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(HardwareError::NotInitialized);
        }
        *self.direction.lock().unwrap_or_else(|e| e.into_inner()) = direction;
        Ok(())
    }

    fn set_awake(&self, awake: bool) -> Result<(), HardwareError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(HardwareError::NotInitialized);
        }
        self.awake.store(awake, Ordering::SeqCst);
        Ok(())
    }

    fn pulse(&self) -> Result<(), HardwareError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(HardwareError::NotInitialized);
        }
        self.delay(self.pulse_width);
        if self.direction() == Direction::Forward {
            self.forward_pulses.fetch_add(1, Ordering::SeqCst);
        }
        let count = self.pulses.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.on_pulse {
            hook(count);
        }
        Ok(())
    }

    fn delay(&self, duration: Duration) {
        if self.time_scale > 0.0 {
            std::thread::sleep(duration.mul_f64(self.time_scale));
        }
    }

    fn shutdown(&self) -> Result<(), HardwareError> {
        self.awake.store(false, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("Simulated backend shut down after {} pulses", self.pulse_count());
        Ok(())
    }
}
