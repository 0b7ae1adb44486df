//! Trapezoidal step timing.
//!
//! A move of `n` steps at `speed` Hz with acceleration `accel` ramps up
//! over `a` steps, cruises, then ramps down over another `a` steps:
//!
//! ```text
//! a = floor(min(n / 2, speed² / (2·accel)))     (0 when below 1)
//! ```
//!
//! When the ramps would meet, the deceleration ramp gives up one step on
//! even moves (`n / 2` up, `(n - 1) / 2` down) so the plateau is always a
//! single step. Acceleration step `i` (0-based) runs at `speed · (i + 1) / a`
//! and the deceleration ramp mirrors it. Every rate is floored at the
//! minimum step rate so no delay is ever infinite.
//!
//! Delays are computed per step on demand; a schedule is a handful of
//! numbers whatever the length of the move.

use std::time::Duration;
use thiserror::Error;

/// Floor applied to ramp rates unless the caller supplies another.
pub const DEFAULT_MIN_SPEED_HZ: f64 = 10.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProfileError {
    #[error("speed must be a positive, finite number of steps/s (got {0})")]
    InvalidSpeed(f64),
    #[error("acceleration must be a positive, finite number of steps/s² (got {0})")]
    InvalidAcceleration(f64),
}

/// Step timing for one move, consumed by the step loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSchedule {
    step_count: u64,
    accel_steps: u64,
    decel_steps: u64,
    speed_hz: f64,
    floor_hz: f64,
}

impl MotionSchedule {
    pub fn len(&self) -> u64 {
        self.step_count
    }

    pub fn is_empty(&self) -> bool {
        self.step_count == 0
    }

    /// Steps spent in the acceleration ramp.
    pub fn ramp_steps(&self) -> u64 {
        self.accel_steps
    }

    /// Steps spent in the deceleration ramp.
    pub fn decel_steps(&self) -> u64 {
        self.decel_steps
    }

    /// Steps at cruise speed.
    pub fn plateau_steps(&self) -> u64 {
        self.step_count - self.accel_steps - self.decel_steps
    }

    fn rate_at(&self, step: u64) -> f64 {
        let rate = if step < self.accel_steps {
            self.speed_hz * (step + 1) as f64 / self.accel_steps as f64
        } else if step >= self.step_count - self.decel_steps {
            self.speed_hz * (self.step_count - step) as f64 / self.decel_steps as f64
        } else {
            self.speed_hz
        };
        rate.max(self.floor_hz)
    }

    /// Delay after step `index`, in seconds.
    pub fn delay_secs(&self, index: u64) -> Option<f64> {
        (index < self.step_count).then(|| 1.0 / self.rate_at(index))
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.step_count).map(|step| Duration::from_secs_f64(1.0 / self.rate_at(step)))
    }

    pub fn total_duration(&self) -> Duration {
        let ramp = |steps: u64| -> f64 {
            (1..=steps)
                .map(|k| 1.0 / (self.speed_hz * k as f64 / steps as f64).max(self.floor_hz))
                .sum::<f64>()
        };
        let secs = ramp(self.accel_steps)
            + ramp(self.decel_steps)
            + self.plateau_steps() as f64 / self.speed_hz;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

pub fn validate_rates(speed_hz: f64, accel: f64) -> Result<(), ProfileError> {
    if !(speed_hz.is_finite() && speed_hz > 0.0) {
        return Err(ProfileError::InvalidSpeed(speed_hz));
    }
    if !(accel.is_finite() && accel > 0.0) {
        return Err(ProfileError::InvalidAcceleration(accel));
    }
    Ok(())
}

/// Number of steps in the acceleration ramp for a move of `step_count` steps.
pub fn ramp_length(step_count: u64, speed_hz: f64, accel: f64) -> Result<u64, ProfileError> {
    validate_rates(speed_hz, accel)?;
    let to_cruise = (speed_hz * speed_hz / (2.0 * accel)).floor();
    let half = (step_count / 2) as f64;
    let ramp = half.min(to_cruise);
    if ramp < 1.0 {
        return Ok(0);
    }
    Ok(ramp as u64)
}

pub fn compute_schedule(
    step_count: u64,
    speed_hz: f64,
    accel: f64,
) -> Result<MotionSchedule, ProfileError> {
    compute_schedule_with_floor(step_count, speed_hz, accel, DEFAULT_MIN_SPEED_HZ)
}

/// As [`compute_schedule`], with an explicit minimum step rate.
pub fn compute_schedule_with_floor(
    step_count: u64,
    speed_hz: f64,
    accel: f64,
    min_speed_hz: f64,
) -> Result<MotionSchedule, ProfileError> {
    let accel_steps = ramp_length(step_count, speed_hz, accel)?;
    let decel_steps = accel_steps.min(step_count.saturating_sub(1) / 2);
    // A floor above the cruise rate would make ramps faster than cruising.
    let floor_hz = if min_speed_hz.is_finite() && min_speed_hz > 0.0 {
        min_speed_hz.min(speed_hz)
    } else {
        speed_hz
    };
    Ok(MotionSchedule { step_count, accel_steps, decel_steps, speed_hz, floor_hz })
}
