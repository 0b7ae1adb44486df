// src/motion/controller.rs - Single-axis motor controller with latched emergency stop
use crate::config::MotorConfig;
use crate::hardware::{Direction, HardwareBackend, HardwareError};
use crate::motion::profile::{self, ProfileError};
use crate::motion::status::{LeaseKind, MotorState, MotorStatus, SharedStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Axis is busy")]
    Busy,
    #[error("Emergency stop is active; clear it before moving")]
    EmergencyStopped,
    #[error("Invalid motion parameters: {0}")]
    Profile(#[from] ProfileError),
    #[error("{name} of {value} exceeds the configured maximum of {limit}")]
    LimitExceeded { name: &'static str, value: f64, limit: f64 },
    #[error("Lease was issued by a different controller")]
    ForeignLease,
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

/// Speed and acceleration for one move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveParams {
    pub speed_hz: f64,
    pub acceleration: f64,
}

impl MoveParams {
    pub fn new(speed_hz: f64, acceleration: f64) -> Self {
        Self { speed_hz, acceleration }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    pub min_speed_hz: f64,
    pub max_speed_hz: f64,
    pub max_acceleration: f64,
    pub max_steps_per_move: u64,
    pub wake_delay: Duration,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self::from(&MotorConfig::default())
    }
}

impl From<&MotorConfig> for MotionLimits {
    fn from(config: &MotorConfig) -> Self {
        Self {
            min_speed_hz: config.min_speed_hz,
            max_speed_hz: config.max_speed_hz,
            max_acceleration: config.max_acceleration,
            max_steps_per_move: config.max_steps_per_move,
            wake_delay: config.wake_delay(),
        }
    }
}

impl MotionLimits {
    /// Reject parameters that are non-positive, non-finite, or above the
    /// configured maxima.
    pub fn check(&self, params: &MoveParams) -> Result<(), MotionError> {
        profile::validate_rates(params.speed_hz, params.acceleration)?;
        if params.speed_hz > self.max_speed_hz {
            return Err(MotionError::LimitExceeded {
                name: "speed",
                value: params.speed_hz,
                limit: self.max_speed_hz,
            });
        }
        if params.acceleration > self.max_acceleration {
            return Err(MotionError::LimitExceeded {
                name: "acceleration",
                value: params.acceleration,
                limit: self.max_acceleration,
            });
        }
        Ok(())
    }

    /// Reject a move longer than `max_steps_per_move`.
    pub fn check_steps(&self, steps: u64) -> Result<(), MotionError> {
        if steps > self.max_steps_per_move {
            return Err(MotionError::LimitExceeded {
                name: "step count",
                value: steps as f64,
                limit: self.max_steps_per_move as f64,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Reached the requested target.
    Completed { position: i64 },
    /// Emergency stop observed mid-move; `position` counts only pulsed steps.
    Interrupted { position: i64 },
    /// Emergency stop was already latched; nothing moved.
    Inhibited { position: i64 },
}

impl MoveOutcome {
    pub fn position(&self) -> i64 {
        match *self {
            MoveOutcome::Completed { position }
            | MoveOutcome::Interrupted { position }
            | MoveOutcome::Inhibited { position } => position,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, MoveOutcome::Completed { .. })
    }
}

/// Exclusive hold on the axis.
///
/// Acquiring moves the state from Idle to Moving (jog) or Bursting (burst).
/// Dropping it, on any exit path, returns the axis to Idle unless an
/// emergency stop is latched, resets burst progress and syncs the target
/// to the actual position.
#[derive(Debug)]
pub struct MotionLease {
    status: SharedStatus,
    kind: LeaseKind,
}

impl MotionLease {
    pub fn kind(&self) -> LeaseKind {
        self.kind
    }
}

impl Drop for MotionLease {
    fn drop(&mut self) {
        let mut record = self.status.lock();
        record.lease = None;
        record.progress = 0.0;
        record.target = record.position;
        if record.state != MotorState::EmergencyStopped {
            record.state = MotorState::Idle;
        }
        tracing::debug!("Released {:?} lease at position {}", self.kind, record.position);
    }
}

/// Latches the emergency stop. Cheap to clone and safe to call from any
/// thread while a move is in flight.
#[derive(Debug, Clone)]
pub struct EmergencyStop {
    flag: Arc<AtomicBool>,
    status: SharedStatus,
}

impl EmergencyStop {
    pub fn trigger(&self) {
        let already = self.flag.swap(true, Ordering::SeqCst);
        let mut record = self.status.lock();
        record.state = MotorState::EmergencyStopped;
        if !already {
            tracing::warn!("Emergency stop activated at position {}", record.position);
        }
    }

    pub fn is_active(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A jog that has been admitted (lease held, target published) but not yet
/// executed. Running it blocks for the whole move.
#[derive(Debug)]
pub struct PendingMove {
    controller: MotorController,
    lease: MotionLease,
    target: i64,
    params: MoveParams,
    accepted: MotorStatus,
}

impl PendingMove {
    /// Status as of admission: state Moving, target already set.
    pub fn accepted_status(&self) -> MotorStatus {
        self.accepted
    }

    pub fn target(&self) -> i64 {
        self.target
    }

    pub fn run(self) -> Result<MoveOutcome, MotionError> {
        self.controller.move_with(&self.lease, self.target, self.params)
    }
}

/// Puts the driver back to sleep when the step loop exits, however it exits.
struct DriverSleep<'a>(&'a dyn HardwareBackend);

impl Drop for DriverSleep<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.set_awake(false) {
            tracing::error!("Failed to put stepper driver to sleep: {}", e);
        }
    }
}

#[derive(Clone)]
pub struct MotorController {
    status: SharedStatus,
    stop: Arc<AtomicBool>,
    backend: Arc<dyn HardwareBackend>,
    limits: MotionLimits,
}

impl std::fmt::Debug for MotorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorController")
            .field("status", &self.status.snapshot())
            .field("limits", &self.limits)
            .finish()
    }
}

impl MotorController {
    /// The backend must already be initialized.
    pub fn new(backend: Arc<dyn HardwareBackend>, limits: MotionLimits) -> Self {
        Self {
            status: SharedStatus::new(),
            stop: Arc::new(AtomicBool::new(false)),
            backend,
            limits,
        }
    }

    pub fn limits(&self) -> &MotionLimits {
        &self.limits
    }

    pub fn status(&self) -> MotorStatus {
        self.status.snapshot()
    }

    /// Handle for pollers; shares the same record.
    pub fn status_handle(&self) -> SharedStatus {
        self.status.clone()
    }

    pub fn stop_handle(&self) -> EmergencyStop {
        EmergencyStop { flag: self.stop.clone(), status: self.status.clone() }
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn emergency_stop(&self) {
        self.stop_handle().trigger();
    }

    /// Explicitly clear a latched emergency stop.
    pub fn clear_emergency_stop(&self) -> Result<MotorStatus, MotionError> {
        let mut record = self.status.lock();
        if record.lease.is_some() {
            return Err(MotionError::Busy);
        }
        self.stop.store(false, Ordering::SeqCst);
        if record.state == MotorState::EmergencyStopped {
            record.state = MotorState::Idle;
            tracing::info!("Emergency stop cleared at position {}", record.position);
        }
        Ok(record.snapshot())
    }

    /// Rebase position and target to zero. Rejected while the axis is leased.
    pub fn set_zero(&self) -> Result<MotorStatus, MotionError> {
        let mut record = self.status.lock();
        if record.lease.is_some() {
            return Err(MotionError::Busy);
        }
        record.position = 0;
        record.target = 0;
        tracing::info!("Position zeroed");
        Ok(record.snapshot())
    }

    pub fn acquire(&self, kind: LeaseKind) -> Result<MotionLease, MotionError> {
        let mut record = self.status.lock();
        if self.stop.load(Ordering::SeqCst) || record.state == MotorState::EmergencyStopped {
            return Err(MotionError::EmergencyStopped);
        }
        if record.lease.is_some() {
            return Err(MotionError::Busy);
        }
        record.lease = Some(kind);
        record.state = match kind {
            LeaseKind::Jog => MotorState::Moving,
            LeaseKind::Burst => MotorState::Bursting,
        };
        Ok(MotionLease { status: self.status.clone(), kind })
    }

    /// Validate, lease the axis and publish the target of a relative move.
    pub fn start_relative(&self, delta: i64, params: MoveParams) -> Result<PendingMove, MotionError> {
        self.limits.check(&params)?;
        self.limits.check_steps(delta.unsigned_abs())?;
        let lease = self.acquire(LeaseKind::Jog)?;
        let (target, accepted) = {
            let mut record = self.status.lock();
            record.target = record.position.saturating_add(delta);
            (record.target, record.snapshot())
        };
        Ok(PendingMove { controller: self.clone(), lease, target, params, accepted })
    }

    pub fn start_absolute(&self, target: i64, params: MoveParams) -> Result<PendingMove, MotionError> {
        self.limits.check(&params)?;
        let lease = self.acquire(LeaseKind::Jog)?;
        let accepted = {
            let mut record = self.status.lock();
            self.limits.check_steps(record.position.abs_diff(target))?;
            record.target = target;
            record.snapshot()
        };
        Ok(PendingMove { controller: self.clone(), lease, target, params, accepted })
    }

    /// Blocking absolute move. A latched emergency stop makes this a no-op.
    pub fn move_absolute(&self, target: i64, params: MoveParams) -> Result<MoveOutcome, MotionError> {
        match self.start_absolute(target, params) {
            Ok(pending) => pending.run(),
            Err(MotionError::EmergencyStopped) => Ok(self.inhibited()),
            Err(e) => Err(e),
        }
    }

    /// Blocking relative move. A latched emergency stop makes this a no-op.
    pub fn move_relative(&self, delta: i64, params: MoveParams) -> Result<MoveOutcome, MotionError> {
        match self.start_relative(delta, params) {
            Ok(pending) => pending.run(),
            Err(MotionError::EmergencyStopped) => Ok(self.inhibited()),
            Err(e) => Err(e),
        }
    }

    fn inhibited(&self) -> MoveOutcome {
        MoveOutcome::Inhibited { position: self.status.lock().position }
    }

    /// Record burst progress; never decreases within one lease.
    pub fn report_progress(&self, lease: &MotionLease, captured: usize, total: usize) {
        if lease.kind != LeaseKind::Burst || total == 0 || !lease.status.same_record(&self.status) {
            return;
        }
        let percent = captured.min(total) as f64 / total as f64 * 100.0;
        let mut record = self.status.lock();
        if percent > record.progress {
            record.progress = percent;
        }
    }

    /// Execute one move under an existing lease, blocking the calling thread.
    ///
    /// The stop flag is read once per step before the pulse, so an
    /// emergency stop takes effect within one step period and the reported
    /// position counts only pulses actually emitted.
    pub fn move_with(
        &self,
        lease: &MotionLease,
        target: i64,
        params: MoveParams,
    ) -> Result<MoveOutcome, MotionError> {
        if !lease.status.same_record(&self.status) {
            return Err(MotionError::ForeignLease);
        }
        self.limits.check(&params)?;

        let start = {
            let mut record = self.status.lock();
            record.target = target;
            record.position
        };
        if self.stop.load(Ordering::SeqCst) {
            return Ok(MoveOutcome::Inhibited { position: self.sync_target() });
        }

        let delta = target.saturating_sub(start);
        let steps = delta.unsigned_abs();
        if let Err(e) = self.limits.check_steps(steps) {
            self.sync_target();
            return Err(e);
        }
        let schedule = profile::compute_schedule_with_floor(
            steps,
            params.speed_hz,
            params.acceleration,
            self.limits.min_speed_hz,
        )?;
        if schedule.is_empty() {
            return Ok(MoveOutcome::Completed { position: start });
        }

        let direction = Direction::from_delta(delta);
        tracing::info!(
            "Moving {} steps {:?} from {} to {} at {} Hz (ramp {} steps, ~{:?})",
            steps,
            direction,
            start,
            target,
            params.speed_hz,
            schedule.ramp_steps(),
            schedule.total_duration()
        );

        let result = self.step_loop(direction, schedule.delays());
        let position = self.sync_target();
        match result {
            Ok(true) => {
                tracing::info!("Move complete at position {}", position);
                Ok(MoveOutcome::Completed { position })
            }
            Ok(false) => {
                tracing::warn!("Move interrupted at position {} (target was {})", position, target);
                Ok(MoveOutcome::Interrupted { position })
            }
            Err(e) => {
                tracing::error!("Move aborted at position {}: {}", position, e);
                Err(e.into())
            }
        }
    }

    /// Returns `Ok(true)` when every step was emitted, `Ok(false)` when the
    /// stop flag cut the move short.
    fn step_loop(
        &self,
        direction: Direction,
        delays: impl Iterator<Item = Duration>,
    ) -> Result<bool, HardwareError> {
        let _sleep = DriverSleep(self.backend.as_ref());
        self.backend.set_direction(direction)?;
        self.backend.set_awake(true)?;
        self.backend.delay(self.limits.wake_delay);

        let sign = direction.sign();
        for delay in delays {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.backend.pulse()?;
            self.status.lock().position += sign;
            self.backend.delay(delay);
        }
        Ok(true)
    }

    /// Align the target with wherever the axis actually ended up.
    fn sync_target(&self) -> i64 {
        let mut record = self.status.lock();
        record.target = record.position;
        record.position
    }

    /// Latch the stop flag and release the driver. Used at process exit.
    pub fn shutdown(&self) -> Result<(), HardwareError> {
        self.emergency_stop();
        self.backend.set_awake(false)?;
        self.backend.shutdown()
    }
}
