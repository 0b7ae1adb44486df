//! Focus-bracketing bursts: move to each planned position, let the stage
//! settle, capture, repeat.
//!
//! A run holds a burst lease on the axis for its whole duration, so a
//! second burst or a jog is rejected as busy. Dropping the lease is what
//! clears the Bursting state and resets progress, which makes the cleanup
//! hold on every exit path: completion, emergency stop, timeout, capture or
//! hardware failure, even a panic in the capture sink.

pub mod plan;
pub mod stacking;
pub mod store;

pub use plan::{BurstPlan, DEFAULT_MAX_IMAGES};
pub use stacking::{PostProcessor, StackingError, StackingJob};
pub use store::{BurstRun, BurstStore};

use crate::camera::CaptureSink;
use crate::motion::{LeaseKind, MotionError, MotionLease, MotorController, MoveOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

const SETTLE_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum BurstError {
    #[error("Invalid burst plan: {0}")]
    InvalidPlan(String),
    #[error(transparent)]
    Motion(#[from] MotionError),
    #[error("Burst storage error: {0}")]
    Storage(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum BurstOutcome {
    Completed,
    /// Emergency stop observed; images captured so far are kept.
    Cancelled,
    /// Ran past `burst.max_duration_secs`.
    TimedOut,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurstReport {
    pub run_id: Uuid,
    pub directory: PathBuf,
    pub captured: usize,
    pub total: usize,
    pub outcome: BurstOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct BurstSequencer {
    controller: MotorController,
    store: BurstStore,
    sink: Arc<dyn CaptureSink>,
    settle: Duration,
    max_duration: Option<Duration>,
}

impl BurstSequencer {
    pub fn new(
        controller: MotorController,
        store: BurstStore,
        sink: Arc<dyn CaptureSink>,
        settle: Duration,
    ) -> Self {
        Self { controller, store, sink, settle, max_duration: None }
    }

    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn store(&self) -> &BurstStore {
        &self.store
    }

    /// Validate the plan's motion parameters and take the axis. Fails fast
    /// with `Busy`, `EmergencyStopped` or a limit error without creating
    /// any directory.
    pub fn begin(&self, plan: &BurstPlan) -> Result<MotionLease, BurstError> {
        let limits = self.controller.limits();
        limits.check(&plan.params)?;
        limits.check_steps(plan.span())?;
        let lease = self.controller.acquire(LeaseKind::Burst)?;
        limits.check_steps(self.controller.status().position.abs_diff(plan.start))?;
        Ok(lease)
    }

    /// Validate, lease and run in one blocking call.
    pub fn run_burst(&self, plan: &BurstPlan) -> Result<BurstReport, BurstError> {
        let lease = self.begin(plan)?;
        self.run(plan, lease)
    }

    /// Run a leased burst to the end, blocking the calling thread.
    ///
    /// Once the directory exists this always returns a report naming it,
    /// even when only some (or none) of the images were captured.
    pub fn run(&self, plan: &BurstPlan, lease: MotionLease) -> Result<BurstReport, BurstError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let positions = plan.positions();
        let run = self.store.allocate()?;
        let total = positions.len();
        tracing::info!(
            "Burst {} started: {} images from {} to {} into {}",
            run.index,
            total,
            plan.start,
            plan.end,
            run.directory.display()
        );

        let mut captured = 0;
        let outcome = self.drive(plan, &lease, &run, &positions, &mut captured, clock);
        drop(lease);

        match &outcome {
            BurstOutcome::Completed => {
                tracing::info!("Burst {} completed with {} images", run.index, captured)
            }
            BurstOutcome::Cancelled => {
                tracing::warn!("Burst {} cancelled after {}/{} images", run.index, captured, total)
            }
            BurstOutcome::TimedOut => {
                tracing::warn!("Burst {} timed out after {}/{} images", run.index, captured, total)
            }
            BurstOutcome::Failed(reason) => {
                tracing::error!("Burst {} failed after {}/{} images: {}", run.index, captured, total, reason)
            }
        }

        Ok(BurstReport {
            run_id: Uuid::new_v4(),
            directory: run.directory,
            captured,
            total,
            outcome,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn drive(
        &self,
        plan: &BurstPlan,
        lease: &MotionLease,
        run: &BurstRun,
        positions: &[i64],
        captured: &mut usize,
        clock: Instant,
    ) -> BurstOutcome {
        if let Some(outcome) = self.travel(lease, plan.start, plan) {
            return outcome;
        }

        for &position in positions {
            if self.controller.is_emergency_stopped() {
                return BurstOutcome::Cancelled;
            }
            if self.max_duration.is_some_and(|max| clock.elapsed() > max) {
                return BurstOutcome::TimedOut;
            }
            if let Some(outcome) = self.travel(lease, position, plan) {
                return outcome;
            }
            if !self.settle() {
                return BurstOutcome::Cancelled;
            }

            let path = run.frame_path(position);
            if let Err(e) = self.sink.capture(&path) {
                return BurstOutcome::Failed(format!("capture at {} failed: {}", position, e));
            }
            *captured += 1;
            self.controller.report_progress(lease, *captured, positions.len());
            tracing::info!("Captured {} ({}/{})", path.display(), captured, positions.len());
        }
        BurstOutcome::Completed
    }

    /// Move under the burst lease; `Some` ends the run.
    fn travel(&self, lease: &MotionLease, target: i64, plan: &BurstPlan) -> Option<BurstOutcome> {
        match self.controller.move_with(lease, target, plan.params) {
            Ok(MoveOutcome::Completed { .. }) => None,
            Ok(MoveOutcome::Interrupted { .. } | MoveOutcome::Inhibited { .. }) => {
                Some(BurstOutcome::Cancelled)
            }
            Err(e) => Some(BurstOutcome::Failed(e.to_string())),
        }
    }

    /// Wait out the settle delay in short slices; `false` if an emergency
    /// stop arrived meanwhile.
    fn settle(&self) -> bool {
        let deadline = Instant::now() + self.settle;
        loop {
            if self.controller.is_emergency_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SETTLE_SLICE.min(deadline - now));
        }
    }
}
