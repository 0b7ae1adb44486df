// src/motion/status.rs - Shared axis record and the read-only snapshot pollers see
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorState {
    Idle,
    Moving,
    EmergencyStopped,
    Bursting,
}

impl MotorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotorState::Idle => "idle",
            MotorState::Moving => "moving",
            MotorState::EmergencyStopped => "emergency_stopped",
            MotorState::Bursting => "bursting",
        }
    }
}

/// A consistent copy of the axis record, taken under a single lock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MotorStatus {
    pub position: i64,
    pub target_position: i64,
    pub state: MotorState,
    pub burst_progress_percent: f64,
}

/// Who currently holds the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseKind {
    Jog,
    Burst,
}

#[derive(Debug)]
pub(crate) struct AxisRecord {
    pub position: i64,
    pub target: i64,
    pub state: MotorState,
    pub progress: f64,
    pub lease: Option<LeaseKind>,
}

impl AxisRecord {
    pub fn snapshot(&self) -> MotorStatus {
        MotorStatus {
            position: self.position,
            target_position: self.target,
            state: self.state,
            burst_progress_percent: self.progress,
        }
    }
}

/// The single mutex-guarded source of truth for position, target, state
/// and burst progress.
#[derive(Debug, Clone)]
pub struct SharedStatus {
    inner: Arc<Mutex<AxisRecord>>,
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(AxisRecord {
                position: 0,
                target: 0,
                state: MotorState::Idle,
                progress: 0.0,
                lease: None,
            })),
        }
    }

    /// Poisoning is ignored; every write leaves the record consistent.
    pub(crate) fn lock(&self) -> MutexGuard<'_, AxisRecord> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> MotorStatus {
        self.lock().snapshot()
    }

    pub(crate) fn same_record(&self, other: &SharedStatus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
