// src/motion/mod.rs
pub mod controller;
pub mod profile;
pub mod status;

pub use controller::{
    EmergencyStop, MotionError, MotionLease, MotionLimits, MotorController, MoveOutcome,
    MoveParams, PendingMove,
};
pub use profile::{compute_schedule, MotionSchedule, ProfileError};
pub use status::{LeaseKind, MotorState, MotorStatus, SharedStatus};
