// src/lib.rs - Motorized focus rail: stepper motion control and focus-bracketing bursts
pub mod burst;
pub mod camera;
pub mod config;
pub mod hardware;
pub mod motion;
pub mod rail;
pub mod web;

pub use burst::{BurstOutcome, BurstPlan, BurstReport, BurstSequencer, BurstStore};
pub use config::{load_config, Config, ConfigError};
pub use hardware::{HardwareBackend, HardwareError, SimulatedBackend};
pub use motion::{MotionError, MotorController, MotorState, MotorStatus, MoveOutcome, MoveParams};
pub use rail::{spawn_executor, FocusRail, RailError, RailRequest};
