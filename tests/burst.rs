// Integration tests for burst sequencing: directories, progress, cancellation and cleanup

use focus_rail::burst::{BurstError, BurstOutcome, BurstPlan, BurstSequencer, BurstStore};
use focus_rail::camera::{CaptureError, CaptureSink};
use focus_rail::hardware::{HardwareBackend, SimulatedBackend};
use focus_rail::motion::{
    EmergencyStop, MotionError, MotionLimits, MotorController, MotorState, MotorStatus, MoveParams,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tempfile::tempdir;

/// Writes a placeholder frame and remembers what the axis looked like at
/// each capture. Can be told to fail or to hit the emergency stop.
struct RecordingSink {
    controller: MotorController,
    calls: Mutex<Vec<(PathBuf, MotorStatus)>>,
    fail_at: Option<usize>,
    stop_after: Option<usize>,
}

impl RecordingSink {
    fn new(controller: &MotorController) -> Self {
        Self { controller: controller.clone(), calls: Mutex::new(Vec::new()), fail_at: None, stop_after: None }
    }

    fn paths(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().iter().map(|(path, _)| path.clone()).collect()
    }

    fn statuses(&self) -> Vec<MotorStatus> {
        self.calls.lock().unwrap().iter().map(|(_, status)| *status).collect()
    }
}

impl CaptureSink for RecordingSink {
    fn capture(&self, path: &Path) -> Result<(), CaptureError> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((path.to_path_buf(), self.controller.status()));
            calls.len()
        };
        if self.fail_at == Some(count) {
            return Err(CaptureError::NoFrame);
        }
        std::fs::write(path, b"jpeg")?;
        if self.stop_after == Some(count) {
            self.controller.emergency_stop();
        }
        Ok(())
    }
}

fn params() -> MoveParams {
    MoveParams::new(5000.0, 50_000.0)
}

fn controller() -> MotorController {
    let backend = Arc::new(SimulatedBackend::new(0.0));
    backend.initialize().unwrap();
    MotorController::new(backend, MotionLimits::default())
}

fn sequencer(controller: &MotorController, root: &Path, sink: Arc<RecordingSink>) -> BurstSequencer {
    BurstSequencer::new(controller.clone(), BurstStore::new(root), sink, Duration::ZERO)
}

fn assert_released(status: MotorStatus, state: MotorState) {
    assert_eq!(status.state, state);
    assert_eq!(status.burst_progress_percent, 0.0);
    assert_eq!(status.target_position, status.position);
}

#[test]
fn test_completed_burst_captures_every_position() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = sequencer(&controller, dir.path(), sink.clone());

    let plan = BurstPlan::new(0, 1000, 10, params()).unwrap();
    let report = sequencer.run_burst(&plan).unwrap();

    assert_eq!(report.outcome, BurstOutcome::Completed);
    assert_eq!(report.captured, 10);
    assert_eq!(report.total, 10);
    assert_eq!(report.directory, dir.path().join("burst_001"));
    for name in ["burst_0000.jpeg", "burst_0111.jpeg", "burst_0556.jpeg", "burst_1000.jpeg"] {
        assert!(report.directory.join(name).is_file(), "missing {}", name);
    }
    assert_eq!(std::fs::read_dir(&report.directory).unwrap().count(), 10);
    assert_eq!(controller.status().position, 1000);
    assert_released(controller.status(), MotorState::Idle);
}

#[test]
fn test_captures_happen_at_rest_on_each_position() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = sequencer(&controller, dir.path(), sink.clone());

    let plan = BurstPlan::new(200, -200, 5, params()).unwrap();
    sequencer.run_burst(&plan).unwrap();

    let positions: Vec<i64> = sink.statuses().iter().map(|s| s.position).collect();
    assert_eq!(positions, plan.positions());
    assert!(sink.statuses().iter().all(|s| s.state == MotorState::Bursting));
    assert!(sink.paths()[4].ends_with("burst_-200.jpeg"));
}

#[test]
fn test_progress_is_monotonic_and_reset_afterwards() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = sequencer(&controller, dir.path(), sink.clone());

    let plan = BurstPlan::new(0, 400, 4, params()).unwrap();
    sequencer.run_burst(&plan).unwrap();

    // Seen just before each capture: 0/4, 1/4, 2/4, 3/4 done.
    let progress: Vec<f64> = sink.statuses().iter().map(|s| s.burst_progress_percent).collect();
    assert_eq!(progress, vec![0.0, 25.0, 50.0, 75.0]);
    assert_eq!(controller.status().burst_progress_percent, 0.0);
}

#[test]
fn test_consecutive_bursts_never_overwrite() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = sequencer(&controller, dir.path(), sink);

    let plan = BurstPlan::new(0, 90, 10, params()).unwrap();
    let first = sequencer.run_burst(&plan).unwrap();
    let second = sequencer.run_burst(&plan).unwrap();

    assert!(first.directory.ends_with("burst_001"));
    assert!(second.directory.ends_with("burst_002"));
    assert_eq!(std::fs::read_dir(&first.directory).unwrap().count(), 10);
    assert_eq!(std::fs::read_dir(&second.directory).unwrap().count(), 10);
    assert_ne!(first.run_id, second.run_id);
}

#[test]
fn test_emergency_stop_between_captures_cancels_and_cleans_up() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let mut sink = RecordingSink::new(&controller);
    sink.stop_after = Some(3);
    let sink = Arc::new(sink);
    let sequencer = sequencer(&controller, dir.path(), sink.clone());

    let plan = BurstPlan::new(0, 1000, 10, params()).unwrap();
    let report = sequencer.run_burst(&plan).unwrap();

    assert_eq!(report.outcome, BurstOutcome::Cancelled);
    assert_eq!(report.captured, 3);
    assert_eq!(sink.paths().len(), 3);
    // Frames taken before the stop are kept.
    assert_eq!(std::fs::read_dir(&report.directory).unwrap().count(), 3);
    assert_eq!(controller.status().position, 222);
    assert_released(controller.status(), MotorState::EmergencyStopped);
}

#[test]
fn test_emergency_stop_mid_move_cancels_burst() {
    let dir = tempdir().unwrap();
    let stop: Arc<OnceLock<EmergencyStop>> = Arc::new(OnceLock::new());
    let hook_stop = stop.clone();
    let backend = Arc::new(SimulatedBackend::new(0.0).with_pulse_hook(move |count| {
        if count == 250 {
            if let Some(stop) = hook_stop.get() {
                stop.trigger();
            }
        }
    }));
    backend.initialize().unwrap();
    let controller = MotorController::new(backend, MotionLimits::default());
    stop.set(controller.stop_handle()).unwrap();
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = sequencer(&controller, dir.path(), sink.clone());

    let plan = BurstPlan::new(0, 1000, 10, params()).unwrap();
    let report = sequencer.run_burst(&plan).unwrap();

    // Captured at 0, 111 and 222; stopped on the way to 333.
    assert_eq!(report.outcome, BurstOutcome::Cancelled);
    assert_eq!(report.captured, 3);
    assert_eq!(controller.status().position, 250);
    assert_released(controller.status(), MotorState::EmergencyStopped);
}

#[test]
fn test_capture_failure_ends_run_and_releases_axis() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let mut sink = RecordingSink::new(&controller);
    sink.fail_at = Some(2);
    let sequencer = sequencer(&controller, dir.path(), Arc::new(sink));

    let plan = BurstPlan::new(0, 100, 5, params()).unwrap();
    let report = sequencer.run_burst(&plan).unwrap();

    assert!(matches!(report.outcome, BurstOutcome::Failed(_)));
    assert_eq!(report.captured, 1);
    assert_released(controller.status(), MotorState::Idle);

    // The axis is free for the next run.
    assert!(sequencer.run_burst(&plan).is_ok());
}

#[test]
fn test_burst_times_out_with_distinct_outcome() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = BurstSequencer::new(
        controller.clone(),
        BurstStore::new(dir.path()),
        sink,
        Duration::from_millis(20),
    )
    .with_max_duration(Some(Duration::from_millis(30)));

    let plan = BurstPlan::new(0, 100, 10, params()).unwrap();
    let report = sequencer.run_burst(&plan).unwrap();

    assert_eq!(report.outcome, BurstOutcome::TimedOut);
    assert!(report.captured >= 1 && report.captured < report.total);
    assert_released(controller.status(), MotorState::Idle);
}

#[test]
fn test_busy_axis_rejects_burst_without_creating_directory() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = sequencer(&controller, dir.path(), sink);

    let jog = controller.start_relative(100, params()).unwrap();
    let plan = BurstPlan::new(0, 100, 5, params()).unwrap();
    let result = sequencer.run_burst(&plan);
    assert!(matches!(result, Err(BurstError::Motion(MotionError::Busy))));
    assert!(!dir.path().join("burst_001").exists());
    drop(jog);
}

#[test]
fn test_latched_stop_rejects_burst() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = sequencer(&controller, dir.path(), sink);

    controller.emergency_stop();
    let plan = BurstPlan::new(0, 100, 5, params()).unwrap();
    let result = sequencer.run_burst(&plan);
    assert!(matches!(result, Err(BurstError::Motion(MotionError::EmergencyStopped))));
    assert!(!dir.path().join("burst_001").exists());
}

#[test]
fn test_invalid_rates_rejected_before_leasing() {
    let dir = tempdir().unwrap();
    let controller = controller();
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = sequencer(&controller, dir.path(), sink);

    let plan = BurstPlan::new(0, 100, 5, MoveParams::new(0.0, 1000.0)).unwrap();
    assert!(matches!(sequencer.run_burst(&plan), Err(BurstError::Motion(MotionError::Profile(_)))));
    assert_eq!(controller.status().state, MotorState::Idle);
}

#[test]
fn test_oversized_plans_rejected_without_creating_directory() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(SimulatedBackend::new(0.0));
    backend.initialize().unwrap();
    let limits = MotionLimits { max_steps_per_move: 500, ..MotionLimits::default() };
    let controller = MotorController::new(backend, limits);
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = sequencer(&controller, dir.path(), sink.clone());

    let wide = BurstPlan::new(i64::MIN, i64::MAX, 10, params()).unwrap();
    assert!(matches!(
        sequencer.run_burst(&wide),
        Err(BurstError::Motion(MotionError::LimitExceeded { .. }))
    ));
    // The span fits but the start is too far from where the rail stands.
    let far = BurstPlan::new(1000, 1400, 5, params()).unwrap();
    assert!(matches!(
        sequencer.run_burst(&far),
        Err(BurstError::Motion(MotionError::LimitExceeded { .. }))
    ));

    assert!(!dir.path().join("burst_001").exists());
    assert!(sink.paths().is_empty());
    assert_released(controller.status(), MotorState::Idle);

    let near = BurstPlan::new(0, 400, 5, params()).unwrap();
    let report = sequencer.run_burst(&near).unwrap();
    assert_eq!(report.outcome, BurstOutcome::Completed);
    assert!(report.directory.ends_with("burst_001"));
}

#[test]
fn test_pollers_never_see_torn_status() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(SimulatedBackend::new(1.0));
    backend.initialize().unwrap();
    let controller = MotorController::new(backend, MotionLimits::default());
    let sink = Arc::new(RecordingSink::new(&controller));
    let sequencer = BurstSequencer::new(
        controller.clone(),
        BurstStore::new(dir.path()),
        sink,
        Duration::from_millis(2),
    );

    let done = Arc::new(AtomicBool::new(false));
    let poller = {
        let (controller, done) = (controller.clone(), done.clone());
        std::thread::spawn(move || {
            let mut bursting = 0usize;
            let mut torn = Vec::new();
            while !done.load(Ordering::SeqCst) {
                let status = controller.status();
                match status.state {
                    MotorState::Idle => {
                        if status.burst_progress_percent != 0.0 || status.target_position != status.position {
                            torn.push(status);
                        }
                    }
                    MotorState::Bursting => {
                        bursting += 1;
                        if !(0.0..=100.0).contains(&status.burst_progress_percent) {
                            torn.push(status);
                        }
                    }
                    MotorState::Moving => {
                        if status.burst_progress_percent != 0.0 {
                            torn.push(status);
                        }
                    }
                    MotorState::EmergencyStopped => torn.push(status),
                }
                std::thread::yield_now();
            }
            (bursting, torn)
        })
    };

    let plan = BurstPlan::new(0, 100, 10, params()).unwrap();
    let first = sequencer.run_burst(&plan).unwrap();
    controller.move_relative(-30, params()).unwrap();
    let second = sequencer.run_burst(&plan).unwrap();
    done.store(true, Ordering::SeqCst);

    let (bursting, torn) = poller.join().unwrap();
    assert_eq!(first.outcome, BurstOutcome::Completed);
    assert_eq!(second.outcome, BurstOutcome::Completed);
    assert!(bursting > 0);
    assert!(torn.is_empty(), "inconsistent snapshots: {:?}", &torn[..torn.len().min(5)]);
    assert_released(controller.status(), MotorState::Idle);
}
