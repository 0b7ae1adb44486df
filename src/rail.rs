// src/rail.rs - The focus rail context: controller, burst sequencer and post-processing
use crate::burst::{
    BurstError, BurstPlan, BurstReport, BurstSequencer, BurstStore, PostProcessor, StackingJob,
    DEFAULT_MAX_IMAGES,
};
use crate::burst::BurstOutcome;
use crate::camera::{CaptureSink, FrameCapture, FrameHub};
use crate::config::Config;
use crate::hardware::HardwareBackend;
use crate::motion::{MotionError, MotionLimits, MotorController, MotorStatus, MoveParams};
use axum::http::StatusCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum RailError {
    #[error(transparent)]
    Motion(#[from] MotionError),
    #[error(transparent)]
    Burst(#[from] BurstError),
    #[error("Motion executor is not running")]
    ExecutorUnavailable,
}

impl RailError {
    /// How the control surface should report this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RailError::Motion(e) | RailError::Burst(BurstError::Motion(e)) => match e {
                MotionError::Busy | MotionError::EmergencyStopped => StatusCode::CONFLICT,
                MotionError::Profile(_) | MotionError::LimitExceeded { .. } => StatusCode::BAD_REQUEST,
                MotionError::ForeignLease | MotionError::Hardware(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            RailError::Burst(BurstError::InvalidPlan(_)) => StatusCode::BAD_REQUEST,
            RailError::Burst(BurstError::Storage(_)) | RailError::ExecutorUnavailable => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// A relative jog; missing rates fall back to the configured defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JogCommand {
    pub delta: i64,
    pub speed_hz: Option<f64>,
    pub acceleration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstCommand {
    pub start: i64,
    pub end: i64,
    pub image_count: usize,
    pub speed_hz: Option<f64>,
    pub acceleration: Option<f64>,
}

/// Shared context handed to every component and request handler.
#[derive(Clone)]
pub struct FocusRail {
    controller: MotorController,
    sequencer: Arc<BurstSequencer>,
    post_processor: Option<Arc<dyn PostProcessor>>,
    defaults: MoveParams,
    max_images: usize,
    last_burst: Arc<Mutex<Option<BurstReport>>>,
}

impl FocusRail {
    pub fn new(
        controller: MotorController,
        sequencer: BurstSequencer,
        post_processor: Option<Arc<dyn PostProcessor>>,
        defaults: MoveParams,
    ) -> Self {
        Self {
            controller,
            sequencer: Arc::new(sequencer),
            post_processor,
            defaults,
            max_images: DEFAULT_MAX_IMAGES,
            last_burst: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = max_images;
        self
    }

    /// Wire the controller, frame capture and stacking job from configuration.
    /// The backend must already be initialized.
    pub fn from_config(config: &Config, backend: Arc<dyn HardwareBackend>, frames: FrameHub) -> Self {
        let controller = MotorController::new(backend, MotionLimits::from(&config.motor));
        let frame_period =
            Duration::try_from_secs_f64(1.0 / config.camera.frame_rate).unwrap_or(Duration::ZERO);
        let sink: Arc<dyn CaptureSink> =
            Arc::new(FrameCapture::new(frames).with_fresh_frame_timeout(frame_period.saturating_mul(2)));
        let sequencer = BurstSequencer::new(
            controller.clone(),
            BurstStore::new(&config.burst.output_dir),
            sink,
            config.burst.settle_delay(),
        )
        .with_max_duration(config.burst.max_duration());
        let post_processor = StackingJob::from_config(&config.stacking)
            .map(|job| Arc::new(job) as Arc<dyn PostProcessor>);
        let defaults = MoveParams::new(config.motor.default_speed_hz, config.motor.default_acceleration);
        Self::new(controller, sequencer, post_processor, defaults)
            .with_max_images(config.burst.max_images)
    }

    pub fn controller(&self) -> &MotorController {
        &self.controller
    }

    pub fn status(&self) -> MotorStatus {
        self.controller.status()
    }

    pub fn emergency_stop(&self) -> MotorStatus {
        self.controller.emergency_stop();
        self.controller.status()
    }

    pub fn clear_emergency_stop(&self) -> Result<MotorStatus, RailError> {
        Ok(self.controller.clear_emergency_stop()?)
    }

    pub fn set_zero(&self) -> Result<MotorStatus, RailError> {
        Ok(self.controller.set_zero()?)
    }

    pub fn last_burst(&self) -> Option<BurstReport> {
        self.last_burst.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn params(&self, speed_hz: Option<f64>, acceleration: Option<f64>) -> MoveParams {
        MoveParams::new(
            speed_hz.unwrap_or(self.defaults.speed_hz),
            acceleration.unwrap_or(self.defaults.acceleration),
        )
    }

    /// Admit a jog and run it on a blocking thread. Returns the status as of
    /// admission (state Moving, target set).
    pub fn jog(&self, command: JogCommand) -> Result<MotorStatus, RailError> {
        let params = self.params(command.speed_hz, command.acceleration);
        let pending = self.controller.start_relative(command.delta, params)?;
        let accepted = pending.accepted_status();
        let task = tokio::task::spawn_blocking(move || pending.run());
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("Jog failed: {}", e),
                Err(e) => tracing::error!("Jog task panicked: {}", e),
            }
        });
        Ok(accepted)
    }

    /// Admit a burst and run it in the background. Returns the status as of
    /// admission (state Bursting).
    pub fn start_burst(&self, command: BurstCommand) -> Result<MotorStatus, RailError> {
        let params = self.params(command.speed_hz, command.acceleration);
        let plan = BurstPlan::with_max_images(
            command.start,
            command.end,
            command.image_count,
            params,
            self.max_images,
        )?;
        let lease = self.sequencer.begin(&plan)?;
        let accepted = self.controller.status();

        let sequencer = self.sequencer.clone();
        let post_processor = self.post_processor.clone();
        let last_burst = self.last_burst.clone();
        let task = tokio::task::spawn_blocking(move || sequencer.run(&plan, lease));
        tokio::spawn(async move {
            let report = match task.await {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    tracing::error!("Burst could not start: {}", e);
                    return;
                }
                Err(e) => {
                    tracing::error!("Burst task panicked: {}", e);
                    return;
                }
            };
            *last_burst.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
            if report.outcome != BurstOutcome::Completed {
                return;
            }
            if let Some(post) = post_processor {
                if let Err(e) = post.process(&report.directory).await {
                    tracing::warn!("Focus stacking of {} failed: {}", report.directory.display(), e);
                }
            }
        });
        Ok(accepted)
    }
}

/// Commands that admit motion. Emergency stop and status reads do not go
/// through the executor so they are never queued behind one of these.
#[derive(Debug)]
pub enum RailRequest {
    Jog {
        command: JogCommand,
        respond_to: oneshot::Sender<Result<MotorStatus, RailError>>,
    },
    SetZero {
        respond_to: oneshot::Sender<Result<MotorStatus, RailError>>,
    },
    ClearStop {
        respond_to: oneshot::Sender<Result<MotorStatus, RailError>>,
    },
    Burst {
        command: BurstCommand,
        respond_to: oneshot::Sender<Result<MotorStatus, RailError>>,
    },
}

/// Start the motion executor: one task that admits motion commands in
/// arrival order. Admission never waits for a move to finish.
pub fn spawn_executor(rail: FocusRail, capacity: usize) -> (mpsc::Sender<RailRequest>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<RailRequest>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match request {
                RailRequest::Jog { command, respond_to } => {
                    let _ = respond_to.send(rail.jog(command));
                }
                RailRequest::SetZero { respond_to } => {
                    let _ = respond_to.send(rail.set_zero());
                }
                RailRequest::ClearStop { respond_to } => {
                    let _ = respond_to.send(rail.clear_emergency_stop());
                }
                RailRequest::Burst { command, respond_to } => {
                    let _ = respond_to.send(rail.start_burst(command));
                }
            }
        }
        tracing::info!("Motion executor stopped");
    });
    (tx, handle)
}

impl std::fmt::Debug for FocusRail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusRail")
            .field("controller", &self.controller)
            .field("defaults", &self.defaults)
            .field("max_images", &self.max_images)
            .field("stacking", &self.post_processor.is_some())
            .finish()
    }
}
