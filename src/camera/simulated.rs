// src/camera/simulated.rs - Synthetic preview source for rigs without a sensor
use super::{CaptureError, FrameHub};
use crate::config::CameraConfig;
use crate::motion::SharedStatus;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;

const JPEG_QUALITY: u8 = 80;
const STRIPE_PERIOD: i64 = 64;
const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

/// Publishes grayscale JPEG frames whose stripe pattern shifts with the
/// rail position, plus a little sensor noise.
pub struct SimulatedCamera {
    config: CameraConfig,
    status: SharedStatus,
    hub: FrameHub,
}

impl SimulatedCamera {
    pub fn new(config: CameraConfig, status: SharedStatus, hub: FrameHub) -> Self {
        Self { config, status, hub }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let period = Duration::try_from_secs_f64(1.0 / self.config.frame_rate)
            .unwrap_or(MIN_FRAME_PERIOD)
            .max(MIN_FRAME_PERIOD);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            "Simulated camera streaming {}x{} at {} fps",
            self.config.width,
            self.config.height,
            self.config.frame_rate
        );
        loop {
            ticker.tick().await;
            let position = self.status.snapshot().position;
            let (width, height) = (self.config.width, self.config.height);
            let rendered =
                tokio::task::spawn_blocking(move || render_frame(width, height, position)).await;
            match rendered {
                Ok(Ok(frame)) => self.hub.publish(frame),
                Ok(Err(e)) => tracing::warn!("Simulated frame failed: {}", e),
                Err(e) => {
                    tracing::error!("Simulated camera render task failed: {}", e);
                    break;
                }
            }
        }
    }
}

pub fn render_frame(width: u32, height: u32, position: i64) -> Result<Vec<u8>, CaptureError> {
    let mut rng = rand::rng();
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for _y in 0..height {
        for x in 0..width {
            let phase = (x as i64 + position).rem_euclid(STRIPE_PERIOD);
            let base: u8 = if phase < STRIPE_PERIOD / 2 { 200 } else { 40 };
            pixels.push(base.saturating_add(rng.random_range(0..16)));
        }
    }
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(&pixels, width, height, ColorType::L8)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(out)
}
