//! Camera-side collaborators: the live preview frame hub and the capture
//! sink the burst sequencer writes images through.

pub mod simulated;

pub use simulated::SimulatedCamera;

use axum::body::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No frame available from camera")]
    NoFrame,
    #[error("Frame encoding failed: {0}")]
    Encode(String),
}

/// Persists one frame to the given path.
pub trait CaptureSink: Send + Sync {
    fn capture(&self, path: &Path) -> Result<(), CaptureError>;
}

/// Latest encoded preview frame, shared between the camera and any number
/// of stream clients.
#[derive(Debug, Clone)]
pub struct FrameHub {
    tx: Arc<watch::Sender<Option<Bytes>>>,
    closed: Arc<AtomicBool>,
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHub {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx), closed: Arc::new(AtomicBool::new(false)) }
    }

    pub fn publish(&self, frame: impl Into<Bytes>) {
        self.tx.send_replace(Some(frame.into()));
    }

    pub fn latest(&self) -> Option<Bytes> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Bytes>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Ends every open preview stream. Frames published afterwards are
    /// still available to capture.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tx.send_modify(|_| {});
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

const FRESH_FRAME_POLL: Duration = Duration::from_millis(2);

/// Writes preview frames to disk.
///
/// With a non-zero `fresh_timeout` the capture waits for a frame published
/// after the call, so the image reflects the settled position; on timeout
/// it falls back to the latest frame.
#[derive(Debug, Clone)]
pub struct FrameCapture {
    hub: FrameHub,
    fresh_timeout: Duration,
}

impl FrameCapture {
    pub fn new(hub: FrameHub) -> Self {
        Self { hub, fresh_timeout: Duration::ZERO }
    }

    pub fn with_fresh_frame_timeout(mut self, timeout: Duration) -> Self {
        self.fresh_timeout = timeout;
        self
    }
}

impl CaptureSink for FrameCapture {
    fn capture(&self, path: &Path) -> Result<(), CaptureError> {
        let mut rx = self.hub.subscribe();
        rx.mark_unchanged();
        if !self.fresh_timeout.is_zero() {
            let deadline = Instant::now() + self.fresh_timeout;
            while !rx.has_changed().unwrap_or(false) {
                if Instant::now() >= deadline {
                    tracing::debug!("No fresh frame within {:?}; using latest", self.fresh_timeout);
                    break;
                }
                std::thread::sleep(FRESH_FRAME_POLL);
            }
        }
        let frame = rx.borrow().clone().ok_or(CaptureError::NoFrame)?;
        std::fs::write(path, &frame)?;
        tracing::debug!("Captured {} bytes to {}", frame.len(), path.display());
        Ok(())
    }
}
