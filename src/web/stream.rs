//! MJPEG live preview over `multipart/x-mixed-replace`.

use crate::camera::FrameHub;
use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_core::Stream;
use std::convert::Infallible;

pub const BOUNDARY: &str = "FRAME";

/// Logs when a preview client goes away. The stream state owns it, so it
/// drops exactly when axum drops the body.
struct ClientGuard;

impl ClientGuard {
    fn new() -> Self {
        tracing::info!("Preview client connected");
        ClientGuard
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        tracing::info!("Preview client disconnected");
    }
}

/// One multipart section holding a JPEG frame.
pub fn frame_part(frame: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(frame.len() + 96);
    part.extend_from_slice(
        format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            BOUNDARY,
            frame.len()
        )
        .as_bytes(),
    );
    part.extend_from_slice(frame);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Yields a part for the current frame (if any) and then one per newly
/// published frame. Ends when the hub is closed.
pub fn mjpeg_stream(hub: FrameHub) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let mut frames = hub.subscribe();
    async_stream::stream! {
        let _guard = ClientGuard::new();
        frames.mark_changed();
        while frames.changed().await.is_ok() {
            if hub.is_closed() {
                break;
            }
            let frame = frames.borrow_and_update().clone();
            if let Some(frame) = frame {
                yield Ok(frame_part(&frame));
            }
        }
    }
}

pub fn mjpeg_response(hub: FrameHub) -> Response {
    let content_type = format!("multipart/x-mixed-replace; boundary={}", BOUNDARY);
    (
        [
            (header::AGE, "0".to_string()),
            (header::CACHE_CONTROL, "no-cache, private".to_string()),
            (header::PRAGMA, "no-cache".to_string()),
            (header::CONTENT_TYPE, content_type),
        ],
        Body::from_stream(mjpeg_stream(hub)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{pin_mut, StreamExt};

    #[test]
    fn test_frame_part_layout() {
        let part = frame_part(b"abc");
        assert_eq!(
            &part[..],
            b"--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n"
        );
    }

    #[tokio::test]
    async fn test_stream_follows_published_frames() {
        let hub = FrameHub::new();
        hub.publish(&b"first"[..]);
        let stream = mjpeg_stream(hub.clone());
        pin_mut!(stream);

        let part = stream.next().await.unwrap().unwrap();
        assert!(part.ends_with(b"first\r\n"));

        hub.publish(&b"second"[..]);
        let part = stream.next().await.unwrap().unwrap();
        assert!(part.ends_with(b"second\r\n"));
    }

    #[tokio::test]
    async fn test_stream_ends_when_hub_is_closed() {
        let hub = FrameHub::new();
        hub.publish(&b"frame"[..]);
        let stream = mjpeg_stream(hub.clone());
        pin_mut!(stream);
        assert!(stream.next().await.is_some());
        hub.close();
        assert!(stream.next().await.is_none());
    }
}
