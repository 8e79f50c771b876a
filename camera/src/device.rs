use std::time::Duration;

use binbot_common::config::Config;
use binbot_common::detect::{DetectionResult, Differencer};
use binbot_common::link::Connector;
use binbot_common::protocol::{encode, encode_image, Message, CHUNK_SIZE};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Captured,
    CaptureFailed,
}

/// Camera-side loop body: capture, detect, report.
pub struct CameraDevice<S> {
    source: S,
    differencer: Option<Differencer>,
    stream_every: u64,
    captured: u64,
}

impl<S: FrameSource> CameraDevice<S> {
    pub fn new(source: S, config: &Config) -> Self {
        let differencer = config
            .camera
            .detect
            .then(|| Differencer::new(config.detection.clone()));
        Self {
            source,
            differencer,
            stream_every: config.camera.stream_every,
            captured: 0,
        }
    }

    /// Frames captured successfully so far.
    pub fn captured(&self) -> u64 {
        self.captured
    }

    pub async fn announce<W: AsyncWrite + Unpin>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&encode(&Message::CameraReady)).await?;
        out.flush().await
    }

    /// One capture/detect/report cycle. Only write failures on `out` are
    /// returned as errors; capture and detection failures are reported on
    /// the link as `ERROR:` lines.
    pub async fn run_cycle<W: AsyncWrite + Unpin>(
        &mut self,
        out: &mut W,
    ) -> std::io::Result<CycleOutcome> {
        let frame = match self.source.capture_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, source = self.source.name(), "camera capture failed");
                let msg = Message::Error(format!("Camera capture failed: {e}"));
                out.write_all(&encode(&msg)).await?;
                out.flush().await?;
                return Ok(CycleOutcome::CaptureFailed);
            }
        };
        self.captured += 1;

        let image = (self.stream_every > 0 && self.captured % self.stream_every == 0)
            .then(|| encode_image(frame.payload_bytes(), frame.width, frame.height, CHUNK_SIZE));

        let mut buf = Vec::new();
        if let Some(differencer) = self.differencer.as_mut() {
            let seq = frame.seq;
            match differencer.process(frame) {
                Ok(result) => {
                    if let DetectionResult::Object(region) = &result {
                        debug!(seq, x = region.x, y = region.y, changed = region.changed_pixels, "object detected");
                    }
                    buf.extend(encode(&Message::Detection(result)));
                }
                Err(e) => {
                    warn!(error = %e, seq, "detection failed");
                    buf.extend(encode(&Message::Error(format!("Detection failed: {e}"))));
                }
            }
        }
        if let Some(image) = image {
            buf.extend(image);
        }

        if !buf.is_empty() {
            out.write_all(&buf).await?;
            out.flush().await?;
        }
        Ok(CycleOutcome::Captured)
    }
}

/// Announce readiness then run cycles at `period` until `max_frames` frames
/// have been captured. Returns `Err` when the link stops accepting writes.
pub async fn serve<S: FrameSource, W: AsyncWrite + Unpin>(
    device: &mut CameraDevice<S>,
    out: &mut W,
    period: Duration,
    max_frames: Option<u64>,
) -> std::io::Result<()> {
    device.announce(out).await?;

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    loop {
        if max_frames.is_some_and(|max| device.captured() >= max) {
            return Ok(());
        }
        ticker.tick().await;
        match device.run_cycle(out).await? {
            CycleOutcome::Captured => backoff = Duration::from_secs(2),
            CycleOutcome::CaptureFailed => {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }
}

/// Serve the camera over `connector`, reopening the link whenever it drops.
pub async fn run<S: FrameSource>(
    mut device: CameraDevice<S>,
    mut connector: Connector,
    period: Duration,
    max_frames: Option<u64>,
) {
    loop {
        let mut link = connector.connect_with_backoff().await;
        match serve(&mut device, &mut link.writer, period, max_frames).await {
            Ok(()) => {
                info!(frames = device.captured(), "frame limit reached, stopping");
                return;
            }
            Err(e) => warn!(error = %e, peer = link.peer, "camera link lost, reconnecting"),
        }
    }
}

/// Capture period for a frame rate, floored at one frame every 10 s.
pub fn frame_period(fps: f64) -> Duration {
    if fps.is_finite() && fps > 0.1 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        Duration::from_secs(10)
    }
}
