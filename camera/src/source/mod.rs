pub mod mjpeg;
pub mod polling;
pub mod synthetic;

use binbot_common::frame::Frame;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("camera stream ended")]
    StreamEnded,
    #[error("unreadable image header: {0}")]
    Header(#[from] image::ImageError),
}

/// Anything that can hand the camera loop its next frame.
#[allow(async_fn_in_trait)]
pub trait FrameSource {
    async fn capture_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Build a JPEG frame, reading its geometry from the image header.
pub(crate) fn jpeg_frame(data: Vec<u8>, seq: u64) -> Result<Frame, CaptureError> {
    let (width, height) = binbot_common::detect::luma::image_dimensions(&data)?;
    let now_ms = chrono::Utc::now().timestamp_millis();
    Ok(Frame::new_jpeg(data, width, height, now_ms, seq))
}
