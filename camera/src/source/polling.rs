use std::time::Duration;

use binbot_common::frame::Frame;

use super::{jpeg_frame, CaptureError, FrameSource};

/// Fetches one still image per capture, for cameras without a usable stream
/// endpoint.
pub struct PollingSource {
    url: String,
    client: reqwest::Client,
    seq: u64,
}

impl PollingSource {
    pub fn new(url: &str) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(CaptureError::HttpConnect)?;
        Ok(Self {
            url: url.to_string(),
            client,
            seq: 0,
        })
    }
}

impl FrameSource for PollingSource {
    async fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(CaptureError::HttpConnect)?;
        if !resp.status().is_success() {
            return Err(CaptureError::HttpStatus(resp.status().as_u16()));
        }
        let jpeg = resp.bytes().await.map_err(CaptureError::HttpStream)?.to_vec();
        let seq = self.seq;
        self.seq += 1;
        jpeg_frame(jpeg, seq)
    }

    fn name(&self) -> &str {
        "polling"
    }
}

/// Derive the still-image URL from a stream URL, e.g. `/stream` -> `/capture`.
pub fn still_url(stream_url: &str) -> String {
    match stream_url.strip_suffix("/stream") {
        Some(base) => format!("{base}/capture"),
        None => stream_url.to_string(),
    }
}
