use binbot_common::frame::Frame;

use super::{CaptureError, FrameSource};

const BACKGROUND: u8 = 40;
const FOREGROUND: u8 = 220;
const SQUARE: u32 = 24;

/// Generates luma frames of a bright square sliding back and forth across a
/// flat background. Stands in for the camera module in demos and tests.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    /// Horizontal step per frame in pixels; 0 gives a static scene.
    speed: u32,
    x: u32,
    moving_right: bool,
    seq: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, speed: u32) -> Self {
        Self {
            width: width.max(SQUARE),
            height: height.max(SQUARE),
            speed,
            x: 0,
            moving_right: true,
            seq: 0,
        }
    }

    /// Left edge of the square in the next frame.
    pub fn square_x(&self) -> u32 {
        self.x
    }

    fn render(&self) -> Vec<u8> {
        let mut data = vec![BACKGROUND; (self.width * self.height) as usize];
        let y0 = (self.height - SQUARE) / 2;
        for y in y0..y0 + SQUARE {
            let row = (y * self.width) as usize;
            let start = row + self.x as usize;
            data[start..start + SQUARE as usize].fill(FOREGROUND);
        }
        data
    }

    fn advance(&mut self) {
        let max_x = self.width - SQUARE;
        if self.moving_right {
            self.x = (self.x + self.speed).min(max_x);
            if self.x == max_x {
                self.moving_right = false;
            }
        } else {
            self.x = self.x.saturating_sub(self.speed);
            if self.x == 0 {
                self.moving_right = true;
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    async fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let data = self.render();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let frame = Frame::new_luma(data, self.width, self.height, now_ms, self.seq);
        self.seq += 1;
        self.advance();
        Ok(frame)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_have_raster_geometry() {
        let mut source = SyntheticSource::new(320, 240, 8);
        let frame = source.capture_frame().await.unwrap();
        assert_eq!(frame.luma_data().unwrap().len(), 320 * 240);
        assert_eq!(frame.seq, 0);
        assert_eq!(source.capture_frame().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn square_bounces_between_edges() {
        let mut source = SyntheticSource::new(100, 50, 30);
        let mut positions = Vec::new();
        for _ in 0..6 {
            positions.push(source.square_x());
            source.capture_frame().await.unwrap();
        }
        assert_eq!(positions, vec![0, 30, 60, 76, 46, 16]);
    }

    #[tokio::test]
    async fn zero_speed_is_static() {
        let mut source = SyntheticSource::new(64, 48, 0);
        let a = source.capture_frame().await.unwrap();
        let b = source.capture_frame().await.unwrap();
        assert_eq!(a.payload, b.payload);
    }
}
