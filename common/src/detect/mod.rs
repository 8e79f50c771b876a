pub mod estimator;
pub mod luma;
pub mod result;

use tracing::{debug, warn};

use crate::config::{DetectionConfig, JpegStrategy};
use crate::frame::{Frame, FramePayload};

pub use estimator::{SizeEstimator, SqrtAreaEstimator};
pub use result::{DetectionResult, ObjectRegion};

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("frame size mismatch: expected {expected} bytes ({width}x{height}), got {got}")]
    FrameSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
}

/// Running totals for one comparison pass.
#[derive(Default)]
struct Accumulator {
    count: u32,
    sum_x: u64,
    sum_y: u64,
}

impl Accumulator {
    fn add(&mut self, x: u32, y: u32) {
        self.count += 1;
        self.sum_x += u64::from(x);
        self.sum_y += u64::from(y);
    }

    fn centroid(&self) -> (u32, u32) {
        let n = u64::from(self.count.max(1));
        ((self.sum_x / n) as u32, (self.sum_y / n) as u32)
    }
}

/// Frame-differencing motion detector.
///
/// Owns a single-slot baseline: each call to [`Differencer::process`] takes the
/// new frame by value, compares it against the stored one, and keeps the new
/// frame as the next baseline. The replaced baseline is dropped there.
pub struct Differencer {
    config: DetectionConfig,
    estimator: Box<dyn SizeEstimator>,
    previous: Option<Frame>,
}

impl Differencer {
    pub fn new(config: DetectionConfig) -> Self {
        let estimator = Box::new(SqrtAreaEstimator::new(config.size_factor));
        Self::with_estimator(config, estimator)
    }

    pub fn with_estimator(config: DetectionConfig, estimator: Box<dyn SizeEstimator>) -> Self {
        Self {
            config,
            estimator,
            previous: None,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Compare `current` against the previous frame and keep it as the new
    /// baseline. The first frame only seeds the baseline and reports
    /// `NoObject`.
    ///
    /// A frame that fails to decode leaves the old baseline in place. A frame
    /// whose geometry disagrees with the baseline still replaces it, so the
    /// loop recovers on the next cycle after a resolution change.
    pub fn process(&mut self, current: Frame) -> Result<DetectionResult, DetectError> {
        let current = self.normalize(current)?;
        let result = match self.previous.take() {
            None => {
                debug!(seq = current.seq, "first frame, seeding baseline");
                Ok(DetectionResult::NoObject)
            }
            Some(previous) => self.compare(&previous, &current),
        };
        self.previous = Some(current);
        result
    }

    /// Stateless comparison of two frames.
    pub fn compare(&self, previous: &Frame, current: &Frame) -> Result<DetectionResult, DetectError> {
        match (&previous.payload, &current.payload) {
            (FramePayload::Luma(prev), FramePayload::Luma(cur)) => {
                self.diff_raster(prev, cur, previous, current)
            }
            _ => Ok(self.diff_compressed(previous, current)),
        }
    }

    fn normalize(&self, frame: Frame) -> Result<Frame, DetectError> {
        match (&frame.payload, self.config.jpeg_strategy) {
            (FramePayload::Jpeg(data), JpegStrategy::Decode) => {
                let (luma, width, height) = luma::decode_luma(data)?;
                Ok(Frame::new_luma(luma, width, height, frame.captured_at_ms, frame.seq))
            }
            _ => Ok(frame),
        }
    }

    fn diff_raster(
        &self,
        prev: &[u8],
        cur: &[u8],
        previous: &Frame,
        current: &Frame,
    ) -> Result<DetectionResult, DetectError> {
        let expected = current.raster_len();
        if current.width != previous.width || current.height != previous.height {
            return Err(DetectError::FrameSizeMismatch {
                width: previous.width,
                height: previous.height,
                expected: previous.raster_len(),
                got: cur.len(),
            });
        }
        for len in [prev.len(), cur.len()] {
            if len != expected {
                return Err(DetectError::FrameSizeMismatch {
                    width: current.width,
                    height: current.height,
                    expected,
                    got: len,
                });
            }
        }

        let stride = self.config.raster_stride.max(1) as usize;
        let width = current.width as usize;
        let threshold = self.config.motion_threshold;
        let mut acc = Accumulator::default();

        for y in (0..current.height as usize).step_by(stride) {
            let row = y * width;
            for x in (0..width).step_by(stride) {
                let i = row + x;
                if prev[i].abs_diff(cur[i]) > threshold {
                    acc.add(x as u32, y as u32);
                }
            }
        }

        Ok(self.finish(acc, current.seq))
    }

    /// Byte-stride comparison of compressed payloads.
    ///
    /// Sample positions are mapped onto the raster as if the byte stream were
    /// pixels, which they are not. Payloads of different length cannot be
    /// aligned at all and produce a full-frame detection centred on the
    /// midpoint; that fallback is a known weak behaviour and is logged.
    fn diff_compressed(&self, previous: &Frame, current: &Frame) -> DetectionResult {
        let prev = previous.payload_bytes();
        let cur = current.payload_bytes();
        let stride = self.config.compressed_stride.max(1);

        if prev.len() != cur.len() {
            let samples = cur.len().div_ceil(stride) as u32;
            warn!(
                prev_len = prev.len(),
                cur_len = cur.len(),
                seq = current.seq,
                "compressed frames differ in length, reporting midpoint fallback"
            );
            return DetectionResult::Object(ObjectRegion {
                x: current.width / 2,
                y: current.height / 2,
                width: current.width,
                height: current.height,
                changed_pixels: samples,
            });
        }

        let width = current.width.max(1) as usize;
        let max_y = current.height.saturating_sub(1) as usize;
        let threshold = self.config.motion_threshold;
        let mut acc = Accumulator::default();

        for i in (0..cur.len()).step_by(stride) {
            if prev[i].abs_diff(cur[i]) > threshold {
                acc.add((i % width) as u32, (i / width).min(max_y) as u32);
            }
        }

        self.finish(acc, current.seq)
    }

    fn finish(&self, acc: Accumulator, seq: u64) -> DetectionResult {
        if acc.count <= self.config.min_changed_pixels {
            debug!(
                changed = acc.count,
                min = self.config.min_changed_pixels,
                seq,
                "below change threshold"
            );
            return DetectionResult::NoObject;
        }

        let (x, y) = acc.centroid();
        let (width, height) = self.estimator.estimate(acc.count);
        debug!(
            x,
            y,
            width,
            height,
            changed = acc.count,
            estimator = self.estimator.name(),
            seq,
            "object detected"
        );
        DetectionResult::Object(ObjectRegion {
            x,
            y,
            width,
            height,
            changed_pixels: acc.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{classify, Zone};

    const W: u32 = 320;
    const H: u32 = 240;

    fn blank(value: u8) -> Vec<u8> {
        vec![value; (W * H) as usize]
    }

    fn luma(data: Vec<u8>, seq: u64) -> Frame {
        Frame::new_luma(data, W, H, seq as i64 * 100, seq)
    }

    fn paint(data: &mut [u8], x0: u32, y0: u32, size: u32, value: u8) {
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                data[(y * W + x) as usize] = value;
            }
        }
    }

    /// Change exactly `n` sampled pixels (on the default stride-4 grid).
    fn with_changed_samples(n: u32) -> Vec<u8> {
        let mut data = blank(40);
        let mut placed = 0;
        'outer: for y in (0..H).step_by(4) {
            for x in (0..W).step_by(4) {
                if placed == n {
                    break 'outer;
                }
                data[(y * W + x) as usize] = 200;
                placed += 1;
            }
        }
        data
    }

    #[test]
    fn first_frame_seeds_baseline() {
        let mut diff = Differencer::new(DetectionConfig::default());
        assert!(!diff.has_baseline());
        assert_eq!(diff.process(luma(blank(40), 0)).unwrap(), DetectionResult::NoObject);
        assert!(diff.has_baseline());
    }

    #[test]
    fn identical_frames_are_no_object() {
        let diff = Differencer::new(DetectionConfig::default());
        let mut data = blank(0);
        for (i, p) in data.iter_mut().enumerate() {
            *p = (i % 251) as u8;
        }
        let a = luma(data.clone(), 1);
        let b = luma(data, 2);
        assert_eq!(diff.compare(&a, &b).unwrap(), DetectionResult::NoObject);
    }

    #[test]
    fn change_count_threshold_is_strict() {
        let config = DetectionConfig::default();
        let min = config.min_changed_pixels;
        let diff = Differencer::new(config);
        let base = luma(blank(40), 1);

        let below = luma(with_changed_samples(min - 1), 2);
        assert_eq!(diff.compare(&base, &below).unwrap(), DetectionResult::NoObject);

        let at = luma(with_changed_samples(min), 2);
        assert_eq!(diff.compare(&base, &at).unwrap(), DetectionResult::NoObject);

        let above = luma(with_changed_samples(min + 1), 2);
        let region = *diff.compare(&base, &above).unwrap().object().unwrap();
        assert_eq!(region.changed_pixels, min + 1);
    }

    #[test]
    fn differences_at_threshold_do_not_count() {
        let diff = Differencer::new(DetectionConfig::default());
        let base = luma(blank(100), 1);
        let nudged = luma(blank(130), 2);
        assert_eq!(diff.compare(&base, &nudged).unwrap(), DetectionResult::NoObject);
        let jumped = luma(blank(131), 2);
        assert!(diff.compare(&base, &jumped).unwrap().is_object());
    }

    #[test]
    fn square_near_left_edge_lands_in_left_zone() {
        let mut diff = Differencer::new(DetectionConfig::default());
        let before = blank(40);
        let mut after = blank(40);
        // 24x24 block centred on (85, 120)
        paint(&mut after, 73, 108, 24, 220);

        diff.process(luma(before, 1)).unwrap();
        let result = diff.process(luma(after, 2)).unwrap();
        let region = *result.object().expect("object expected");

        assert!(region.x.abs_diff(85) <= 4, "x = {}", region.x);
        assert!(region.y.abs_diff(120) <= 4, "y = {}", region.y);
        assert_eq!(region.changed_pixels, 36);
        assert_eq!((region.width, region.height), (24, 24));
        assert_eq!(classify(region.x, W), Zone::Left);
    }

    #[test]
    fn raster_size_mismatch_is_error() {
        let mut diff = Differencer::new(DetectionConfig::default());
        diff.process(luma(blank(40), 1)).unwrap();

        let short = Frame::new_luma(vec![40; 100], W, H, 0, 2);
        let err = diff.process(short).unwrap_err();
        assert!(matches!(err, DetectError::FrameSizeMismatch { got: 100, .. }));

        let resized = Frame::new_luma(vec![40; 160 * 120], 160, 120, 0, 3);
        assert!(matches!(
            diff.process(resized),
            Err(DetectError::FrameSizeMismatch { .. })
        ));
        // the resized frame became the baseline
        let again = Frame::new_luma(vec![40; 160 * 120], 160, 120, 0, 4);
        assert_eq!(diff.process(again).unwrap(), DetectionResult::NoObject);
    }

    #[test]
    fn custom_estimator_is_used() {
        struct Fixed;
        impl SizeEstimator for Fixed {
            fn estimate(&self, _changed: u32) -> (u32, u32) {
                (7, 9)
            }
        }

        let diff = Differencer::with_estimator(DetectionConfig::default(), Box::new(Fixed));
        let mut after = blank(40);
        paint(&mut after, 200, 40, 32, 250);
        let result = diff.compare(&luma(blank(40), 1), &luma(after, 2)).unwrap();
        let region = result.object().unwrap();
        assert_eq!((region.width, region.height), (7, 9));
    }

    #[test]
    fn jpeg_frames_are_decoded_before_diffing() {
        let mut diff = Differencer::new(DetectionConfig::default());
        let before = luma::encode_test_jpeg(&blank(40), W, H);
        let mut moved = blank(40);
        paint(&mut moved, 240, 100, 40, 230);
        let after = luma::encode_test_jpeg(&moved, W, H);

        diff.process(Frame::new_jpeg(before, W, H, 0, 1)).unwrap();
        let result = diff.process(Frame::new_jpeg(after, W, H, 100, 2)).unwrap();
        let region = result.object().expect("object expected");
        assert_eq!(classify(region.x, W), Zone::Right);
    }

    #[test]
    fn undecodable_jpeg_keeps_baseline() {
        let mut diff = Differencer::new(DetectionConfig::default());
        diff.process(luma(blank(40), 1)).unwrap();
        let broken = Frame::new_jpeg(vec![0xFF, 0xD8, 0x00], W, H, 0, 2);
        assert!(matches!(diff.process(broken), Err(DetectError::Decode(_))));
        assert_eq!(diff.process(luma(blank(40), 3)).unwrap(), DetectionResult::NoObject);
    }

    #[test]
    fn byte_stride_identical_payloads() {
        let config = DetectionConfig {
            jpeg_strategy: JpegStrategy::ByteStride,
            ..DetectionConfig::default()
        };
        let diff = Differencer::new(config);
        let a = Frame::new_jpeg(vec![0xAB; 5000], W, H, 0, 1);
        let b = Frame::new_jpeg(vec![0xAB; 5000], W, H, 0, 2);
        assert_eq!(diff.compare(&a, &b).unwrap(), DetectionResult::NoObject);
    }

    #[test]
    fn byte_stride_length_mismatch_reports_midpoint() {
        let config = DetectionConfig {
            jpeg_strategy: JpegStrategy::ByteStride,
            ..DetectionConfig::default()
        };
        let diff = Differencer::new(config);
        let a = Frame::new_jpeg(vec![0x11; 4000], W, H, 0, 1);
        let b = Frame::new_jpeg(vec![0x11; 4100], W, H, 0, 2);
        let region = *diff.compare(&a, &b).unwrap().object().unwrap();
        assert_eq!((region.x, region.y), (160, 120));
        assert_eq!((region.width, region.height), (W, H));
        assert_eq!(region.changed_pixels, 410);
    }

    #[test]
    fn byte_stride_counts_sampled_bytes() {
        let config = DetectionConfig {
            jpeg_strategy: JpegStrategy::ByteStride,
            ..DetectionConfig::default()
        };
        let diff = Differencer::new(config);
        let prev = vec![0u8; 3200];
        let mut cur = prev.clone();
        // bytes 0, 10, ..., 250: 26 samples on row 0
        for i in (0..=250).step_by(10) {
            cur[i] = 0xFF;
        }
        let result = diff
            .compare(
                &Frame::new_jpeg(prev, W, H, 0, 1),
                &Frame::new_jpeg(cur, W, H, 0, 2),
            )
            .unwrap();
        let region = result.object().unwrap();
        assert_eq!(region.changed_pixels, 26);
        assert_eq!((region.x, region.y), (125, 0));
    }
}
