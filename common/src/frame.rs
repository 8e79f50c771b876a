const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// The pixel data carried inside a frame: raw 8-bit luma or a JPEG stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// Row-major grayscale samples, `width * height` bytes.
    Luma(Vec<u8>),
    /// Compressed JPEG bytes as produced by the camera module.
    Jpeg(Vec<u8>),
}

/// One captured image with its geometry and capture metadata.
///
/// A frame is owned by exactly one pipeline stage at a time. The camera loop
/// hands it to the differencer by value, which keeps it as the next cycle's
/// baseline and drops the one it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: FramePayload,
    pub width: u32,
    pub height: u32,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new_luma(data: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: FramePayload::Luma(data),
            width,
            height,
            captured_at_ms,
            seq,
        }
    }

    pub fn new_jpeg(data: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: FramePayload::Jpeg(data),
            width,
            height,
            captured_at_ms,
            seq,
        }
    }

    /// Build a frame from an image payload received over the wire, telling
    /// JPEG apart from raw luma by the SOI marker.
    pub fn from_wire(data: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        if data.starts_with(&JPEG_SOI) {
            Self::new_jpeg(data, width, height, captured_at_ms, seq)
        } else {
            Self::new_luma(data, width, height, captured_at_ms, seq)
        }
    }

    pub fn luma_data(&self) -> Option<&[u8]> {
        match &self.payload {
            FramePayload::Luma(data) => Some(data),
            _ => None,
        }
    }

    pub fn jpeg_data(&self) -> Option<&[u8]> {
        match &self.payload {
            FramePayload::Jpeg(data) => Some(data),
            _ => None,
        }
    }

    pub fn payload_size(&self) -> usize {
        self.payload_bytes().len()
    }

    pub fn payload_bytes(&self) -> &[u8] {
        match &self.payload {
            FramePayload::Luma(data) => data,
            FramePayload::Jpeg(data) => data,
        }
    }

    /// Expected byte length of a raw luma raster with this frame's geometry.
    pub fn raster_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// File name for a saved snapshot, e.g. `20260218T093000000Z_000007.jpg`.
    pub fn snapshot_name(&self) -> String {
        let dt = chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        let ts = dt.format("%Y%m%dT%H%M%S%3fZ");
        let ext = match &self.payload {
            FramePayload::Jpeg(_) => "jpg",
            FramePayload::Luma(_) => "png",
        };
        format!("{ts}_{seq:06}.{ext}", seq = self.seq)
    }
}
