use serde::Serialize;

/// Outcome of comparing two consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetectionResult {
    NoObject,
    Object(ObjectRegion),
}

/// Heuristic location and extent of whatever changed between two frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObjectRegion {
    /// Centroid column of the changed samples.
    pub x: u32,
    /// Centroid row of the changed samples.
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of sampled pixels whose difference exceeded the threshold.
    pub changed_pixels: u32,
}

impl DetectionResult {
    pub fn object(&self) -> Option<&ObjectRegion> {
        match self {
            DetectionResult::Object(region) => Some(region),
            DetectionResult::NoObject => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, DetectionResult::Object(_))
    }
}
