/// Turns a changed-sample count into an approximate object extent.
///
/// The differencer only knows how many samples changed, not their shape, so
/// any width/height it reports comes from one of these.
pub trait SizeEstimator: Send + Sync {
    /// Returns `(width, height)` in pixels.
    fn estimate(&self, changed_pixels: u32) -> (u32, u32);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Square side of `sqrt(changed_pixels) * factor`.
///
/// Heuristic only: it treats the changed samples as a filled square and
/// scales by the sampling stride. It has no physical basis.
pub struct SqrtAreaEstimator {
    factor: f64,
}

impl SqrtAreaEstimator {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl SizeEstimator for SqrtAreaEstimator {
    fn estimate(&self, changed_pixels: u32) -> (u32, u32) {
        let side = (f64::from(changed_pixels).sqrt() * self.factor).round() as u32;
        (side, side)
    }

    fn name(&self) -> &str {
        "sqrt_area"
    }
}
