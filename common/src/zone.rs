use serde::Serialize;

use crate::command::Command;

/// One of three equal-width vertical bands of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Zone {
    Left,
    Center,
    Right,
}

impl Zone {
    pub fn command(self) -> Command {
        match self {
            Zone::Left => Command::MoveLeft,
            Zone::Center => Command::Stop,
            Zone::Right => Command::MoveRight,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Zone::Left => "left",
            Zone::Center => "center",
            Zone::Right => "right",
        }
    }
}

/// Map a centroid column into a zone.
///
/// `[0, frame_width)` is split into thirds using exact rational boundaries:
/// `x` belongs to band `floor(3x / frame_width)`, so each boundary column goes
/// to the band on its right. Columns at or past `frame_width` clamp to
/// `Right`; a zero-width frame has no bands and reports `Center`.
pub fn classify(x: u32, frame_width: u32) -> Zone {
    if frame_width == 0 {
        return Zone::Center;
    }
    let band = (u64::from(x) * 3) / u64::from(frame_width);
    match band {
        0 => Zone::Left,
        1 => Zone::Center,
        _ => Zone::Right,
    }
}

/// Undo a horizontally mirrored camera before classification.
pub fn mirror_x(x: u32, frame_width: u32) -> u32 {
    frame_width.saturating_sub(1).saturating_sub(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_column_maps_to_exactly_one_zone() {
        for width in [1u32, 2, 3, 7, 160, 320, 321, 640] {
            let mut last = Zone::Left;
            let mut counts = [0u32; 3];
            for x in 0..width {
                let zone = classify(x, width);
                assert_eq!(zone, classify(x, width));
                // bands never go backwards
                assert!(rank(zone) >= rank(last), "width={width} x={x}");
                last = zone;
                counts[rank(zone)] += 1;
            }
            assert_eq!(counts.iter().sum::<u32>(), width);
        }
    }

    #[test]
    fn boundaries_for_320() {
        assert_eq!(classify(0, 320), Zone::Left);
        assert_eq!(classify(106, 320), Zone::Left);
        assert_eq!(classify(107, 320), Zone::Center);
        assert_eq!(classify(213, 320), Zone::Center);
        assert_eq!(classify(214, 320), Zone::Right);
        assert_eq!(classify(319, 320), Zone::Right);
    }

    #[test]
    fn boundary_is_low_inclusive_when_width_divides() {
        assert_eq!(classify(99, 300), Zone::Left);
        assert_eq!(classify(100, 300), Zone::Center);
        assert_eq!(classify(199, 300), Zone::Center);
        assert_eq!(classify(200, 300), Zone::Right);
    }

    #[test]
    fn out_of_range_and_degenerate_widths() {
        assert_eq!(classify(500, 320), Zone::Right);
        assert_eq!(classify(0, 0), Zone::Center);
    }

    #[test]
    fn zones_map_to_commands() {
        assert_eq!(Zone::Left.command(), Command::MoveLeft);
        assert_eq!(Zone::Center.command(), Command::Stop);
        assert_eq!(Zone::Right.command(), Command::MoveRight);
    }

    #[test]
    fn mirror_swaps_sides() {
        assert_eq!(mirror_x(0, 320), 319);
        assert_eq!(mirror_x(319, 320), 0);
        assert_eq!(classify(mirror_x(10, 320), 320), Zone::Right);
    }

    fn rank(zone: Zone) -> usize {
        match zone {
            Zone::Left => 0,
            Zone::Center => 1,
            Zone::Right => 2,
        }
    }
}
