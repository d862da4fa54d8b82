//! A single time-domain move segment.

use crate::config::{Axis, NUM_AXES};

use super::flags::MoveFlags;

/// One phase of a planner block (or a sentinel) in the time domain.
///
/// Position along the segment follows
/// `start_pos + axes_r * (start_v * t + half_accel * t^2)` for
/// `t in [0, move_t]`. `axes_r` is a unit direction vector for motion
/// segments and zero for sentinels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveSegment {
    /// Segment duration in seconds.
    pub move_t: f64,
    /// Velocity at segment start in mm/s.
    pub start_v: f64,
    /// Half of the signed acceleration in mm/s^2.
    pub half_accel: f64,
    /// Absolute start time on the virtual timeline in seconds.
    pub print_time: f64,
    /// Signed unit-direction component per axis.
    pub axes_r: [f64; NUM_AXES],
    /// Absolute start position per axis in mm.
    pub start_pos: [f64; NUM_AXES],
    /// Phase, direction, active-axis and sentinel flags.
    pub flags: MoveFlags,
    /// Number of step generators currently attached to this segment.
    pub(crate) reference_cnt: u8,
}

impl Default for MoveSegment {
    fn default() -> Self {
        Self {
            move_t: 0.0,
            start_v: 0.0,
            half_accel: 0.0,
            print_time: 0.0,
            axes_r: [0.0; NUM_AXES],
            start_pos: [0.0; NUM_AXES],
            flags: MoveFlags::EMPTY,
            reference_cnt: 0,
        }
    }
}

impl MoveSegment {
    /// Distance travelled along the motion vector after `t` seconds.
    #[inline]
    pub fn distance_at(&self, t: f64) -> f64 {
        (self.start_v + self.half_accel * t) * t
    }

    /// Absolute end time of the segment.
    #[inline]
    pub fn end_time(&self) -> f64 {
        self.print_time + self.move_t
    }

    /// True when the axis travels toward positive coordinates.
    #[inline]
    pub fn step_dir(&self, axis: Axis) -> bool {
        self.flags.step_dir(axis)
    }

    /// True for the warmup sentinel.
    #[inline]
    pub fn is_beginning_empty(&self) -> bool {
        self.flags.contains(MoveFlags::BEGINNING_EMPTY)
    }

    /// True for the drain sentinel.
    #[inline]
    pub fn is_ending_empty(&self) -> bool {
        self.flags.contains(MoveFlags::ENDING_EMPTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_at() {
        let seg = MoveSegment {
            move_t: 2.0,
            start_v: 1.0,
            half_accel: 0.5,
            ..MoveSegment::default()
        };
        assert_eq!(seg.distance_at(0.0), 0.0);
        assert_eq!(seg.distance_at(1.0), 1.5);
        assert_eq!(seg.distance_at(2.0), 4.0);
    }
}
