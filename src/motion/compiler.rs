//! Decomposition of planner blocks into move segments.
//!
//! A trapezoidal block becomes up to three segments. The block's position
//! contribution is accumulated in integer steps and the float start
//! position is recomputed from that integer total, so the timeline cannot
//! drift over long prints.

use libm::sqrt;

use crate::config::constants::{
    EPSILON_DISTANCE, MAX_PRINT_TIME, MOVE_SEGMENT_QUEUE_MIN_FREE_SLOTS,
};
use crate::config::{EngineSettings, NUM_AXES};
use crate::planner::MotionBlock;

use super::flags::{MoveFlags, DIR_SHIFT};
use super::queue::MoveSegmentQueue;
use super::segment::MoveSegment;

/// Accumulated state of the virtual timeline.
#[derive(Debug, Clone)]
pub(crate) struct Timeline {
    /// End time of the last queued segment in seconds.
    pub total_print_time: f64,
    /// Start position of the next block in mm, per axis.
    pub total_start_pos: [f64; NUM_AXES],
    /// Start position of the next block in steps, per axis. Authoritative.
    pub total_start_pos_steps: [i32; NUM_AXES],
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            total_print_time: 0.0,
            total_start_pos: [0.0; NUM_AXES],
            total_start_pos_steps: [0; NUM_AXES],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

// Derived from S = v0*t + (a/2)*t^2 by substituting t = (v - v0)/a.
fn velocity_after_acceleration(start_v: f64, accel: f64, dist: f64) -> f64 {
    sqrt(2.0 * dist * accel + start_v * start_v)
}

fn accel_distance(start_v: f64, cruise_v: f64, accel: f64) -> f64 {
    (cruise_v * cruise_v - start_v * start_v) / (2.0 * accel)
}

fn accel_distance_clamped(start_v: f64, cruise_v: f64, accel: f64) -> f64 {
    let dist = accel_distance(start_v, cruise_v, accel);
    if dist < EPSILON_DISTANCE {
        0.0
    } else {
        dist
    }
}

// Acceleration distance of a trapezoid with no cruise phase, from
// S = vs*tA + (a/2)*tA^2 + ve*tD + (a/2)*tD^2 with tA = (vc - vs)/a and
// tD = (vc - ve)/a.
fn decel_onset_distance(start_v: f64, end_v: f64, accel: f64, dist: f64) -> f64 {
    (2.0 * dist * accel + end_v * end_v - start_v * start_v) / (4.0 * accel)
}

fn decel_onset_distance_clamped(start_v: f64, end_v: f64, accel: f64, dist: f64) -> f64 {
    let dist_out = decel_onset_distance(start_v, end_v, accel, dist);
    if dist_out <= EPSILON_DISTANCE {
        0.0
    } else if dist_out > dist - EPSILON_DISTANCE {
        dist
    } else {
        dist_out
    }
}

fn end_position(start_pos: [f64; NUM_AXES], axes_r: [f64; NUM_AXES], dist: f64) -> [f64; NUM_AXES] {
    let mut out = start_pos;
    for i in 0..NUM_AXES {
        out[i] += axes_r[i] * dist;
    }
    out
}

fn active_axis_flags(block: &MotionBlock) -> MoveFlags {
    let mut flags = MoveFlags::EMPTY;
    for (i, axis) in crate::config::Axis::ALL.iter().enumerate() {
        if block.steps[i] > 0 {
            flags |= MoveFlags::active(*axis);
        }
    }
    flags
}

fn axes_r_from_block(block: &MotionBlock, settings: &EngineSettings) -> [f64; NUM_AXES] {
    let millimeters_inv = 1.0 / block.millimeters;
    let mut axes_r = [0.0; NUM_AXES];
    for i in 0..NUM_AXES {
        if block.steps[i] == 0 {
            continue;
        }
        axes_r[i] = block.steps[i] as f64 * millimeters_inv * settings.mm_per_step[i];
        if block.direction_bits & (1 << i) != 0 {
            axes_r[i] = -axes_r[i];
        }
    }
    axes_r
}

fn oriented_steps(block: &MotionBlock) -> [i32; NUM_AXES] {
    let mut steps = [0i32; NUM_AXES];
    for i in 0..NUM_AXES {
        let sign = if block.direction_bits & (1 << i) != 0 {
            -1
        } else {
            1
        };
        steps[i] = block.steps[i] as i32 * sign;
    }
    steps
}

/// Split a block into trapezoid phases and append them to the queue.
///
/// Returns `false` without side effects when the queue cannot take the
/// segments plus the reserved sentinel slots; the caller retries on a
/// later tick.
pub(crate) fn append_block_segments(
    queue: &mut MoveSegmentQueue,
    timeline: &mut Timeline,
    settings: &EngineSettings,
    block: &MotionBlock,
) -> bool {
    let mut print_time = timeline.total_print_time;
    let mut start_pos = timeline.total_start_pos;

    let millimeters = block.millimeters;
    let accel = block.acceleration;
    let start_v = block.initial_speed;
    let end_v = block.final_speed;
    let mut cruise_v = block.nominal_speed;

    let mut accel_dist = accel_distance_clamped(start_v, cruise_v, accel);
    let mut decel_dist = accel_distance_clamped(end_v, cruise_v, accel);
    let mut cruise_dist = millimeters - accel_dist - decel_dist;

    if cruise_dist < EPSILON_DISTANCE {
        // No room for a cruise phase; recompute the trapezoid as
        // accelerate-then-decelerate with a reduced peak velocity.
        accel_dist = decel_onset_distance_clamped(start_v, end_v, accel, millimeters);
        decel_dist = (millimeters - accel_dist).max(0.0);
        cruise_dist = 0.0;

        cruise_v = velocity_after_acceleration(start_v, accel, accel_dist);
    }

    let segments_required = (accel_dist != 0.0) as usize
        + (cruise_dist != 0.0) as usize
        + (decel_dist != 0.0) as usize;
    if queue.free_slots() < segments_required + MOVE_SEGMENT_QUEUE_MIN_FREE_SLOTS {
        return false;
    }

    let active = active_axis_flags(block);
    let dir = MoveFlags::from_bits(((block.direction_bits & 0x0F) as u16) << DIR_SHIFT);
    let axes_r = axes_r_from_block(block, settings);
    let half_accel = 0.5 * accel;

    if accel_dist != 0.0 {
        let accel_t = (cruise_v - start_v) / accel;
        let mut flags = MoveFlags::ACCELERATION_PHASE | MoveFlags::FIRST_OF_BLOCK | dir | active;
        if cruise_dist == 0.0 && decel_dist == 0.0 {
            flags |= MoveFlags::LAST_OF_BLOCK;
        }
        let pushed = queue.push(MoveSegment {
            move_t: accel_t,
            start_v,
            half_accel,
            print_time,
            axes_r,
            start_pos,
            flags,
            reference_cnt: 0,
        });
        debug_assert!(pushed.is_some());
        print_time += accel_t;
        start_pos = end_position(start_pos, axes_r, accel_dist);
    }

    if cruise_dist != 0.0 {
        let cruise_t = cruise_dist / cruise_v;
        let mut flags = MoveFlags::CRUISE_PHASE | dir | active;
        if accel_dist == 0.0 {
            flags |= MoveFlags::FIRST_OF_BLOCK;
        }
        if decel_dist == 0.0 {
            flags |= MoveFlags::LAST_OF_BLOCK;
        }
        let pushed = queue.push(MoveSegment {
            move_t: cruise_t,
            start_v: cruise_v,
            half_accel: 0.0,
            print_time,
            axes_r,
            start_pos,
            flags,
            reference_cnt: 0,
        });
        debug_assert!(pushed.is_some());
        print_time += cruise_t;
        start_pos = end_position(start_pos, axes_r, cruise_dist);
    }

    if decel_dist != 0.0 {
        let mut flags = MoveFlags::DECELERATION_PHASE | MoveFlags::LAST_OF_BLOCK | dir | active;
        if accel_dist == 0.0 && cruise_dist == 0.0 {
            flags |= MoveFlags::FIRST_OF_BLOCK;
        }
        let decel_t = (cruise_v - end_v) / accel;
        let pushed = queue.push(MoveSegment {
            move_t: decel_t,
            start_v: cruise_v,
            half_accel: -half_accel,
            print_time,
            axes_r,
            start_pos,
            flags,
            reference_cnt: 0,
        });
        debug_assert!(pushed.is_some());
        print_time += decel_t;
    }

    let steps = oriented_steps(block);
    for i in 0..NUM_AXES {
        timeline.total_start_pos_steps[i] += steps[i];
        timeline.total_start_pos[i] =
            timeline.total_start_pos_steps[i] as f64 * settings.mm_per_step[i];
    }
    timeline.total_print_time = print_time;
    true
}

/// Append the warmup sentinel that precedes the first motion segment.
///
/// Its duration exceeds the lookback window by 1 ms so that generators
/// with left context never read before the start of the timeline.
pub(crate) fn append_beginning_empty_move(
    queue: &mut MoveSegmentQueue,
    timeline: &mut Timeline,
    max_lookback_time: f64,
) -> bool {
    debug_assert_eq!(timeline.total_print_time, 0.0);
    let segment = MoveSegment {
        move_t: max_lookback_time + 0.001,
        start_pos: timeline.total_start_pos,
        flags: MoveFlags::BEGINNING_EMPTY,
        ..MoveSegment::default()
    };
    if queue.push(segment).is_none() {
        return false;
    }
    timeline.total_print_time = segment.move_t;
    true
}

/// Append the drain sentinel that ends a motion session.
pub(crate) fn append_ending_empty_move(
    queue: &mut MoveSegmentQueue,
    timeline: &mut Timeline,
) -> bool {
    let segment = MoveSegment {
        move_t: MAX_PRINT_TIME,
        print_time: timeline.total_print_time,
        start_pos: timeline.total_start_pos,
        flags: MoveFlags::ENDING_EMPTY,
        ..MoveSegment::default()
    };
    if queue.push(segment).is_none() {
        return false;
    }
    timeline.total_print_time = segment.end_time();
    true
}

/// Append a zero-duration segment that only retires a planner block.
///
/// Used for sync blocks that arrive while motion is in flight: the block
/// is discarded by the step ISR when the matching segment-boundary event
/// is dispatched.
pub(crate) fn append_block_discarding_move(
    queue: &mut MoveSegmentQueue,
    timeline: &Timeline,
) -> bool {
    let segment = MoveSegment {
        print_time: timeline.total_print_time,
        start_pos: timeline.total_start_pos,
        flags: MoveFlags::FIRST_OF_BLOCK | MoveFlags::LAST_OF_BLOCK,
        ..MoveSegment::default()
    };
    queue.push(segment).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn settings() -> EngineSettings {
        let mut config = EngineConfig::default();
        config.axes.x.steps_per_mm = 80.0;
        config.axes.y.steps_per_mm = 80.0;
        EngineSettings::from_config(&config)
    }

    fn drain(queue: &mut MoveSegmentQueue) -> Vec<MoveSegment> {
        let mut out = Vec::new();
        while let Some(seg) = queue.current_unprocessed().copied() {
            out.push(seg);
            queue.discard_current_unprocessed();
        }
        out
    }

    #[test]
    fn test_triangle_block() {
        // 10 mm from rest to rest cannot reach 200 mm/s: pure triangle
        let settings = settings();
        let mut queue = MoveSegmentQueue::new();
        let mut timeline = Timeline::new();
        let block = MotionBlock::linear([800, 0, 0, 0], 10.0, 1000.0, 0.0, 200.0, 0.0);

        assert!(append_block_segments(&mut queue, &mut timeline, &settings, &block));
        let segments = drain(&mut queue);
        assert_eq!(segments.len(), 2);

        let accel = &segments[0];
        let decel = &segments[1];
        assert!(accel.flags.contains(MoveFlags::ACCELERATION_PHASE | MoveFlags::FIRST_OF_BLOCK));
        assert!(decel.flags.contains(MoveFlags::DECELERATION_PHASE | MoveFlags::LAST_OF_BLOCK));

        // peak velocity sqrt(10 * 1000) = 100 mm/s, 0.1 s per ramp
        assert!((decel.start_v - 100.0).abs() < 1e-9);
        assert!((accel.move_t - 0.1).abs() < 1e-9);
        assert!((timeline.total_print_time - 0.2).abs() < 1e-9);
        assert_eq!(timeline.total_start_pos_steps[0], 800);
        assert!((timeline.total_start_pos[0] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_trapezoid_block() {
        // 100 mm at 200 mm/s: 20 mm ramps with a 60 mm cruise
        let settings = settings();
        let mut queue = MoveSegmentQueue::new();
        let mut timeline = Timeline::new();
        let block = MotionBlock::linear([8000, 0, 0, 0], 100.0, 1000.0, 0.0, 200.0, 0.0);

        assert!(append_block_segments(&mut queue, &mut timeline, &settings, &block));
        let segments = drain(&mut queue);
        assert_eq!(segments.len(), 3);

        assert!((segments[0].move_t - 0.2).abs() < 1e-9);
        assert!((segments[1].move_t - 0.3).abs() < 1e-9);
        assert!((segments[2].move_t - 0.2).abs() < 1e-9);
        assert!(segments[1].flags.contains(MoveFlags::CRUISE_PHASE));
        assert!(!segments[1].flags.intersects(MoveFlags::FIRST_OF_BLOCK | MoveFlags::LAST_OF_BLOCK));

        // print_time chains phase to phase
        assert!((segments[1].print_time - segments[0].end_time()).abs() < 1e-12);
        assert!((segments[2].print_time - segments[1].end_time()).abs() < 1e-12);

        // cruise start position sits at the end of the ramp
        assert!((segments[1].start_pos[0] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_direction_flags() {
        let settings = settings();
        let mut queue = MoveSegmentQueue::new();
        let mut timeline = Timeline::new();
        let block = MotionBlock::linear([-800, 0, 0, 0], 10.0, 1000.0, 0.0, 100.0, 0.0);

        assert!(append_block_segments(&mut queue, &mut timeline, &settings, &block));
        let segments = drain(&mut queue);

        for seg in &segments {
            assert!(seg.flags.contains(MoveFlags::dir(crate::config::Axis::X)));
            assert!(seg.axes_r[0] < 0.0);
        }
        assert_eq!(timeline.total_start_pos_steps[0], -800);
        assert!((timeline.total_start_pos[0] + 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_backpressure_reserves_sentinel_slots() {
        let settings = settings();
        let mut queue = MoveSegmentQueue::new();
        let mut timeline = Timeline::new();
        let block = MotionBlock::linear([8000, 0, 0, 0], 100.0, 1000.0, 0.0, 200.0, 0.0);

        // fill until the reserve stops us; nothing may be partially pushed
        let mut appended = 0;
        while append_block_segments(&mut queue, &mut timeline, &settings, &block) {
            appended += 1;
        }
        assert!(appended > 0);
        assert!(queue.free_slots() >= MOVE_SEGMENT_QUEUE_MIN_FREE_SLOTS);
    }

    #[test]
    fn test_sentinels() {
        let mut queue = MoveSegmentQueue::new();
        let mut timeline = Timeline::new();

        assert!(append_beginning_empty_move(&mut queue, &mut timeline, 0.0));
        assert!((timeline.total_print_time - 0.001).abs() < 1e-12);
        assert!(queue.current_unprocessed().unwrap().is_beginning_empty());

        assert!(append_ending_empty_move(&mut queue, &mut timeline));
        assert!(timeline.total_print_time >= MAX_PRINT_TIME);
    }
}
