//! Closed-form step generator without lookahead.

use libm::sqrt;

use crate::config::constants::EPSILON_TIME;
use crate::config::{Axis, EngineSettings, Kinematics};
use crate::motion::{MoveFlags, MoveSegment, MoveSegmentQueue, StepEventFlags};

use super::event::StepEventInfo;
use super::merge::{move_segment_processed, StepGeneratorState};
use super::StepGenerator;

/// Step generator that inverts the segment's kinematic equation directly.
///
/// Projects the segment's motion onto its axis (the CoreXY A/B
/// combination on belt machines) and solves
/// `start_pos + v*t + (a/2)*t^2 = target` for the next half-step
/// crossing.
#[derive(Debug, Clone)]
pub struct ClassicStepGenerator {
    axis: Axis,
    current_move: usize,
    start_v: f64,
    accel: f64,
    start_pos: f64,
    step_dir: bool,
    reached_end_of_move_queue: bool,
}

fn axis_r(segment: &MoveSegment, axis: Axis, kinematics: Kinematics) -> f64 {
    match (kinematics, axis) {
        (Kinematics::CoreXy, Axis::X) => segment.axes_r[0] + segment.axes_r[1],
        (Kinematics::CoreXy, Axis::Y) => segment.axes_r[0] - segment.axes_r[1],
        _ => segment.axes_r[axis.index()],
    }
}

fn axis_start_pos(segment: &MoveSegment, axis: Axis, kinematics: Kinematics) -> f64 {
    match (kinematics, axis) {
        (Kinematics::CoreXy, Axis::X) => segment.start_pos[0] + segment.start_pos[1],
        (Kinematics::CoreXy, Axis::Y) => segment.start_pos[0] - segment.start_pos[1],
        _ => segment.start_pos[axis.index()],
    }
}

/// Time to travel `dist` from velocity `start_v` under acceleration
/// `accel`, taking the first crossing in the direction of travel.
///
/// Returns NaN when the distance is never reached (deceleration runs out
/// of velocity first, or the target lies behind the motion). A crossing
/// displaced to a tiny negative time by rounding is clamped to zero.
fn time_for_distance(start_v: f64, accel: f64, dist: f64, step_dir: bool) -> f64 {
    let t = if accel == 0.0 {
        if start_v == 0.0 {
            return f64::NAN;
        }
        dist / start_v
    } else {
        let disc = start_v * start_v + 2.0 * accel * dist;
        if disc < 0.0 {
            return f64::NAN;
        }
        let root = sqrt(disc);
        if step_dir {
            (-start_v + root) / accel
        } else {
            (-start_v - root) / accel
        }
    };
    if t >= 0.0 {
        t
    } else if t >= -EPSILON_TIME {
        0.0
    } else {
        f64::NAN
    }
}

impl ClassicStepGenerator {
    fn update(&mut self, queue: &MoveSegmentQueue, settings: &EngineSettings) {
        let segment = queue.segment(self.current_move);
        let axis_r = axis_r(segment, self.axis, settings.kinematics);

        if axis_r == 0.0 {
            self.start_v = 0.0;
            self.accel = 0.0;
        } else {
            self.start_v = segment.start_v * axis_r;
            self.accel = 2.0 * segment.half_accel * axis_r;
        }

        self.start_pos = axis_start_pos(segment, self.axis, settings.kinematics);

        let corexy_belt =
            settings.kinematics == Kinematics::CoreXy && matches!(self.axis, Axis::X | Axis::Y);
        self.step_dir = if corexy_belt {
            self.start_v >= 0.0
        } else {
            segment.step_dir(self.axis)
        };
    }
}

impl StepGenerator for ClassicStepGenerator {
    fn for_axis(axis: Axis) -> Self {
        Self {
            axis,
            current_move: 0,
            start_v: 0.0,
            accel: 0.0,
            start_pos: 0.0,
            step_dir: true,
            reached_end_of_move_queue: false,
        }
    }

    fn init(
        &mut self,
        start: usize,
        queue: &mut MoveSegmentQueue,
        state: &mut StepGeneratorState,
        settings: &EngineSettings,
    ) {
        self.current_move = start;
        self.reached_end_of_move_queue = false;
        queue.ref_inc(start);

        let flags = queue.segment(start).flags;
        state.set_axis_direction(self.axis, flags.step_dir(self.axis));
        state.set_axis_active(self.axis, flags.contains(MoveFlags::active(self.axis)));

        self.update(queue, settings);
    }

    fn next_step(
        &mut self,
        queue: &mut MoveSegmentQueue,
        state: &mut StepGeneratorState,
        settings: &EngineSettings,
        flush_time: f64,
    ) -> StepEventInfo {
        let axis = self.axis;
        let mut next_step_event = StepEventInfo::none();

        loop {
            let half_step = settings.mm_per_half_step[axis.index()];
            let current_distance =
                state.current_distance(axis) as f64 * settings.mm_per_step[axis.index()];
            let next_target =
                current_distance + if self.step_dir { half_step } else { -half_step };
            let next_distance = next_target - self.start_pos;
            let step_time = time_for_distance(self.start_v, self.accel, next_distance, self.step_dir);

            let segment = queue.segment(self.current_move);

            // A NaN step time means the target is never reached on this
            // segment (deceleration runs the velocity out first). Test
            // against the segment duration before the flush horizon.
            if step_time.is_nan() || step_time > segment.move_t + EPSILON_TIME {
                let Some(next) = queue.next_after(self.current_move) else {
                    self.reached_end_of_move_queue = true;
                    break;
                };
                queue.ref_dec(self.current_move);
                self.current_move = next;
                queue.ref_inc(next);

                self.update(queue, settings);

                // Direction and active bits are cached in the merge state
                // until this segment is processed.
                state.set_axis_direction(axis, self.step_dir);
                let active = queue
                    .segment(next)
                    .flags
                    .contains(MoveFlags::active(axis));
                state.set_axis_active(axis, active);

                move_segment_processed(queue, state);
                continue;
            }

            let elapsed_time = segment.print_time + step_time;
            if elapsed_time > flush_time {
                self.reached_end_of_move_queue = true;
                break;
            }

            next_step_event.time = elapsed_time;
            next_step_event.flags = StepEventFlags::step(axis) | state.cached_flags();
            state.advance_distance(axis, self.step_dir);
            break;
        }

        next_step_event
    }

    fn reached_end_of_move_queue(&self) -> bool {
        self.reached_end_of_move_queue
    }

    fn clear_reached_end_of_move_queue(&mut self) {
        self.reached_end_of_move_queue = false;
    }
}
