//! Multi-axis merge state and ordered event production.

use libm::round;

use crate::config::{Axis, EngineSettings, NUM_AXES};
use crate::motion::{MoveSegmentQueue, StepEventFlags};

use super::event::{StepEvent, StepEventInfo};
use super::StepGenerator;

/// Shared state of the four per-axis generators and the merge layer.
///
/// `step_events` holds the pending crossing of every axis;
/// `step_event_index` is kept sorted so that index 0 names the axis with
/// the earliest crossing. A slot at time zero has not been computed yet;
/// a slot at infinity has no crossing for the current queue contents.
#[derive(Debug)]
pub struct StepGeneratorState {
    pub(crate) flags: StepEventFlags,
    pub(crate) step_events: [StepEventInfo; NUM_AXES],
    pub(crate) step_event_index: [usize; NUM_AXES],
    pub(crate) previous_step_time: f64,
    pub(crate) current_distance: [i32; NUM_AXES],
    pub(crate) left_insert_start_of_move_segment: u32,
    pub(crate) buffered_step: StepEvent,
    pub(crate) initialized: bool,
    pub(crate) nonmonotonic_clamps: u32,
}

impl Default for StepGeneratorState {
    fn default() -> Self {
        Self::new()
    }
}

impl StepGeneratorState {
    /// Create a cleared, uninitialized merge state.
    pub fn new() -> Self {
        Self {
            flags: StepEventFlags::EMPTY,
            step_events: [StepEventInfo {
                time: 0.0,
                flags: StepEventFlags::EMPTY,
            }; NUM_AXES],
            step_event_index: [0, 1, 2, 3],
            previous_step_time: 0.0,
            current_distance: [0; NUM_AXES],
            left_insert_start_of_move_segment: 0,
            buffered_step: StepEvent::empty(),
            initialized: false,
            nonmonotonic_clamps: 0,
        }
    }

    /// Reset to the uninitialized state. The clamp counter survives.
    pub fn clear(&mut self) {
        let nonmonotonic_clamps = self.nonmonotonic_clamps;
        *self = Self::new();
        self.nonmonotonic_clamps = nonmonotonic_clamps;
    }

    /// Integer step position of an axis on the session timeline.
    #[inline]
    pub fn current_distance(&self, axis: Axis) -> i32 {
        self.current_distance[axis.index()]
    }

    /// Record a step taken on an axis.
    #[inline]
    pub fn advance_distance(&mut self, axis: Axis, step_dir: bool) {
        self.current_distance[axis.index()] += if step_dir { 1 } else { -1 };
    }

    /// The cached per-axis direction and active bits.
    #[inline]
    pub fn cached_flags(&self) -> StepEventFlags {
        self.flags
    }

    /// Cache an axis direction (true = toward positive coordinates).
    #[inline]
    pub fn set_axis_direction(&mut self, axis: Axis, step_dir: bool) {
        self.flags.remove(StepEventFlags::dir(axis));
        if !step_dir {
            self.flags |= StepEventFlags::dir(axis);
        }
    }

    /// Cache whether an axis is active on its current segment.
    #[inline]
    pub fn set_axis_active(&mut self, axis: Axis, active: bool) {
        self.flags.remove(StepEventFlags::active(axis));
        if active {
            self.flags |= StepEventFlags::active(axis);
        }
    }

    /// Times the tolerant path clamped a negative tick delta to zero.
    #[inline]
    pub fn nonmonotonic_clamps(&self) -> u32 {
        self.nonmonotonic_clamps
    }

    /// Ask every axis that previously ran out of queue for a fresh event
    /// on the next merge pass.
    ///
    /// Slots at infinity are rewound to the not-yet-computed sentinel;
    /// they sort ahead of real events, so idle axes are re-polled before
    /// any further production. Without this an inactive axis would keep
    /// a stale reference into the segment queue while an active axis
    /// produces, and never advance.
    pub(crate) fn restart(&mut self) {
        for slot in self.step_events.iter_mut() {
            if slot.time == f64::INFINITY {
                slot.time = 0.0;
                slot.flags = StepEventFlags::EMPTY;
            }
        }
        self.sort_event_index();
    }

    // Selection sort of the 4-element index by event time.
    pub(crate) fn sort_event_index(&mut self) {
        for i in 0..NUM_AXES - 1 {
            let mut min = i;
            for j in i + 1..NUM_AXES {
                if self.step_events[self.step_event_index[j]].time
                    < self.step_events[self.step_event_index[min]].time
                {
                    min = j;
                }
            }
            self.step_event_index.swap(i, min);
        }
    }
}

/// Hand a fully processed segment back to the queue.
///
/// Generators call this after advancing; once the oldest unprocessed
/// segment is no longer referenced it is retired from the generator
/// cursor and one segment-boundary marker becomes owed to the event
/// stream.
pub fn move_segment_processed(queue: &mut MoveSegmentQueue, state: &mut StepGeneratorState) {
    if let Some(pos) = queue.unprocessed_pos() {
        if queue.reference_cnt(pos) == 0 {
            queue.discard_current_unprocessed();
            state.left_insert_start_of_move_segment += 1;
        }
    }
}

/// Emit the earliest pending crossing as a tick-domain event and refill
/// that axis's slot.
///
/// Returns the event (flags empty when nothing was emitted) and `true`
/// when every axis has reached the end of the visible move queue.
pub(crate) fn generate_next_step_event<G: StepGenerator>(
    state: &mut StepGeneratorState,
    generators: &mut [G; NUM_AXES],
    queue: &mut MoveSegmentQueue,
    settings: &EngineSettings,
    flush_time: f64,
) -> (StepEvent, bool) {
    let nearest = state.step_event_index[0];
    let nearest_time = state.step_events[nearest].time;
    let mut step_event = StepEvent::empty();

    // A zero slot has not been filled yet and an infinite slot has
    // nothing to offer; both only request a refill below.
    if nearest_time != 0.0 && nearest_time != f64::INFINITY {
        let mut relative = nearest_time - state.previous_step_time;
        if relative < 0.0 {
            // Rounding in lookback generators may displace an event by a
            // sub-tick amount. Anything larger is a real ordering bug.
            debug_assert!(relative >= -1e-9, "negative step time: {}", relative);
            state.nonmonotonic_clamps = state.nonmonotonic_clamps.saturating_add(1);
            relative = 0.0;
        }

        step_event.time_ticks = round(relative * settings.ticks_per_sec) as i32;
        step_event.flags = state.step_events[nearest].flags;
        debug_assert!(!step_event.flags.is_empty());

        if state.left_insert_start_of_move_segment > 0 {
            step_event.flags |= StepEventFlags::BEGINNING_OF_MOVE_SEGMENT;
            state.left_insert_start_of_move_segment -= 1;
        }

        state.previous_step_time = nearest_time;
    }

    let refilled = generators[nearest].next_step(queue, state, settings, flush_time);
    state.step_events[nearest] = refilled;
    state.sort_event_index();

    let done = state.step_events[state.step_event_index[0]].time == f64::INFINITY;
    (step_event, done)
}
