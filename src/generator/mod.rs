//! Per-axis step generators and the multi-axis merge layer.
//!
//! A step generator walks the move segment queue for one axis and
//! produces the axis's next half-step crossing as an absolute time. The
//! merge layer keeps one pending crossing per axis, always emits the
//! earliest, and converts it into a tick-domain [`StepEvent`].

mod classic;
mod event;
mod merge;

pub use classic::ClassicStepGenerator;
pub use event::{StepEvent, StepEventInfo, StepEventQueue};
pub use merge::{move_segment_processed, StepGeneratorState};

pub(crate) use merge::generate_next_step_event;

use crate::config::{Axis, EngineSettings, NUM_AXES};
use crate::motion::MoveSegmentQueue;

/// The contract every per-axis step generator implements.
///
/// Shaped and pressure-advance generators conform to the same interface;
/// they differ only in how much segment context around the current print
/// time they read. A generator owns its queue position via an index and
/// the segment's reference count; both are handed over when it advances
/// to the next segment.
pub trait StepGenerator {
    /// Create an unattached generator for an axis.
    fn for_axis(axis: Axis) -> Self
    where
        Self: Sized;

    /// Attach to the segment at queue position `start`, incrementing its
    /// reference count and publishing the axis's direction and active
    /// bits into the merge state.
    fn init(
        &mut self,
        start: usize,
        queue: &mut MoveSegmentQueue,
        state: &mut StepGeneratorState,
        settings: &EngineSettings,
    );

    /// Produce the next step on this axis strictly after the previous
    /// one, with absolute time at most `flush_time`.
    ///
    /// Advances through segments as needed (handing reference counts
    /// over and calling [`move_segment_processed`]). Returns an event
    /// with infinite time when no crossing is reachable from the
    /// currently queued segments, and marks itself as having reached the
    /// end of the move queue.
    fn next_step(
        &mut self,
        queue: &mut MoveSegmentQueue,
        state: &mut StepGeneratorState,
        settings: &EngineSettings,
        flush_time: f64,
    ) -> StepEventInfo;

    /// True once the generator has run out of queued segments.
    fn reached_end_of_move_queue(&self) -> bool;

    /// Clear the end-of-queue indication after new segments arrive.
    fn clear_reached_end_of_move_queue(&mut self);
}

/// True when every axis generator has run out of queued segments.
pub(crate) fn all_reached_end_of_move_queue<G: StepGenerator>(
    generators: &[G; NUM_AXES],
) -> bool {
    generators.iter().all(|g| g.reached_end_of_move_queue())
}

/// Clear the end-of-queue indication on every axis generator.
pub(crate) fn reset_reached_end_of_move_queue<G: StepGenerator>(generators: &mut [G; NUM_AXES]) {
    for generator in generators.iter_mut() {
        generator.clear_reached_end_of_move_queue();
    }
}
