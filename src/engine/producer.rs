//! Move ISR: block intake, step event production and drain handling.

use core::sync::atomic::Ordering;

use crate::config::constants::{
    BLOCK_QUEUE_SIZE, MAX_PRINT_TIME, MAX_STEP_EVENTS_PER_CALL,
};
use crate::generator::{
    all_reached_end_of_move_queue, generate_next_step_event, reset_reached_end_of_move_queue,
    StepEvent, StepGenerator,
};
use crate::hal::{StepTimer, StepperDriver};
use crate::motion::{
    append_beginning_empty_move, append_block_discarding_move, append_block_segments,
    append_ending_empty_move, StepEventFlags,
};
use crate::planner::MotionBlock;

use super::SteppingEngine;

/// Outcome of one producer pass over the move segment queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepGeneratorStatus {
    /// Step events were produced; the pass used its full budget.
    Ok,
    /// The step event queue has no room for the next event.
    FullStepEventQueue,
    /// No step event could be produced from the queued segments.
    NoStepEventProduced,
}

impl<D, T, G> SteppingEngine<D, T, G>
where
    D: StepperDriver,
    T: StepTimer,
    G: StepGenerator,
{
    /// Move timer interrupt body.
    ///
    /// Produces step events ahead of the dispatcher and advances the
    /// block queue when the generators run dry.
    pub fn move_isr(&mut self) {
        if self.stop_pending.load(Ordering::Relaxed) {
            return;
        }

        let status = self.process_one_move_segment_from_queue();
        match status {
            StepGeneratorStatus::Ok => {
                // enough steps for this tick; yield to keep ISR time bounded
                return;
            }
            StepGeneratorStatus::FullStepEventQueue => {
                // the dispatcher is behind: use the slack to stage a block
                self.process_queue_of_blocks();
                return;
            }
            StepGeneratorStatus::NoStepEventProduced => {}
        }

        // No steps came out, typically because every generator reached the
        // end of the visible move queue. Keep alternating block intake and
        // production so a run of short segments cannot starve the
        // dispatcher. Bounded by the block count plus one so a stuck queue
        // cannot spin forever; the extra iteration lets the ending empty
        // move go in after the last block.
        for _ in 0..=self.planner.moves_planned() {
            self.process_queue_of_blocks();
            if !self.moves.has_unprocessed() {
                break;
            }

            let status = self.process_one_move_segment_from_queue();
            if status != StepGeneratorStatus::NoStepEventProduced {
                break;
            }
        }
    }

    /// Run the merge layer for up to one call budget of step events.
    pub fn process_one_move_segment_from_queue(&mut self) -> StepGeneratorStatus {
        let mut produced = 0usize;

        if self.moves.has_unprocessed() {
            if !self.state.initialized {
                self.init_generator_state();
            }

            // No generator may emit past this horizon: a segment that has
            // not arrived yet could still reshape events inside the
            // lookback window of a shaped generator.
            let flush_time = self.timeline.total_print_time - self.max_lookback_time;

            self.state.restart();

            while produced < MAX_STEP_EVENTS_PER_CALL {
                // keep one slot for flushing the buffered step
                if !self.state.buffered_step.flags.is_empty() && self.step_events.is_full() {
                    return StepGeneratorStatus::FullStepEventQueue;
                }

                let (new_event, done) = generate_next_step_event(
                    &mut self.state,
                    &mut self.generators,
                    &mut self.moves,
                    &self.settings,
                    flush_time,
                );

                if !new_event.flags.is_empty() {
                    self.buffer_step_event(new_event);
                }

                if self.state.left_insert_start_of_move_segment > 0 {
                    self.flush_owed_segment_markers();
                }

                if done {
                    // All axes hit the end of the visible queue. Fall
                    // through to the drain check below.
                    produced = 0;
                    break;
                }
                produced += 1;
            }
        }

        if produced == 0 {
            if let Some(status) = self.drain_at_ending_move() {
                return status;
            }
        }

        if produced == 0 {
            StepGeneratorStatus::NoStepEventProduced
        } else {
            StepGeneratorStatus::Ok
        }
    }

    // Coalesce a produced event into the buffered step or flush the
    // buffer. Simultaneous steps merge only when neither a step bit nor a
    // marker repeats and the direction bits agree; a direction change must
    // be delivered before the step it affects, even on an inactive axis.
    fn buffer_step_event(&mut self, new_event: StepEvent) {
        let buffered = &mut self.state.buffered_step;
        if buffered.flags.is_empty() {
            *buffered = new_event;
        } else if new_event.time_ticks == 0
            && !(buffered.flags & new_event.flags)
                .intersects(StepEventFlags::STEP_MASK | StepEventFlags::MARKER_MASK)
            && ((buffered.flags ^ new_event.flags) & StepEventFlags::DIR_MASK).is_empty()
        {
            buffered.flags |= new_event.flags;
        } else {
            // a free slot was checked before the event was generated
            let pushed = self.step_events.push(*buffered);
            debug_assert!(pushed);
            self.state.buffered_step = new_event;
        }
    }

    // Handle the end of a motion session once the generators sit on the
    // ending empty move: flush the buffered step, pay off the owed
    // segment-boundary markers, then retire the sentinel with a final
    // end-of-motion event.
    fn drain_at_ending_move(&mut self) -> Option<StepGeneratorStatus> {
        let at_ending = self
            .moves
            .current_unprocessed()
            .is_some_and(|segment| segment.is_ending_empty());
        if !at_ending {
            return None;
        }

        if !self.state.buffered_step.flags.is_empty() {
            if !self.step_events.push(self.state.buffered_step) {
                return Some(StepGeneratorStatus::FullStepEventQueue);
            }
            self.state.buffered_step = StepEvent::empty();
        }

        // Marker-only events free already processed move segments on the
        // dispatcher side.
        while self.state.left_insert_start_of_move_segment > 0
            && self.push_move_discarding_step_event(StepEventFlags::EMPTY)
        {
            self.state.left_insert_start_of_move_segment -= 1;
        }

        // The event queue may have filled before every marker went out;
        // retire the sentinel only once the debt is fully paid.
        if self.state.left_insert_start_of_move_segment == 0 && !self.step_events.is_full() {
            self.moves.discard_current_unprocessed();
            let appended = self.push_move_discarding_step_event(StepEventFlags::END_OF_MOTION);
            debug_assert!(appended);
        }

        None
    }

    // Retire markers go out as dedicated zero-tick events as soon as the
    // debt arises, so a segment retire (and a sync block's position
    // anchor with it) dispatches before the next block's first pulse.
    // The buffered step leaves first to keep retire order intact; debt
    // that does not fit the event queue rides piggyback on later step
    // events instead.
    fn flush_owed_segment_markers(&mut self) {
        if !self.state.buffered_step.flags.is_empty() {
            if !self.step_events.push(self.state.buffered_step) {
                return;
            }
            self.state.buffered_step = StepEvent::empty();
        }

        while self.state.left_insert_start_of_move_segment > 0
            && self.push_move_discarding_step_event(StepEventFlags::EMPTY)
        {
            self.state.left_insert_start_of_move_segment -= 1;
        }
    }

    // Zero-tick event carrying only markers and the cached dir/active
    // bits.
    fn push_move_discarding_step_event(&mut self, extra_flags: StepEventFlags) -> bool {
        let event = StepEvent {
            time_ticks: 0,
            flags: self.state.cached_flags()
                | StepEventFlags::BEGINNING_OF_MOVE_SEGMENT
                | extra_flags,
        };
        self.step_events.push(event)
    }

    fn init_generator_state(&mut self) {
        let Some(start) = self.moves.unprocessed_pos() else {
            return;
        };
        debug_assert!(self.moves.segment(start).is_beginning_empty());
        debug_assert!(self.max_lookback_time <= self.moves.segment(start).move_t);

        self.state.clear();
        for generator in self.generators.iter_mut() {
            generator.init(start, &mut self.moves, &mut self.state, &self.settings);
        }
        self.state.initialized = true;
    }

    /// Pull planner blocks into the move segment queue.
    pub fn process_queue_of_blocks(&mut self) {
        if self.is_waiting_before_delivering() {
            return;
        }

        // The ending empty move pushes the timeline past MAX_PRINT_TIME;
        // once everything downstream has drained, return to halt.
        if self.timeline.total_print_time >= MAX_PRINT_TIME {
            if self.planner.has_blocks_queued() || !self.moves.is_empty() {
                return;
            }
            self.reset_from_halt();
        }

        let mut current_block: Option<MotionBlock> = None;
        while let Some(block) = self.planner.current_unprocessed().copied() {
            if block.is_move() {
                current_block = Some(block);
                break;
            }

            // A sync block before any motion sets the counters directly;
            // once motion is staged it has to travel through the pipeline
            // so the counters change at the right point of the pulse
            // train.
            if self.timeline.total_print_time == 0.0 {
                debug_assert!(self.moves.is_empty());
                self.counters.set_position(block.position);
                self.planner.discard_current_unprocessed();
                self.planner.discard_current();
                continue;
            }

            if !append_block_discarding_move(&mut self.moves, &self.timeline) {
                return;
            }
            self.planner.discard_current_unprocessed();
        }

        let Some(block) = current_block else {
            if self.timeline.total_print_time != 0.0
                && all_reached_end_of_move_queue(&self.generators)
            {
                // motion was started and the queue ran dry: end the session
                if append_ending_empty_move(&mut self.moves, &mut self.timeline) {
                    reset_reached_end_of_move_queue(&mut self.generators);
                }
            }
            return;
        };

        if self.timeline.total_print_time == 0.0 {
            // restarting from halt: the warmup sentinel gives lookback
            // generators their left context
            if !append_beginning_empty_move(
                &mut self.moves,
                &mut self.timeline,
                self.max_lookback_time,
            ) {
                return;
            }
            reset_reached_end_of_move_queue(&mut self.generators);
        }

        if append_block_segments(&mut self.moves, &mut self.timeline, &self.settings, &block) {
            self.planner.discard_current_unprocessed();
            reset_reached_end_of_move_queue(&mut self.generators);
        }
    }

    // Delivery gating: honor the planner's delivery delay, and hold off
    // while half the block buffer sits processed-but-unretired unless the
    // generators are already starved.
    fn is_waiting_before_delivering(&mut self) -> bool {
        if self.planner.delay_before_delivering != 0 {
            if self.waiting_before_delivering_since == 0 {
                self.waiting_before_delivering_since = self.timer.now_ms();
                return true;
            } else if self.planner.nonbusy_moves_planned() >= 3
                || self
                    .timer
                    .now_ms()
                    .wrapping_sub(self.waiting_before_delivering_since)
                    >= self.planner.delay_before_delivering
            {
                self.planner.delay_before_delivering = 0;
                self.waiting_before_delivering_since = 0;
            } else {
                return true;
            }
        }

        if self.planner.moves_planned_processed() >= BLOCK_QUEUE_SIZE / 2 {
            // plenty of short blocks await discarding; only push on if the
            // generators cannot make progress without a new block
            return !all_reached_end_of_move_queue(&self.generators);
        }

        false
    }
}
