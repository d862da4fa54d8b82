//! Step ISR: event dispatch, pin driving and compare rescheduling.
//!
//! Everything in this module runs in the highest-priority interrupt
//! context and uses integer arithmetic only.

use core::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use crate::config::{Axis, NUM_AXES};
use crate::generator::StepGenerator;
use crate::hal::{StepTimer, StepperDriver};
use crate::motion::{MoveFlags, StepEventFlags};

use super::{saturating_inc, SteppingEngine};

// Fuse threshold: events closer than this are delivered by spinning
// instead of rescheduling (ticks).
const MIN_DELAY: u32 = 6;
// Minimum margin when re-arming the compare channel (ticks).
const MIN_RESERVE: u32 = 5;
// Cap on one scheduling interval, for 16-bit wrap detection (ticks).
const MAX_TICKS: u32 = (u16::MAX / 2) as u32;
// Cap on events dispatched per ISR entry, to bound latency.
const MAX_STEPS: u8 = 4;

/// Dispatcher-side position and pin-state bookkeeping.
#[derive(Debug)]
pub(crate) struct StepCounters {
    /// Direction bits currently applied to the pins (bit = axis index,
    /// set = negative travel).
    pub last_direction_bits: u8,
    /// Step increment per axis, derived from the direction bits.
    pub count_direction: [i8; NUM_AXES],
    /// Authoritative step position, re-anchored by sync blocks.
    pub count_position: [AtomicI32; NUM_AXES],
    /// Step position since construction; never re-anchored.
    pub count_position_from_startup: [AtomicI32; NUM_AXES],
    /// Snapshot of `count_position` when the last block retired.
    pub count_position_last_block: [i32; NUM_AXES],
    /// Axes moved by the most recent event.
    pub axis_did_move: AtomicU8,
}

impl StepCounters {
    pub fn new() -> Self {
        const ZERO: AtomicI32 = AtomicI32::new(0);
        Self {
            last_direction_bits: 0,
            count_direction: [1; NUM_AXES],
            count_position: [ZERO; NUM_AXES],
            count_position_from_startup: [ZERO; NUM_AXES],
            count_position_last_block: [0; NUM_AXES],
            axis_did_move: AtomicU8::new(0),
        }
    }

    pub fn set_position(&mut self, position: [i32; NUM_AXES]) {
        for i in 0..NUM_AXES {
            self.count_position[i].store(position[i], Ordering::Relaxed);
        }
    }

    pub fn position(&self) -> [i32; NUM_AXES] {
        let mut out = [0; NUM_AXES];
        for i in 0..NUM_AXES {
            out[i] = self.count_position[i].load(Ordering::Relaxed);
        }
        out
    }

    pub fn position_from_startup(&self) -> [i32; NUM_AXES] {
        let mut out = [0; NUM_AXES];
        for i in 0..NUM_AXES {
            out[i] = self.count_position_from_startup[i].load(Ordering::Relaxed);
        }
        out
    }

    pub fn snapshot_last_block(&mut self) {
        self.count_position_last_block = self.position();
    }

    pub fn axis_did_move(&self) -> u8 {
        self.axis_did_move.load(Ordering::Relaxed)
    }

    pub fn clear_axis_did_move(&self) {
        self.axis_did_move.store(0, Ordering::Relaxed);
    }
}

impl<D, T, G> SteppingEngine<D, T, G>
where
    D: StepperDriver,
    T: StepTimer,
    G: StepGenerator,
{
    /// Step timer compare interrupt body.
    ///
    /// Dispatches due events, fuses events too close together for an
    /// interrupt round-trip by spinning, and re-arms the compare channel
    /// with a bounded deadline slip.
    pub fn step_isr(&mut self) {
        let mut time_increment: u32 = 0;
        let mut steps: u8 = 0;

        while steps != MAX_STEPS {
            if self.stop_pending.load(Ordering::Relaxed) {
                time_increment = self.settings.stepper_isr_period_in_ticks;
                self.counters.clear_axis_did_move();
                break;
            }

            if self.left_ticks_to_next_step_event == 0 {
                self.left_ticks_to_next_step_event = self.process_one_step_event_from_queue();
                steps += 1;
            }

            // limit the interval to avoid a counter overflow or runout
            let ticks_to_next_step_event = self.left_ticks_to_next_step_event.min(MAX_TICKS);
            self.left_ticks_to_next_step_event -= ticks_to_next_step_event;

            time_increment += ticks_to_next_step_event;
            if ticks_to_next_step_event > MIN_DELAY || steps >= MAX_STEPS {
                break;
            }

            // the next step is too close for a new isr but still within
            // margin, spin-wait for accurate delivery
            if self.left_ticks_to_next_step_event > 0 {
                self.timer.delay_ticks(self.left_ticks_to_next_step_event);
            }
        }

        let compare = self.timer.compare() as u32;
        let mut next = compare.wrapping_add(time_increment);
        let deadline = (self.timer.counter() as u32).wrapping_add(MIN_RESERVE);
        if next.wrapping_sub(deadline) & 0xFFFF > MAX_TICKS {
            // next isr too close or missed: reschedule
            next = (self.timer.counter() as u32).wrapping_add(MIN_RESERVE);
            saturating_inc(&self.step_dl_miss);
        }
        self.timer.set_compare(next as u16);
    }

    /// Dispatch the event at the head of the queue.
    ///
    /// Returns the tick delay until the following event, or the idle
    /// period when the queue is empty.
    pub(crate) fn process_one_step_event_from_queue(&mut self) -> u32 {
        let mut ticks_to_next_isr = self.settings.stepper_isr_period_in_ticks;

        let Some(event) = self.step_events.front().copied() else {
            // the step event queue drained or ended
            self.counters.clear_axis_did_move();
            return ticks_to_next_isr;
        };
        let flags = event.flags;

        if flags.contains(StepEventFlags::BEGINNING_OF_MOVE_SEGMENT) {
            // a new move segment starts here: retire the previous one,
            // and its planner block when it was the block's last segment
            let retired_last_of_block = self
                .moves
                .current()
                .map(|segment| segment.flags.contains(MoveFlags::LAST_OF_BLOCK));
            if let Some(last_of_block) = retired_last_of_block {
                if last_of_block {
                    if let Some(block) = self.planner.current_processed().copied() {
                        if block.sync_position {
                            self.counters.set_position(block.position);
                        }
                        self.planner.discard_current();
                    }
                    self.counters.snapshot_last_block();
                }
                self.moves.discard_current();
            }
        }

        self.step_events.pop();

        self.counters
            .axis_did_move
            .store(flags.active_bits(), Ordering::Relaxed);

        // Direction pins only change on actual direction flips.
        let direction_bits = flags.dir_bits();
        let changed_dir_bits = direction_bits ^ self.counters.last_direction_bits;
        if changed_dir_bits != 0 {
            self.counters.last_direction_bits = direction_bits;
            let levels = direction_bits ^ self.settings.dir_level_mask;

            for axis in Axis::ALL {
                let bit = 1u8 << axis.index();
                if changed_dir_bits & bit != 0 {
                    self.driver.set_direction(axis, levels & bit != 0);
                    self.counters.count_direction[axis.index()] =
                        if direction_bits & bit != 0 { -1 } else { 1 };
                }
            }
        }

        for axis in Axis::ALL {
            if flags.contains(StepEventFlags::step(axis)) {
                self.driver.pulse_step(axis);
                let delta = self.counters.count_direction[axis.index()] as i32;
                self.counters.count_position[axis.index()].fetch_add(delta, Ordering::Relaxed);
                self.counters.count_position_from_startup[axis.index()]
                    .fetch_add(delta, Ordering::Relaxed);
            }
        }

        if let Some(next_event) = self.step_events.front() {
            ticks_to_next_isr = next_event.time_ticks as u32;
        } else if !flags.contains(StepEventFlags::END_OF_MOTION) {
            // underrun: the producer fell behind during active motion
            saturating_inc(&self.step_ev_miss);
        }

        ticks_to_next_isr
    }
}
