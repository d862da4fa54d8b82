//! Planner-facing block queue.
//!
//! The foreground loop enqueues [`MotionBlock`]s; the move ISR consumes
//! them through the `unprocessed` cursor as it compiles segments, and the
//! step ISR retires them through the `discard` cursor as their final
//! segment boundary is dispatched. Blocks therefore stay observable until
//! every step they generated has been delivered.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::constants::BLOCK_QUEUE_SIZE;
use crate::config::NUM_AXES;

const MASK: usize = BLOCK_QUEUE_SIZE - 1;

const _: () = assert!(BLOCK_QUEUE_SIZE.is_power_of_two());

/// A planner-level motion primitive with a trapezoidal velocity profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionBlock {
    /// Step count magnitude per axis.
    pub steps: [u32; NUM_AXES],
    /// Direction bitmask (bit = axis index, set = negative travel).
    pub direction_bits: u8,
    /// Travel distance along the motion vector in mm.
    pub millimeters: f64,
    /// Acceleration magnitude in mm/s^2.
    pub acceleration: f64,
    /// Speed entering the block in mm/s.
    pub initial_speed: f64,
    /// Cruise speed in mm/s.
    pub nominal_speed: f64,
    /// Speed leaving the block in mm/s.
    pub final_speed: f64,
    /// True for a position-sync command instead of a move.
    pub sync_position: bool,
    /// Target position in steps; authoritative for sync blocks.
    pub position: [i32; NUM_AXES],
}

impl Default for MotionBlock {
    fn default() -> Self {
        Self {
            steps: [0; NUM_AXES],
            direction_bits: 0,
            millimeters: 0.0,
            acceleration: 0.0,
            initial_speed: 0.0,
            nominal_speed: 0.0,
            final_speed: 0.0,
            sync_position: false,
            position: [0; NUM_AXES],
        }
    }
}

impl MotionBlock {
    /// Build a linear move block from signed per-axis step counts.
    pub fn linear(
        steps: [i32; NUM_AXES],
        millimeters: f64,
        acceleration: f64,
        initial_speed: f64,
        nominal_speed: f64,
        final_speed: f64,
    ) -> Self {
        let mut magnitudes = [0u32; NUM_AXES];
        let mut direction_bits = 0u8;
        for i in 0..NUM_AXES {
            magnitudes[i] = steps[i].unsigned_abs();
            if steps[i] < 0 {
                direction_bits |= 1 << i;
            }
        }
        Self {
            steps: magnitudes,
            direction_bits,
            millimeters,
            acceleration,
            initial_speed,
            nominal_speed,
            final_speed,
            ..Self::default()
        }
    }

    /// Build a position-sync block re-anchoring the step counters.
    pub fn sync(position: [i32; NUM_AXES]) -> Self {
        Self {
            sync_position: true,
            position,
            ..Self::default()
        }
    }

    /// True for blocks that produce motion.
    #[inline]
    pub fn is_move(&self) -> bool {
        !self.sync_position
    }
}

/// Bounded block queue with two consumer cursors.
#[derive(Debug)]
pub struct PlannerQueue {
    slots: [MotionBlock; BLOCK_QUEUE_SIZE],
    head: AtomicUsize,
    unprocessed: AtomicUsize,
    discard: AtomicUsize,
    /// Milliseconds to hold delivery after the first block arrives, so a
    /// short initial queue is not consumed faster than it refills.
    pub delay_before_delivering: u32,
}

impl Default for PlannerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            slots: [MotionBlock::default(); BLOCK_QUEUE_SIZE],
            head: AtomicUsize::new(0),
            unprocessed: AtomicUsize::new(0),
            discard: AtomicUsize::new(0),
            delay_before_delivering: 0,
        }
    }

    /// Append a block. Returns `false` when the ring is full.
    pub fn push(&mut self, block: MotionBlock) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        if head.wrapping_sub(self.discard.load(Ordering::Acquire)) == BLOCK_QUEUE_SIZE {
            return false;
        }
        self.slots[head & MASK] = block;
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// The next block the move ISR has not compiled yet.
    pub fn current_unprocessed(&self) -> Option<&MotionBlock> {
        let pos = self.unprocessed.load(Ordering::Relaxed);
        (pos != self.head.load(Ordering::Acquire)).then(|| &self.slots[pos & MASK])
    }

    /// Mark the current unprocessed block as compiled.
    pub fn discard_current_unprocessed(&mut self) {
        let pos = self.unprocessed.load(Ordering::Relaxed);
        debug_assert_ne!(pos, self.head.load(Ordering::Relaxed));
        self.unprocessed.store(pos.wrapping_add(1), Ordering::Release);
    }

    /// The oldest compiled block whose steps are still being delivered.
    pub fn current_processed(&self) -> Option<&MotionBlock> {
        let pos = self.discard.load(Ordering::Relaxed);
        (pos != self.unprocessed.load(Ordering::Acquire)).then(|| &self.slots[pos & MASK])
    }

    /// Retire the oldest compiled block, freeing its slot.
    pub fn discard_current(&mut self) {
        let pos = self.discard.load(Ordering::Relaxed);
        debug_assert_ne!(pos, self.unprocessed.load(Ordering::Relaxed));
        self.discard.store(pos.wrapping_add(1), Ordering::Release);
    }

    /// Number of blocks not yet fully delivered.
    #[inline]
    pub fn moves_planned(&self) -> usize {
        self.head
            .load(Ordering::Relaxed)
            .wrapping_sub(self.discard.load(Ordering::Relaxed))
    }

    /// Number of blocks the move ISR has not started on.
    #[inline]
    pub fn nonbusy_moves_planned(&self) -> usize {
        self.head
            .load(Ordering::Relaxed)
            .wrapping_sub(self.unprocessed.load(Ordering::Relaxed))
    }

    /// Number of compiled blocks waiting to be retired by the step ISR.
    #[inline]
    pub fn moves_planned_processed(&self) -> usize {
        self.unprocessed
            .load(Ordering::Relaxed)
            .wrapping_sub(self.discard.load(Ordering::Relaxed))
    }

    /// True while any block occupies the queue.
    #[inline]
    pub fn has_blocks_queued(&self) -> bool {
        self.head.load(Ordering::Relaxed) != self.discard.load(Ordering::Relaxed)
    }

    /// Drop every queued block and reset the delivery delay.
    pub fn clear(&mut self) {
        self.head.store(0, Ordering::Relaxed);
        self.unprocessed.store(0, Ordering::Relaxed);
        self.discard.store(0, Ordering::Relaxed);
        self.delay_before_delivering = 0;
    }
}
