//! Step events in both time domains and the dispatch queue.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::constants::STEP_EVENT_QUEUE_SIZE;
use crate::motion::StepEventFlags;

const MASK: usize = STEP_EVENT_QUEUE_SIZE - 1;

const _: () = assert!(STEP_EVENT_QUEUE_SIZE.is_power_of_two());

/// A generator's answer: the next step crossing on its axis.
///
/// `time` is absolute seconds on the virtual timeline. Infinite time
/// means no crossing is known for the current state of the move queue.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepEventInfo {
    /// Absolute event time in seconds.
    pub time: f64,
    /// Step flag of the producing axis plus the cached dir/active bits.
    pub flags: StepEventFlags,
}

impl StepEventInfo {
    /// An event that does not exist yet.
    #[inline]
    pub const fn none() -> Self {
        Self {
            time: f64::INFINITY,
            flags: StepEventFlags::EMPTY,
        }
    }
}

/// A queued, tick-domain step event.
///
/// `time_ticks` is relative to the previous event in the queue; the
/// dispatcher accumulates it into its compare register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepEvent {
    /// Timer ticks since the previous event.
    pub time_ticks: i32,
    /// Step, direction, active and marker flags.
    pub flags: StepEventFlags,
}

impl Default for StepEvent {
    fn default() -> Self {
        Self::empty()
    }
}

impl StepEvent {
    /// An event carrying nothing.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            time_ticks: 0,
            flags: StepEventFlags::EMPTY,
        }
    }
}

/// SPSC ring of step events between the move ISR and the step ISR.
#[derive(Debug)]
pub struct StepEventQueue {
    slots: [StepEvent; STEP_EVENT_QUEUE_SIZE],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl Default for StepEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl StepEventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            slots: [StepEvent::empty(); STEP_EVENT_QUEUE_SIZE],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Reset the cursors. Only valid while both ISR contexts are stopped.
    pub fn clear(&mut self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
    }

    /// Number of queued events.
    #[inline]
    pub fn len(&self) -> usize {
        self.head
            .load(Ordering::Relaxed)
            .wrapping_sub(self.tail.load(Ordering::Relaxed))
    }

    /// True when no events are queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no slot is free.
    #[inline]
    pub fn is_full(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) == STEP_EVENT_QUEUE_SIZE
    }

    /// Append an event. Returns `false` when the ring is full.
    pub fn push(&mut self, event: StepEvent) -> bool {
        if self.is_full() {
            return false;
        }
        let head = self.head.load(Ordering::Relaxed);
        self.slots[head & MASK] = event;
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// The event at the consumer end.
    #[inline]
    pub fn front(&self) -> Option<&StepEvent> {
        let tail = self.tail.load(Ordering::Relaxed);
        (tail != self.head.load(Ordering::Acquire)).then(|| &self.slots[tail & MASK])
    }

    /// Iterate queued events from the consumer end, for diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = &StepEvent> + '_ {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        (0..head.wrapping_sub(tail)).map(move |i| &self.slots[tail.wrapping_add(i) & MASK])
    }

    /// Remove the event at the consumer end.
    pub fn pop(&mut self) -> Option<StepEvent> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let event = self.slots[tail & MASK];
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(event)
    }
}
