//! The stepping engine: queues, generators, ISR bodies and lifecycle.
//!
//! [`SteppingEngine`] owns the whole pipeline. The host firmware places
//! it where both timer interrupts can reach it and wires
//! [`move_isr`](SteppingEngine::move_isr) to the low-frequency move timer
//! and [`step_isr`](SteppingEngine::step_isr) to the step timer compare
//! interrupt; the foreground loop calls [`poll`](SteppingEngine::poll)
//! and feeds blocks with [`enqueue_block`](SteppingEngine::enqueue_block).

mod dispatcher;
mod producer;

pub use producer::StepGeneratorStatus;

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use dispatcher::StepCounters;

use crate::config::{validate_config, Axis, EngineConfig, EngineSettings, NUM_AXES};
use crate::error::{EngineError, Result};
use crate::generator::{ClassicStepGenerator, StepEventQueue, StepGenerator, StepGeneratorState};
use crate::hal::{StepTimer, StepperDriver};
use crate::motion::{MoveSegmentQueue, Timeline};
use crate::planner::{MotionBlock, PlannerQueue};

// Saturating bump for the single-writer miss counters.
fn saturating_inc(counter: &AtomicU8) {
    let value = counter.load(Ordering::Relaxed);
    counter.store(value.saturating_add(1), Ordering::Relaxed);
}

/// The two-stage stepping pipeline from planner blocks to step pulses.
///
/// Generic over the pin driver `D`, the step timer `T` and the per-axis
/// step generator `G` (classic closed-form by default).
pub struct SteppingEngine<D, T, G = ClassicStepGenerator>
where
    D: StepperDriver,
    T: StepTimer,
    G: StepGenerator,
{
    driver: D,
    timer: T,
    settings: EngineSettings,

    planner: PlannerQueue,
    moves: MoveSegmentQueue,
    step_events: StepEventQueue,

    state: StepGeneratorState,
    generators: [G; NUM_AXES],
    timeline: Timeline,
    max_lookback_time: f64,

    counters: StepCounters,
    left_ticks_to_next_step_event: u32,
    waiting_before_delivering_since: u32,

    stop_pending: AtomicBool,
    step_dl_miss: AtomicU8,
    step_ev_miss: AtomicU8,
}

impl<D, T, G> SteppingEngine<D, T, G>
where
    D: StepperDriver,
    T: StepTimer,
    G: StepGenerator,
{
    /// Build a halted engine and apply the initial direction pin state.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `config` fails validation.
    pub fn new(config: &EngineConfig, mut driver: D, timer: T) -> Result<Self> {
        validate_config(config)?;
        let settings = EngineSettings::from_config(config);

        // All direction bits start cleared (positive travel); write the
        // matching pin levels so pins and cache agree.
        let levels = settings.dir_level_mask;
        for axis in Axis::ALL {
            driver.set_direction(axis, levels & (1 << axis.index()) != 0);
        }

        Ok(Self {
            driver,
            timer,
            settings,
            planner: PlannerQueue::new(),
            moves: MoveSegmentQueue::new(),
            step_events: StepEventQueue::new(),
            state: StepGeneratorState::new(),
            generators: Axis::ALL.map(G::for_axis),
            timeline: Timeline::new(),
            max_lookback_time: 0.0,
            counters: StepCounters::new(),
            left_ticks_to_next_step_event: 0,
            waiting_before_delivering_since: 0,
            stop_pending: AtomicBool::new(false),
            step_dl_miss: AtomicU8::new(0),
            step_ev_miss: AtomicU8::new(0),
        })
    }

    /// Foreground entry point: services a pending stop and reports miss
    /// counters when `defmt` is enabled.
    pub fn poll(&mut self) {
        if self.stop_pending.load(Ordering::Relaxed) {
            self.reset_queues();
            return;
        }

        #[cfg(feature = "defmt")]
        {
            let missed = self.take_step_deadline_misses();
            if missed != 0 {
                defmt::warn!("step deadlines missed: {}", missed);
            }
            let missed = self.take_step_event_misses();
            if missed != 0 {
                defmt::warn!("step events missed: {}", missed);
            }
        }
    }

    /// Queue a planner block. Returns `false` when the block queue is
    /// full; retry after the pipeline drains some of it.
    pub fn enqueue_block(&mut self, block: MotionBlock) -> bool {
        self.planner.push(block)
    }

    /// Access the planner-facing block queue.
    pub fn planner(&self) -> &PlannerQueue {
        &self.planner
    }

    /// Mutable access to the planner-facing block queue.
    pub fn planner_mut(&mut self) -> &mut PlannerQueue {
        &mut self.planner
    }

    /// Request an out-of-band cancel of all motion.
    ///
    /// Both ISR bodies observe the flag at their next entry and stand
    /// down; the foreground [`poll`](Self::poll) performs the actual
    /// [`reset_queues`](Self::reset_queues).
    pub fn stop(&self) {
        self.stop_pending.store(true, Ordering::Relaxed);
    }

    /// True while a stop is pending and queues have not been reset yet.
    pub fn is_stopping(&self) -> bool {
        self.stop_pending.load(Ordering::Relaxed)
    }

    /// True when the engine sits in the fresh-halt state.
    pub fn is_halted(&self) -> bool {
        self.timeline.total_print_time == 0.0
            && self.moves.is_empty()
            && self.step_events.is_empty()
    }

    /// Clear merge state and rewind the virtual timeline to zero.
    pub(crate) fn reset_from_halt(&mut self) {
        self.state.clear();
        self.timeline.reset();
    }

    /// Return to the fresh-halt state, dropping all queued work.
    ///
    /// Position counters survive; a cancelled move leaves the counters at
    /// wherever the last dispatched step put them. The caller must keep
    /// both ISRs from running for the duration (exclusive access via
    /// `&mut self` provides that within one context).
    pub fn reset_queues(&mut self) {
        self.step_events.clear();
        self.moves.clear();
        self.reset_from_halt();

        // the planner may still hold queued blocks, flush them
        self.planner.clear();

        self.step_dl_miss.store(0, Ordering::Relaxed);
        self.step_ev_miss.store(0, Ordering::Relaxed);
        self.left_ticks_to_next_step_event = 0;
        self.waiting_before_delivering_since = 0;
        self.counters.clear_axis_did_move();
        self.stop_pending.store(false, Ordering::Relaxed);
    }

    /// Set the lookback window required by shaped generators.
    ///
    /// The warmup sentinel is sized from this value, so it can only
    /// change while the engine is halted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidLookbackTime`] for a negative or
    /// non-finite value and [`EngineError::NotHalted`] while motion is
    /// staged or in flight.
    pub fn set_max_lookback_time(&mut self, lookback: f64) -> Result<()> {
        if !(lookback >= 0.0 && lookback.is_finite()) {
            return Err(EngineError::InvalidLookbackTime(lookback).into());
        }
        if !self.is_halted() {
            return Err(EngineError::NotHalted.into());
        }
        self.max_lookback_time = lookback;
        Ok(())
    }

    /// The configured lookback window in seconds.
    pub fn max_lookback_time(&self) -> f64 {
        self.max_lookback_time
    }

    /// End time of the staged timeline in seconds.
    pub fn total_print_time(&self) -> f64 {
        self.timeline.total_print_time
    }

    /// Authoritative step position per axis.
    pub fn position(&self) -> [i32; NUM_AXES] {
        self.counters.position()
    }

    /// Step position per axis accumulated since construction, unaffected
    /// by sync blocks.
    pub fn position_from_startup(&self) -> [i32; NUM_AXES] {
        self.counters.position_from_startup()
    }

    /// Step position snapshot taken when the last block was retired.
    pub fn position_last_block(&self) -> [i32; NUM_AXES] {
        self.counters.count_position_last_block
    }

    /// Bitmask of axes moved by the most recent step event.
    pub fn axis_did_move(&self) -> u8 {
        self.counters.axis_did_move()
    }

    /// Read and clear the saturating deadline-miss counter.
    pub fn take_step_deadline_misses(&self) -> u8 {
        self.step_dl_miss.swap(0, Ordering::Relaxed)
    }

    /// Read and clear the saturating event-underrun counter.
    pub fn take_step_event_misses(&self) -> u8 {
        self.step_ev_miss.swap(0, Ordering::Relaxed)
    }

    /// Times the merge layer clamped a negative tick delta to zero.
    pub fn nonmonotonic_clamps(&self) -> u32 {
        self.state.nonmonotonic_clamps()
    }

    /// The derived runtime settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Read access to the step event queue, for diagnostics.
    pub fn step_events(&self) -> &StepEventQueue {
        &self.step_events
    }

    /// Access the pin driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the pin driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Access the step timer.
    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Mutable access to the step timer.
    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }
}
