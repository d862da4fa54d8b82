//! End-to-end scenarios for the stepping engine.
//!
//! These tests drive the full pipeline with a simulated step timer and a
//! recording pin driver: blocks go in through the planner queue, the two
//! ISR bodies are fired the way the hardware timers would, and the pulse
//! train coming out of the pins is checked for count, order and timing.

use std::cell::Cell;
use std::rc::Rc;

use stepper_pulse::config::constants::MAX_PRINT_TIME;
use stepper_pulse::{
    Axis, EngineConfig, MotionBlock, StepEventFlags, StepTimer, SteppingEngine, StepperDriver,
};

// =============================================================================
// Simulated hardware
// =============================================================================

/// Shared absolute tick clock between the timer and the pin recorder.
type Clock = Rc<Cell<u64>>;

struct SimTimer {
    clock: Clock,
    compare: u16,
}

impl StepTimer for SimTimer {
    fn counter(&self) -> u16 {
        (self.clock.get() & 0xFFFF) as u16
    }

    fn compare(&self) -> u16 {
        self.compare
    }

    fn set_compare(&mut self, ticks: u16) {
        self.compare = ticks;
    }

    fn delay_ticks(&mut self, ticks: u32) {
        self.clock.set(self.clock.get() + ticks as u64);
    }

    fn now_ms(&self) -> u32 {
        (self.clock.get() / 1000) as u32
    }
}

struct RecordingDriver {
    clock: Clock,
    pulses: Vec<(Axis, u64)>,
    dir_levels: [bool; 4],
    dir_writes: usize,
}

impl RecordingDriver {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            pulses: Vec::new(),
            dir_levels: [false; 4],
            dir_writes: 0,
        }
    }

    fn pulse_times(&self, axis: Axis) -> Vec<u64> {
        self.pulses
            .iter()
            .filter(|(a, _)| *a == axis)
            .map(|(_, t)| *t)
            .collect()
    }
}

impl StepperDriver for RecordingDriver {
    fn set_direction(&mut self, axis: Axis, level: bool) {
        self.dir_levels[axis.index()] = level;
        self.dir_writes += 1;
    }

    fn pulse_step(&mut self, axis: Axis) {
        self.pulses.push((axis, self.clock.get()));
    }
}

type Engine = SteppingEngine<RecordingDriver, SimTimer>;

fn new_engine() -> Engine {
    let clock: Clock = Rc::new(Cell::new(0));
    let driver = RecordingDriver::new(clock.clone());
    let timer = SimTimer { clock, compare: 0 };

    let mut config = EngineConfig::default();
    config.axes.x.steps_per_mm = 80.0;
    config.axes.y.steps_per_mm = 80.0;
    SteppingEngine::new(&config, driver, timer).expect("valid config")
}

/// Advance the simulated clock to the programmed compare value and fire
/// the step ISR, as the compare-match interrupt would.
fn fire_step_isr(engine: &mut Engine) {
    let delta = engine.timer().compare.wrapping_sub(engine.timer().counter()) as u64;
    let clock = engine.timer().clock.clone();
    clock.set(clock.get() + delta);
    engine.step_isr();
}

/// Drive both ISRs until the engine drains back to halt. The dispatcher
/// keeps a small backlog while the producer is active so the pulse train
/// never underruns.
fn run_to_halt(engine: &mut Engine, max_rounds: usize) -> bool {
    for _ in 0..max_rounds {
        engine.move_isr();

        while engine.step_events().len() > 8 {
            fire_step_isr(engine);
        }

        if !engine.planner().has_blocks_queued() && engine.total_print_time() >= MAX_PRINT_TIME {
            while !engine.step_events().is_empty() {
                fire_step_isr(engine);
            }
        }

        if engine.is_halted() {
            return true;
        }
    }
    false
}

fn intervals(times: &[u64]) -> Vec<i64> {
    times.windows(2).map(|w| w[1] as i64 - w[0] as i64).collect()
}

// =============================================================================
// S1: pure triangle profile on one axis
// =============================================================================

#[test]
fn s1_pure_triangle_single_axis() {
    let mut engine = new_engine();
    // 10 mm +X from rest to rest at 1000 mm/s^2 peaks at 100 mm/s
    assert!(engine.enqueue_block(MotionBlock::linear(
        [800, 0, 0, 0],
        10.0,
        1000.0,
        0.0,
        200.0,
        0.0,
    )));

    assert!(run_to_halt(&mut engine, 10_000), "engine must drain to halt");

    assert_eq!(engine.position(), [800, 0, 0, 0]);
    assert_eq!(engine.axis_did_move(), 0);
    assert_eq!(engine.nonmonotonic_clamps(), 0);

    let pulses = engine.driver().pulse_times(Axis::X);
    assert_eq!(pulses.len(), 800);
    assert!(pulses.windows(2).all(|w| w[0] <= w[1]), "pulse train must be ordered");

    // First half-step crossing from rest: t = sqrt(2 * d / a). The span
    // from first to last pulse is the 0.2 s triangle minus one crossing
    // delay on each end. Per-event rounding can drift the sum by a few
    // ticks over 800 events.
    let half_step_mm = 0.5 / 80.0;
    let t_first = (2.0 * half_step_mm / 1000.0_f64).sqrt();
    let expected_ticks = ((0.2 - 2.0 * t_first) * 1_000_000.0).round() as i64;
    let measured = (pulses[800 - 1] - pulses[0]) as i64;
    assert!(
        (measured - expected_ticks).abs() <= 64,
        "measured {} expected {}",
        measured,
        expected_ticks
    );

    // acceleration then deceleration: wide intervals at both ends, the
    // tightest spacing at the velocity peak in the middle
    let gaps = intervals(&pulses);
    let mid = gaps[gaps.len() / 2];
    assert!(gaps[0] > 1000);
    assert!(*gaps.last().unwrap() > 1000);
    assert!(mid >= 120 && mid <= 130, "peak interval was {}", mid);
}

// =============================================================================
// S2: full trapezoid with cruise plateau
// =============================================================================

#[test]
fn s2_trapezoid_profile() {
    let mut engine = new_engine();
    // 100 mm +X: 20 mm ramps around a 60 mm cruise at 200 mm/s
    assert!(engine.enqueue_block(MotionBlock::linear(
        [8000, 0, 0, 0],
        100.0,
        1000.0,
        0.0,
        200.0,
        0.0,
    )));

    assert!(run_to_halt(&mut engine, 100_000));

    assert_eq!(engine.position(), [8000, 0, 0, 0]);
    assert_eq!(engine.take_step_event_misses(), 0, "no underrun under steady supply");

    let pulses = engine.driver().pulse_times(Axis::X);
    assert_eq!(pulses.len(), 8000);

    let half_step_mm = 0.5 / 80.0;
    let t_first = (2.0 * half_step_mm / 1000.0_f64).sqrt();
    let expected_ticks = ((0.7 - 2.0 * t_first) * 1_000_000.0).round() as i64;
    let measured = (pulses[8000 - 1] - pulses[0]) as i64;
    assert!(
        (measured - expected_ticks).abs() <= 256,
        "measured {} expected {}",
        measured,
        expected_ticks
    );

    // cruise plateau: 200 mm/s at 80 steps/mm is 62.5 us per step
    let gaps = intervals(&pulses);
    let mid = gaps[gaps.len() / 2];
    assert!(mid == 62 || mid == 63, "cruise interval was {}", mid);
}

// =============================================================================
// S3: simultaneous XY steps coalesce into one event
// =============================================================================

#[test]
fn s3_diagonal_coalescing() {
    let mut engine = new_engine();
    // 45 degree diagonal with identical steps/mm on X and Y: every X
    // crossing coincides with a Y crossing
    assert!(engine.enqueue_block(MotionBlock::linear(
        [57, 57, 0, 0],
        1.0,
        1000.0,
        0.0,
        50.0,
        0.0,
    )));

    // run the producer alone so the queue holds the whole session
    for _ in 0..200 {
        engine.move_isr();
    }

    let events: Vec<_> = engine.step_events().iter().copied().collect();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.time_ticks >= 0), "monotonic queue");

    let step_events: Vec<_> = events
        .iter()
        .filter(|e| e.flags.intersects(StepEventFlags::STEP_MASK))
        .collect();
    assert_eq!(step_events.len(), 57, "one merged event per crossing pair");
    for event in &step_events {
        assert!(
            event.flags.contains(StepEventFlags::step(Axis::X) | StepEventFlags::step(Axis::Y)),
            "expected coalesced X+Y step, got {:?}",
            event.flags
        );
    }

    // one segment-boundary marker per queued segment: warmup, accel,
    // decel and the ending sentinel
    let markers = events
        .iter()
        .filter(|e| e.flags.contains(StepEventFlags::BEGINNING_OF_MOVE_SEGMENT))
        .count();
    assert_eq!(markers, 4);
    assert_eq!(
        events
            .iter()
            .filter(|e| e.flags.contains(StepEventFlags::END_OF_MOTION))
            .count(),
        1
    );

    // the dispatcher delivers both axes the same number of steps
    let mut dispatch = engine;
    assert!(run_to_halt(&mut dispatch, 10_000));
    assert_eq!(dispatch.position(), [57, 57, 0, 0]);
    let x = dispatch.driver().pulse_times(Axis::X);
    let y = dispatch.driver().pulse_times(Axis::Y);
    assert_eq!(x, y, "paired pulses must leave in the same ISR entry");
}

// =============================================================================
// S4: sync blocks re-anchor the position counters
// =============================================================================

#[test]
fn s4_sync_block_before_motion() {
    let mut engine = new_engine();
    assert!(engine.enqueue_block(MotionBlock::sync([100, -25, 0, 0])));

    engine.move_isr();

    // applied directly, nothing staged
    assert_eq!(engine.position(), [100, -25, 0, 0]);
    assert!(engine.is_halted());
    assert!(engine.step_events().is_empty());
    assert_eq!(engine.position_from_startup(), [0, 0, 0, 0]);
}

#[test]
fn s4_sync_block_between_moves() {
    let mut engine = new_engine();
    assert!(engine.enqueue_block(MotionBlock::linear(
        [800, 0, 0, 0],
        10.0,
        1000.0,
        0.0,
        100.0,
        0.0,
    )));
    assert!(engine.enqueue_block(MotionBlock::sync([10_000, 0, 0, 0])));
    assert!(engine.enqueue_block(MotionBlock::linear(
        [80, 0, 0, 0],
        1.0,
        1000.0,
        0.0,
        50.0,
        0.0,
    )));

    assert!(run_to_halt(&mut engine, 100_000));

    // the sync re-anchored to 10000 before block B's 80 steps landed
    assert_eq!(engine.position(), [10_080, 0, 0, 0]);
    // the startup counter ignores re-anchoring
    assert_eq!(engine.position_from_startup(), [880, 0, 0, 0]);
}

// =============================================================================
// S5: drain appends the ending move and halts
// =============================================================================

#[test]
fn s5_drain_and_restart() {
    let mut engine = new_engine();
    assert!(engine.enqueue_block(MotionBlock::linear(
        [80, 0, 0, 0],
        1.0,
        1000.0,
        0.0,
        50.0,
        0.0,
    )));

    assert!(run_to_halt(&mut engine, 10_000));
    assert!(engine.is_halted());
    assert_eq!(engine.total_print_time(), 0.0);
    assert_eq!(engine.position(), [80, 0, 0, 0]);

    // a fresh session starts from halt and accumulates
    assert!(engine.enqueue_block(MotionBlock::linear(
        [-80, 0, 0, 0],
        1.0,
        1000.0,
        0.0,
        50.0,
        0.0,
    )));
    assert!(run_to_halt(&mut engine, 10_000));
    assert_eq!(engine.position(), [0, 0, 0, 0]);
    assert_eq!(engine.position_from_startup(), [0, 0, 0, 0]);
}

// =============================================================================
// S6: sustained supply with back-pressure loses nothing
// =============================================================================

#[test]
fn s6_queue_saturation_no_loss() {
    let mut engine = new_engine();

    let blocks: Vec<MotionBlock> = (0..30)
        .map(|i| {
            let steps = 80 * ((i % 3) as i32 + 1) * if i % 2 == 0 { 1 } else { -1 };
            let mm = steps.unsigned_abs() as f64 / 80.0;
            MotionBlock::linear([steps, 0, 0, 0], mm, 1000.0, 0.0, 50.0, 0.0)
        })
        .collect();
    let expected: i32 = blocks.iter().map(|b| b.steps[0] as i32 * if b.direction_bits & 1 != 0 { -1 } else { 1 }).sum();
    let total_steps: u32 = blocks.iter().map(|b| b.steps[0]).sum();

    let mut pending = blocks.into_iter().peekable();
    let mut saw_backpressure = false;
    for _ in 0..200_000 {
        while let Some(block) = pending.peek().copied() {
            if engine.enqueue_block(block) {
                pending.next();
            } else {
                saw_backpressure = true;
                break;
            }
        }

        engine.move_isr();
        while engine.step_events().len() > 8 {
            fire_step_isr(&mut engine);
        }
        if pending.peek().is_none()
            && !engine.planner().has_blocks_queued()
            && engine.total_print_time() >= MAX_PRINT_TIME
        {
            while !engine.step_events().is_empty() {
                fire_step_isr(&mut engine);
            }
        }
        if pending.peek().is_none() && engine.is_halted() {
            break;
        }
    }

    assert!(saw_backpressure, "the block queue must fill at some point");
    assert!(engine.is_halted());
    assert_eq!(engine.position()[0], expected);
    assert_eq!(engine.driver().pulse_times(Axis::X).len(), total_steps as usize);
}

// =============================================================================
// Stop safety: cancel mid-motion returns to a fresh halt
// =============================================================================

#[test]
fn stop_mid_motion_resets_to_fresh_halt() {
    let mut engine = new_engine();
    assert!(engine.enqueue_block(MotionBlock::linear(
        [8000, 0, 0, 0],
        100.0,
        1000.0,
        0.0,
        200.0,
        0.0,
    )));

    // run part of the move
    for _ in 0..50 {
        engine.move_isr();
        while engine.step_events().len() > 8 {
            fire_step_isr(&mut engine);
        }
    }
    let position_at_stop = engine.position();
    assert!(position_at_stop[0] > 0);
    assert!(!engine.is_halted());

    engine.stop();
    // both ISRs stand down once the flag is seen
    engine.move_isr();
    fire_step_isr(&mut engine);
    assert!(engine.is_stopping());

    engine.poll();

    assert!(!engine.is_stopping());
    assert!(engine.is_halted());
    assert_eq!(engine.total_print_time(), 0.0);
    assert!(engine.step_events().is_empty());
    assert!(!engine.planner().has_blocks_queued());
    assert_eq!(engine.axis_did_move(), 0);
    // counters keep whatever the last dispatched step left behind
    assert_eq!(engine.position(), position_at_stop);
    assert_eq!(engine.take_step_deadline_misses(), 0);
    assert_eq!(engine.take_step_event_misses(), 0);
}

// =============================================================================
// Direction handling at the pins
// =============================================================================

#[test]
fn direction_pins_written_only_on_change() {
    let mut engine = new_engine();
    let initial_writes = engine.driver().dir_writes;
    assert_eq!(initial_writes, 4, "construction applies every direction pin once");

    assert!(engine.enqueue_block(MotionBlock::linear(
        [80, 0, 0, 0],
        1.0,
        1000.0,
        0.0,
        50.0,
        0.0,
    )));
    assert!(engine.enqueue_block(MotionBlock::linear(
        [-80, 0, 0, 0],
        1.0,
        1000.0,
        0.0,
        50.0,
        0.0,
    )));
    assert!(run_to_halt(&mut engine, 50_000));

    // one flip to negative on X, nothing else
    assert_eq!(engine.driver().dir_writes, initial_writes + 1);
    assert!(!engine.driver().dir_levels[Axis::X.index()], "negative travel drives X low");
    assert_eq!(engine.position(), [0, 0, 0, 0]);
}
