//! Compile-time sizing and numeric tolerances for the stepping pipeline.

/// Capacity of the move segment queue. Must be a power of two.
pub const MOVE_SEGMENT_QUEUE_SIZE: usize = 16;

/// Capacity of the step event queue. Must be a power of two.
pub const STEP_EVENT_QUEUE_SIZE: usize = 256;

/// Capacity of the planner block queue. Must be a power of two.
pub const BLOCK_QUEUE_SIZE: usize = 16;

/// Free slots the segment compiler keeps in reserve so that sentinel
/// segments (warmup, drain, block-discarding) can always be appended.
pub const MOVE_SEGMENT_QUEUE_MIN_FREE_SLOTS: usize = 4;

/// Upper bound on step events produced by one move ISR invocation.
pub const MAX_STEP_EVENTS_PER_CALL: usize = 64;

/// Duration of the ending empty move. Once the virtual timeline passes
/// this value the engine is draining and will return to halt.
pub const MAX_PRINT_TIME: f64 = 1.0e9;

/// Distances below this are collapsed to zero when splitting a block
/// into trapezoid phases (mm).
pub const EPSILON_DISTANCE: f64 = 1.0e-9;

/// Tolerance when comparing a step time against a segment duration (s).
pub const EPSILON_TIME: f64 = 1.0e-9;
