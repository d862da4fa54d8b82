//! # stepper-pulse
//!
//! Queue-driven step event generation for multi-axis stepper motion.
//!
//! The crate implements the stepping half of a motion controller: it takes
//! trapezoidal motion blocks from a planner, stages them as acceleration /
//! cruise / deceleration move segments in the time domain, runs one step
//! generator per axis over the segment stream, merges the per-axis step
//! crossings into a single time-ordered event queue, and dispatches those
//! events to the step/direction pins from a hardware timer interrupt.
//!
//! ## Pipeline
//!
//! ```text
//! planner blocks -> move segments -> per-axis generators -> merged
//! step events -> step timer ISR -> STEP/DIR pins
//! ```
//!
//! The two halves run in different interrupt contexts:
//!
//! - the **move ISR** ([`SteppingEngine::move_isr`]) compiles blocks into
//!   segments and refills the step event queue ahead of consumption,
//!   working in 64-bit float time;
//! - the **step ISR** ([`SteppingEngine::step_isr`]) consumes events,
//!   drives the pins and reprograms its own compare register, working in
//!   integer timer ticks only.
//!
//! ## Features
//!
//! - `std` (default): TOML configuration loading from files
//! - `defmt`: defmt formatting for public types and miss-counter reporting
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepper_pulse::{EngineConfig, MotionBlock, SteppingEngine};
//!
//! let config = EngineConfig::default();
//! let mut engine = SteppingEngine::new(&config, driver, timer)?;
//!
//! engine.enqueue_block(MotionBlock::linear(
//!     [800, 0, 0, 0],  // signed steps per axis
//!     10.0,            // distance in mm
//!     1000.0,          // acceleration in mm/s^2
//!     0.0, 200.0, 0.0, // initial / nominal / final speed in mm/s
//! ));
//! // the host wires move_isr() and step_isr() to its timers and calls
//! // poll() from the foreground loop
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

// Core modules
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod hal;
pub mod motion;
pub mod planner;

// Re-exports for ergonomic API
pub use config::{validate_config, Axis, AxisConfig, EngineConfig, EngineSettings, Kinematics};
pub use engine::{StepGeneratorStatus, SteppingEngine};
pub use error::{ConfigError, EngineError, Error, Result};
pub use generator::{ClassicStepGenerator, StepEvent, StepEventInfo, StepGenerator};
pub use hal::{AxisPins, StepTimer, StepperDriver};
pub use motion::{MoveFlags, MoveSegment, StepEventFlags};
pub use planner::{MotionBlock, PlannerQueue};

// Configuration loading (std only)
#[cfg(feature = "std")]
pub use config::load_config;
