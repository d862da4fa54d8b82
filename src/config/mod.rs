//! Configuration module for stepper-pulse.
//!
//! Provides types for loading and validating engine and per-axis
//! configurations from TOML files (with `std` feature) or pre-parsed data,
//! plus the derived runtime settings used by the stepping pipeline.

mod axis;
pub mod constants;
mod engine;
#[cfg(feature = "std")]
mod loader;
mod settings;
mod validation;

pub use axis::{Axis, Kinematics, NUM_AXES};
pub use engine::{AxisConfig, EngineConfig, TimingConfig};
pub use settings::EngineSettings;
pub use validation::validate_config;

#[cfg(feature = "std")]
pub use loader::{load_config, parse_config};
