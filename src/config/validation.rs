//! Configuration validation.

use crate::error::{ConfigError, Error, Result};

use super::axis::Axis;
use super::engine::EngineConfig;

/// Validate an engine configuration.
///
/// Checks:
/// - Every axis has a positive, finite steps-per-mm
/// - The stepper timer rate supports the 1 ms idle period
/// - The move timer frequency is non-zero
pub fn validate_config(config: &EngineConfig) -> Result<()> {
    for (axis, axis_config) in Axis::ALL.iter().zip(config.axis_configs()) {
        if !(axis_config.steps_per_mm > 0.0 && axis_config.steps_per_mm.is_finite()) {
            return Err(Error::Config(ConfigError::InvalidStepsPerMm {
                axis: axis.letter(),
                value: axis_config.steps_per_mm,
            }));
        }
    }

    if config.engine.stepper_timer_rate < 1000 {
        return Err(Error::Config(ConfigError::InvalidTimerRate(
            config.engine.stepper_timer_rate,
        )));
    }

    if config.engine.move_timer_frequency == 0 {
        return Err(Error::Config(ConfigError::InvalidMoveTimerFrequency(
            config.engine.move_timer_frequency,
        )));
    }

    Ok(())
}
