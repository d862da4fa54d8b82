//! Derived runtime settings computed from engine configuration.

use super::axis::{Kinematics, NUM_AXES};
use super::engine::EngineConfig;

/// Derived engine parameters computed from [`EngineConfig`].
///
/// These are computed once at initialization and shared by the segment
/// compiler, the step generators and the dispatcher.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Step timer resolution in ticks per second.
    pub ticks_per_sec: f64,

    /// Idle re-arm period for the step ISR (1 ms worth of ticks).
    pub stepper_isr_period_in_ticks: u32,

    /// Travel per motor step, per axis (mm).
    pub mm_per_step: [f64; NUM_AXES],

    /// Half of [`Self::mm_per_step`], the generator's crossing offset.
    pub mm_per_half_step: [f64; NUM_AXES],

    /// Direction bits (bit = axis index) set for every axis whose
    /// direction pin is *not* inverted. XORing an event's direction bits
    /// with this mask yields the pin levels to write.
    pub dir_level_mask: u8,

    /// Machine kinematics.
    pub kinematics: Kinematics,
}

impl EngineSettings {
    /// Compute engine settings from configuration.
    ///
    /// The configuration should be validated first; see
    /// [`validate_config`](super::validate_config).
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut mm_per_step = [0.0; NUM_AXES];
        let mut mm_per_half_step = [0.0; NUM_AXES];
        let mut dir_level_mask = 0u8;

        for (i, axis_config) in config.axis_configs().iter().enumerate() {
            mm_per_step[i] = 1.0 / axis_config.steps_per_mm;
            mm_per_half_step[i] = 0.5 * mm_per_step[i];
            if !axis_config.invert_direction {
                dir_level_mask |= 1 << i;
            }
        }

        Self {
            ticks_per_sec: config.engine.stepper_timer_rate as f64,
            stepper_isr_period_in_ticks: config.engine.stepper_timer_rate / 1000,
            mm_per_step,
            mm_per_half_step,
            dir_level_mask,
            kinematics: config.engine.kinematics,
        }
    }
}
