//! Engine configuration from TOML.

use serde::Deserialize;

use super::axis::Kinematics;

/// Timer and kinematics section of the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Step timer rate in ticks per second (compare channel resolution).
    #[serde(default = "default_stepper_timer_rate")]
    pub stepper_timer_rate: u32,

    /// Move timer frequency in Hz. The host fires
    /// [`move_isr`](crate::SteppingEngine::move_isr) at this rate.
    #[serde(default = "default_move_timer_frequency")]
    pub move_timer_frequency: u32,

    /// Machine kinematics.
    #[serde(default)]
    pub kinematics: Kinematics,
}

/// Per-axis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AxisConfig {
    /// Full steps (after microstepping) per millimeter of travel.
    pub steps_per_mm: f64,

    /// Invert direction pin logic.
    #[serde(default)]
    pub invert_direction: bool,
}

/// Root configuration structure from TOML.
///
/// ```toml
/// [engine]
/// stepper_timer_rate = 1000000
/// move_timer_frequency = 1000
/// kinematics = "cartesian"
///
/// [axes.x]
/// steps_per_mm = 100.0
/// invert_direction = false
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Timer rates and kinematics.
    #[serde(default)]
    pub engine: TimingConfig,

    /// Per-axis settings.
    pub axes: AxesConfig,
}

/// The four axis sections of the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AxesConfig {
    /// X axis (A motor on CoreXY).
    pub x: AxisConfig,
    /// Y axis (B motor on CoreXY).
    pub y: AxisConfig,
    /// Z axis.
    pub z: AxisConfig,
    /// Extruder axis.
    pub e: AxisConfig,
}

fn default_stepper_timer_rate() -> u32 {
    1_000_000
}

fn default_move_timer_frequency() -> u32 {
    1_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stepper_timer_rate: default_stepper_timer_rate(),
            move_timer_frequency: default_move_timer_frequency(),
            kinematics: Kinematics::default(),
        }
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: 100.0,
            invert_direction: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: TimingConfig::default(),
            axes: AxesConfig {
                x: AxisConfig::default(),
                y: AxisConfig::default(),
                z: AxisConfig::default(),
                e: AxisConfig::default(),
            },
        }
    }
}

impl EngineConfig {
    /// Per-axis configurations in axis index order.
    pub fn axis_configs(&self) -> [&AxisConfig; super::NUM_AXES] {
        [&self.axes.x, &self.axes.y, &self.axes.z, &self.axes.e]
    }
}
