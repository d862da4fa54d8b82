//! Hardware abstraction for step/direction pins and the step timer.
//!
//! The engine drives hardware exclusively through these traits. The
//! [`AxisPins`] adapter implements [`StepperDriver`] over embedded-hal 1.0
//! pin types for the common discrete-driver wiring; square-wave stepping
//! hardware can implement the trait with a toggle instead.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::config::{Axis, NUM_AXES};

/// Step and direction pin access for all axes.
///
/// Both methods are called from the step timer interrupt and must not
/// block beyond the pulse width.
pub trait StepperDriver {
    /// Write a direction pin level. The level already accounts for any
    /// configured inversion; implementations write it as-is.
    fn set_direction(&mut self, axis: Axis, level: bool);

    /// Emit one step pulse on an axis. Set/reset or toggle, depending on
    /// the driver hardware.
    fn pulse_step(&mut self, axis: Axis);
}

/// The step timer compare channel plus the coarse clocks the engine needs.
///
/// The counter is 16-bit and free-running; compare values wrap modulo
/// 65536. `delay_ticks` must busy-wait with tick accuracy; it is used to
/// fuse step events that are too close together for an interrupt
/// round-trip.
pub trait StepTimer {
    /// Current value of the free-running 16-bit counter.
    fn counter(&self) -> u16;

    /// Currently programmed compare value.
    fn compare(&self) -> u16;

    /// Program the compare value for the next step ISR entry.
    fn set_compare(&mut self, ticks: u16);

    /// Busy-wait for the given number of timer ticks.
    fn delay_ticks(&mut self, ticks: u32);

    /// Millisecond clock for delivery-delay bookkeeping.
    fn now_ms(&self) -> u32;
}

/// Default step pulse width for [`AxisPins`] in nanoseconds.
///
/// 2 us satisfies the minimum high time of common stepper drivers.
pub const DEFAULT_PULSE_WIDTH_NS: u32 = 2_000;

/// [`StepperDriver`] over four embedded-hal STEP/DIR pin pairs.
///
/// Pin errors are discarded: a failed write inside the step interrupt has
/// no recovery path, and retrying would skew the pulse train.
pub struct AxisPins<STEP, DIR, DELAY>
where
    STEP: OutputPin,
    DIR: OutputPin,
    DELAY: DelayNs,
{
    step_pins: [STEP; NUM_AXES],
    dir_pins: [DIR; NUM_AXES],
    delay: DELAY,
    pulse_width_ns: u32,
}

impl<STEP, DIR, DELAY> AxisPins<STEP, DIR, DELAY>
where
    STEP: OutputPin,
    DIR: OutputPin,
    DELAY: DelayNs,
{
    /// Create a pin driver with the default pulse width.
    pub fn new(step_pins: [STEP; NUM_AXES], dir_pins: [DIR; NUM_AXES], delay: DELAY) -> Self {
        Self {
            step_pins,
            dir_pins,
            delay,
            pulse_width_ns: DEFAULT_PULSE_WIDTH_NS,
        }
    }

    /// Override the step pulse width in nanoseconds.
    pub fn with_pulse_width_ns(mut self, pulse_width_ns: u32) -> Self {
        self.pulse_width_ns = pulse_width_ns;
        self
    }
}

impl<STEP, DIR, DELAY> StepperDriver for AxisPins<STEP, DIR, DELAY>
where
    STEP: OutputPin,
    DIR: OutputPin,
    DELAY: DelayNs,
{
    fn set_direction(&mut self, axis: Axis, level: bool) {
        let pin = &mut self.dir_pins[axis.index()];
        if level {
            let _ = pin.set_high();
        } else {
            let _ = pin.set_low();
        }
    }

    fn pulse_step(&mut self, axis: Axis) {
        let pin = &mut self.step_pins[axis.index()];
        let _ = pin.set_high();
        self.delay.delay_ns(self.pulse_width_ns);
        let _ = pin.set_low();
    }
}
