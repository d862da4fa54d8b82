//! Axis identifiers and machine kinematics.

use serde::Deserialize;

/// Number of controlled axes (X, Y, Z and the extruder).
pub const NUM_AXES: usize = 4;

/// A physical motor axis.
///
/// On CoreXY machines `X` and `Y` identify the A and B motors; the
/// generator layer applies the belt projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    /// X axis (A motor on CoreXY).
    X = 0,
    /// Y axis (B motor on CoreXY).
    Y = 1,
    /// Z axis.
    Z = 2,
    /// Extruder axis.
    E = 3,
}

impl Axis {
    /// All axes in index order.
    pub const ALL: [Axis; NUM_AXES] = [Axis::X, Axis::Y, Axis::Z, Axis::E];

    /// Get the array index of this axis.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Get the axis letter for display.
    #[inline]
    pub const fn letter(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
            Axis::E => 'e',
        }
    }
}

/// Machine kinematics selection.
///
/// Chooses how a Cartesian motion vector projects onto the motors at the
/// step generator layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "lowercase")]
pub enum Kinematics {
    /// One motor per Cartesian axis.
    #[default]
    Cartesian,
    /// CoreXY belt drive: A = x + y, B = x - y.
    CoreXy,
}
