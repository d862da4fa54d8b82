//! Error types for stepper-pulse.
//!
//! Provides unified error handling across configuration and engine
//! lifecycle operations. Interrupt-context code never returns errors;
//! timing problems are reported through the saturating miss counters on
//! [`SteppingEngine`](crate::SteppingEngine) instead.

use core::fmt;

/// Result type alias using the library's Error type.
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for all stepper-pulse operations.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Configuration parsing or validation error
    Config(ConfigError),
    /// Engine lifecycle error
    Engine(EngineError),
}

/// Configuration-related errors.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Failed to parse TOML configuration
    ParseError(heapless::String<128>),
    /// Steps-per-mm must be positive and finite
    InvalidStepsPerMm {
        /// Axis letter the invalid value belongs to
        axis: char,
        /// The rejected value
        value: f64,
    },
    /// Stepper timer rate must be at least 1 kHz
    InvalidTimerRate(u32),
    /// Move timer frequency must be > 0
    InvalidMoveTimerFrequency(u32),
    /// File I/O error (std only)
    #[cfg(feature = "std")]
    IoError(heapless::String<128>),
}

/// Engine lifecycle errors.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineError {
    /// Operation requires the engine to be halted with empty queues
    NotHalted,
    /// Requested lookback window cannot fit in the warmup sentinel
    InvalidLookbackTime(f64),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Engine(e) => write!(f, "Engine error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::InvalidStepsPerMm { axis, value } => {
                write!(f, "Invalid steps_per_mm for axis {}: {}. Must be > 0", axis, value)
            }
            ConfigError::InvalidTimerRate(v) => {
                write!(f, "Invalid stepper timer rate: {}. Must be >= 1000", v)
            }
            ConfigError::InvalidMoveTimerFrequency(v) => {
                write!(f, "Invalid move timer frequency: {}. Must be > 0", v)
            }
            #[cfg(feature = "std")]
            ConfigError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotHalted => {
                write!(f, "Engine must be halted with empty queues")
            }
            EngineError::InvalidLookbackTime(t) => {
                write!(f, "Invalid lookback time: {}. Must be finite and >= 0", t)
            }
        }
    }
}

// Conversion impls
impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Error::Engine(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

#[cfg(feature = "std")]
impl std::error::Error for EngineError {}
