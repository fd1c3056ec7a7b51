//! Error taxonomy for the control core.
//!
//! Only [`Error::Config`], [`Error::Validation`] and [`Error::Unavailable`]
//! ever reach a caller.
//! [`Error::RuntimeExecution`] is recovered inside the sandbox as a black
//! frame. [`Error::Transport`] travels in `DriverEvent::Problem`, where it is
//! logged and clears the driver-connected flag. Neither stops the tick loop.

/// Errors that can occur in the control core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Animation source could not be compiled, timed out while loading, or
    /// did not evaluate to a callable.
    Config(String),
    /// A single frame's generation raised an error or exceeded its budget.
    RuntimeExecution(String),
    /// Connection loss or send failure in a transport driver.
    Transport(String),
    /// Malformed identifier or oversized payload at a boundary.
    Validation(String),
    /// The scheduler loop has stopped and can no longer take commands.
    Unavailable(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Invalid animation: {msg}"),
            Self::RuntimeExecution(msg) => write!(f, "Frame generation failed: {msg}"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::Validation(msg) => write!(f, "Validation failed: {msg}"),
            Self::Unavailable(msg) => write!(f, "Scheduler unavailable: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
