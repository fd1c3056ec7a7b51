//! barlight - frame scheduler for serpentine-wired LED bar fixtures.
//!
//! Produces RGB frames, either from a decoded frame sequence or from
//! user-written Lua animations running in a sandbox, reorders them into
//! the fixture's physical wiring order, and pushes them to the LED
//! controller over serial, UDP or WebSocket.
//!
//! # Architecture
//!
//! - **Scheduler** - state machine owning playback, cadence and brightness
//! - **Program** - the active frame source
//! - **Sandbox** - isolated Lua host for animation code
//! - **Transport** - drivers for the LED controller, with wiring transform
//! - **Control** - WebSocket for frontends
//! - **Storage** - animation definitions on disk
//!
//! # Modules
//!
//! - [`scheduler`] - tick loop, commands, status snapshots
//! - [`sandbox`] - animation runtime and frame capability
//! - [`transport`] - stream, datagram and socket drivers
//! - [`matrix`] - serpentine wiring transform
//! - [`config`] - configuration loading

pub mod commands;
pub mod config;
pub mod control;
pub mod error;
pub mod frame;
pub mod matrix;
pub mod program;
pub mod sandbox;
pub mod scheduler;
pub mod storage;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use frame::{Frame, FrameSize, OutputType};
pub use matrix::{transform, WiringLayout};
pub use program::Program;
pub use sandbox::{FrameHandle, SandboxLimits, SandboxRuntime};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerOptions, SchedulerState, Status};
pub use transport::{DriverEvent, TransportDriver, TransportEndpoint};
