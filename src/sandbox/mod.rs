//! Sandbox for user-authored animations.
//!
//! Animations are Lua 5.4 functions called once per frame. Each loaded
//! animation gets a private Lua state with a minimal environment:
//!
//! ```text
//! SandboxRuntime
//!  └── LoadedAnimation
//!       ├── Lua state (mlua, math/string/table only, memory cap)
//!       ├── instruction hook (compile and per-frame deadlines)
//!       └── environment
//!            ├── math, string (no patterns), table, basic value functions
//!            ├── log / print (rate limited)
//!            └── frame argument (FrameHandle userdata)
//! ```
//!
//! # Preemption
//!
//! Deadlines are enforced by a count hook that runs every
//! [`SandboxLimits::hook_interval`] VM instructions, so pure-Lua loops are
//! always interrupted. Native library calls do not reach the hook, so only
//! functions whose running time is bounded by their input are exposed. The
//! backtracking pattern functions (`string.find`, `match`, `gmatch`, `gsub`)
//! are removed, and `setmetatable` is withheld so scripts cannot install
//! finalizers. A call like `string.rep` that grows its output is bounded by
//! the memory cap.

mod frame_handle;
mod log;
mod runtime;

pub use frame_handle::{FrameHandle, Rgb};
pub use runtime::{SandboxLimits, SandboxRuntime};
