//! Sandboxed animation runtime.
//!
//! Provides [`SandboxRuntime`], which owns a private Lua state per loaded
//! animation and turns it into frames. The runtime never lets an animation
//! failure escape [`SandboxRuntime::generate_frame`]: errors, timeouts and
//! memory exhaustion all produce a black frame and leave the animation loaded.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, Lua, LuaOptions, StdLib, Table, Value, VmState};

use super::frame_handle::FrameHandle;
use super::log::{self as log_sink, LogBudget};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameSize};

/// Message raised inside Lua when a deadline passes.
const TIMEOUT_MESSAGE: &str = "execution time limit exceeded";

/// Globals copied into an animation's environment.
///
/// Deliberately absent: `io`, `os`, `require`, `load`, `dofile`, `pcall`,
/// `xpcall`, `coroutine`, `getmetatable`, `setmetatable`, `collectgarbage`.
const SAFE_GLOBALS: &[&str] = &[
    "math",
    "string",
    "table",
    "pairs",
    "ipairs",
    "next",
    "select",
    "tostring",
    "tonumber",
    "type",
    "error",
    "assert",
    "rawget",
    "rawset",
    "rawequal",
    "rawlen",
];

/// Pattern functions removed from `string`. Their matcher runs natively and
/// can backtrack for a long time without reaching the instruction hook.
const PATTERN_FUNCTIONS: &[&str] = &["find", "match", "gmatch", "gsub"];

/// Resource bounds for animation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Budget for evaluating the source into a callable.
    pub compile_timeout: Duration,
    /// Budget for a single frame.
    pub frame_timeout: Duration,
    /// Log calls forwarded per load.
    pub max_log_lines: usize,
    /// Lua heap limit in bytes.
    pub memory_limit: usize,
    /// VM instructions between deadline checks.
    pub hook_interval: u32,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            compile_timeout: Duration::from_millis(1000),
            frame_timeout: Duration::from_millis(100),
            max_log_lines: 100,
            memory_limit: 16 * 1024 * 1024,
            hook_interval: 1000,
        }
    }
}

/// A compiled animation and the Lua state it lives in.
struct LoadedAnimation {
    /// The user's `function(frame, t)`. Declared before `lua` so it drops first.
    callback: Function,
    /// Deadline checked by the instruction hook; `None` outside of calls.
    deadline: Rc<Cell<Option<Instant>>>,
    /// Origin for the elapsed-seconds argument.
    origin: Instant,
    log_budget: Rc<LogBudget>,
    lua: Lua,
}

impl LoadedAnimation {
    fn render(&self, size: FrameSize, frame_timeout: Duration) -> Result<Frame> {
        let elapsed = self.origin.elapsed().as_secs_f64();

        // Allocating may run a garbage collection step, so the clock starts first.
        self.deadline.set(Some(Instant::now() + frame_timeout));
        let result = self
            .lua
            .create_userdata(FrameHandle::new(size))
            .map_err(|e| Error::RuntimeExecution(format!("frame allocation failed: {e}")))
            .and_then(|handle| {
                self.callback
                    .call::<()>((handle.clone(), elapsed))
                    .map(|()| handle)
                    .map_err(|e| Error::RuntimeExecution(e.to_string()))
            });
        self.deadline.set(None);
        let handle = result?;

        // Taking the value detaches it from any reference the script kept.
        let handle = handle
            .take::<FrameHandle>()
            .map_err(|e| Error::RuntimeExecution(format!("frame handle unavailable: {e}")))?;
        Ok(handle.into_frame())
    }
}

/// Host for untrusted per-frame color functions.
///
/// An animation is Lua source that evaluates to `function(frame, t)`, where
/// `frame` is a [`FrameHandle`] and `t` the seconds since load (or the last
/// [`reset`](Self::reset)). Either a bare expression or a chunk that
/// `return`s the function is accepted:
///
/// ```lua
/// function(frame, t)
///     local v = math.floor((math.sin(t) + 1) * 127)
///     frame:fill({ r = v, b = 255 - v })
/// end
/// ```
///
/// # States
///
/// `Unloaded --load(ok)--> Loaded`, `Loaded --unload()/load(err)--> Unloaded`.
/// [`generate_frame`](Self::generate_frame) requires `Loaded`.
pub struct SandboxRuntime {
    size: FrameSize,
    limits: SandboxLimits,
    loaded: Option<LoadedAnimation>,
}

impl std::fmt::Debug for SandboxRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRuntime")
            .field("size", &self.size)
            .field("limits", &self.limits)
            .field("loaded", &self.loaded.is_some())
            .finish()
    }
}

impl SandboxRuntime {
    /// Create an unloaded runtime with default limits.
    #[must_use]
    pub fn new(size: FrameSize) -> Self {
        Self::with_limits(size, SandboxLimits::default())
    }

    /// Create an unloaded runtime with explicit limits.
    #[must_use]
    pub fn with_limits(size: FrameSize, limits: SandboxLimits) -> Self {
        Self {
            size,
            limits,
            loaded: None,
        }
    }

    /// Frame dimensions produced by this runtime.
    #[must_use]
    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// Whether an animation is loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Compile `source` into the active animation.
    ///
    /// Any previously loaded animation is discarded first, so on error the
    /// runtime is left unloaded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the source is empty, fails to parse,
    /// raises while evaluating, exceeds the compile budget, or does not
    /// evaluate to a function.
    pub fn load(&mut self, source: &str) -> Result<()> {
        self.unload();

        let source = source.trim();
        if source.is_empty() {
            return Err(Error::Config("animation code is empty".into()));
        }

        let (lua, deadline) = self.new_state()?;
        let (env, log_budget) = self.environment(&lua)?;

        deadline.set(Some(Instant::now() + self.limits.compile_timeout));
        let evaluated = lua
            .load(source)
            .set_name("animation")
            .set_environment(env)
            .eval::<Value>();
        deadline.set(None);

        let callback = match evaluated {
            Ok(Value::Function(callback)) => callback,
            Ok(other) => {
                return Err(Error::Config(format!(
                    "animation must evaluate to a function, got {}",
                    other.type_name()
                )));
            }
            Err(e) => return Err(Error::Config(e.to_string())),
        };

        log::debug!(
            "[sandbox] Animation compiled ({} bytes, {}x{})",
            source.len(),
            self.size.width,
            self.size.height
        );

        self.loaded = Some(LoadedAnimation {
            callback,
            deadline,
            origin: Instant::now(),
            log_budget,
            lua,
        });
        Ok(())
    }

    /// Produce the next frame.
    ///
    /// Never fails: if the animation errors, times out or runs out of
    /// memory, the failure is logged and a black frame is returned. The
    /// animation stays loaded for the next call.
    ///
    /// Calling this while unloaded is a caller bug; it is logged and yields
    /// black.
    pub fn generate_frame(&mut self) -> Frame {
        let Some(animation) = &self.loaded else {
            log::warn!("[sandbox] generate_frame called with no animation loaded");
            return Frame::black(self.size);
        };

        match animation.render(self.size, self.limits.frame_timeout) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[sandbox] {e}");
                Frame::black(self.size)
            }
        }
    }

    /// Restart elapsed time at zero without recompiling.
    pub fn reset(&mut self) {
        if let Some(animation) = &mut self.loaded {
            animation.origin = Instant::now();
        }
    }

    /// Seconds since load or the last reset, if loaded.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.loaded.as_ref().map(|a| a.origin.elapsed())
    }

    /// Drop the animation and its Lua state.
    pub fn unload(&mut self) {
        if let Some(animation) = self.loaded.take() {
            // Anything Lua still runs while the state closes is already late.
            animation.deadline.set(Some(Instant::now()));
            drop(animation);
            log::debug!("[sandbox] Animation unloaded");
        }
    }

    /// Log calls counted against the loaded animation's budget.
    #[cfg(test)]
    pub(crate) fn log_lines_used(&self) -> Option<usize> {
        self.loaded.as_ref().map(|a| a.log_budget.used())
    }

    /// Fresh Lua state with restricted libraries, a memory cap and the
    /// deadline hook installed.
    fn new_state(&self) -> Result<(Lua, Rc<Cell<Option<Instant>>>)> {
        let lua = Lua::new_with(
            StdLib::MATH | StdLib::STRING | StdLib::TABLE,
            LuaOptions::new(),
        )
        .map_err(|e| Error::Config(format!("failed to create Lua state: {e}")))?;

        lua.set_memory_limit(self.limits.memory_limit)
            .map_err(|e| Error::Config(format!("failed to set memory limit: {e}")))?;

        // `string` is also the `__index` of every string value, so the
        // functions are removed from the shared table itself.
        let strip = || -> mlua::Result<()> {
            let string: Table = lua.globals().get("string")?;
            for name in PATTERN_FUNCTIONS {
                string.set(*name, Value::Nil)?;
            }
            Ok(())
        };
        strip().map_err(|e| Error::Config(format!("failed to restrict string library: {e}")))?;

        let deadline: Rc<Cell<Option<Instant>>> = Rc::new(Cell::new(None));
        let hook_deadline = Rc::clone(&deadline);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(self.limits.hook_interval),
            move |_lua, _debug| match hook_deadline.get() {
                Some(deadline) if Instant::now() >= deadline => {
                    Err(mlua::Error::runtime(TIMEOUT_MESSAGE))
                }
                _ => Ok(VmState::Continue),
            },
        );

        Ok((lua, deadline))
    }

    /// Environment table an animation sees as its globals.
    fn environment(&self, lua: &Lua) -> Result<(Table, Rc<LogBudget>)> {
        let build = || -> mlua::Result<Table> {
            let globals = lua.globals();
            let env = lua.create_table()?;
            for name in SAFE_GLOBALS {
                env.set(*name, globals.get::<Value>(*name)?)?;
            }
            Ok(env)
        };
        let env = build().map_err(|e| Error::Config(format!("failed to build environment: {e}")))?;

        let budget = LogBudget::new(self.limits.max_log_lines);
        log_sink::register(lua, &env, &budget).map_err(|e| Error::Config(format!("{e:#}")))?;

        Ok((env, budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> SandboxRuntime {
        SandboxRuntime::new(FrameSize::new(4, 3))
    }

    fn assert_black(frame: &Frame) {
        assert_eq!(frame.len(), 4 * 3 * 3);
        assert!(frame.is_black(), "expected a black frame");
    }

    #[test]
    fn test_bare_function_expression_loads() {
        let mut rt = runtime();
        rt.load("function(frame, t) frame:fill({ r = 10 }) end")
            .expect("function expression should load");
        assert!(rt.is_loaded());

        let frame = rt.generate_frame();
        assert_eq!(&frame.as_bytes()[..3], &[10, 0, 0]);
        assert!(frame.as_bytes().chunks(3).all(|px| px == [10, 0, 0]));
    }

    #[test]
    fn test_chunk_returning_function_loads() {
        let mut rt = runtime();
        rt.load(
            r#"
            local color = { g = 200 }
            return function(frame, t)
                frame:set_pixel(3, 2, color)
            end
            "#,
        )
        .expect("chunk returning a function should load");

        let frame = rt.generate_frame();
        let last = &frame.as_bytes()[frame.len() - 3..];
        assert_eq!(last, &[0, 200, 0]);
    }

    #[test]
    fn test_non_callable_is_rejected() {
        let mut rt = runtime();
        let err = rt.load("{}").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!rt.is_loaded());
    }

    #[test]
    fn test_syntax_error_is_rejected_and_unloads_previous() {
        let mut rt = runtime();
        rt.load("function(frame, t) end").unwrap();
        assert!(rt.is_loaded());

        let err = rt.load("function(frame, t").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!rt.is_loaded());
    }

    #[test]
    fn test_empty_source_is_rejected() {
        let mut rt = runtime();
        assert!(matches!(rt.load("   \n"), Err(Error::Config(_))));
    }

    #[test]
    fn test_compile_budget_is_enforced() {
        let mut rt = SandboxRuntime::with_limits(
            FrameSize::new(2, 2),
            SandboxLimits {
                compile_timeout: Duration::from_millis(50),
                ..SandboxLimits::default()
            },
        );
        let started = Instant::now();
        let err = rt
            .load("while true do end return function(frame, t) end")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains(TIMEOUT_MESSAGE), "got: {err}");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!rt.is_loaded());
    }

    #[test]
    fn test_throwing_callable_yields_black_and_stays_loaded() {
        let mut rt = runtime();
        rt.load(r#"function(frame, t) frame:fill({ r = 255 }) error("boom") end"#)
            .unwrap();
        assert_black(&rt.generate_frame());
        assert!(rt.is_loaded());
        assert_black(&rt.generate_frame());
    }

    #[test]
    fn test_infinite_loop_yields_black_and_stays_loaded() {
        let mut rt = runtime();
        rt.load("function(frame, t) frame:fill({ b = 9 }) while true do end end")
            .unwrap();
        let started = Instant::now();
        assert_black(&rt.generate_frame());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(rt.is_loaded());
    }

    #[test]
    fn test_callable_returning_nil_yields_black() {
        let mut rt = runtime();
        rt.load("function(frame, t) return nil end").unwrap();
        assert_black(&rt.generate_frame());
        assert!(rt.is_loaded());
    }

    #[test]
    fn test_memory_exhaustion_yields_black() {
        let mut rt = SandboxRuntime::with_limits(
            FrameSize::new(2, 2),
            SandboxLimits {
                memory_limit: 2 * 1024 * 1024,
                ..SandboxLimits::default()
            },
        );
        rt.load(
            r#"
            function(frame, t)
                local parts = {}
                for i = 1, 1e7 do parts[i] = string.rep("x", 64) .. i end
            end
            "#,
        )
        .unwrap();
        assert!(rt.generate_frame().is_black());
        assert!(rt.is_loaded());
    }

    #[test]
    fn test_dangerous_globals_are_absent() {
        let mut rt = runtime();
        rt.load(
            r#"
            function(frame, t)
                if io == nil and os == nil and require == nil and load == nil
                    and pcall == nil and coroutine == nil
                    and setmetatable == nil and getmetatable == nil then
                    frame:fill({ g = 1 })
                end
            end
            "#,
        )
        .unwrap();
        let frame = rt.generate_frame();
        assert_eq!(&frame.as_bytes()[..3], &[0, 1, 0]);
    }

    #[test]
    fn test_string_patterns_are_unavailable() {
        let mut rt = runtime();
        rt.load(
            r#"
            function(frame, t)
                if string.find == nil and string.match == nil
                    and string.gmatch == nil and string.gsub == nil then
                    frame:fill({ g = 2 })
                end
            end
            "#,
        )
        .unwrap();
        assert_eq!(&rt.generate_frame().as_bytes()[..3], &[0, 2, 0]);

        // Method syntax goes through the same table.
        rt.load(
            r#"
            function(frame, t)
                frame:fill({ r = 9 })
                local s = string.rep("a", 40)
                s:find(string.rep("a*", 20) .. "b")
            end
            "#,
        )
        .unwrap();
        let started = Instant::now();
        assert_black(&rt.generate_frame());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(rt.is_loaded());

        // Plain helpers survive.
        rt.load(
            r#"
            function(frame, t)
                if ("ab"):upper() == "AB" and string.format("%d", 3) == "3" then
                    frame:fill({ b = 4 })
                end
            end
            "#,
        )
        .unwrap();
        assert_eq!(&rt.generate_frame().as_bytes()[..3], &[0, 0, 4]);
    }

    #[test]
    fn test_unload_does_not_run_script_finalizers() {
        let mut rt = runtime();
        rt.load(
            r#"
            local ok = pcall == nil and setmetatable == nil
            local keep = {}
            if setmetatable then
                keep = setmetatable({}, { __gc = function() while true do end end })
            end
            return function(frame, t)
                if ok then frame:fill({ r = 1 }) end
            end
            "#,
        )
        .unwrap();
        assert_eq!(&rt.generate_frame().as_bytes()[..3], &[1, 0, 0]);

        let started = Instant::now();
        rt.unload();
        assert!(!rt.is_loaded());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_log_budget_spans_frames_and_resets_on_reload() {
        let mut rt = runtime();
        let chatty = "function(frame, t) for i = 1, 150 do log.info('tick', i) end end";
        rt.load(chatty).unwrap();
        assert_eq!(rt.log_lines_used(), Some(0));

        // 100 forwarded plus the one limit warning.
        rt.generate_frame();
        assert_eq!(rt.log_lines_used(), Some(101));
        // No second warning on later frames.
        rt.generate_frame();
        assert_eq!(rt.log_lines_used(), Some(101));

        rt.load(chatty).unwrap();
        assert_eq!(rt.log_lines_used(), Some(0));
        rt.generate_frame();
        assert_eq!(rt.log_lines_used(), Some(101));

        rt.unload();
        assert_eq!(rt.log_lines_used(), None);
    }

    #[test]
    fn test_elapsed_time_is_passed_and_reset() {
        let mut rt = runtime();
        rt.load(
            r#"
            function(frame, t)
                if t >= 0 and t < 1 then frame:fill({ r = 1 }) end
            end
            "#,
        )
        .unwrap();
        rt.reset();
        assert_eq!(&rt.generate_frame().as_bytes()[..3], &[1, 0, 0]);
        assert!(rt.elapsed().is_some());
    }

    #[test]
    fn test_frames_are_independent() {
        let mut rt = runtime();
        rt.load(
            r#"
            local n = 0
            return function(frame, t)
                n = n + 1
                if n == 1 then frame:fill({ r = 5 }) end
            end
            "#,
        )
        .unwrap();
        assert!(!rt.generate_frame().is_black());
        assert!(rt.generate_frame().is_black());
    }

    #[test]
    fn test_stashed_handle_is_unusable_next_tick() {
        let mut rt = runtime();
        rt.load(
            r#"
            local previous
            return function(frame, t)
                if previous then previous:fill({ r = 1 }) end
                previous = frame
                frame:fill({ g = 3 })
            end
            "#,
        )
        .unwrap();
        assert_eq!(&rt.generate_frame().as_bytes()[..3], &[0, 3, 0]);
        // Touching last tick's handle raises, which turns this frame black.
        assert!(rt.generate_frame().is_black());
    }

    #[test]
    fn test_unload_and_generate_while_unloaded() {
        let mut rt = runtime();
        rt.load("function(frame, t) frame:fill({ r = 1 }) end").unwrap();
        rt.unload();
        assert!(!rt.is_loaded());
        assert!(rt.elapsed().is_none());
        assert_black(&rt.generate_frame());
    }
}
