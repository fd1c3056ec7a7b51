//! Frame scheduler.
//!
//! Owns playback state (enabled, brightness, output type), the active
//! [`Program`], the animation sandbox, and the transport driver. All state
//! changes go through explicit command methods; nothing outside this module
//! mutates it.
//!
//! # Tick loop
//!
//! ```text
//!   enable() ──► next_tick = now
//!                   │
//!          ┌────────▼────────┐
//!          │ tick()          │  next_frame() → driver.send_frame() → observer
//!          └────────┬────────┘
//!                   │ still enabled?
//!             yes ──┴── no
//!              │         └──► loop parks until the next enable()
//!   next_tick = now + interval
//! ```
//!
//! Ticks never overlap: the next deadline is armed only after the previous
//! tick has completed, so a slow animation stretches the interval instead of
//! queueing ticks. `disable()` drops the pending deadline, so no tick fires
//! after it returns.
//!
//! The sandbox holds a Lua state, which is not `Send`. [`Scheduler::run`]
//! therefore has to be driven on a single thread, e.g. a current-thread
//! runtime or a `LocalSet`. Other tasks talk to it through
//! [`SchedulerHandle`].

pub mod commands;
pub mod status;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameSize, OutputType};
use crate::program::Program;
use crate::sandbox::{SandboxLimits, SandboxRuntime};
use crate::transport::TransportDriver;

pub use commands::{Reply, SchedulerCommand, SchedulerHandle};
pub use status::{Status, StatusObserver};

/// Delay between `turnOff` and the final status snapshot.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Driver command that blanks the fixture.
pub const TURN_OFF_COMMAND: &str = "turnOff";

/// Driver command that sets the global brightness.
pub const BRIGHTNESS_COMMAND: &str = "setBrightness";

/// Construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Frame dimensions.
    pub size: FrameSize,
    /// Target frames per second.
    pub framerate: u32,
    /// Brightness at startup.
    pub brightness: u8,
    /// Bounds for animation code.
    pub sandbox: SandboxLimits,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            size: FrameSize::default(),
            framerate: 30,
            brightness: 50,
            sandbox: SandboxLimits::default(),
        }
    }
}

impl SchedulerOptions {
    /// Time between the end of one tick and the start of the next.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.framerate.max(1)
    }
}

/// Whether the tick loop is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No ticks scheduled.
    Idle,
    /// Ticking at the frame interval.
    Running,
}

/// Playback flags reported in status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    /// Tick loop active.
    pub enabled: bool,
    /// Brightness forwarded to the driver.
    pub brightness: u8,
    /// Kind of content playing.
    pub output_type: OutputType,
}

/// The playback state machine.
pub struct Scheduler {
    size: FrameSize,
    interval: Duration,
    state: ScheduleState,
    program: Program,
    sandbox: SandboxRuntime,
    driver: Box<dyn TransportDriver>,
    observer: Box<dyn StatusObserver>,
    next_tick: Option<Instant>,
    settle_until: Option<Instant>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("size", &self.size)
            .field("interval", &self.interval)
            .field("state", &self.state)
            .field("program", &self.program)
            .field("driver", &self.driver)
            .field("next_tick", &self.next_tick)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Idle scheduler with nothing loaded.
    #[must_use]
    pub fn new(
        options: SchedulerOptions,
        driver: Box<dyn TransportDriver>,
        observer: Box<dyn StatusObserver>,
    ) -> Self {
        Self {
            size: options.size,
            interval: options.frame_interval(),
            state: ScheduleState {
                enabled: false,
                brightness: options.brightness,
                output_type: OutputType::Image,
            },
            program: Program::Empty,
            sandbox: SandboxRuntime::with_limits(options.size, options.sandbox),
            driver,
            observer,
            next_tick: None,
            settle_until: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        if self.state.enabled {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Playback flags.
    #[must_use]
    pub fn schedule_state(&self) -> ScheduleState {
        self.state
    }

    /// Frame dimensions.
    #[must_use]
    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// The active program.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Id of the running procedural animation.
    #[must_use]
    pub fn current_animation_id(&self) -> Option<&str> {
        self.program.animation_id()
    }

    /// When the next tick is due, if one is scheduled.
    #[must_use]
    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Start ticking. No-op when already running; stays idle with nothing
    /// loaded.
    pub fn enable(&mut self) {
        if self.state.enabled {
            return;
        }
        if !self.program.is_active() {
            log::info!("[scheduler] Nothing loaded, staying idle");
            return;
        }
        log::info!("[scheduler] Enabled");
        self.state.enabled = true;
        self.settle_until = None;
        self.next_tick = Some(Instant::now());
    }

    /// Stop ticking and blank the fixture.
    ///
    /// The pending tick is cancelled before this returns. A final status
    /// snapshot follows after [`SETTLE_DELAY`].
    pub fn disable(&mut self) {
        if self.state.enabled {
            log::info!("[scheduler] Disabled");
        }
        self.state.enabled = false;
        self.next_tick = None;
        self.driver.send_command(TURN_OFF_COMMAND, "");
        self.settle_until = Some(Instant::now() + SETTLE_DELAY);
    }

    /// Enable when idle, disable when running.
    pub fn toggle_power(&mut self) {
        if self.state.enabled {
            self.disable();
        } else {
            self.enable();
        }
    }

    /// Clamp to 0..=255, store, forward to the driver, and notify.
    ///
    /// Returns the stored value.
    pub fn set_brightness(&mut self, value: i64) -> u8 {
        let brightness = value.clamp(0, 255) as u8;
        self.state.brightness = brightness;
        self.driver
            .send_command(BRIGHTNESS_COMMAND, &brightness.to_string());
        self.publish_current();
        brightness
    }

    /// Stop playback and discard the program.
    pub fn clear(&mut self) {
        self.disable();
        self.sandbox.unload();
        self.program = Program::Empty;
        self.state.output_type = OutputType::Image;
    }

    /// Replace the program with animation `code` and start it.
    ///
    /// On failure the scheduler is left cleared and idle.
    pub fn run_animation(&mut self, id: &str, code: &str) -> Result<()> {
        log::info!("[scheduler] Starting animation {id}");
        self.clear();

        // A failed load leaves the sandbox unloaded, so the scheduler is
        // already cleared.
        if let Err(e) = self.sandbox.load(code) {
            log::warn!("[scheduler] Animation {id} failed to load: {e}");
            return Err(e);
        }

        self.program = Program::Procedural {
            animation_id: id.to_string(),
        };
        self.state.output_type = OutputType::Animation;
        self.enable();
        Ok(())
    }

    /// Replace the program with a frame sequence and start it.
    ///
    /// Every frame must match the configured size. An empty sequence leaves
    /// the scheduler cleared.
    pub fn load_frames(&mut self, frames: Vec<Frame>, output_type: OutputType) -> Result<()> {
        let expected = self.size.byte_len();
        if let Some((index, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, frame)| frame.len() != expected)
        {
            return Err(Error::Validation(format!(
                "frame {index} is {} bytes, expected {expected}",
                frame.len()
            )));
        }

        self.clear();
        log::info!(
            "[scheduler] Loaded {} frame(s) as {output_type:?}",
            frames.len()
        );
        self.program = Program::from_frames(frames);
        if self.program.is_active() {
            self.state.output_type = output_type;
            self.enable();
        }
        Ok(())
    }

    /// Produce the next frame from the active program.
    ///
    /// Never fails; anything that cannot produce a frame yields black.
    pub fn next_frame(&mut self) -> Frame {
        match self.program {
            Program::Empty => Frame::black(self.size),
            Program::File { .. } => self
                .program
                .advance()
                .unwrap_or_else(|| Frame::black(self.size)),
            Program::Procedural { .. } => {
                if self.sandbox.is_loaded() {
                    self.sandbox.generate_frame()
                } else {
                    Frame::black(self.size)
                }
            }
        }
    }

    /// Run one tick: produce, send, notify, and re-arm if still enabled.
    pub fn tick(&mut self) {
        self.next_tick = None;
        if !self.state.enabled {
            return;
        }

        let frame = self.next_frame();
        self.driver.send_frame(&frame);
        self.observer.publish(&self.snapshot(frame));

        if self.state.enabled {
            self.next_tick = Some(Instant::now() + self.interval);
        }
    }

    /// Snapshot outside of a tick.
    ///
    /// Sequence programs report the frame at the cursor. Procedural frames
    /// are not retained between ticks, so they report black.
    #[must_use]
    pub fn status(&self) -> Status {
        let frame = self
            .program
            .current()
            .cloned()
            .unwrap_or_else(|| Frame::black(self.size));
        self.snapshot(frame)
    }

    fn snapshot(&self, frame: Frame) -> Status {
        let runtime = match &self.program {
            Program::File { .. } => self.program.elapsed(),
            Program::Procedural { .. } => self.sandbox.elapsed(),
            Program::Empty => None,
        }
        .unwrap_or_default();

        Status {
            enabled: self.state.enabled,
            frame: frame.into_bytes(),
            width: self.size.width,
            height: self.size.height,
            brightness: self.state.brightness,
            runtime: u64::try_from(runtime.as_millis()).unwrap_or(u64::MAX),
            output_type: self.state.output_type,
        }
    }

    fn publish_current(&self) {
        self.observer.publish(&self.status());
    }

    /// Apply one command.
    pub fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Enable => self.enable(),
            SchedulerCommand::Disable => self.disable(),
            SchedulerCommand::TogglePower => self.toggle_power(),
            SchedulerCommand::SetBrightness(value) => {
                self.set_brightness(value);
            }
            SchedulerCommand::RunAnimation { id, code, reply } => {
                let _ = reply.send(self.run_animation(&id, &code));
            }
            SchedulerCommand::LoadFrames {
                frames,
                output_type,
                reply,
            } => {
                let _ = reply.send(self.load_frames(frames, output_type));
            }
            SchedulerCommand::Clear => self.clear(),
        }
    }

    /// Drive the scheduler until every [`SchedulerHandle`] is dropped.
    ///
    /// On exit the fixture is turned off.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SchedulerCommand>) {
        log::info!(
            "[scheduler] Running at {:?} per frame ({}x{})",
            self.interval,
            self.size.width,
            self.size.height
        );
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                () = sleep_until_opt(self.next_tick) => self.tick(),
                () = sleep_until_opt(self.settle_until) => {
                    self.settle_until = None;
                    self.publish_current();
                }
            }
        }
        log::info!("[scheduler] Command channel closed, stopping");
        self.disable();
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
