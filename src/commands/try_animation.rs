//! `barlight try-animation`: run animation code offline.
//!
//! Loads a Lua file into a sandbox sized like the configured fixture,
//! renders a few frames back to back, and prints what came out. Nothing is
//! sent to hardware.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::frame::CHANNELS;
use crate::sandbox::SandboxRuntime;

/// Summary of a dry run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialReport {
    /// Frames rendered.
    pub frames: usize,
    /// Frames with no lit pixel.
    pub black_frames: usize,
    /// Lit pixels in the last frame.
    pub lit_pixels: usize,
    /// Slowest frame.
    pub slowest: Duration,
}

/// Load `source` and render `frames` frames.
pub fn trial(config: &Config, source: &str, frames: usize) -> Result<TrialReport> {
    let options = config.scheduler_options();
    let mut runtime = SandboxRuntime::with_limits(options.size, options.sandbox);
    runtime.load(source)?;

    let mut report = TrialReport {
        frames,
        black_frames: 0,
        lit_pixels: 0,
        slowest: Duration::ZERO,
    };
    for _ in 0..frames {
        let started = Instant::now();
        let frame = runtime.generate_frame();
        report.slowest = report.slowest.max(started.elapsed());
        if frame.is_black() {
            report.black_frames += 1;
        }
        report.lit_pixels = frame
            .as_bytes()
            .chunks_exact(CHANNELS)
            .filter(|px| px.iter().any(|c| *c != 0))
            .count();
    }
    Ok(report)
}

/// CLI entry point.
pub fn run(config: &Config, path: &Path, frames: usize) -> Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let report = trial(config, &source, frames)
        .with_context(|| format!("{} did not load", path.display()))?;

    println!(
        "{}: {} frame(s), {} black, {} lit pixel(s) in the last frame, slowest {:.1} ms",
        path.display(),
        report.frames,
        report.black_frames,
        report.lit_pixels,
        report.slowest.as_secs_f64() * 1000.0
    );
    if report.frames > 0 && report.black_frames == report.frames {
        println!("Every frame was black; check the log for errors raised by the animation.");
    }
    Ok(())
}
