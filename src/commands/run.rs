//! `barlight run`: the long-running service.
//!
//! Wires the pieces together on one current-thread runtime:
//!
//! ```text
//! control clients ──► ControlServer ──► SchedulerHandle ──► Scheduler ──► driver task ──► LEDs
//!        ▲                                                     │
//!        ├──────────────── watch<Status> ◄─────────────────────┘
//!        └──────────────── watch<bool> ◄── track_events ◄── DriverEvent
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::control::ControlServer;
use crate::frame::{split_frames, OutputType};
use crate::scheduler::{Scheduler, SchedulerHandle, Status};
use crate::storage::{AnimationStore, DirectoryStore};
use crate::transport;

/// Commands buffered between the control server and the scheduler.
const COMMAND_QUEUE: usize = 32;

/// Time given to driver tasks to flush the final `turnOff`.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Run until Ctrl-C.
pub fn run(config: &Config, frames: Option<&Path>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(serve(config, frames))
}

async fn serve(config: &Config, frames: Option<&Path>) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let driver = transport::spawn_driver(&config.driver, config.layout(), event_tx);
    log::info!("Driver: {}", config.driver);
    let (driver_tx, driver_rx) = watch::channel(false);
    tokio::spawn(transport::track_events(event_rx, driver_tx));

    let (status_tx, status_rx) = watch::channel(Status::default());
    let mut scheduler = Scheduler::new(config.scheduler_options(), driver, Box::new(status_tx));

    if let Some(path) = frames {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read frames from {}", path.display()))?;
        let frames = split_frames(config.frame, &raw)
            .with_context(|| format!("Invalid frame file {}", path.display()))?;
        let output_type = OutputType::for_sequence(frames.len(), false);
        scheduler.load_frames(frames, output_type)?;
    }

    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let store: Arc<dyn AnimationStore> = Arc::new(DirectoryStore::new(&config.animations_dir));
    log::info!("Animations: {}", config.animations_dir.display());

    let listener = ControlServer::bind(&config.control_addr).await?;
    let shutdown = CancellationToken::new();
    let server = ControlServer::new(
        SchedulerHandle::new(command_tx),
        store,
        status_rx,
        driver_rx,
    );
    let server_task = tokio::spawn(server.serve(listener, shutdown.clone()));

    let scheduler_loop = scheduler.run(command_rx);
    tokio::pin!(scheduler_loop);

    tokio::select! {
        () = &mut scheduler_loop => {
            log::warn!("Scheduler stopped unexpectedly");
            shutdown.cancel();
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            log::info!("Shutting down");
            shutdown.cancel();
            // The loop ends once every control client has dropped its
            // handle; it then turns the fixture off.
            if tokio::time::timeout(Duration::from_secs(2), &mut scheduler_loop)
                .await
                .is_err()
            {
                log::warn!("Scheduler did not stop in time");
            }
        }
    }

    match server_task.await {
        Ok(result) => result?,
        Err(e) => log::warn!("Control server task failed: {e}"),
    }
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}
