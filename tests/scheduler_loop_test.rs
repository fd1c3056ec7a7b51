//! Integration tests for the scheduler event loop.
//!
//! The loop runs on a paused tokio clock, so tick counts are exact.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use barlight::frame::{Frame, FrameSize, OutputType};
use barlight::scheduler::{
    Scheduler, SchedulerHandle, SchedulerOptions, Status, StatusObserver,
};
use barlight::transport::{TransportDriver, TransportEndpoint};
use tokio::sync::mpsc;
use tokio::task::LocalSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Frame(Vec<u8>),
    Command(String, String),
}

#[derive(Debug, Clone, Default)]
struct Log(Rc<RefCell<Vec<Sent>>>);

impl Log {
    fn frames(&self) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .iter()
            .filter_map(|s| match s {
                Sent::Frame(f) => Some(f.clone()),
                Sent::Command(..) => None,
            })
            .collect()
    }

    fn commands(&self) -> Vec<(String, String)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|s| match s {
                Sent::Command(n, v) => Some((n.clone(), v.clone())),
                Sent::Frame(_) => None,
            })
            .collect()
    }
}

#[derive(Debug)]
struct RecordingDriver {
    endpoint: TransportEndpoint,
    log: Log,
}

impl TransportDriver for RecordingDriver {
    fn endpoint(&self) -> &TransportEndpoint {
        &self.endpoint
    }

    fn send_frame(&self, frame: &Frame) {
        self.log.0.borrow_mut().push(Sent::Frame(frame.as_bytes().to_vec()));
    }

    fn send_command(&self, name: &str, value: &str) {
        self.log
            .0
            .borrow_mut()
            .push(Sent::Command(name.to_string(), value.to_string()));
    }
}

#[derive(Debug, Clone, Default)]
struct Statuses(Rc<RefCell<Vec<Status>>>);

impl StatusObserver for Statuses {
    fn publish(&self, status: &Status) {
        self.0.borrow_mut().push(status.clone());
    }
}

const SIZE: FrameSize = FrameSize {
    width: 2,
    height: 2,
};

/// Scheduler at 10 fps (100 ms interval) running on `local`.
fn start(local: &LocalSet) -> (SchedulerHandle, Log, Statuses) {
    let log = Log::default();
    let statuses = Statuses::default();
    let driver = RecordingDriver {
        endpoint: TransportEndpoint::Datagram {
            ip: "127.0.0.1".into(),
            port: 4210,
        },
        log: log.clone(),
    };
    let options = SchedulerOptions {
        size: SIZE,
        framerate: 10,
        ..SchedulerOptions::default()
    };
    let scheduler = Scheduler::new(options, Box::new(driver), Box::new(statuses.clone()));
    let (tx, rx) = mpsc::channel(8);
    local.spawn_local(scheduler.run(rx));
    (SchedulerHandle::new(tx), log, statuses)
}

fn numbered(n: u8) -> Vec<Frame> {
    (0..n)
        .map(|i| Frame::from_bytes(SIZE, vec![i + 1; SIZE.byte_len()]).unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_ticks_follow_frame_interval() {
    let local = LocalSet::new();
    let (handle, log, _) = start(&local);

    local
        .run_until(async move {
            handle
                .load_frames(numbered(5), OutputType::Animation)
                .await
                .expect("Should load frames");
            // Ticks at 0, 100 and 200 ms.
            tokio::time::sleep(Duration::from_millis(250)).await;
            assert_eq!(log.frames().len(), 3);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_sequence_wraps_around() {
    let local = LocalSet::new();
    let (handle, log, _) = start(&local);

    local
        .run_until(async move {
            handle.load_frames(numbered(3), OutputType::Animation).await.unwrap();
            tokio::time::sleep(Duration::from_millis(350)).await;
            let firsts: Vec<u8> = log.frames().iter().map(|f| f[0]).collect();
            assert_eq!(firsts, vec![1, 2, 3, 1]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_runtime_resets_on_wrap() {
    let local = LocalSet::new();
    let (handle, _, statuses) = start(&local);

    local
        .run_until(async move {
            handle.load_frames(numbered(3), OutputType::Animation).await.unwrap();
            tokio::time::sleep(Duration::from_millis(350)).await;
            let runtimes: Vec<u64> = statuses.0.borrow().iter().map(|s| s.runtime).collect();
            assert_eq!(runtimes, vec![0, 100, 200, 0]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_no_ticks_after_disable() {
    let local = LocalSet::new();
    let (handle, log, statuses) = start(&local);

    local
        .run_until(async move {
            handle.load_frames(numbered(4), OutputType::Animation).await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            handle.disable().await.unwrap();
            tokio::task::yield_now().await;
            let sent_before = log.frames().len();

            tokio::time::sleep(Duration::from_secs(2)).await;
            assert_eq!(log.frames().len(), sent_before);
            assert_eq!(
                log.commands().last(),
                Some(&("turnOff".to_string(), String::new()))
            );

            // One more snapshot after the settle delay, reporting disabled.
            let last = statuses.0.borrow().last().cloned().unwrap();
            assert!(!last.enabled);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_toggle_power_resumes() {
    let local = LocalSet::new();
    let (handle, log, _) = start(&local);

    local
        .run_until(async move {
            handle.load_frames(numbered(2), OutputType::Animation).await.unwrap();
            handle.toggle_power().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            let paused = log.frames().len();
            assert!(paused <= 1);

            handle.toggle_power().await.unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
            assert_eq!(log.frames().len(), paused + 3);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_brightness_clamped_through_handle() {
    let local = LocalSet::new();
    let (handle, log, statuses) = start(&local);

    local
        .run_until(async move {
            for value in [-1, 256, 128] {
                handle.set_brightness(value).await.unwrap();
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;

            let values: Vec<String> = log
                .commands()
                .into_iter()
                .filter(|(name, _)| name == "setBrightness")
                .map(|(_, value)| value)
                .collect();
            assert_eq!(values, vec!["0", "255", "128"]);
            assert_eq!(statuses.0.borrow().last().unwrap().brightness, 128);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_animation_reports_error_and_idles() {
    let local = LocalSet::new();
    let (handle, log, _) = start(&local);

    local
        .run_until(async move {
            let err = handle.run_animation("bad", "{}").await.unwrap_err();
            assert!(matches!(err, barlight::Error::Config(_)));
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(log.frames().is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_procedural_animation_ticks() {
    let local = LocalSet::new();
    let (handle, log, statuses) = start(&local);

    local
        .run_until(async move {
            handle
                .run_animation(
                    "corner",
                    "return function(frame, t) frame:set_pixel(1, 1, { r = 1, g = 2, b = 3 }) end",
                )
                .await
                .expect("Should start animation");
            tokio::time::sleep(Duration::from_millis(150)).await;

            let frames = log.frames();
            assert_eq!(frames.len(), 2);
            assert_eq!(&frames[0][9..12], &[1, 2, 3]);
            assert_eq!(
                statuses.0.borrow().last().unwrap().output_type,
                OutputType::Animation
            );
        })
        .await;
}
