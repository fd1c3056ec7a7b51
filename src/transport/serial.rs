//! Serial device setup.
//!
//! Opens the tty in raw mode at the requested speed. Incoming bytes are
//! read on a dedicated OS thread and forwarded as feedback events, which
//! keeps a blocking tty read from ever stalling the async write side.
//!
//! Reads time out every `READ_TIMEOUT_DECIS` tenths of a second so the
//! thread notices when its [`SerialPort`] has been dropped and exits,
//! closing its handle on the device.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use super::DriverEventSender;

/// Tty read timeout (`VTIME`), in tenths of a second.
#[cfg(unix)]
const READ_TIMEOUT_DECIS: libc::cc_t = 5;

/// Write side of an open serial device.
///
/// Dropping it stops the feedback reader thread.
#[derive(Debug)]
pub(crate) struct SerialPort {
    file: tokio::fs::File,
    stop: Arc<AtomicBool>,
}

impl SerialPort {
    fn new(file: std::fs::File, stop: Arc<AtomicBool>) -> Self {
        Self {
            file: tokio::fs::File::from_std(file),
            stop,
        }
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl AsyncWrite for SerialPort {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

/// Open `path`, configure it, and return the write side.
pub(crate) async fn open(
    path: PathBuf,
    baud: u32,
    events: DriverEventSender,
) -> io::Result<SerialPort> {
    tokio::task::spawn_blocking(move || open_blocking(&path, baud, events))
        .await
        .map_err(|e| io::Error::other(format!("serial open task failed: {e}")))?
}

#[cfg(unix)]
fn open_blocking(
    path: &std::path::Path,
    baud: u32,
    events: DriverEventSender,
) -> io::Result<SerialPort> {
    use std::os::unix::fs::OpenOptionsExt;

    let speed = speed_constant(baud).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported baud rate {baud}"),
        )
    })?;

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)?;
    configure(&file, speed)?;

    let reader = file.try_clone()?;
    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = Arc::clone(&stop);
    std::thread::Builder::new()
        .name("serial-feedback".to_string())
        .spawn(move || read_feedback(reader, &reader_stop, &events))?;

    log::debug!("[serial] Opened {} at {baud} baud", path.display());
    Ok(SerialPort::new(file, stop))
}

#[cfg(not(unix))]
fn open_blocking(
    path: &std::path::Path,
    _baud: u32,
    _events: DriverEventSender,
) -> io::Result<SerialPort> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("serial devices are not supported on this platform: {}", path.display()),
    ))
}

/// Put the tty into raw mode at `speed`, with reads that return empty after
/// `READ_TIMEOUT_DECIS` of silence.
#[cfg(unix)]
fn configure(file: &std::fs::File, speed: libc::speed_t) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = file.as_raw_fd();

    // SAFETY: termios is a plain C struct; an all-zero value is valid and is
    // fully overwritten by tcgetattr below.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` belongs to `file`, which outlives these calls, and `tio`
    // is a valid exclusive pointer for their duration.
    unsafe {
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = READ_TIMEOUT_DECIS;
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn speed_constant(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460_800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921_600 => libc::B921600,
        _ => return None,
    };
    Some(speed)
}

/// Forward bytes from `reader` until `stop` is set, the event channel
/// closes, or the read fails.
#[cfg(unix)]
fn read_feedback(mut reader: impl io::Read, stop: &AtomicBool, events: &DriverEventSender) {
    let mut buf = [0u8; 256];
    while !stop.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            // Read timeout with nothing received.
            Ok(0) => {}
            Ok(n) => {
                if events
                    .send(super::DriverEvent::Feedback(buf[..n].to_vec()))
                    .is_err()
                {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("[serial] Feedback read failed: {e}");
                break;
            }
        }
    }
    log::debug!("[serial] Feedback reader stopped");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::transport::DriverEvent;

    #[test]
    fn test_standard_speeds_are_mapped() {
        assert_eq!(speed_constant(115_200), Some(libc::B115200));
        assert_eq!(speed_constant(9600), Some(libc::B9600));
        assert_eq!(speed_constant(12_345), None);
    }

    /// Replays `chunks`, then behaves like an idle tty; sets `stop` once
    /// everything has been read.
    struct IdleAfter {
        chunks: Vec<Vec<u8>>,
        stop: Arc<AtomicBool>,
        reads: usize,
    }

    impl io::Read for IdleAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            if self.chunks.is_empty() {
                self.stop.store(true, Ordering::Relaxed);
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_reader_skips_timeouts_and_exits_on_stop() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut reader = IdleAfter {
            chunks: vec![b"ok".to_vec(), b"ready".to_vec()],
            stop: Arc::clone(&stop),
            reads: 0,
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        read_feedback(&mut reader, &stop, &tx);

        assert_eq!(reader.reads, 3);
        assert_eq!(rx.try_recv().unwrap(), DriverEvent::Feedback(b"ok".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), DriverEvent::Feedback(b"ready".to_vec()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropping_port_stops_reader() {
        let file = tempfile::tempfile().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let port = SerialPort::new(file, Arc::clone(&stop));
        assert!(!stop.load(Ordering::Relaxed));
        drop(port);
        assert!(stop.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = open(PathBuf::from("/dev/barlight-does-not-exist"), 115_200, tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_regular_file_is_not_a_tty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = open(file.path().to_path_buf(), 115_200, tx).await;
        assert!(result.is_err(), "tcgetattr should reject a regular file");
    }
}
