//! Async byte-pipe wrapper around a blocking serial port.
//!
//! A background `std::thread` owns the port exclusively and shuttles bytes
//! between it and the async world: inbound bytes land in a shared queue and
//! wake any waiter via a [`Notify`] (the same wakeup shape
//! `sessions::buffer::OutputBuffer` uses for session output elsewhere in this
//! codebase), outbound bytes are pushed through an `mpsc` channel the thread
//! drains each iteration — a single owned-fd thread that interleaves reads
//! and writes so the tokio runtime is never blocked waiting on the device.
//!
//! The channel knows nothing about shell prompts or XMODEM framing. It is a
//! pure byte pipe with timed reads.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

/// How long the background thread blocks on a single port read before
/// checking for pending writes and the shutdown flag. Analogous to the
/// VTIME idle window a termios-configured fd would use for the same purpose.
const POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// Errors opening or operating the serial port.
#[derive(Debug)]
pub enum SerialError {
    /// The port could not be opened (bad path, already in use, unsupported baud).
    Open(String),
    /// The background reader/writer thread is no longer running.
    Closed,
}

impl std::fmt::Display for SerialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerialError::Open(e) => write!(f, "failed to open serial port: {e}"),
            SerialError::Closed => write!(f, "serial background thread is gone"),
        }
    }
}

impl std::error::Error for SerialError {}

struct Shared {
    queue: Mutex<VecDeque<u8>>,
    notify: Notify,
}

/// An async, timed-read byte pipe over a blocking serial port.
///
/// Consumers never touch the port directly — all access goes through
/// [`read_exact`](SerialChannel::read_exact), [`read_until`](SerialChannel::read_until),
/// [`drain`](SerialChannel::drain), and [`write`](SerialChannel::write).
pub struct SerialChannel {
    shared: Arc<Shared>,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl SerialChannel {
    /// Open `path` at `baud` and spawn the background reader/writer thread.
    pub fn open(path: &str, baud: u32) -> Result<Self, SerialError> {
        let port = serialport::new(path, baud)
            .timeout(POLL_TIMEOUT)
            .open()
            .map_err(|e| SerialError::Open(e.to_string()))?;

        debug!("serial channel opened on {path} at {baud} baud");
        Ok(Self::from_io(port, path))
    }

    /// Spawn the background reader/writer thread over any blocking duplex
    /// byte stream. `open` uses this with a real [`serialport::SerialPort`];
    /// tests use it with an in-memory pair (e.g. `UnixStream::pair`) standing
    /// in for the DOS machine, handing its owned fd to a dedicated blocking
    /// thread just like the real port does.
    pub fn from_io<T: io::Read + io::Write + Send + 'static>(io: T, label: &str) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });
        let shutdown = Arc::new(AtomicBool::new(false));
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let thread_shared = shared.clone();
        let thread_shutdown = shutdown.clone();
        let label_owned = label.to_string();
        let reader = std::thread::Builder::new()
            .name(format!("serial-{label}"))
            .spawn(move || reader_writer_loop(io, thread_shared, write_rx, thread_shutdown, &label_owned))
            .expect("spawn serial reader/writer thread");

        Self {
            shared,
            write_tx,
            shutdown,
            reader: Some(reader),
        }
    }

    /// Enqueue bytes for transmission. Returns once the background thread has
    /// accepted the request — the physical write happens asynchronously on
    /// the reader/writer thread, so the call itself never blocks on the wire.
    pub fn write(&self, bytes: &[u8]) -> Result<(), SerialError> {
        self.write_tx.send(bytes.to_vec()).map_err(|_| SerialError::Closed)
    }

    /// Wait until `n` bytes are queued (or `timeout` elapses) and pop them
    /// from the head of the queue. Returns `None` on timeout.
    pub async fn read_exact(&self, n: usize, timeout: Option<Duration>) -> Option<Vec<u8>> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            if let Some(bytes) = self.try_take(n) {
                return Some(bytes);
            }
            if !self.wait_for_more(deadline).await {
                return None;
            }
        }
    }

    /// Read bytes until the accumulated buffer ends with `tail`, returning the
    /// buffer with `tail` stripped. `tail` may be multi-byte. Returns `None`
    /// on timeout; pass `timeout = None` for an unbounded wait.
    pub async fn read_until(&self, tail: &[u8], timeout: Option<Duration>) -> Option<Vec<u8>> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let mut message: Vec<u8> = Vec::new();
        loop {
            self.drain_queue_into(&mut message);
            if message.len() >= tail.len() && message[message.len() - tail.len()..] == *tail {
                message.truncate(message.len() - tail.len());
                return Some(message);
            }
            if !self.wait_for_more(deadline).await {
                return None;
            }
        }
    }

    /// Read and discard bytes for `duration`, ignoring the absence of data.
    pub async fn drain(&self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            {
                let mut q = self.shared.queue.lock().unwrap();
                q.clear();
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let _ = tokio::time::timeout(remaining, notified).await;
        }
        // Final sweep in case bytes landed between the last clear and now.
        self.shared.queue.lock().unwrap().clear();
    }

    fn try_take(&self, n: usize) -> Option<Vec<u8>> {
        let mut q = self.shared.queue.lock().unwrap();
        if q.len() >= n {
            Some(q.drain(..n).collect())
        } else {
            None
        }
    }

    fn drain_queue_into(&self, out: &mut Vec<u8>) {
        let mut q = self.shared.queue.lock().unwrap();
        out.extend(q.drain(..));
    }

    /// Wait for the notify signal (new bytes arrived), honoring an optional
    /// deadline. Returns `false` if the deadline has already passed or is hit.
    async fn wait_for_more(&self, deadline: Option<tokio::time::Instant>) -> bool {
        let notified = self.shared.notify.notified();
        tokio::pin!(notified);
        // Register interest before re-checking anything, so a notify() fired
        // between our last queue check and this await is never lost.
        notified.as_mut().enable();

        match deadline {
            Some(d) => {
                let remaining = d.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    return false;
                }
                tokio::time::timeout(remaining, notified).await.is_ok()
            }
            None => {
                notified.await;
                true
            }
        }
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

/// Blocking I/O loop: one poll-sized read from the port per iteration,
/// appended to the shared queue one byte at a time, then a non-blocking
/// drain of any pending write requests.
fn reader_writer_loop<T: io::Read + io::Write>(
    mut port: T,
    shared: Arc<Shared>,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
    label: &str,
) {
    let mut byte = [0u8; 1];
    while !shutdown.load(Ordering::SeqCst) {
        match port.read(&mut byte) {
            Ok(1) => {
                let mut q = shared.queue.lock().unwrap();
                q.push_back(byte[0]);
                drop(q);
                shared.notify.notify_waiters();
                trace!("serial {label}: received 0x{:02x}", byte[0]);
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
            Err(e) => {
                warn!("serial {label}: read error: {e}");
            }
        }

        while let Ok(bytes) = write_rx.try_recv() {
            if let Err(e) = port.write_all(&bytes) {
                warn!("serial {label}: write error: {e}");
            }
        }
    }
    debug!("serial {label}: reader/writer thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::os::unix::net::UnixStream;

    fn harness() -> (SerialChannel, UnixStream) {
        let (near, far) = UnixStream::pair().unwrap();
        far.set_read_timeout(Some(POLL_TIMEOUT)).unwrap();
        near.set_read_timeout(Some(POLL_TIMEOUT)).unwrap();
        let channel = SerialChannel::from_io(near, "test");
        (channel, far)
    }

    #[tokio::test]
    async fn read_exact_returns_bytes_once_queued() {
        let (channel, mut far) = harness();
        far.write_all(b"abc").unwrap();
        let got = channel.read_exact(3, Some(Duration::from_millis(500))).await;
        assert_eq!(got, Some(b"abc".to_vec()));
    }

    #[tokio::test]
    async fn read_exact_times_out_when_short() {
        let (channel, mut far) = harness();
        far.write_all(b"ab").unwrap();
        let got = channel.read_exact(3, Some(Duration::from_millis(100))).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn read_until_strips_multi_byte_tail() {
        let (channel, mut far) = harness();
        far.write_all(b"hello:\\>").unwrap();
        let got = channel.read_until(b":\\>", Some(Duration::from_millis(500))).await;
        assert_eq!(got, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn write_reaches_the_far_end() {
        let (channel, mut far) = harness();
        channel.write(b"xyz").unwrap();
        let mut buf = [0u8; 3];
        far.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        far.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"xyz");
    }

    #[tokio::test]
    async fn drain_discards_bytes_that_arrive_during_the_window() {
        let (channel, mut far) = harness();
        far.write_all(b"noise").unwrap();
        channel.drain(Duration::from_millis(150)).await;
        let got = channel.read_exact(1, Some(Duration::from_millis(50))).await;
        assert_eq!(got, None);
    }
}
