//! Physical source readers.
//!
//! Each physical source gets one [`SourceReader`] task that opens the
//! source, decodes its bytes and publishes tuple position `i` to the
//! source's `i`-th [`SensorStream`]. Sensors sharing a source share the
//! task.
//!
//! # State machine
//!
//! ```text
//!            ┌──────────────┐  open   ┌────────────┐   ok   ┌───────────┐
//!  start ──▶ │ Disconnected │ ──────▶ │ Connecting │ ─────▶ │ Connected │
//!            └──────────────┘         └────────────┘        └─────┬─────┘
//!                   ▲   ▲   backoff         │ error               │ EOF / read error
//!                   │   └───────────────────┘                     │ (close, publish
//!                   └─────────────────────────────────────────────┘  disconnect markers)
//! ```
//!
//! The loop never ends on its own. Open failures are retried after a
//! fixed backoff; a lost connection publishes [`Reading::Disconnected`]
//! to every sensor of the source, waits the same backoff and reopens.
//! Cancelling the token stops the task without publishing markers.
//!
//! Serial device nodes are opened through [`SerialSource`], which puts the
//! port in raw mode at the configured baud rate; any other path is read as
//! a plain file by [`PathSource`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use sensorcast_core::{DecoderKind, Reading};

use crate::decoder::{self, DecodeError};
use crate::stream::SensorStream;

/// Default wait between open attempts and before reopening a lost source.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Default line speed of serial devices.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Path prefixes of serial device nodes. The bare prefix itself (for
/// example `/dev/tty`, the controlling terminal) is not a serial port.
const SERIAL_DEVICE_PREFIXES: &[&str] = &["/dev/tty", "/dev/cu.", "/dev/serial/", "/dev/rfcomm"];

/// An open byte source.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Capability to (re)open a physical byte source.
///
/// Opening must be safe to call repeatedly; each call yields a fresh
/// handle which the reader drops when the connection ends.
#[async_trait]
pub trait ByteSource: Send + Sync + 'static {
    /// Human readable identifier used in logs.
    fn describe(&self) -> String;

    /// Opens the source for reading.
    async fn open(&self) -> io::Result<BoxedReader>;
}

/// A source opened by path: a file, FIFO or `/dev/stdin`.
#[derive(Debug, Clone)]
pub struct PathSource {
    path: PathBuf,
}

impl PathSource {
    /// Creates a source for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the source path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for PathSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn open(&self) -> io::Result<BoxedReader> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::new(file))
    }
}

/// A serial port, opened in raw mode at a fixed baud rate.
#[derive(Debug, Clone)]
pub struct SerialSource {
    path: PathBuf,
    baud_rate: u32,
}

impl SerialSource {
    /// Creates a source for the serial device at `path`.
    pub fn new(path: impl Into<PathBuf>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }

    /// Returns the configured line speed.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[async_trait]
impl ByteSource for SerialSource {
    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path.display(), self.baud_rate)
    }

    async fn open(&self) -> io::Result<BoxedReader> {
        let port = tokio_serial::new(self.path.to_string_lossy(), self.baud_rate)
            .open_native_async()
            .map_err(io::Error::from)?;
        Ok(Box::new(port))
    }
}

/// Returns true if `path` names a serial device node.
pub fn is_serial_device(path: &Path) -> bool {
    let Some(name) = path.to_str() else {
        return false;
    };
    SERIAL_DEVICE_PREFIXES
        .iter()
        .any(|prefix| name.len() > prefix.len() && name.starts_with(prefix))
}

/// Picks the byte source for a configured path: serial devices get line
/// settings applied, everything else is read as a file.
pub fn source_for(path: &Path, baud_rate: u32) -> Arc<dyn ByteSource> {
    if is_serial_device(path) {
        Arc::new(SerialSource::new(path, baud_rate))
    } else {
        Arc::new(PathSource::new(path))
    }
}

/// Connection state of a source reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Not connected; an open attempt is due or backing off
    Disconnected,

    /// Opening the source
    Connecting,

    /// Source open and being decoded
    Connected,

    /// Task stopped by cancellation
    Stopped,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceState::Disconnected => "disconnected",
            SourceState::Connecting => "connecting",
            SourceState::Connected => "connected",
            SourceState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// How a decoded tuple lined up with the source's sensors.
///
/// Positions present in both are always published. Sensors past the end
/// of a short tuple receive nothing for that unit; surplus fields of a
/// long tuple are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// One reading per sensor
    Complete,

    /// Fewer readings than sensors
    Short { expected: usize, actual: usize },

    /// More readings than sensors
    Long { expected: usize, actual: usize },
}

/// Why a connected session ended.
enum SessionEnd {
    Eof,
    ReadError(DecodeError),
    Cancelled,
}

/// Reconnecting reader for one physical source.
pub struct SourceReader {
    source: Arc<dyn ByteSource>,
    decoder: DecoderKind,
    streams: Vec<SensorStream>,
    backoff: Duration,
    state: watch::Sender<SourceState>,
}

impl SourceReader {
    /// Creates a reader feeding `streams` in tuple position order.
    pub fn new(
        source: Arc<dyn ByteSource>,
        decoder: DecoderKind,
        streams: Vec<SensorStream>,
    ) -> Self {
        let (state, _) = watch::channel(SourceState::Disconnected);
        Self {
            source,
            decoder,
            streams,
            backoff: DEFAULT_RETRY_BACKOFF,
            state,
        }
    }

    /// Sets the retry backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the streams fed by this reader.
    pub fn streams(&self) -> &[SensorStream] {
        &self.streams
    }

    /// Returns a receiver observing the connection state.
    pub fn state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }

    /// Publishes one decoded tuple, position `i` to sensor `i`.
    pub fn dispatch(&self, tuple: &[i64]) -> Dispatch {
        for (value, stream) in tuple.iter().zip(&self.streams) {
            stream.publish(Reading::Value(*value));
        }

        let expected = self.streams.len();
        let actual = tuple.len();
        match actual.cmp(&expected) {
            std::cmp::Ordering::Equal => Dispatch::Complete,
            std::cmp::Ordering::Less => Dispatch::Short { expected, actual },
            std::cmp::Ordering::Greater => Dispatch::Long { expected, actual },
        }
    }

    /// Publishes a disconnect marker to every sensor of this source.
    fn broadcast_disconnect(&self) {
        for stream in &self.streams {
            stream.publish(Reading::Disconnected);
        }
    }

    fn set_state(&self, state: SourceState) {
        self.state.send_replace(state);
    }

    /// Spawns the reader loop on the runtime.
    pub fn spawn(self, cancel_token: CancellationToken) -> SourceHandle {
        let source = self.source.describe();
        let state = self.state();
        let span = info_span!("source", path = %source);
        let task = tokio::spawn(self.run(cancel_token).instrument(span));

        SourceHandle {
            source,
            state,
            task,
        }
    }

    /// Runs the reconnect-and-decode loop until cancelled.
    pub async fn run(self, cancel_token: CancellationToken) {
        let sensors: Vec<String> = self.streams.iter().map(|s| s.name().to_string()).collect();
        info!(sensors = ?sensors, decoder = %self.decoder, "Source reader started");

        let mut failed_opens: u64 = 0;

        loop {
            self.set_state(SourceState::Connecting);

            let opened = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                result = self.source.open() => result,
            };

            match opened {
                Err(e) => {
                    failed_opens += 1;
                    if failed_opens == 1 {
                        info!(error = %e, "Source unavailable, retrying");
                    } else {
                        debug!(error = %e, attempt = failed_opens, "Source open failed");
                    }
                    self.set_state(SourceState::Disconnected);
                }
                Ok(reader) => {
                    info!(after_failures = failed_opens, "Source connected");
                    failed_opens = 0;
                    self.set_state(SourceState::Connected);

                    match self.pump(reader, &cancel_token).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Eof => info!("Source reached end of stream"),
                        SessionEnd::ReadError(e) => warn!(error = %e, "Source read failed"),
                    }

                    // The handle is closed by now; tell every sensor.
                    self.broadcast_disconnect();
                    self.set_state(SourceState::Disconnected);
                    info!("Source disconnected");
                }
            }

            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                _ = sleep(self.backoff) => {}
            }
        }

        self.set_state(SourceState::Stopped);
        info!("Source reader stopped");
    }

    /// Decodes one connection until it ends. Dropping the framed reader
    /// closes the underlying handle.
    async fn pump(&self, reader: BoxedReader, cancel_token: &CancellationToken) -> SessionEnd {
        let mut frames = decoder::decode(self.decoder, reader);

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return SessionEnd::Cancelled,
                item = frames.next() => item,
            };

            match item {
                Some(Ok(tuple)) => match self.dispatch(&tuple) {
                    Dispatch::Complete => {}
                    Dispatch::Short { expected, actual } => {
                        warn!(expected, actual, "Unit has fewer readings than sensors");
                    }
                    Dispatch::Long { expected, actual } => {
                        warn!(expected, actual, "Unit has more readings than sensors");
                    }
                },
                Some(Err(e)) => return SessionEnd::ReadError(e),
                None => return SessionEnd::Eof,
            }
        }
    }
}

/// Handle to a spawned [`SourceReader`].
pub struct SourceHandle {
    source: String,
    state: watch::Receiver<SourceState>,
    task: JoinHandle<()>,
}

impl SourceHandle {
    /// Returns the source identifier.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the current connection state.
    pub fn current_state(&self) -> SourceState {
        *self.state.borrow()
    }

    /// Returns a receiver observing the connection state.
    pub fn state(&self) -> watch::Receiver<SourceState> {
        self.state.clone()
    }

    /// Waits for the reader task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(source = %self.source, error = %e, "Source reader task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorcast_core::SensorName;

    struct NeverOpens;

    #[async_trait]
    impl ByteSource for NeverOpens {
        fn describe(&self) -> String {
            "never".to_string()
        }

        async fn open(&self) -> io::Result<BoxedReader> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no device"))
        }
    }

    fn reader(sensors: &[&str]) -> SourceReader {
        let streams = sensors
            .iter()
            .map(|n| SensorStream::new(SensorName::new(*n).unwrap()))
            .collect();
        SourceReader::new(Arc::new(NeverOpens), DecoderKind::ReadingsPerLine, streams)
    }

    #[test]
    fn test_serial_device_paths() {
        for path in ["/dev/ttyUSB0", "/dev/ttyACM1", "/dev/ttyS0", "/dev/cu.usbserial-10"] {
            assert!(is_serial_device(Path::new(path)), "{path} is a serial port");
        }
        for path in ["/dev/tty", "/dev/stdin", "/tmp/ttyUSB0", "readings.txt"] {
            assert!(!is_serial_device(Path::new(path)), "{path} is not a serial port");
        }
    }

    #[test]
    fn test_source_for_applies_baud_rate_to_serial_only() {
        let serial = source_for(Path::new("/dev/ttyUSB0"), 9600);
        assert_eq!(serial.describe(), "/dev/ttyUSB0 @ 9600 baud");

        let file = source_for(Path::new("/tmp/readings"), 9600);
        assert_eq!(file.describe(), "/tmp/readings");
    }

    #[tokio::test]
    async fn test_missing_serial_device_fails_to_open() {
        let source = SerialSource::new("/dev/ttyNOSUCHDEVICE", DEFAULT_BAUD_RATE);
        assert_eq!(source.baud_rate(), 115_200);
        assert!(source.open().await.is_err());
    }

    #[test]
    fn test_dispatch_positional() {
        let r = reader(&["touch", "sound"]);
        let mut touch = r.streams()[0].subscribe();
        let mut sound = r.streams()[1].subscribe();

        assert_eq!(r.dispatch(&[12, 7]), Dispatch::Complete);
        assert_eq!(touch.try_recv(), Some(Reading::Value(12)));
        assert_eq!(sound.try_recv(), Some(Reading::Value(7)));
    }

    #[test]
    fn test_dispatch_short_tuple() {
        let r = reader(&["touch", "sound"]);
        let mut touch = r.streams()[0].subscribe();
        let mut sound = r.streams()[1].subscribe();

        assert_eq!(
            r.dispatch(&[5]),
            Dispatch::Short {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(touch.try_recv(), Some(Reading::Value(5)));
        assert_eq!(sound.try_recv(), None);
    }

    #[test]
    fn test_dispatch_long_tuple() {
        let r = reader(&["touch"]);
        let mut touch = r.streams()[0].subscribe();

        assert_eq!(
            r.dispatch(&[1, 2, 3]),
            Dispatch::Long {
                expected: 1,
                actual: 3
            }
        );
        assert_eq!(touch.try_recv(), Some(Reading::Value(1)));
        assert_eq!(touch.try_recv(), None);
    }

    #[tokio::test]
    async fn test_unopenable_source_keeps_retrying_without_markers() {
        let r = reader(&["touch"]).with_backoff(Duration::from_millis(5));
        let mut touch = r.streams()[0].subscribe();
        let handle = r.spawn(CancellationToken::new());

        sleep(Duration::from_millis(50)).await;

        assert_ne!(handle.current_state(), SourceState::Stopped);
        assert_ne!(handle.current_state(), SourceState::Connected);
        assert_eq!(touch.try_recv(), None, "never-opened source must not publish");
    }

    #[tokio::test]
    async fn test_cancel_stops_reader() {
        let r = reader(&["touch"]).with_backoff(Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let handle = r.spawn(cancel.clone());
        let mut state = handle.state();

        cancel.cancel();
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == SourceState::Stopped),
        )
        .await
        .expect("reader should stop")
        .expect("state channel open");
        handle.join().await;
    }
}
