//! Serial link infrastructure for the host application.
//!
//! Opens the byte stream to the device, drives the [`HostRelay`] from it, and
//! reopens the stream after it is lost.
//!
//! Architecture:
//! - A [`LinkOpener`] produces a fresh pair of [`LinkHalves`]: the USB CDC
//!   serial device node, or a TCP socket accepted from the device simulator.
//! - [`LinkService::start`] spawns the reconnect loop and reports
//!   [`LinkStatus`] changes on an `mpsc` channel.
//! - While a stream is open, a reader task owns the read half and forwards
//!   chunks on a channel.  One `select!` loop multiplexes those chunks, the
//!   scheduler tick, and registry change notifications, and owns the write
//!   half.  A read that is parked waiting for the device never holds up a
//!   write.  The audio watcher runs in its own task.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mixdeck_core::Tick;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::application::relay::HostRelay;
use crate::application::session_registry::SharedRegistry;
use crate::infrastructure::storage::config::{LinkConfig, LinkTarget};

/// Bytes read from the link per wake-up.
const READ_CHUNK: usize = 256;
/// Read chunks buffered between the reader task and the relay loop.
const READ_QUEUE: usize = 32;

/// Errors that can occur on the serial link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The serial device or simulator socket could not be opened.
    #[error("failed to open link {target}: {source}")]
    OpenFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },
    /// An I/O error occurred on the open link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The device closed the link (cable removed, simulator exited).
    #[error("transport lost")]
    TransportLost,
}

/// Link status notifications sent to the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected { reason: String },
}

/// The two directions of an open link, usable concurrently.
pub struct LinkHalves {
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
}

impl LinkHalves {
    /// Splits a bidirectional stream whose halves do not block each other.
    pub fn split<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Produces fresh link halves each time the link is (re)established.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// Opens the link, waiting for the device if necessary.
    async fn open(&self) -> Result<LinkHalves, LinkError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Opens a serial device node (`/dev/ttyACM0`, `COM4`).
///
/// The device enumerates as USB CDC, so line settings do not apply.  Reads
/// and writes go through separate handles on the node: a `tokio::fs::File`
/// runs one operation at a time, so a shared handle would park every write
/// behind a read waiting for the device.
pub struct SerialDeviceOpener {
    path: PathBuf,
}

impl SerialDeviceOpener {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl LinkOpener for SerialDeviceOpener {
    async fn open(&self) -> Result<LinkHalves, LinkError> {
        let open_failed = |source| LinkError::OpenFailed {
            target: self.describe(),
            source,
        };
        let reader = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await
            .map_err(open_failed)?;
        let writer = reader.try_clone().await.map_err(open_failed)?;
        Ok(LinkHalves {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Accepts one device-simulator connection at a time on a TCP address.
pub struct TcpListenOpener {
    addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
}

impl TcpListenOpener {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            listener: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LinkOpener for TcpListenOpener {
    async fn open(&self) -> Result<LinkHalves, LinkError> {
        let open_failed = |source| LinkError::OpenFailed {
            target: self.describe(),
            source,
        };
        let mut guard = self.listener.lock().await;
        let listener = match guard.take() {
            Some(listener) => listener,
            None => TcpListener::bind(self.addr).await.map_err(open_failed)?,
        };
        let accepted = listener.accept().await;
        *guard = Some(listener);
        let (stream, peer) = accepted.map_err(open_failed)?;
        debug!("simulator connected from {peer}");
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not set: {e}");
        }
        let (reader, writer) = stream.into_split();
        Ok(LinkHalves {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

/// Builds the opener for a configured link target.
pub fn opener_for(target: LinkTarget) -> Arc<dyn LinkOpener> {
    match target {
        LinkTarget::SerialDevice(path) => Arc::new(SerialDeviceOpener::new(path)),
        LinkTarget::TcpListen(addr) => Arc::new(TcpListenOpener::new(addr)),
    }
}

/// Timing of the link task.
#[derive(Debug, Clone)]
pub struct LinkServiceConfig {
    /// Scheduler tick period.
    pub tick_period: Duration,
    /// Delay before reopening a lost link.
    pub reconnect_interval: Duration,
}

impl Default for LinkServiceConfig {
    fn default() -> Self {
        LinkServiceConfig::from(&LinkConfig::default())
    }
}

impl From<&LinkConfig> for LinkServiceConfig {
    fn from(link: &LinkConfig) -> Self {
        Self {
            tick_period: link.tick_period(),
            reconnect_interval: link.reconnect_interval(),
        }
    }
}

/// Converts wall-clock time into monotonically increasing scheduler ticks.
#[derive(Debug, Clone, Copy)]
pub struct LinkClock {
    start: Instant,
    tick_period: Duration,
}

impl LinkClock {
    pub fn new(tick_period: Duration) -> Self {
        Self {
            start: Instant::now(),
            tick_period,
        }
    }

    /// Ticks elapsed since the clock was created.
    pub fn now(&self) -> Tick {
        Self::ticks_in(self.start.elapsed(), self.tick_period)
    }

    fn ticks_in(elapsed: Duration, tick_period: Duration) -> Tick {
        let period = tick_period.as_micros().max(1);
        (elapsed.as_micros() / period) as Tick
    }
}

/// Owns the link lifecycle: open, drive, lose, reopen.
pub struct LinkService {
    opener: Arc<dyn LinkOpener>,
    config: LinkServiceConfig,
}

impl LinkService {
    pub fn new(opener: Arc<dyn LinkOpener>, config: LinkServiceConfig) -> Self {
        Self { opener, config }
    }

    /// Spawns the reconnect loop and returns a receiver of status changes.
    ///
    /// The loop runs until `running` is set to false.
    pub async fn start(
        self: Arc<Self>,
        mut relay: HostRelay,
        registry: SharedRegistry,
        running: Arc<AtomicBool>,
    ) -> mpsc::Receiver<LinkStatus> {
        let (tx, rx) = mpsc::channel(16);
        let this = Arc::clone(&self);

        tokio::spawn(async move {
            let clock = LinkClock::new(this.config.tick_period);
            while running.load(Ordering::Relaxed) {
                match this.opener.open().await {
                    Ok(link) => {
                        info!("link open on {}", this.opener.describe());
                        let _ = tx.send(LinkStatus::Connected).await;

                        let result =
                            drive_link(link, &mut relay, &registry, &clock, &running).await;
                        relay.disconnect();

                        let reason = match result {
                            Ok(()) => "shutdown".to_string(),
                            Err(e) => {
                                warn!(
                                    "link lost: {e}; reopening in {:?}",
                                    this.config.reconnect_interval
                                );
                                e.to_string()
                            }
                        };
                        let _ = tx.send(LinkStatus::Disconnected { reason }).await;
                    }
                    Err(e) => warn!("{e}"),
                }

                if running.load(Ordering::Relaxed) {
                    time::sleep(this.config.reconnect_interval).await;
                }
            }
        });

        rx
    }
}

/// Forwards everything read from `reader` until EOF or an error, which is
/// forwarded too.  Ends early when the receiver is dropped.
fn spawn_reader(
    mut reader: Box<dyn AsyncRead + Unpin + Send>,
) -> (JoinHandle<()>, mpsc::Receiver<std::io::Result<Vec<u8>>>) {
    let (tx, rx) = mpsc::channel(READ_QUEUE);
    let handle = tokio::spawn(async move {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let read = reader.read(&mut buf).await.map(|n| buf[..n].to_vec());
            let last = !matches!(&read, Ok(chunk) if !chunk.is_empty());
            if tx.send(read).await.is_err() || last {
                return;
            }
        }
    });
    (handle, rx)
}

/// Runs one open link until it fails or `running` is cleared.
async fn drive_link(
    link: LinkHalves,
    relay: &mut HostRelay,
    registry: &SharedRegistry,
    clock: &LinkClock,
    running: &AtomicBool,
) -> Result<(), LinkError> {
    let LinkHalves { reader, mut writer } = link;
    let (read_task, mut inbound) = spawn_reader(reader);
    let result =
        relay_until_closed(&mut inbound, writer.as_mut(), relay, registry, clock, running).await;
    read_task.abort();
    result
}

async fn relay_until_closed(
    inbound: &mut mpsc::Receiver<std::io::Result<Vec<u8>>>,
    writer: &mut (dyn AsyncWrite + Unpin + Send),
    relay: &mut HostRelay,
    registry: &SharedRegistry,
    clock: &LinkClock,
    running: &AtomicBool,
) -> Result<(), LinkError> {
    let mut ticker = time::interval(clock.tick_period);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    relay.connect(clock.now());
    loop {
        let out = relay.take_outbound_bytes();
        if !out.is_empty() {
            writer.write_all(&out).await?;
            writer.flush().await?;
        }
        if !running.load(Ordering::Relaxed) {
            return Ok(());
        }

        tokio::select! {
            read = inbound.recv() => match read {
                Some(Ok(chunk)) if !chunk.is_empty() => relay.on_bytes(&chunk, clock.now()),
                Some(Ok(_)) | None => return Err(LinkError::TransportLost),
                Some(Err(e)) => return Err(e.into()),
            },
            _ = ticker.tick() => relay.tick(clock.now()),
            _ = registry.changed() => relay.push_registry_changes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_clock_counts_whole_ticks() {
        let period = Duration::from_millis(10);
        assert_eq!(LinkClock::ticks_in(Duration::from_millis(0), period), 0);
        assert_eq!(LinkClock::ticks_in(Duration::from_millis(9), period), 0);
        assert_eq!(LinkClock::ticks_in(Duration::from_millis(250), period), 25);
    }

    #[test]
    fn test_link_clock_tolerates_zero_period() {
        assert_eq!(
            LinkClock::ticks_in(Duration::from_micros(7), Duration::ZERO),
            7
        );
    }

    #[test]
    fn test_service_config_follows_link_config() {
        let link = LinkConfig {
            tick_ms: 5,
            reconnect_interval_ms: 250,
            ..LinkConfig::default()
        };
        let cfg = LinkServiceConfig::from(&link);
        assert_eq!(cfg.tick_period, Duration::from_millis(5));
        assert_eq!(cfg.reconnect_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_missing_serial_device_reports_open_failed() {
        let opener = SerialDeviceOpener::new(PathBuf::from("/nonexistent/mixdeck/ttyACM9"));
        match opener.open().await {
            Err(LinkError::OpenFailed { target, .. }) => assert!(target.contains("ttyACM9")),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("opening a missing device must fail"),
        }
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serial_write_is_not_held_behind_pending_read() {
        // Arrange – a FIFO stands in for the tty; opened read-write it echoes
        // our own writes back to our reads.
        let path = std::env::temp_dir().join(format!("mixdeck-fifo-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let made = std::process::Command::new("mkfifo").arg(&path).status().unwrap();
        assert!(made.success());
        let LinkHalves {
            mut reader,
            mut writer,
        } = SerialDeviceOpener::new(path.clone()).open().await.unwrap();
        let pending_read = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            let n = reader.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });
        time::sleep(Duration::from_millis(50)).await;

        // Act
        let write = time::timeout(Duration::from_secs(2), async {
            writer.write_all(&[0x7E, 0x00]).await?;
            writer.flush().await
        })
        .await;

        // Assert
        assert!(write.is_ok(), "write waited for the pending read");
        write.unwrap().unwrap();
        let echoed = time::timeout(Duration::from_secs(2), pending_read)
            .await
            .unwrap()
            .unwrap();
        assert!(!echoed.is_empty());
        assert_eq!(echoed[0], 0x7E);
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_reader_task_forwards_chunks_then_eof() {
        let (mut device, host) = tokio::io::duplex(64);
        let LinkHalves { reader, .. } = LinkHalves::split(host);
        let (task, mut inbound) = spawn_reader(reader);

        device.write_all(b"abc").await.unwrap();
        let first = inbound.recv().await.unwrap().unwrap();
        drop(device);
        let last = inbound.recv().await.unwrap().unwrap();

        assert_eq!(first, b"abc".to_vec());
        assert!(last.is_empty());
        assert!(inbound.recv().await.is_none());
        task.await.unwrap();
    }

    #[test]
    fn test_opener_for_describes_target() {
        let serial = opener_for(LinkTarget::SerialDevice(PathBuf::from("/dev/ttyACM0")));
        let tcp = opener_for(LinkTarget::TcpListen("127.0.0.1:7420".parse().unwrap()));
        assert_eq!(serial.describe(), "/dev/ttyACM0");
        assert_eq!(tcp.describe(), "tcp://127.0.0.1:7420");
    }
}
