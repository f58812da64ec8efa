//! TCP stand-in for the USB CDC serial port.
//!
//! The simulator connects to the host application's `--listen` address.  The
//! socket is non-blocking so the control loop never waits on it:
//!
//! - `is_open` reports whether a connection exists, attempting a new one at
//!   most once per retry interval;
//! - `read` returns `Ok(0)` when no bytes are waiting;
//! - `write` queues bytes and sends as many as the socket accepts, keeping
//!   the rest for the next call.
//!
//! A closed or failed socket is dropped and reported as
//! [`PeripheralError::TransportLost`], which the control loop treats like a
//! pulled cable.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::application::input::{PeripheralError, SerialPort};

/// Outbound bytes held while the socket is congested before giving up.
const MAX_TX_BACKLOG: usize = 64 * 1024;

/// Peer resets count as a pulled cable; anything else is an I/O error.
fn lost_or_io(e: std::io::Error) -> PeripheralError {
    match e.kind() {
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            PeripheralError::TransportLost
        }
        _ => PeripheralError::Serial(e),
    }
}

pub struct TcpSerialPort {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    tx: Vec<u8>,
    retry_interval: Duration,
    connect_timeout: Duration,
    last_attempt: Option<Instant>,
}

impl TcpSerialPort {
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_retry(addr, Duration::from_secs(1))
    }

    pub fn with_retry(addr: SocketAddr, retry_interval: Duration) -> Self {
        Self {
            addr,
            stream: None,
            tx: Vec::new(),
            retry_interval,
            connect_timeout: Duration::from_millis(50),
            last_attempt: None,
        }
    }

    fn connect(&mut self) -> bool {
        self.last_attempt = Some(Instant::now());
        let stream = match TcpStream::connect_timeout(&self.addr, self.connect_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                debug!("host not reachable at {}: {e}", self.addr);
                return false;
            }
        };
        if let Err(e) = stream.set_nonblocking(true) {
            debug!("cannot make socket non-blocking: {e}");
            return false;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not set: {e}");
        }
        info!("connected to host at {}", self.addr);
        self.tx.clear();
        self.stream = Some(stream);
        true
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.tx.clear();
    }

    fn flush_backlog(&mut self) -> Result<(), PeripheralError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(PeripheralError::TransportLost);
        };
        while !self.tx.is_empty() {
            match stream.write(&self.tx) {
                Ok(0) => {
                    self.drop_stream();
                    return Err(PeripheralError::TransportLost);
                }
                Ok(n) => {
                    self.tx.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.drop_stream();
                    return Err(lost_or_io(e));
                }
            }
        }
        if self.tx.len() > MAX_TX_BACKLOG {
            self.drop_stream();
            return Err(PeripheralError::TransportLost);
        }
        Ok(())
    }
}

impl SerialPort for TcpSerialPort {
    fn is_open(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        let due = self
            .last_attempt
            .map_or(true, |at| at.elapsed() >= self.retry_interval);
        due && self.connect()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(PeripheralError::TransportLost);
        };
        let result = stream.read(buf);
        match result {
            Ok(0) => {
                self.drop_stream();
                Err(PeripheralError::TransportLost)
            }
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => {
                self.drop_stream();
                Err(lost_or_io(e))
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), PeripheralError> {
        if self.stream.is_none() {
            return Err(PeripheralError::TransportLost);
        }
        self.tx.extend_from_slice(bytes);
        self.flush_backlog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn read_some(port: &mut TcpSerialPort) -> Vec<u8> {
        let mut buf = [0u8; 64];
        for _ in 0..200 {
            match port.read(&mut buf) {
                Ok(0) => std::thread::sleep(Duration::from_millis(5)),
                Ok(n) => return buf[..n].to_vec(),
                Err(e) => panic!("read failed: {e}"),
            }
        }
        panic!("no data within 1 s");
    }

    #[test]
    fn test_not_open_without_listener() {
        // Bind and drop to find a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut port = TcpSerialPort::with_retry(addr, Duration::from_secs(60));

        assert!(!port.is_open());
        assert!(matches!(port.read(&mut [0u8; 4]), Err(PeripheralError::TransportLost)));
        assert!(matches!(port.write(b"x"), Err(PeripheralError::TransportLost)));
    }

    #[test]
    fn test_exchanges_bytes_with_host() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut port = TcpSerialPort::new(listener.local_addr().unwrap());
        assert!(port.is_open());
        let (mut host, _) = listener.accept().unwrap();

        // Act
        port.write(b"hello").unwrap();
        let mut got = [0u8; 5];
        host.read_exact(&mut got).unwrap();
        host.write_all(&[0x7E, 0x01]).unwrap();

        // Assert
        assert_eq!(&got, b"hello");
        assert_eq!(read_some(&mut port), vec![0x7E, 0x01]);
        let mut empty = [0u8; 8];
        assert_eq!(port.read(&mut empty).unwrap(), 0);
    }

    #[test]
    fn test_host_closing_is_transport_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut port = TcpSerialPort::with_retry(listener.local_addr().unwrap(), Duration::from_secs(60));
        assert!(port.is_open());
        let (host, _) = listener.accept().unwrap();

        drop(host);

        let mut buf = [0u8; 8];
        let mut lost = false;
        for _ in 0..200 {
            match port.read(&mut buf) {
                Ok(_) => std::thread::sleep(Duration::from_millis(5)),
                Err(PeripheralError::TransportLost) => {
                    lost = true;
                    break;
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert!(lost);
        // The retry interval has not elapsed, so no reconnect is attempted.
        assert!(!port.is_open());
    }
}
