//! Network connection seam used by the session worker

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::config::WorkerConfig;
use crate::error::ProtocolError;

/// A connected byte stream owned by the worker
pub trait Connection: Send {
    /// Description of the remote end
    fn peer(&self) -> String;

    /// Read available bytes, returning `Ok(0)` at end of stream
    ///
    /// Implementations block for at most the poll interval and report an
    /// idle interval as `WouldBlock` or `TimedOut`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Opens connections to the session target
pub trait Connector: Send + Sync {
    fn connect(&self, hostname: &str, port: u16) -> io::Result<Box<dyn Connection>>;
}

/// Validate a port argument
pub fn parse_port(port: &str) -> Result<u16, ProtocolError> {
    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ProtocolError::InvalidPort(port.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Plain TCP connector
pub struct TcpConnector {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpConnector {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.poll_interval(),
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, hostname: &str, port: u16) -> io::Result<Box<dyn Connection>> {
        let mut last_error = None;

        for addr in (hostname, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(Box::new(TcpConnection { stream, peer: addr }));
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "hostname resolved to no addresses")
        }))
    }
}

struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection for TcpConnection {
    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)
    }
}
