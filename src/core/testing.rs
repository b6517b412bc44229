//! Test doubles shared by the core test modules

use std::io;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::connection::{Connection, Connector};
use super::params::SessionParams;
use super::terminal::{GridSize, Terminal, TerminalFactory, TerminalRequest};
use super::worker::Spawner;
use crate::protocol::{ClientInfo, Host, Instruction};

pub fn params(hostname: &str) -> SessionParams {
    SessionParams {
        hostname: hostname.to_string(),
        port: "23".to_string(),
        font_name: "monospace".to_string(),
        font_size: 12,
    }
}

/// Poll `condition` until it holds or a generous deadline passes
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Something the recording host observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recorded {
    Sent(Instruction),
    Flushed,
}

/// Host that records every instruction and flush
pub struct RecordingHost {
    info: ClientInfo,
    log: Mutex<Vec<Recorded>>,
    failing: bool,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            info: ClientInfo {
                optimal_resolution: 96,
                optimal_width: 800,
                optimal_height: 600,
            },
            log: Mutex::new(Vec::new()),
            failing: false,
        })
    }

    /// Host whose output channel rejects every write
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            info: ClientInfo::default(),
            log: Mutex::new(Vec::new()),
            failing: true,
        })
    }

    pub fn log(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Recorded::Sent(instruction) => Some(instruction),
                Recorded::Flushed => None,
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.instructions()
            .into_iter()
            .filter_map(|instruction| match instruction {
                Instruction::Name(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<Instruction> {
        self.instructions()
            .into_iter()
            .filter(|instruction| matches!(instruction, Instruction::Error { .. }))
            .collect()
    }
}

impl Host for RecordingHost {
    fn info(&self) -> ClientInfo {
        self.info
    }

    fn send(&self, instruction: &Instruction) -> io::Result<()> {
        if self.failing {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "host gone"));
        }
        self.log.lock().unwrap().push(Recorded::Sent(instruction.clone()));
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        if self.failing {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "host gone"));
        }
        self.log.lock().unwrap().push(Recorded::Flushed);
        Ok(())
    }
}

/// Terminal that counts its own release
pub struct TrackingTerminal {
    size: GridSize,
    written: Arc<Mutex<Vec<u8>>>,
    flushes: Arc<AtomicUsize>,
    scrolled: Arc<AtomicI32>,
    live: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl Terminal for TrackingTerminal {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<bool> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(!self.written.lock().unwrap().is_empty())
    }

    fn resize(&mut self, width: u32, height: u32) -> io::Result<GridSize> {
        self.size = GridSize {
            cols: (width / 10) as u16,
            rows: (height / 20) as u16,
        };
        Ok(self.size)
    }

    fn size(&self) -> GridSize {
        self.size
    }

    fn scroll(&mut self, lines: i32) {
        self.scrolled.fetch_add(lines, Ordering::SeqCst);
    }
}

impl Drop for TrackingTerminal {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Allocation-tracking terminal factory
pub struct TrackingFactory {
    fail: bool,
    created: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
    scrolled: Arc<AtomicI32>,
    written: Arc<Mutex<Vec<u8>>>,
    requests: Mutex<Vec<(String, i32, u32, u32, u32)>>,
}

impl TrackingFactory {
    pub fn new() -> Self {
        Self {
            fail: false,
            created: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
            flushes: Arc::new(AtomicUsize::new(0)),
            scrolled: Arc::new(AtomicI32::new(0)),
            written: Arc::new(Mutex::new(Vec::new())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Factory whose every allocation fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Allocate a terminal directly, bypassing the request log
    pub fn terminal(&self) -> Box<dyn Terminal> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Box::new(TrackingTerminal {
            size: GridSize { cols: 80, rows: 24 },
            written: Arc::clone(&self.written),
            flushes: Arc::clone(&self.flushes),
            scrolled: Arc::clone(&self.scrolled),
            live: Arc::clone(&self.live),
            released: Arc::clone(&self.released),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn live_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn scrolled(&self) -> i32 {
        self.scrolled.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<(String, i32, u32, u32, u32)> {
        self.requests.lock().unwrap().clone()
    }
}

impl TerminalFactory for TrackingFactory {
    fn create(&self, request: &TerminalRequest<'_>) -> Option<Box<dyn Terminal>> {
        self.requests.lock().unwrap().push((
            request.font_name.to_string(),
            request.font_size,
            request.resolution,
            request.width,
            request.height,
        ));
        if self.fail {
            return None;
        }
        Some(self.terminal())
    }
}

/// Spawner that can never start a thread
pub struct FailingSpawner;

impl Spawner for FailingSpawner {
    fn spawn(&self, _name: String, _task: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
        Err(io::Error::new(io::ErrorKind::OutOfMemory, "no threads left"))
    }
}

/// In-memory connection driven by the test
pub struct ScriptedConnection {
    incoming: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    outgoing: Arc<Mutex<Vec<u8>>>,
}

impl Connection for ScriptedConnection {
    fn peer(&self) -> String {
        "scripted:23".to_string()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.incoming.recv_timeout(Duration::from_millis(5)) {
                Ok(data) => self.pending = data,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.outgoing.lock().unwrap().extend_from_slice(data);
        Ok(())
    }
}

/// Connector handing out one scripted connection
///
/// Dropping the remote sender closes the connection from the peer side.
pub struct ScriptedConnector {
    connection: Mutex<Option<ScriptedConnection>>,
    outgoing: Arc<Mutex<Vec<u8>>>,
    targets: Mutex<Vec<(String, u16)>>,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, Sender<Vec<u8>>) {
        let (remote, incoming) = mpsc::channel();
        let outgoing = Arc::new(Mutex::new(Vec::new()));
        let connector = Arc::new(Self {
            connection: Mutex::new(Some(ScriptedConnection {
                incoming,
                pending: Vec::new(),
                outgoing: Arc::clone(&outgoing),
            })),
            outgoing,
            targets: Mutex::new(Vec::new()),
        });
        (connector, remote)
    }

    /// Connector that refuses every connection
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            connection: Mutex::new(None),
            outgoing: Arc::new(Mutex::new(Vec::new())),
            targets: Mutex::new(Vec::new()),
        })
    }

    /// Bytes the session sent to the remote end
    pub fn sent(&self) -> Vec<u8> {
        self.outgoing.lock().unwrap().clone()
    }

    pub fn targets(&self) -> Vec<(String, u16)> {
        self.targets.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, hostname: &str, port: u16) -> io::Result<Box<dyn Connection>> {
        self.targets.lock().unwrap().push((hostname.to_string(), port));
        match self.connection.lock().unwrap().take() {
            Some(connection) => Ok(Box::new(connection)),
            None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        }
    }
}
