//! Local console host
//!
//! Lets the binary act as its own gateway: instructions become window title
//! updates and log lines, and the session's terminal writes straight through
//! to the console.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crossterm::terminal::{self, SetTitle};
use crossterm::QueueableCommand;
use tracing::{debug, error, info};

use crate::config::DisplayConfig;
use crate::core::terminal::{GridSize, Terminal, TerminalFactory, TerminalRequest};
use crate::protocol::{ClientInfo, Host, Instruction};

/// Pixel size of one character cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellMetrics {
    pub width: u32,
    pub height: u32,
}

impl CellMetrics {
    /// Derive cell size from a display size and the grid it holds
    pub fn measure(width: u32, height: u32, grid: GridSize) -> Self {
        Self {
            width: (width / u32::from(grid.cols.max(1))).max(1),
            height: (height / u32::from(grid.rows.max(1))).max(1),
        }
    }

    /// Grid that fits in the given pixel area
    pub fn grid(&self, width: u32, height: u32) -> GridSize {
        let clamp = |n: u32| n.clamp(1, u32::from(u16::MAX)) as u16;
        GridSize {
            cols: clamp(width / self.width),
            rows: clamp(height / self.height),
        }
    }

    /// Pixel area of a grid
    pub fn pixels(&self, grid: GridSize) -> (u32, u32) {
        (
            u32::from(grid.cols) * self.width,
            u32::from(grid.rows) * self.height,
        )
    }
}

/// Host backed by the local console
pub struct LocalHost<W: Write + Send> {
    info: ClientInfo,
    out: Mutex<W>,
    last_error: Mutex<Option<String>>,
    disconnected: AtomicBool,
}

impl LocalHost<io::Stdout> {
    /// Host for the current console, sized from the console window
    pub fn stdout(display: &DisplayConfig) -> Self {
        Self::new(io::stdout(), Self::probe(display))
    }

    /// Console pixel size, or the configured display when the console does not report one
    fn probe(display: &DisplayConfig) -> ClientInfo {
        match terminal::window_size() {
            Ok(size) if size.width > 0 && size.height > 0 => ClientInfo {
                optimal_resolution: display.dpi,
                optimal_width: u32::from(size.width),
                optimal_height: u32::from(size.height),
            },
            _ => ClientInfo {
                optimal_resolution: display.dpi,
                optimal_width: display.width,
                optimal_height: display.height,
            },
        }
    }
}

impl<W: Write + Send> LocalHost<W> {
    pub fn new(out: W, info: ClientInfo) -> Self {
        Self {
            info,
            out: Mutex::new(out),
            last_error: Mutex::new(None),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Message of the most recent error instruction
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl<W: Write + Send> Host for LocalHost<W> {
    fn info(&self) -> ClientInfo {
        self.info
    }

    fn send(&self, instruction: &Instruction) -> io::Result<()> {
        match instruction {
            Instruction::Name(name) => {
                info!("Session name: {}", name);
                let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
                out.queue(SetTitle(format!("teleterm - {}", name)))?;
            }
            Instruction::Error { message, status } => {
                error!("Session error (0x{:04X}): {}", status.code(), message);
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(message.clone());
            }
            Instruction::Disconnect => {
                info!("Session disconnected");
                self.disconnected.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.out.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

type SinkFn = dyn Fn() -> Box<dyn Write + Send> + Send + Sync;

/// Creates terminals that write through to a byte sink
pub struct LocalTerminalFactory {
    grid: GridSize,
    sink: Box<SinkFn>,
}

impl LocalTerminalFactory {
    /// Factory for the current console
    pub fn stdout() -> io::Result<Self> {
        let (cols, rows) = terminal::size()?;
        Ok(Self::new(GridSize { cols, rows }, || Box::new(io::stdout())))
    }

    pub fn new(
        grid: GridSize,
        sink: impl Fn() -> Box<dyn Write + Send> + Send + Sync + 'static,
    ) -> Self {
        Self {
            grid,
            sink: Box::new(sink),
        }
    }
}

impl TerminalFactory for LocalTerminalFactory {
    fn create(&self, request: &TerminalRequest<'_>) -> Option<Box<dyn Terminal>> {
        if self.grid.cols == 0 || self.grid.rows == 0 {
            return None;
        }
        debug!(
            session = request.owner,
            "Local terminal {}x{} ({} {}pt ignored)",
            self.grid.cols,
            self.grid.rows,
            request.font_name,
            request.font_size
        );
        Some(Box::new(LocalTerminal {
            out: (self.sink)(),
            pending: Vec::new(),
            grid: self.grid,
            cell: CellMetrics::measure(request.width, request.height, self.grid),
        }))
    }
}

/// Terminal that defers emulation to the console it writes into
struct LocalTerminal {
    out: Box<dyn Write + Send>,
    pending: Vec<u8>,
    grid: GridSize,
    cell: CellMetrics,
}

impl Terminal for LocalTerminal {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<bool> {
        if self.pending.is_empty() {
            return Ok(false);
        }
        self.out.write_all(&self.pending)?;
        self.out.flush()?;
        self.pending.clear();
        Ok(true)
    }

    fn resize(&mut self, width: u32, height: u32) -> io::Result<GridSize> {
        self.grid = self.cell.grid(width, height);
        Ok(self.grid)
    }

    fn size(&self) -> GridSize {
        self.grid
    }
}

impl Drop for LocalTerminal {
    fn drop(&mut self) {
        let _ = self.flush();
        let _ = self.out.write_all(b"\x1b[0m");
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Writer appending to a shared buffer
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn request() -> TerminalRequest<'static> {
        TerminalRequest {
            owner: 1,
            font_name: "monospace",
            font_size: 12,
            resolution: 96,
            width: 800,
            height: 480,
        }
    }

    #[test]
    fn test_cell_metrics() {
        let cell = CellMetrics::measure(800, 480, GridSize { cols: 80, rows: 24 });
        assert_eq!(cell, CellMetrics { width: 10, height: 20 });
        assert_eq!(cell.grid(1000, 600), GridSize { cols: 100, rows: 30 });
        assert_eq!(cell.pixels(GridSize { cols: 100, rows: 30 }), (1000, 600));
        // Never collapses to an empty grid
        assert_eq!(cell.grid(0, 0), GridSize { cols: 1, rows: 1 });
    }

    #[test]
    fn test_terminal_writes_on_flush() {
        let buf = SharedBuf::default();
        let sink = buf.clone();
        let factory =
            LocalTerminalFactory::new(GridSize { cols: 80, rows: 24 }, move || Box::new(sink.clone()));
        let mut terminal = factory.create(&request()).unwrap();

        terminal.write(b"login: ").unwrap();
        assert!(buf.contents().is_empty());
        assert!(terminal.flush().unwrap());
        assert_eq!(buf.contents(), b"login: ");
        assert!(!terminal.flush().unwrap());

        assert_eq!(terminal.resize(1200, 960).unwrap(), GridSize { cols: 120, rows: 48 });
        assert_eq!(terminal.size(), GridSize { cols: 120, rows: 48 });

        drop(terminal);
        assert!(buf.contents().ends_with(b"\x1b[0m"));
    }

    #[test]
    fn test_empty_console_fails_allocation() {
        let factory = LocalTerminalFactory::new(GridSize { cols: 0, rows: 0 }, || Box::new(io::sink()));
        assert!(factory.create(&request()).is_none());
    }

    #[test]
    fn test_host_instructions() {
        let buf = SharedBuf::default();
        let host = LocalHost::new(buf.clone(), ClientInfo::default());

        host.send(&Instruction::Name("example.com".to_string())).unwrap();
        host.flush().unwrap();
        let title = String::from_utf8(buf.contents()).unwrap();
        assert!(title.contains("teleterm - example.com"));

        assert_eq!(host.last_error(), None);
        host.send(&Instruction::Error {
            message: "Unable to connect to telnet server".to_string(),
            status: crate::protocol::Status::UpstreamError,
        })
        .unwrap();
        assert_eq!(
            host.last_error().as_deref(),
            Some("Unable to connect to telnet server")
        );

        assert!(!host.is_disconnected());
        host.send(&Instruction::Disconnect).unwrap();
        assert!(host.is_disconnected());
    }
}
