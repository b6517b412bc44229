//! Terminal resource interface
//!
//! The emulator a session renders into is supplied by the host through a
//! [`TerminalFactory`]. A session owns exactly one [`Terminal`]; dropping it
//! releases the resource.

use std::io;

use super::session::SessionId;

/// Character grid dimensions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GridSize {
    pub cols: u16,
    pub rows: u16,
}

/// A display/emulation resource
///
/// Not assumed to be safe for concurrent use: the session serializes all
/// access behind one mutex.
pub trait Terminal: Send {
    /// Feed bytes received from the remote end
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Render pending output to the display, returning whether anything changed
    fn flush(&mut self) -> io::Result<bool>;

    /// Resize to the given display dimensions
    fn resize(&mut self, width: u32, height: u32) -> io::Result<GridSize>;

    /// Current grid size
    fn size(&self) -> GridSize;

    /// Scroll the display by the given number of lines (negative is up)
    fn scroll(&mut self, _lines: i32) {}
}

/// Parameters of a terminal allocation
#[derive(Clone, Debug)]
pub struct TerminalRequest<'a> {
    pub owner: SessionId,
    pub font_name: &'a str,
    pub font_size: i32,
    pub resolution: u32,
    pub width: u32,
    pub height: u32,
}

/// Allocates terminals for new sessions
pub trait TerminalFactory: Send + Sync {
    /// Create a terminal, or `None` if allocation failed
    fn create(&self, request: &TerminalRequest<'_>) -> Option<Box<dyn Terminal>>;
}
