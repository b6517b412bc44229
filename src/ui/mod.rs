//! Local user interface.
//!
//! - **keymapper**: keyboard input to telnet byte sequence mapping
//! - **local**: host and terminal backed by the process's own console,
//!   used by the `teleterm` binary

pub mod keymapper;
pub mod local;

pub use keymapper::*;
pub use local::{CellMetrics, LocalHost, LocalTerminalFactory};
