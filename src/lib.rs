//! teleterm - telnet sessions for remote terminal gateways
//!
//! A host (gateway process or the bundled CLI) asks a [`Bootstrapper`] for a
//! session, then drives it through the returned [`SessionHandle`]:
//!
//! ```text
//! let handle = bootstrapper.bootstrap(host, &["example.com", "", "", ""])?;
//! handle.dispatch(HostEvent::MessagesReady)?;
//! handle.teardown()?;
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod ui;

pub use crate::config::Config;
pub use crate::core::bootstrap::{BootstrapStage, Bootstrapper};
pub use crate::core::handlers::{EventKind, HostEvent, PointerButtons, PointerEvent, SessionHandle};
pub use crate::core::session::WorkerState;
pub use crate::core::terminal::{GridSize, Terminal, TerminalFactory, TerminalRequest};
pub use crate::error::{BootstrapError, SessionError};
pub use crate::protocol::{ClientInfo, Host, Instruction, Status, WireHost};
