//! Session core.
//!
//! Everything between the host boundary and the remote telnet server:
//!
//! - **params**: argument schema, validation and defaulting
//! - **terminal**: terminal resource traits supplied by the host
//! - **session**: shared per-session state and exactly-once teardown
//! - **handlers**: host event dispatch table
//! - **worker**: background thread owning the connection
//! - **telnet**: telnet stream codec and option negotiation
//! - **connection**: connector seam and the TCP implementation
//! - **bootstrap**: the bootstrap state machine and its abort path
//!
//! # Architecture
//!
//! ```text
//! Bootstrapper
//! └── SessionHandle
//!     ├── HandlerRegistry (runs on the host's thread)
//!     └── SessionContext
//!         ├── Terminal (behind one mutex)
//!         ├── WorkerCommand queue ──> SessionWorker thread
//!         └── ConnectionHandle <───── set once by the worker
//! ```

pub mod bootstrap;
pub mod connection;
pub mod handlers;
pub mod params;
pub mod session;
pub mod telnet;
pub mod terminal;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
