//! Error types
//!
//! Bootstrap failures are resolved into a single abort notification before
//! they reach the caller; worker failures only ever surface as a state
//! transition plus a host notification.

use std::io;

use thiserror::Error;

use crate::core::handlers::EventKind;
use crate::protocol::Status;

/// Fatal bootstrap failures
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Bad or missing arguments, wrong arity
    #[error("{0}")]
    Configuration(String),

    /// The terminal resource could not be created
    #[error("{0}")]
    ResourceAllocation(String),

    /// The session worker could not be started
    #[error("{0}")]
    WorkerLaunch(String),

    /// The host output channel rejected the identity message
    #[error("Unable to write to host: {0}")]
    Host(#[source] io::Error),
}

impl BootstrapError {
    /// Status classification reported to the host
    pub fn status(&self) -> Status {
        Status::ServerError
    }
}

/// Worker-internal failures
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Unable to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection closed by peer")]
    PeerClosed,

    #[error("Terminal released")]
    TerminalReleased,

    #[error("Connection error: {0}")]
    Io(#[from] io::Error),
}

/// Failures returned from event dispatch
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session has been torn down")]
    Closed,

    #[error("No handler bound for {0:?}")]
    Unbound(EventKind),

    #[error("Terminal error: {0}")]
    Terminal(#[from] io::Error),

    #[error("Session worker panicked")]
    WorkerPanicked,
}
