//! Host protocol
//!
//! Outbound control instructions sent from a session to the hosting gateway,
//! and the [`Host`] trait through which they are delivered.
//!
//! # Wire format
//!
//! Each element is written as `<length>.<value>` where the length counts
//! characters, elements are separated by `,` and an instruction ends with `;`.
//! The first element is the opcode:
//!
//! ```text
//! 4.name,11.example.com;
//! 5.error,30.Terminal initialization failed,3.512;
//! ```

use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Status classification attached to error notifications
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    Unsupported,
    ServerError,
    ServerBusy,
    UpstreamTimeout,
    UpstreamError,
    ResourceNotFound,
    ClientBadRequest,
}

impl Status {
    /// Numeric status code as sent on the wire
    pub fn code(self) -> u16 {
        match self {
            Status::Success => 0x0000,
            Status::Unsupported => 0x0100,
            Status::ServerError => 0x0200,
            Status::ServerBusy => 0x0201,
            Status::UpstreamTimeout => 0x0202,
            Status::UpstreamError => 0x0203,
            Status::ResourceNotFound => 0x0204,
            Status::ClientBadRequest => 0x0300,
        }
    }
}

/// Outbound control instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Human-readable session label
    Name(String),
    /// Fatal condition; the host surfaces it to the remote party
    Error { message: String, status: Status },
    /// The session ended on its own and should be torn down
    Disconnect,
}

impl Instruction {
    pub fn opcode(&self) -> &'static str {
        match self {
            Instruction::Name(_) => "name",
            Instruction::Error { .. } => "error",
            Instruction::Disconnect => "disconnect",
        }
    }

    /// Encode into the length-prefixed wire form
    pub fn encode(&self) -> String {
        let mut out = String::new();
        push_element(&mut out, self.opcode());
        match self {
            Instruction::Name(label) => {
                out.push(',');
                push_element(&mut out, label);
            }
            Instruction::Error { message, status } => {
                out.push(',');
                push_element(&mut out, message);
                out.push(',');
                push_element(&mut out, &status.code().to_string());
            }
            Instruction::Disconnect => {}
        }
        out.push(';');
        out
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn push_element(out: &mut String, value: &str) {
    out.push_str(&value.chars().count().to_string());
    out.push('.');
    out.push_str(value);
}

/// Display parameters announced by the host for a new session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientInfo {
    /// Preferred resolution in DPI
    pub optimal_resolution: u32,
    pub optimal_width: u32,
    pub optimal_height: u32,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            optimal_resolution: 96,
            optimal_width: 1024,
            optimal_height: 768,
        }
    }
}

/// The hosting gateway as seen by a session
///
/// Instructions may be sent from the bootstrap call and later from the
/// session worker, so implementations serialize their own output.
pub trait Host: Send + Sync {
    /// Display parameters for the session being created
    fn info(&self) -> ClientInfo;

    /// Queue an instruction on the host output channel
    fn send(&self, instruction: &Instruction) -> io::Result<()>;

    /// Flush queued instructions
    fn flush(&self) -> io::Result<()>;
}

/// Host that writes encoded instructions to any byte sink
pub struct WireHost<W: Write + Send> {
    info: ClientInfo,
    writer: Mutex<W>,
}

impl<W: Write + Send> WireHost<W> {
    pub fn new(writer: W, info: ClientInfo) -> Self {
        Self {
            info,
            writer: Mutex::new(writer),
        }
    }

    /// Access the underlying writer
    pub fn writer(&self) -> MutexGuard<'_, W> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Host for WireHost<W> {
    fn info(&self) -> ClientInfo {
        self.info
    }

    fn send(&self, instruction: &Instruction) -> io::Result<()> {
        self.writer().write_all(instruction.encode().as_bytes())
    }

    fn flush(&self) -> io::Result<()> {
        self.writer().flush()
    }
}
