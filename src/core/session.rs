//! Session management
//!
//! A [`SessionContext`] is the state shared between the bootstrap call, the
//! session worker and the host's event handlers.
//!
//! Ownership rules:
//! - the terminal lives behind a single mutex and is released exactly once,
//!   at teardown (or by the abort path if bootstrap fails)
//! - the connection handle is set once by the worker and read-only afterwards
//! - worker state and feature flags are written by the worker only; handlers
//!   read them and queue [`WorkerCommand`]s for anything that needs the
//!   connection

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use bitflags::bitflags;
use tracing::{debug, error, info, warn};

use super::params::SessionParams;
use super::terminal::{GridSize, Terminal};
use crate::error::SessionError;
use crate::protocol::Host;

/// Session identifier, unique per bootstrapper
pub type SessionId = u64;

/// Lifecycle of the session worker
///
/// Transitions are strictly `NotStarted -> Running -> Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::NotStarted,
            1 => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }
}

bitflags! {
    /// Capabilities negotiated with the remote end
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FeatureFlags: u8 {
        /// Window size negotiation (NAWS)
        const NAWS              = 0b0001;
        /// Remote end echoes input
        const ECHO              = 0b0010;
        const SUPPRESS_GO_AHEAD = 0b0100;
        const TERMINAL_TYPE     = 0b1000;
    }
}

/// The established network connection, as visible to handlers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub peer: String,
}

/// Request queued by a handler for the worker to carry out
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Bytes to send to the remote end
    Input(Vec<u8>),
    /// Announce a new window size (only sent when NAWS is negotiated)
    WindowSize(GridSize),
}

/// Receiving end of the command queue, handed to the worker at launch
pub struct WorkerInbox {
    pub(crate) commands: Receiver<WorkerCommand>,
}

/// Shared state of one session
pub struct SessionContext {
    id: SessionId,
    params: SessionParams,
    host: Arc<dyn Host>,
    terminal: Mutex<Option<Box<dyn Terminal>>>,
    connection: OnceLock<ConnectionHandle>,
    worker_state: AtomicU8,
    features: AtomicU8,
    stop_requested: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    commands: Sender<WorkerCommand>,
    clipboard: Mutex<String>,
    released: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionContext {
    /// Assemble a context around an allocated terminal
    pub fn new(
        id: SessionId,
        params: SessionParams,
        terminal: Box<dyn Terminal>,
        host: Arc<dyn Host>,
    ) -> (Self, WorkerInbox) {
        let (commands, receiver) = mpsc::channel();
        let context = Self {
            id,
            params,
            host,
            terminal: Mutex::new(Some(terminal)),
            connection: OnceLock::new(),
            worker_state: AtomicU8::new(WorkerState::NotStarted as u8),
            features: AtomicU8::new(FeatureFlags::empty().bits()),
            stop_requested: AtomicBool::new(false),
            worker: Mutex::new(None),
            commands,
            clipboard: Mutex::new(String::new()),
            released: AtomicBool::new(false),
        };
        (context, WorkerInbox { commands: receiver })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    pub fn worker_state(&self) -> WorkerState {
        WorkerState::from_u8(self.worker_state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        let changed = self
            .worker_state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            debug!(session = self.id, "Worker {:?} -> {:?}", from, to);
        }
        changed
    }

    /// `NotStarted -> Running`; fails if a worker was ever associated
    pub(crate) fn mark_running(&self) -> bool {
        self.transition(WorkerState::NotStarted, WorkerState::Running)
    }

    /// `Running -> Stopped`
    pub(crate) fn mark_stopped(&self) -> bool {
        self.transition(WorkerState::Running, WorkerState::Stopped)
    }

    pub fn features(&self) -> FeatureFlags {
        FeatureFlags::from_bits_truncate(self.features.load(Ordering::SeqCst))
    }

    pub(crate) fn enable_features(&self, flags: FeatureFlags) {
        self.features.fetch_or(flags.bits(), Ordering::SeqCst);
    }

    /// The connection, once the worker has established it
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.get()
    }

    pub(crate) fn set_connection(&self, handle: ConnectionHandle) -> bool {
        self.connection.set(handle).is_ok()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Ask the worker to stop at its next poll
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Run `f` with exclusive access to the terminal
    pub fn with_terminal<R>(
        &self,
        f: impl FnOnce(&mut dyn Terminal) -> R,
    ) -> Result<R, SessionError> {
        let mut guard = lock(&self.terminal);
        match guard.as_mut() {
            Some(terminal) => Ok(f(terminal.as_mut())),
            None => Err(SessionError::Closed),
        }
    }

    /// Queue a command for the worker
    pub fn enqueue(&self, command: WorkerCommand) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }

    pub fn clipboard(&self) -> String {
        lock(&self.clipboard).clone()
    }

    pub(crate) fn set_clipboard(&self, text: String) {
        *lock(&self.clipboard) = text;
    }

    /// Associate the launched worker thread
    pub(crate) fn attach_worker(&self, handle: JoinHandle<()>) {
        let previous = lock(&self.worker).replace(handle);
        debug_assert!(previous.is_none(), "worker attached twice");
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stop the worker and release the terminal
    ///
    /// Runs once; later calls are no-ops returning `Ok`.
    pub fn teardown(&self) -> Result<(), SessionError> {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!(session = self.id, "Teardown on released session ignored");
            return Ok(());
        }
        info!(session = self.id, host = %self.params.hostname, "Tearing down session");

        self.request_stop();

        let mut result = Ok(());
        let worker = lock(&self.worker).take();
        if let Some(handle) = worker {
            if handle.thread().id() == thread::current().id() {
                warn!(session = self.id, "Teardown requested from the worker thread");
            } else if handle.join().is_err() {
                error!(session = self.id, "Session worker panicked");
                result = Err(SessionError::WorkerPanicked);
            }
        }
        // A panicked worker never reached its own transition
        self.mark_stopped();

        let terminal = lock(&self.terminal).take();
        drop(terminal);

        info!(session = self.id, "Session released");
        result
    }
}
