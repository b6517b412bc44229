//! Session worker
//!
//! One worker thread per session owns the network connection. It polls a
//! stop flag, drains commands queued by event handlers, and feeds decoded
//! server output into the terminal.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::connection::{parse_port, Connection, Connector};
use super::session::{ConnectionHandle, FeatureFlags, SessionContext, WorkerCommand, WorkerInbox};
use super::telnet::{self, TelnetDecoder, TelnetEvent};
use super::terminal::Terminal;
use crate::config::WorkerConfig;
use crate::error::{BootstrapError, ProtocolError};
use crate::protocol::{Instruction, Status};

const READ_BUFFER_SIZE: usize = 4096;

const CONNECTION_LOST: &str = "Connection to telnet server lost";

/// Starts worker tasks
pub trait Spawner: Send + Sync {
    fn spawn(&self, name: String, task: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>;
}

/// Spawns one named OS thread per worker
pub struct ThreadSpawner;

impl Spawner for ThreadSpawner {
    fn spawn(&self, name: String, task: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(task)
    }
}

/// Start the single worker of a session
///
/// On success the context is `Running` and owns the thread handle. On
/// failure the context ends `Stopped` and the caller must abort.
pub fn launch(
    ctx: &Arc<SessionContext>,
    inbox: WorkerInbox,
    connector: Arc<dyn Connector>,
    config: WorkerConfig,
    spawner: &dyn Spawner,
) -> Result<(), BootstrapError> {
    if !ctx.mark_running() {
        return Err(BootstrapError::WorkerLaunch(
            "Session worker already started".to_string(),
        ));
    }

    let worker = SessionWorker {
        ctx: Arc::clone(ctx),
        inbox,
        connector,
        config,
    };

    match spawner.spawn(format!("telnet-session-{}", ctx.id()), Box::new(move || worker.run())) {
        Ok(handle) => {
            ctx.attach_worker(handle);
            Ok(())
        }
        Err(e) => {
            error!(session = ctx.id(), "Failed to spawn session worker: {}", e);
            ctx.mark_stopped();
            Err(BootstrapError::WorkerLaunch(
                "Unable to start telnet client thread".to_string(),
            ))
        }
    }
}

/// Marks the session stopped however the worker exits
///
/// A panicking worker never reaches its own notice, so the host hears about
/// it from here.
struct StoppedOnExit<'a>(&'a SessionContext);

impl Drop for StoppedOnExit<'_> {
    fn drop(&mut self) {
        let ctx = self.0;
        if ctx.mark_stopped() && thread::panicking() && !ctx.stop_requested() {
            error!(session = ctx.id(), "Session worker panicked");
            notify_host(ctx, Some(CONNECTION_LOST));
        }
    }
}

struct SessionWorker {
    ctx: Arc<SessionContext>,
    inbox: WorkerInbox,
    connector: Arc<dyn Connector>,
    config: WorkerConfig,
}

impl SessionWorker {
    fn run(self) {
        let ctx = Arc::clone(&self.ctx);
        let _stopped = StoppedOnExit(&ctx);

        info!(session = ctx.id(), host = %ctx.params().hostname, "Session worker started");
        let outcome = self.session();

        if ctx.stop_requested() {
            info!(session = ctx.id(), "Session worker stopped on request");
            return;
        }

        let notice = match outcome {
            Ok(()) | Err(ProtocolError::PeerClosed) => {
                info!(session = ctx.id(), "Connection closed");
                None
            }
            Err(e @ (ProtocolError::InvalidPort(_) | ProtocolError::Connect { .. })) => {
                error!(session = ctx.id(), "{}", e);
                Some("Unable to connect to telnet server")
            }
            Err(e) => {
                error!(session = ctx.id(), "Session worker failed: {}", e);
                Some(CONNECTION_LOST)
            }
        };

        // Stopped before the host hears about it, so teardown finds a stopped worker
        ctx.mark_stopped();
        notify_host(&ctx, notice);
    }

    fn session(&self) -> Result<(), ProtocolError> {
        let params = self.ctx.params();
        let port = parse_port(&params.port)?;

        let mut connection = self
            .connector
            .connect(&params.hostname, port)
            .map_err(|source| ProtocolError::Connect {
                host: params.hostname.clone(),
                port: params.port.clone(),
                source,
            })?;

        let peer = connection.peer();
        info!(session = self.ctx.id(), %peer, "Connected");
        self.ctx.set_connection(ConnectionHandle { peer });

        let mut decoder = TelnetDecoder::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            if self.ctx.stop_requested() {
                return Ok(());
            }

            self.drain_commands(connection.as_mut())?;

            match connection.read(&mut buffer) {
                Ok(0) => return Err(ProtocolError::PeerClosed),
                Ok(n) => {
                    for event in decoder.decode(&buffer[..n]) {
                        self.handle_event(event, connection.as_mut())?;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn drain_commands(&self, connection: &mut dyn Connection) -> Result<(), ProtocolError> {
        for command in self.inbox.commands.try_iter() {
            match command {
                WorkerCommand::Input(bytes) => connection.write_all(&telnet::escape(&bytes))?,
                WorkerCommand::WindowSize(size) => {
                    if self.ctx.features().contains(FeatureFlags::NAWS) {
                        debug!(session = self.ctx.id(), "Window size {}x{}", size.cols, size.rows);
                        connection.write_all(&telnet::window_size(size))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_event(
        &self,
        event: TelnetEvent,
        connection: &mut dyn Connection,
    ) -> Result<(), ProtocolError> {
        match event {
            TelnetEvent::Data(bytes) => {
                self.terminal(|terminal| terminal.write(&bytes))??;
            }
            TelnetEvent::Negotiate(kind, option) => {
                let Some(reply) = telnet::answer(kind, option, self.ctx.features()) else {
                    return Ok(());
                };
                debug!(session = self.ctx.id(), "{:?} {} answered {:?}", kind, option, reply.bytes);
                connection.write_all(&reply.bytes)?;
                self.ctx.enable_features(reply.enable);

                if reply.enable.contains(FeatureFlags::NAWS) {
                    let size = self.terminal(|terminal| terminal.size())?;
                    connection.write_all(&telnet::window_size(size))?;
                }
            }
            TelnetEvent::Subnegotiation(option, payload) => {
                if telnet::is_terminal_type_request(option, &payload) {
                    connection.write_all(&telnet::terminal_type(&self.config.terminal_type))?;
                } else {
                    debug!(session = self.ctx.id(), "Ignoring subnegotiation for option {}", option);
                }
            }
        }
        Ok(())
    }

    fn terminal<R>(&self, f: impl FnOnce(&mut dyn Terminal) -> R) -> Result<R, ProtocolError> {
        self.ctx
            .with_terminal(f)
            .map_err(|_| ProtocolError::TerminalReleased)
    }
}

fn notify_host(ctx: &SessionContext, failure: Option<&str>) {
    let host = ctx.host();
    let mut result = Ok(());
    if let Some(message) = failure {
        result = host.send(&Instruction::Error {
            message: message.to_string(),
            status: Status::UpstreamError,
        });
    }
    let result = result
        .and_then(|_| host.send(&Instruction::Disconnect))
        .and_then(|_| host.flush());
    if let Err(e) = result {
        warn!(session = ctx.id(), "Unable to notify host of session end: {}", e);
    }
}
