//! Session bootstrap
//!
//! Turns a host's session request into a running session:
//!
//! ```text
//! Start -> ParamsResolved -> TerminalAllocated -> ContextBuilt
//!       -> HandlersRegistered -> WorkerLaunched
//! ```
//!
//! Any failure moves to `Aborted` through [`AbortPath`], which notifies the
//! host once and releases whatever the attempt had acquired. No worker is
//! left running after an abort.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::connection::{Connector, TcpConnector};
use super::handlers::{HandlerRegistry, SessionHandle};
use super::params;
use super::session::{SessionContext, SessionId};
use super::terminal::{TerminalFactory, TerminalRequest};
use super::worker::{self, Spawner, ThreadSpawner};
use crate::config::Config;
use crate::error::BootstrapError;
use crate::protocol::{Host, Instruction};

/// Progress of one bootstrap attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapStage {
    Start,
    ParamsResolved,
    TerminalAllocated,
    ContextBuilt,
    HandlersRegistered,
    WorkerLaunched,
    Aborted,
}

/// One bootstrap attempt and what it holds so far
struct Attempt {
    id: SessionId,
    stage: BootstrapStage,
    /// Owns the terminal once allocated; the terminal moves straight into it
    context: Option<Arc<SessionContext>>,
}

impl Attempt {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            stage: BootstrapStage::Start,
            context: None,
        }
    }

    fn advance(&mut self, stage: BootstrapStage) {
        debug!(session = self.id, "Bootstrap {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }
}

/// Single exit for failed bootstrap attempts
pub struct AbortPath<'a> {
    host: &'a dyn Host,
}

impl<'a> AbortPath<'a> {
    pub fn new(host: &'a dyn Host) -> Self {
        Self { host }
    }

    /// Notify the host, release acquired resources and hand back the error
    ///
    /// Safe to reach more than once for the same attempt: only the first
    /// call notifies or releases anything.
    fn abort(&self, attempt: &mut Attempt, error: BootstrapError) -> BootstrapError {
        if attempt.stage == BootstrapStage::Aborted {
            debug!(session = attempt.id, "Already aborted: {}", error);
            return error;
        }
        error!(session = attempt.id, stage = ?attempt.stage, "Bootstrap aborted: {}", error);

        let notice = Instruction::Error {
            message: error.to_string(),
            status: error.status(),
        };
        if let Err(e) = self.host.send(&notice).and_then(|_| self.host.flush()) {
            warn!(session = attempt.id, "Unable to report abort to host: {}", e);
        }

        if let Some(ctx) = attempt.context.take() {
            // No worker is running here, so this only releases the terminal
            if let Err(e) = ctx.teardown() {
                warn!(session = attempt.id, "Release after abort: {}", e);
            }
        }

        attempt.advance(BootstrapStage::Aborted);
        error
    }
}

/// Creates telnet sessions on behalf of a host
pub struct Bootstrapper {
    config: Config,
    terminals: Arc<dyn TerminalFactory>,
    connector: Arc<dyn Connector>,
    spawner: Arc<dyn Spawner>,
    next_id: AtomicU64,
}

impl Bootstrapper {
    /// Bootstrapper connecting over TCP with one thread per session
    pub fn new(config: Config, terminals: Arc<dyn TerminalFactory>) -> Self {
        let connector = Arc::new(TcpConnector::new(&config.worker));
        Self {
            config,
            terminals,
            connector,
            spawner: Arc::new(ThreadSpawner),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Bootstrap one session from the host's argument vector
    ///
    /// On failure the host has already been sent one error notification.
    pub fn bootstrap(
        &self,
        host: Arc<dyn Host>,
        args: &[String],
    ) -> Result<SessionHandle, BootstrapError> {
        let mut attempt = Attempt::new(self.next_id.fetch_add(1, Ordering::SeqCst));

        match self.run(&mut attempt, &host, args) {
            Ok(handle) => {
                attempt.advance(BootstrapStage::WorkerLaunched);
                info!(session = attempt.id, host = %handle.context().params().hostname, "Session started");
                Ok(handle)
            }
            Err(error) => Err(AbortPath::new(host.as_ref()).abort(&mut attempt, error)),
        }
    }

    fn run(
        &self,
        attempt: &mut Attempt,
        host: &Arc<dyn Host>,
        args: &[String],
    ) -> Result<SessionHandle, BootstrapError> {
        let params = params::resolve(args, &self.config.defaults)?;
        attempt.advance(BootstrapStage::ParamsResolved);

        let info = host.info();
        let request = TerminalRequest {
            owner: attempt.id,
            font_name: &params.font_name,
            font_size: params.font_size,
            resolution: info.optimal_resolution,
            width: info.optimal_width,
            height: info.optimal_height,
        };
        let terminal = self.terminals.create(&request).ok_or_else(|| {
            BootstrapError::ResourceAllocation("Terminal initialization failed".to_string())
        })?;
        attempt.advance(BootstrapStage::TerminalAllocated);

        let (ctx, inbox) = SessionContext::new(attempt.id, params, terminal, Arc::clone(host));
        let ctx = Arc::new(ctx);
        attempt.context = Some(Arc::clone(&ctx));
        attempt.advance(BootstrapStage::ContextBuilt);

        // Label the session before any handler or protocol traffic exists
        host.send(&Instruction::Name(ctx.params().hostname.clone()))
            .and_then(|_| host.flush())
            .map_err(BootstrapError::Host)?;

        let handlers = Arc::new(HandlerRegistry::telnet());
        attempt.advance(BootstrapStage::HandlersRegistered);

        worker::launch(
            &ctx,
            inbox,
            Arc::clone(&self.connector),
            self.config.worker.clone(),
            self.spawner.as_ref(),
        )?;

        // The worker now shares ownership; abort no longer applies
        attempt.context = None;
        Ok(SessionHandle::new(ctx, handlers))
    }
}
