//! Event handlers
//!
//! The host delivers input and lifecycle events through a fixed dispatch
//! table. Handlers never touch the connection or worker-owned state
//! directly: they read it, lock the terminal, or queue a [`WorkerCommand`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use crossterm::event::{KeyEvent, KeyEventKind};
use tracing::{debug, warn};

use super::session::{FeatureFlags, SessionContext, SessionId, WorkerCommand, WorkerState};
use super::telnet;
use crate::error::SessionError;
use crate::ui::KeyMapper;

/// Lines scrolled per wheel step
const SCROLL_STEP: i32 = 3;

/// Kinds of events a host may deliver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessagesReady,
    Key,
    Pointer,
    Resize,
    Clipboard,
    Teardown,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::MessagesReady,
        EventKind::Key,
        EventKind::Pointer,
        EventKind::Resize,
        EventKind::Clipboard,
        EventKind::Teardown,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Pointer button mask
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PointerButtons: u8 {
        const LEFT        = 0b0_0001;
        const MIDDLE      = 0b0_0010;
        const RIGHT       = 0b0_0100;
        const SCROLL_UP   = 0b0_1000;
        const SCROLL_DOWN = 0b1_0000;
    }
}

/// Pointer position and the buttons currently held
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerEvent {
    pub x: i32,
    pub y: i32,
    pub buttons: PointerButtons,
}

/// An event delivered by the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    /// The session may have output pending for the display
    MessagesReady,
    Key(KeyEvent),
    Pointer(PointerEvent),
    Resize { width: u32, height: u32 },
    Clipboard(String),
    Teardown,
}

impl HostEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HostEvent::MessagesReady => EventKind::MessagesReady,
            HostEvent::Key(_) => EventKind::Key,
            HostEvent::Pointer(_) => EventKind::Pointer,
            HostEvent::Resize { .. } => EventKind::Resize,
            HostEvent::Clipboard(_) => EventKind::Clipboard,
            HostEvent::Teardown => EventKind::Teardown,
        }
    }
}

/// Handles one kind of host event
pub trait EventHandler: Send + Sync {
    fn handle(&self, ctx: &SessionContext, event: &HostEvent) -> Result<(), SessionError>;
}

/// Dispatch table from event kind to handler
pub struct HandlerRegistry {
    handlers: [Option<Box<dyn EventHandler>>; EventKind::ALL.len()],
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: std::array::from_fn(|_| None),
        }
    }

    /// The handler set of a telnet session
    pub fn telnet() -> Self {
        let mut registry = Self::empty();
        registry
            .bind(EventKind::MessagesReady, MessagesReadyHandler)
            .bind(EventKind::Key, KeyHandler)
            .bind(EventKind::Pointer, PointerHandler::default())
            .bind(EventKind::Resize, ResizeHandler)
            .bind(EventKind::Clipboard, ClipboardHandler)
            .bind(EventKind::Teardown, TeardownHandler);
        registry
    }

    /// Bind a handler, replacing any previous one for `kind`
    pub fn bind(&mut self, kind: EventKind, handler: impl EventHandler + 'static) -> &mut Self {
        self.handlers[kind.index()] = Some(Box::new(handler));
        self
    }

    pub fn is_bound(&self, kind: EventKind) -> bool {
        self.handlers[kind.index()].is_some()
    }

    pub fn dispatch(&self, ctx: &SessionContext, event: &HostEvent) -> Result<(), SessionError> {
        let kind = event.kind();
        match &self.handlers[kind.index()] {
            Some(handler) => handler.handle(ctx, event),
            None => Err(SessionError::Unbound(kind)),
        }
    }
}

/// Flushes pending terminal output to the display
pub struct MessagesReadyHandler;

impl EventHandler for MessagesReadyHandler {
    fn handle(&self, ctx: &SessionContext, _event: &HostEvent) -> Result<(), SessionError> {
        ctx.with_terminal(|terminal| terminal.flush())??;
        Ok(())
    }
}

/// Forwards key presses to the server
pub struct KeyHandler;

impl EventHandler for KeyHandler {
    fn handle(&self, ctx: &SessionContext, event: &HostEvent) -> Result<(), SessionError> {
        let HostEvent::Key(key) = event else {
            return Ok(());
        };
        if ctx.is_released() {
            return Err(SessionError::Closed);
        }
        if key.kind == KeyEventKind::Release {
            return Ok(());
        }
        if ctx.connection().is_none() {
            debug!(session = ctx.id(), "Key dropped before connect");
            return Ok(());
        }
        match KeyMapper::map(key) {
            Some(bytes) => ctx.enqueue(WorkerCommand::Input(bytes)),
            None => Ok(()),
        }
    }
}

/// Scrolls on wheel steps and pastes the clipboard on middle click
#[derive(Default)]
pub struct PointerHandler {
    last_buttons: AtomicU8,
}

impl EventHandler for PointerHandler {
    fn handle(&self, ctx: &SessionContext, event: &HostEvent) -> Result<(), SessionError> {
        let HostEvent::Pointer(pointer) = event else {
            return Ok(());
        };
        if ctx.is_released() {
            return Err(SessionError::Closed);
        }
        let previous =
            PointerButtons::from_bits_truncate(self.last_buttons.swap(pointer.buttons.bits(), Ordering::SeqCst));
        let pressed = pointer.buttons - previous;

        if pressed.contains(PointerButtons::SCROLL_UP) {
            ctx.with_terminal(|terminal| terminal.scroll(-SCROLL_STEP))?;
        }
        if pressed.contains(PointerButtons::SCROLL_DOWN) {
            ctx.with_terminal(|terminal| terminal.scroll(SCROLL_STEP))?;
        }

        if pressed.contains(PointerButtons::MIDDLE) && ctx.connection().is_some() {
            let text = ctx.clipboard();
            if !text.is_empty() {
                let bytes = telnet::bare_cr_to_cr_nul(text.as_bytes());
                ctx.enqueue(WorkerCommand::Input(bytes))?;
            }
        }
        Ok(())
    }
}

/// Resizes the terminal and reports the new size when negotiated
pub struct ResizeHandler;

impl EventHandler for ResizeHandler {
    fn handle(&self, ctx: &SessionContext, event: &HostEvent) -> Result<(), SessionError> {
        let HostEvent::Resize { width, height } = *event else {
            return Ok(());
        };
        let size = ctx.with_terminal(|terminal| terminal.resize(width, height))??;
        debug!(session = ctx.id(), "Resized to {}x{}", size.cols, size.rows);

        let negotiated = ctx.features().contains(FeatureFlags::NAWS);
        if negotiated && ctx.connection().is_some() && ctx.worker_state() == WorkerState::Running {
            if let Err(e) = ctx.enqueue(WorkerCommand::WindowSize(size)) {
                warn!(session = ctx.id(), "Window size not sent: {}", e);
            }
        }
        Ok(())
    }
}

/// Stores clipboard text received from the host
pub struct ClipboardHandler;

impl EventHandler for ClipboardHandler {
    fn handle(&self, ctx: &SessionContext, event: &HostEvent) -> Result<(), SessionError> {
        let HostEvent::Clipboard(text) = event else {
            return Ok(());
        };
        if ctx.is_released() {
            return Err(SessionError::Closed);
        }
        ctx.set_clipboard(text.clone());
        Ok(())
    }
}

/// Stops the worker and releases the session
pub struct TeardownHandler;

impl EventHandler for TeardownHandler {
    fn handle(&self, ctx: &SessionContext, _event: &HostEvent) -> Result<(), SessionError> {
        ctx.teardown()
    }
}

/// A bootstrapped session as held by the host
#[derive(Clone)]
pub struct SessionHandle {
    ctx: Arc<SessionContext>,
    handlers: Arc<HandlerRegistry>,
}

impl SessionHandle {
    pub(crate) fn new(ctx: Arc<SessionContext>, handlers: Arc<HandlerRegistry>) -> Self {
        Self { ctx, handlers }
    }

    pub fn id(&self) -> SessionId {
        self.ctx.id()
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Deliver one host event
    pub fn dispatch(&self, event: HostEvent) -> Result<(), SessionError> {
        self.handlers.dispatch(&self.ctx, &event)
    }

    pub fn teardown(&self) -> Result<(), SessionError> {
        self.dispatch(HostEvent::Teardown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{ConnectionHandle, WorkerInbox};
    use crate::core::terminal::GridSize;
    use crate::core::testing::{params, RecordingHost, TrackingFactory};
    use crossterm::event::{KeyCode, KeyEventState, KeyModifiers};

    struct Fixture {
        factory: TrackingFactory,
        handle: SessionHandle,
        inbox: WorkerInbox,
    }

    impl Fixture {
        fn new() -> Self {
            let factory = TrackingFactory::new();
            let (ctx, inbox) =
                SessionContext::new(3, params("h"), factory.terminal(), RecordingHost::new());
            let handle = SessionHandle::new(Arc::new(ctx), Arc::new(HandlerRegistry::telnet()));
            Self { factory, handle, inbox }
        }

        fn connected() -> Self {
            let fixture = Self::new();
            let ctx = fixture.handle.context();
            ctx.set_connection(ConnectionHandle { peer: "peer".into() });
            assert!(ctx.mark_running());
            fixture
        }

        fn queued(&self) -> Vec<WorkerCommand> {
            self.inbox.commands.try_iter().collect()
        }
    }

    fn key(code: KeyCode, kind: KeyEventKind) -> HostEvent {
        HostEvent::Key(KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind,
            state: KeyEventState::NONE,
        })
    }

    fn pointer(buttons: PointerButtons) -> HostEvent {
        HostEvent::Pointer(PointerEvent { x: 10, y: 10, buttons })
    }

    #[test]
    fn test_telnet_registry_binds_every_kind() {
        let registry = HandlerRegistry::telnet();
        for kind in EventKind::ALL {
            assert!(registry.is_bound(kind), "{:?} unbound", kind);
        }
    }

    #[test]
    fn test_unbound_kind() {
        let factory = TrackingFactory::new();
        let (ctx, _inbox) =
            SessionContext::new(1, params("h"), factory.terminal(), RecordingHost::new());
        let registry = HandlerRegistry::empty();
        assert!(matches!(
            registry.dispatch(&ctx, &HostEvent::MessagesReady),
            Err(SessionError::Unbound(EventKind::MessagesReady))
        ));
    }

    #[test]
    fn test_key_press_is_queued() {
        let f = Fixture::connected();
        f.handle.dispatch(key(KeyCode::Char('l'), KeyEventKind::Press)).unwrap();
        f.handle.dispatch(key(KeyCode::Char('l'), KeyEventKind::Release)).unwrap();
        f.handle.dispatch(key(KeyCode::Enter, KeyEventKind::Press)).unwrap();

        assert_eq!(
            f.queued(),
            vec![
                WorkerCommand::Input(b"l".to_vec()),
                WorkerCommand::Input(vec![0x0D, 0x00]),
            ]
        );
    }

    #[test]
    fn test_key_before_connect_is_dropped() {
        let f = Fixture::new();
        f.handle.dispatch(key(KeyCode::Char('a'), KeyEventKind::Press)).unwrap();
        assert!(f.queued().is_empty());
    }

    #[test]
    fn test_messages_ready_flushes_terminal() {
        let f = Fixture::new();
        f.handle.dispatch(HostEvent::MessagesReady).unwrap();
        f.handle.dispatch(HostEvent::MessagesReady).unwrap();
        assert_eq!(f.factory.flushes(), 2);
    }

    #[test]
    fn test_resize_without_naws_only_resizes() {
        let f = Fixture::connected();
        f.handle
            .dispatch(HostEvent::Resize { width: 1000, height: 400 })
            .unwrap();

        let size = f.handle.context().with_terminal(|t| t.size()).unwrap();
        assert_eq!(size, GridSize { cols: 100, rows: 20 });
        assert!(f.queued().is_empty());
    }

    #[test]
    fn test_resize_with_naws_queues_size() {
        let f = Fixture::connected();
        f.handle.context().enable_features(FeatureFlags::NAWS);
        f.handle
            .dispatch(HostEvent::Resize { width: 1000, height: 400 })
            .unwrap();

        assert_eq!(
            f.queued(),
            vec![WorkerCommand::WindowSize(GridSize { cols: 100, rows: 20 })]
        );
    }

    #[test]
    fn test_wheel_scrolls_on_press_only() {
        let f = Fixture::new();
        f.handle.dispatch(pointer(PointerButtons::SCROLL_UP)).unwrap();
        // Still held: no new step
        f.handle.dispatch(pointer(PointerButtons::SCROLL_UP)).unwrap();
        f.handle.dispatch(pointer(PointerButtons::empty())).unwrap();
        f.handle.dispatch(pointer(PointerButtons::SCROLL_DOWN)).unwrap();
        f.handle.dispatch(pointer(PointerButtons::empty())).unwrap();
        f.handle.dispatch(pointer(PointerButtons::SCROLL_DOWN)).unwrap();

        assert_eq!(f.factory.scrolled(), -3 + 3 + 3);
    }

    #[test]
    fn test_middle_click_pastes_clipboard() {
        let f = Fixture::connected();

        // Empty clipboard pastes nothing
        f.handle.dispatch(pointer(PointerButtons::MIDDLE)).unwrap();
        f.handle.dispatch(pointer(PointerButtons::empty())).unwrap();
        assert!(f.queued().is_empty());

        f.handle
            .dispatch(HostEvent::Clipboard("echo hi".to_string()))
            .unwrap();
        assert_eq!(f.handle.context().clipboard(), "echo hi");

        f.handle.dispatch(pointer(PointerButtons::MIDDLE)).unwrap();
        f.handle
            .dispatch(pointer(PointerButtons::MIDDLE | PointerButtons::LEFT))
            .unwrap();
        assert_eq!(f.queued(), vec![WorkerCommand::Input(b"echo hi".to_vec())]);
    }

    #[test]
    fn test_pasted_cr_is_terminated() {
        let f = Fixture::connected();
        f.handle
            .dispatch(HostEvent::Clipboard("ls\rpwd\r\n".to_string()))
            .unwrap();
        f.handle.dispatch(pointer(PointerButtons::MIDDLE)).unwrap();
        assert_eq!(
            f.queued(),
            vec![WorkerCommand::Input(b"ls\r\0pwd\r\n".to_vec())]
        );
    }

    #[test]
    fn test_teardown_twice() {
        let f = Fixture::new();
        f.handle.teardown().unwrap();
        assert_eq!(f.factory.released(), 1);

        f.handle.teardown().unwrap();
        assert_eq!(f.factory.released(), 1);
    }

    #[test]
    fn test_events_after_teardown_are_rejected() {
        let f = Fixture::connected();
        f.handle.teardown().unwrap();

        assert!(matches!(
            f.handle.dispatch(HostEvent::MessagesReady),
            Err(SessionError::Closed)
        ));
        assert!(matches!(
            f.handle.dispatch(key(KeyCode::Char('a'), KeyEventKind::Press)),
            Err(SessionError::Closed)
        ));
        assert!(matches!(
            f.handle.dispatch(HostEvent::Resize { width: 10, height: 10 }),
            Err(SessionError::Closed)
        ));
        assert!(matches!(
            f.handle.dispatch(HostEvent::Clipboard("x".into())),
            Err(SessionError::Closed)
        ));
        // Plain motion too, not only button changes
        assert!(matches!(
            f.handle.dispatch(pointer(PointerButtons::empty())),
            Err(SessionError::Closed)
        ));
    }
}
