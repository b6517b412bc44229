//! teleterm - run a telnet session in the local console
//!
//! The binary hosts a single session itself: the console is the display,
//! keyboard and mouse input are forwarded to the session's event handlers,
//! and the process exits when the session worker stops.
//!
//! # Quick Start
//!
//! ```text
//! teleterm example.com              # port 23
//! teleterm example.com 2323
//! teleterm -c ./teleterm.toml example.com
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Ctrl+] | Close the session |
//! | Ctrl+Alt+V | Paste from the system clipboard |
//! | Middle click | Paste the last clipboard text |
//!
//! Pastes from the console itself arrive as bracketed paste.

use std::env;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use crossterm::event::{
    self, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
    Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent,
    MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use teleterm::config::{Config, LogConfig};
use teleterm::core::params;
use teleterm::core::terminal::GridSize;
use teleterm::ui::{CellMetrics, LocalHost, LocalTerminalFactory};
use teleterm::{
    Bootstrapper, Host, HostEvent, PointerButtons, PointerEvent, SessionError, SessionHandle,
    WorkerState,
};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for input before draining session output
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Command line options
struct Options {
    config_path: Option<PathBuf>,
    /// Positional session arguments, padded to the declared arity
    session_args: Vec<String>,
}

fn print_version() {
    eprintln!("teleterm {}", VERSION);
}

fn print_help() {
    eprintln!("teleterm {} - telnet client session", VERSION);
    eprintln!();
    let usage: Vec<String> = params::TELNET_ARGS
        .iter()
        .map(|spec| match spec.kind {
            params::ParamKind::Required => format!("<{}>", spec.name),
            _ => format!("[{}]", spec.name),
        })
        .collect();
    eprintln!("Usage: teleterm [OPTIONS] {}", usage.join(" "));
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>   Read configuration from FILE");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Empty arguments take the configured defaults (port 23).");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Ctrl+]                Close the session");
    eprintln!("  Ctrl+Alt+V            Paste from the system clipboard");
    eprintln!();
    eprintln!("Configuration: ~/.teleterm/config.toml");
    eprintln!("Log file:      ~/.teleterm/teleterm.log");
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options {
        config_path: None,
        session_args: Vec::new(),
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing config file argument".to_string());
                }
                options.config_path = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with('-') && arg.len() > 1 => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            arg => options.session_args.push(arg.to_string()),
        }
        i += 1;
    }

    let arity = params::TELNET_ARGS.len();
    if options.session_args.is_empty() {
        return Err("Missing hostname".to_string());
    }
    if options.session_args.len() > arity {
        let expected: Vec<&str> = params::arg_names().collect();
        return Err(format!("Too many arguments (expected: {})", expected.join(" ")));
    }
    options.session_args.resize(arity, String::new());

    Ok(options)
}

/// Log to file; RUST_LOG overrides the configured level
fn init_logging(log: &LogConfig) {
    let log_path = log.file_path();
    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&log.level));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Raw mode, alternate screen, mouse capture and bracketed paste for the session's lifetime
struct ConsoleGuard;

impl ConsoleGuard {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(
            io::stdout(),
            EnterAlternateScreen,
            EnableMouseCapture,
            EnableBracketedPaste
        )?;
        Ok(Self)
    }
}

impl Drop for ConsoleGuard {
    fn drop(&mut self) {
        let _ = execute!(
            io::stdout(),
            DisableBracketedPaste,
            DisableMouseCapture,
            LeaveAlternateScreen
        );
        let _ = terminal::disable_raw_mode();
    }
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = match &options.config_path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Unable to load config {}", path.display()))?,
        None => Config::load(),
    };

    init_logging(&config.log);
    info!("teleterm {} starting", VERSION);

    let host = Arc::new(LocalHost::stdout(&config.display));
    let factory = LocalTerminalFactory::stdout().context("Unable to query console size")?;
    let (cols, rows) = terminal::size()?;
    let info = host.info();
    let cell = CellMetrics::measure(info.optimal_width, info.optimal_height, GridSize { cols, rows });

    let bootstrapper = Bootstrapper::new(config, Arc::new(factory));

    let result = {
        let _console = ConsoleGuard::enter()?;
        match bootstrapper.bootstrap(host.clone(), &options.session_args) {
            Ok(handle) => {
                let result = run_main_loop(&handle, cell);
                if let Err(e) = handle.teardown() {
                    warn!("Teardown: {}", e);
                }
                result
            }
            Err(e) => Err(e.into()),
        }
    };

    if let Some(message) = host.last_error() {
        anyhow::bail!(message);
    }
    result?;

    if host.is_disconnected() {
        eprintln!("Connection closed by foreign host.");
    } else {
        eprintln!("Connection closed.");
    }
    info!("teleterm exiting");
    Ok(())
}

fn run_main_loop(handle: &SessionHandle, cell: CellMetrics) -> anyhow::Result<()> {
    loop {
        if handle.context().worker_state() == WorkerState::Stopped {
            // Render whatever arrived before the peer went away
            deliver(handle, HostEvent::MessagesReady);
            info!("Session ended");
            break;
        }

        if event::poll(POLL_TIMEOUT)? {
            let events = match event::read()? {
                Event::Key(key) => {
                    if is_quit(&key) {
                        info!("Closed by user");
                        break;
                    }
                    if is_paste(&key) {
                        paste_events()
                    } else {
                        vec![HostEvent::Key(key)]
                    }
                }
                Event::Mouse(mouse) => pointer_events(&mouse, cell),
                Event::Resize(cols, rows) => {
                    let (width, height) = cell.pixels(GridSize { cols, rows });
                    vec![HostEvent::Resize { width, height }]
                }
                Event::Paste(text) => vec![
                    HostEvent::Clipboard(text),
                    pointer_at(0, 0, PointerButtons::MIDDLE),
                    pointer_at(0, 0, PointerButtons::empty()),
                ],
                _ => Vec::new(),
            };

            for event in events {
                if !deliver(handle, event) {
                    return Ok(());
                }
            }
        }

        if !deliver(handle, HostEvent::MessagesReady) {
            break;
        }
    }

    Ok(())
}

/// Dispatch one event; false once the session is gone
fn deliver(handle: &SessionHandle, event: HostEvent) -> bool {
    match handle.dispatch(event) {
        Ok(()) => true,
        Err(SessionError::Closed) => false,
        Err(e) => {
            warn!("Event dispatch failed: {}", e);
            true
        }
    }
}

/// Ctrl+] (reported as Ctrl+5 by Unix consoles)
fn is_quit(key: &KeyEvent) -> bool {
    key.kind == KeyEventKind::Press
        && key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
}

/// Ctrl+Alt+V; raw mode cannot tell Ctrl+Shift+V from Ctrl+V
fn is_paste(key: &KeyEvent) -> bool {
    key.kind == KeyEventKind::Press
        && key.modifiers.contains(KeyModifiers::CONTROL | KeyModifiers::ALT)
        && matches!(key.code, KeyCode::Char('v') | KeyCode::Char('V'))
}

/// System clipboard contents as a paste through the session
fn paste_events() -> Vec<HostEvent> {
    let text = arboard::Clipboard::new().and_then(|mut clipboard| clipboard.get_text());
    match text {
        Ok(text) => vec![
            HostEvent::Clipboard(text),
            pointer_at(0, 0, PointerButtons::MIDDLE),
            pointer_at(0, 0, PointerButtons::empty()),
        ],
        Err(e) => {
            warn!("Clipboard unavailable: {}", e);
            Vec::new()
        }
    }
}

fn pointer_at(x: i32, y: i32, buttons: PointerButtons) -> HostEvent {
    HostEvent::Pointer(PointerEvent { x, y, buttons })
}

/// Translate a console mouse event into pointer state changes
fn pointer_events(mouse: &MouseEvent, cell: CellMetrics) -> Vec<HostEvent> {
    let x = (u32::from(mouse.column) * cell.width) as i32;
    let y = (u32::from(mouse.row) * cell.height) as i32;
    let pointer = |buttons| HostEvent::Pointer(PointerEvent { x, y, buttons });

    match mouse.kind {
        // Wheel steps arrive as single events: press then release
        MouseEventKind::ScrollUp => vec![
            pointer(PointerButtons::SCROLL_UP),
            pointer(PointerButtons::empty()),
        ],
        MouseEventKind::ScrollDown => vec![
            pointer(PointerButtons::SCROLL_DOWN),
            pointer(PointerButtons::empty()),
        ],
        MouseEventKind::Down(button) | MouseEventKind::Drag(button) => {
            vec![pointer(button_mask(button))]
        }
        MouseEventKind::Up(_) => vec![pointer(PointerButtons::empty())],
        _ => Vec::new(),
    }
}

fn button_mask(button: MouseButton) -> PointerButtons {
    match button {
        MouseButton::Left => PointerButtons::LEFT,
        MouseButton::Middle => PointerButtons::MIDDLE,
        MouseButton::Right => PointerButtons::RIGHT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_quit_chord() {
        assert!(is_quit(&press(KeyCode::Char(']'), KeyModifiers::CONTROL)));
        assert!(is_quit(&press(KeyCode::Char('5'), KeyModifiers::CONTROL)));
        assert!(!is_quit(&press(KeyCode::Char('5'), KeyModifiers::NONE)));
        assert!(!is_quit(&press(KeyCode::Char(']'), KeyModifiers::NONE)));

        let mut release = press(KeyCode::Char('5'), KeyModifiers::CONTROL);
        release.kind = KeyEventKind::Release;
        assert!(!is_quit(&release));
    }

    #[test]
    fn test_paste_chord() {
        let ctrl_alt = KeyModifiers::CONTROL | KeyModifiers::ALT;
        assert!(is_paste(&press(KeyCode::Char('v'), ctrl_alt)));
        assert!(!is_paste(&press(KeyCode::Char('v'), KeyModifiers::CONTROL)));
    }

    #[test]
    fn test_wheel_is_press_then_release() {
        let cell = CellMetrics { width: 10, height: 20 };
        let mouse = MouseEvent {
            kind: MouseEventKind::ScrollUp,
            column: 3,
            row: 2,
            modifiers: KeyModifiers::NONE,
        };
        assert_eq!(
            pointer_events(&mouse, cell),
            vec![
                HostEvent::Pointer(PointerEvent { x: 30, y: 40, buttons: PointerButtons::SCROLL_UP }),
                HostEvent::Pointer(PointerEvent { x: 30, y: 40, buttons: PointerButtons::empty() }),
            ]
        );
    }
}
