//! Session argument resolution
//!
//! The host passes one string per declared argument, in declaration order.
//! Resolution checks arity and lengths, requires a hostname and fills the
//! optional arguments from [`SessionDefaults`].

use tracing::debug;

use crate::config::SessionDefaults;
use crate::error::BootstrapError;

/// How an argument's raw text becomes a value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// Must be non-empty
    Required,
    /// Empty means the default; otherwise copied verbatim
    Text,
    /// Empty or unparsable means the default
    LenientInt,
}

/// One declared session argument
#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub max_len: usize,
}

pub const HOSTNAME: ParamSpec = ParamSpec {
    name: "hostname",
    kind: ParamKind::Required,
    max_len: 253,
};

pub const PORT: ParamSpec = ParamSpec {
    name: "port",
    kind: ParamKind::Text,
    max_len: 32,
};

pub const FONT_NAME: ParamSpec = ParamSpec {
    name: "font-name",
    kind: ParamKind::Text,
    max_len: 256,
};

pub const FONT_SIZE: ParamSpec = ParamSpec {
    name: "font-size",
    kind: ParamKind::LenientInt,
    max_len: 32,
};

/// Declared arguments of a telnet session, in order
pub const TELNET_ARGS: [ParamSpec; 4] = [HOSTNAME, PORT, FONT_NAME, FONT_SIZE];

/// Names of the declared arguments, as advertised to hosts
pub fn arg_names() -> impl Iterator<Item = &'static str> {
    TELNET_ARGS.iter().map(|spec| spec.name)
}

/// Validated, defaulted session parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionParams {
    pub hostname: String,
    /// Not validated here; the worker rejects non-numeric ports at connect
    pub port: String,
    pub font_name: String,
    pub font_size: i32,
}

impl ParamSpec {
    fn check_len(&self, raw: &str) -> Result<(), BootstrapError> {
        if raw.len() > self.max_len {
            return Err(BootstrapError::Configuration(format!(
                "{} too long",
                self.name
            )));
        }
        Ok(())
    }

    fn required(&self, raw: &str) -> Result<String, BootstrapError> {
        if raw.trim().is_empty() {
            return Err(BootstrapError::Configuration(format!(
                "missing {}",
                self.name
            )));
        }
        Ok(raw.to_string())
    }

    fn text_or(&self, raw: &str, default: &str) -> String {
        if raw.is_empty() {
            default.to_string()
        } else {
            raw.to_string()
        }
    }

    fn int_or(&self, raw: &str, default: i32) -> i32 {
        if raw.is_empty() {
            return default;
        }
        raw.trim().parse().unwrap_or_else(|_| {
            debug!("Unparsable {} {:?}, using {}", self.name, raw, default);
            default
        })
    }
}

/// Resolve the raw argument vector into session parameters
pub fn resolve(args: &[String], defaults: &SessionDefaults) -> Result<SessionParams, BootstrapError> {
    let [hostname, port, font_name, font_size] = args else {
        return Err(BootstrapError::Configuration(
            "wrong argument count".to_string(),
        ));
    };

    for (spec, raw) in TELNET_ARGS.iter().zip(args) {
        spec.check_len(raw)?;
    }

    Ok(SessionParams {
        hostname: HOSTNAME.required(hostname)?,
        port: PORT.text_or(port, &defaults.port),
        font_name: FONT_NAME.text_or(font_name, &defaults.font_name),
        font_size: FONT_SIZE.int_or(font_size, defaults.font_size),
    })
}
