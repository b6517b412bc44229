//! Telnet stream codec
//!
//! Splits the byte stream from the server into data and option negotiation,
//! and builds the few replies a terminal client needs (NAWS, TTYPE, ECHO,
//! SGA). Every other option is refused.

use tracing::debug;

use super::session::FeatureFlags;
use super::terminal::GridSize;

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SGA: u8 = 3;
pub const OPT_TTYPE: u8 = 24;
pub const OPT_NAWS: u8 = 31;

const TTYPE_IS: u8 = 0;
const TTYPE_SEND: u8 = 1;

/// Option negotiation verb
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Negotiation {
    Will,
    Wont,
    Do,
    Dont,
}

impl Negotiation {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            WILL => Some(Negotiation::Will),
            WONT => Some(Negotiation::Wont),
            DO => Some(Negotiation::Do),
            DONT => Some(Negotiation::Dont),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Negotiation::Will => WILL,
            Negotiation::Wont => WONT,
            Negotiation::Do => DO,
            Negotiation::Dont => DONT,
        }
    }
}

/// Decoded piece of the server stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetEvent {
    Data(Vec<u8>),
    Negotiate(Negotiation, u8),
    Subnegotiation(u8, Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Negotiate(Negotiation),
    SbOption,
    SbData,
    SbIac,
}

/// Largest subnegotiation payload kept; longer ones are discarded at SE
const MAX_SUBNEGOTIATION: usize = 1024;

/// Incremental decoder; sequences may be split across reads
pub struct TelnetDecoder {
    state: State,
    sb_option: u8,
    sb_data: Vec<u8>,
    sb_overflow: bool,
}

impl Default for TelnetDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Data,
            sb_option: 0,
            sb_data: Vec::new(),
            sb_overflow: false,
        }
    }

    pub fn decode(&mut self, input: &[u8]) -> Vec<TelnetEvent> {
        let mut events = Vec::new();
        let mut data = Vec::new();

        for &byte in input {
            self.state = match self.state {
                State::Data if byte == IAC => State::Iac,
                State::Data => {
                    data.push(byte);
                    State::Data
                }
                State::Iac => match byte {
                    IAC => {
                        data.push(IAC);
                        State::Data
                    }
                    SB => State::SbOption,
                    _ => match Negotiation::from_byte(byte) {
                        Some(kind) => State::Negotiate(kind),
                        // NOP, GA and friends carry nothing for us
                        None => State::Data,
                    },
                },
                State::Negotiate(kind) => {
                    flush_data(&mut data, &mut events);
                    events.push(TelnetEvent::Negotiate(kind, byte));
                    State::Data
                }
                State::SbOption => {
                    self.sb_option = byte;
                    self.sb_data.clear();
                    self.sb_overflow = false;
                    State::SbData
                }
                State::SbData if byte == IAC => State::SbIac,
                State::SbData => {
                    self.push_sb(byte);
                    State::SbData
                }
                State::SbIac => match byte {
                    SE => {
                        flush_data(&mut data, &mut events);
                        let payload = std::mem::take(&mut self.sb_data);
                        if self.sb_overflow {
                            debug!("Discarded oversized subnegotiation for option {}", self.sb_option);
                        } else {
                            events.push(TelnetEvent::Subnegotiation(self.sb_option, payload));
                        }
                        State::Data
                    }
                    IAC => {
                        self.push_sb(IAC);
                        State::SbData
                    }
                    _ => State::SbData,
                },
            };
        }

        flush_data(&mut data, &mut events);
        events
    }

    fn push_sb(&mut self, byte: u8) {
        if self.sb_data.len() < MAX_SUBNEGOTIATION {
            self.sb_data.push(byte);
        } else {
            self.sb_overflow = true;
        }
    }
}

fn flush_data(data: &mut Vec<u8>, events: &mut Vec<TelnetEvent>) {
    if !data.is_empty() {
        events.push(TelnetEvent::Data(std::mem::take(data)));
    }
}

/// Terminate bare CRs with NUL, leaving CR LF alone
pub fn bare_cr_to_cr_nul(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (i, &byte) in data.iter().enumerate() {
        out.push(byte);
        if byte == b'\r' && !matches!(data.get(i + 1), Some(b'\n') | Some(0)) {
            out.push(0);
        }
    }
    out
}

/// Escape outgoing data (IAC is doubled)
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &byte in data {
        if byte == IAC {
            out.push(IAC);
        }
        out.push(byte);
    }
    out
}

pub fn negotiate(kind: Negotiation, option: u8) -> [u8; 3] {
    [IAC, kind.to_byte(), option]
}

fn subnegotiation(option: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![IAC, SB, option];
    out.extend(escape(payload));
    out.extend([IAC, SE]);
    out
}

/// NAWS window size report
pub fn window_size(size: GridSize) -> Vec<u8> {
    let [cols_hi, cols_lo] = size.cols.to_be_bytes();
    let [rows_hi, rows_lo] = size.rows.to_be_bytes();
    subnegotiation(OPT_NAWS, &[cols_hi, cols_lo, rows_hi, rows_lo])
}

/// TTYPE IS reply
pub fn terminal_type(name: &str) -> Vec<u8> {
    let mut payload = vec![TTYPE_IS];
    payload.extend_from_slice(name.as_bytes());
    subnegotiation(OPT_TTYPE, &payload)
}

/// Whether a subnegotiation is a TTYPE SEND request
pub fn is_terminal_type_request(option: u8, payload: &[u8]) -> bool {
    option == OPT_TTYPE && payload.first() == Some(&TTYPE_SEND)
}

/// Reply to a negotiation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub bytes: [u8; 3],
    /// Features that become active once the reply is sent
    pub enable: FeatureFlags,
}

/// Decide how to answer a negotiation from the server
///
/// Only requests are answered; WONT/DONT and requests for features already
/// active get no reply, so negotiation cannot loop.
pub fn answer(kind: Negotiation, option: u8, active: FeatureFlags) -> Option<Reply> {
    let feature = match (kind, option) {
        (Negotiation::Do, OPT_NAWS) => FeatureFlags::NAWS,
        (Negotiation::Do, OPT_TTYPE) => FeatureFlags::TERMINAL_TYPE,
        (Negotiation::Do, OPT_SGA) | (Negotiation::Will, OPT_SGA) => {
            FeatureFlags::SUPPRESS_GO_AHEAD
        }
        (Negotiation::Will, OPT_ECHO) => FeatureFlags::ECHO,
        (Negotiation::Do, _) => {
            return Some(Reply {
                bytes: negotiate(Negotiation::Wont, option),
                enable: FeatureFlags::empty(),
            })
        }
        (Negotiation::Will, _) => {
            return Some(Reply {
                bytes: negotiate(Negotiation::Dont, option),
                enable: FeatureFlags::empty(),
            })
        }
        (Negotiation::Wont | Negotiation::Dont, _) => return None,
    };

    if active.contains(feature) {
        return None;
    }

    let verb = match kind {
        Negotiation::Do => Negotiation::Will,
        _ => Negotiation::Do,
    };
    Some(Reply {
        bytes: negotiate(verb, option),
        enable: feature,
    })
}
