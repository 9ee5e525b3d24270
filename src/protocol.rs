//! Device wire protocol
//!
//! The switch box speaks a tiny request/reply protocol over UDP: every datagram is an
//! ASCII signed decimal integer with no padding. The same encoding is used in both
//! directions.
//!
//! | wire | meaning                                   |
//! |------|-------------------------------------------|
//! | 0..3 | physical output                           |
//! | 4    | mute                                      |
//! | -1   | device is muted and refused to switch     |
//! | -2   | status query (connectivity probe)         |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// UDP port the device listens on
pub const DEVICE_PORT: u16 = 4210;

/// Local UDP port the client binds, so the device sees a single stable client
pub const CLIENT_PORT: u16 = 4211;

/// Deadline for a single request/reply exchange
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Receive buffer size for device replies
pub const MAX_DATAGRAM: usize = 512;

/// Number of physical outputs on the device
pub const OUTPUT_COUNT: usize = 4;

const WIRE_MUTED: i32 = 4;
const WIRE_ERROR_MUTED: i32 = -1;
const WIRE_STATUS_QUERY: i32 = -2;

/// One of the four physical outputs (always `0..=3`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Output(u8);

impl Output {
    /// All outputs in wire order
    pub const ALL: [Output; OUTPUT_COUNT] = [Output(0), Output(1), Output(2), Output(3)];

    /// Build an output from its zero-based index
    #[must_use]
    pub fn new(index: usize) -> Option<Self> {
        (index < OUTPUT_COUNT).then(|| Self(index as u8))
    }

    /// Build an output from its one-based position, as shown to users
    #[must_use]
    pub fn from_position(position: usize) -> Option<Self> {
        position.checked_sub(1).and_then(Self::new)
    }

    /// Zero-based index
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// One-based position (`output1` .. `output4`)
    #[must_use]
    pub fn position(self) -> usize {
        self.index() + 1
    }

    /// The following output, wrapping after the last one
    #[must_use]
    pub fn next(self) -> Self {
        Self((self.0 + 1) % OUTPUT_COUNT as u8)
    }
}

impl TryFrom<u8> for Output {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(usize::from(value)).ok_or_else(|| format!("output index {value} out of range 0..=3"))
    }
}

impl From<Output> for u8 {
    fn from(output: Output) -> Self {
        output.0
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output{}", self.position())
    }
}

/// Every value that can appear on the wire with a known meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputIndex {
    Output(Output),
    Muted,
    /// Device reports it cannot switch while muted
    ErrorMuted,
    /// No-op probe used to confirm the device answers
    StatusQuery,
}

impl OutputIndex {
    /// Signed wire value
    #[must_use]
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Output(output) => output.index() as i32,
            Self::Muted => WIRE_MUTED,
            Self::ErrorMuted => WIRE_ERROR_MUTED,
            Self::StatusQuery => WIRE_STATUS_QUERY,
        }
    }

    /// Decode a wire value. Values outside the protocol domain yield `None`.
    #[must_use]
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0..=3 => Output::new(value as usize).map(Self::Output),
            WIRE_MUTED => Some(Self::Muted),
            WIRE_ERROR_MUTED => Some(Self::ErrorMuted),
            WIRE_STATUS_QUERY => Some(Self::StatusQuery),
            _ => None,
        }
    }

    /// ASCII datagram body for this command
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        self.to_wire().to_string().into_bytes()
    }
}

impl From<Output> for OutputIndex {
    fn from(output: Output) -> Self {
        Self::Output(output)
    }
}

impl From<CurrentOutput> for OutputIndex {
    fn from(current: CurrentOutput) -> Self {
        match current {
            CurrentOutput::Active(output) => Self::Output(output),
            CurrentOutput::Muted => Self::Muted,
        }
    }
}

impl fmt::Display for OutputIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output(output) => output.fmt(f),
            Self::Muted => f.write_str("muted"),
            Self::ErrorMuted => f.write_str("error-muted"),
            Self::StatusQuery => f.write_str("status-query"),
        }
    }
}

/// The subset of [`OutputIndex`] that may be stored as the current output.
///
/// The transient protocol signals (`ErrorMuted`, `StatusQuery`) are not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentOutput {
    Active(Output),
    Muted,
}

impl CurrentOutput {
    /// Parse the persisted form (`"0"`..`"3"`, `"4"`)
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let wire: i32 = value.trim().parse().ok()?;
        OutputIndex::from_wire(wire).and_then(Self::from_index)
    }

    /// Narrow a protocol value to a storable one
    #[must_use]
    pub fn from_index(index: OutputIndex) -> Option<Self> {
        match index {
            OutputIndex::Output(output) => Some(Self::Active(output)),
            OutputIndex::Muted => Some(Self::Muted),
            OutputIndex::ErrorMuted | OutputIndex::StatusQuery => None,
        }
    }

    /// Persisted form
    #[must_use]
    pub fn to_setting(self) -> String {
        OutputIndex::from(self).to_wire().to_string()
    }

    #[must_use]
    pub fn is_muted(self) -> bool {
        matches!(self, Self::Muted)
    }
}

/// Parse a reply datagram body into its signed wire value
///
/// Surrounding whitespace (a trailing newline from simple firmware) is ignored.
#[must_use]
pub fn parse_reply(body: &[u8]) -> Option<i32> {
    std::str::from_utf8(body).ok()?.trim().parse().ok()
}
