//! Device reply classification
//!
//! Maps the raw integer a device sent back to what it means for the application: which
//! value (if any) becomes the confirmed current output, and what the user is told.

use crate::config::ConfigStore;
use crate::notification::{Notice, Priority};
use crate::protocol::{CurrentOutput, Output, OutputIndex};

/// What a reply meant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Device switched to this output
    Switched(Output),
    /// Device muted its outputs
    Muted,
    /// Device is muted and refused to switch (soft failure)
    DeviceMuted,
    /// Connectivity probe answered
    Probed,
    /// Reply outside the protocol domain
    Unrecognized(i32),
}

/// Result of interpreting one reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effect {
    pub outcome: Outcome,
    /// New confirmed current output, if the reply carries one
    pub update: Option<CurrentOutput>,
    pub notice: Option<Notice>,
}

/// Classify a reply to `sent`
///
/// Total over every `i32`. Labels are read from `store` at call time, so a label edited
/// while the exchange was in flight is the one the user sees.
#[must_use]
pub fn interpret(sent: OutputIndex, received: i32, store: &ConfigStore) -> Effect {
    match OutputIndex::from_wire(received) {
        Some(OutputIndex::Output(output)) => Effect {
            outcome: Outcome::Switched(output),
            update: Some(CurrentOutput::Active(output)),
            notice: Some(Notice::new(
                "Output Changed!",
                format!("Current output: {}", store.label(output)),
                Priority::Info,
            )),
        },
        Some(OutputIndex::Muted) => Effect {
            outcome: Outcome::Muted,
            update: Some(CurrentOutput::Muted),
            notice: Some(Notice::new("Muted!", "Output has been muted.", Priority::Info)),
        },
        Some(OutputIndex::ErrorMuted) => Effect {
            outcome: Outcome::DeviceMuted,
            update: None,
            notice: Some(Notice::new(
                "Oops!",
                "The system is currently muted. Please unmute to change outputs.",
                Priority::Warning,
            )),
        },
        Some(OutputIndex::StatusQuery) => Effect {
            outcome: Outcome::Probed,
            update: None,
            notice: None,
        },
        None => unexpected(sent, received.to_string()),
    }
}

/// Effect for a reply whose body could not be understood at all
#[must_use]
pub fn unexpected(sent: OutputIndex, body: String) -> Effect {
    let value = body.trim().parse().unwrap_or(i32::MIN);
    Effect {
        outcome: Outcome::Unrecognized(value),
        update: None,
        notice: Some(Notice::new(
            "Error!",
            format!("Unexpected response '{body}' to command {sent}."),
            Priority::Warning,
        )),
    }
}
