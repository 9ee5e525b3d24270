//! Sound Brick
//!
//! Desktop companion for the Sound Brick, a networked box that routes one audio source
//! to one of four outputs. The box is driven over a tiny UDP request/reply protocol;
//! a long-running daemon keeps the link, owns the settings, and accepts requests from
//! the CLI over a Unix socket.
//!
//! # Layout
//! - [`protocol`], [`device`]: wire encoding and the UDP link
//! - [`interpreter`], [`cycler`]: what replies mean and which output comes next
//! - [`hub`]: the single writer that orders every change and publishes it
//! - [`config`], [`notification`]: persistence and desktop alerts
//! - [`ipc`], [`commands`], [`cli`], [`daemon`]: process and user surface

pub mod cli;
pub mod commands;
pub mod config;
pub mod cycler;
pub mod daemon;
pub mod device;
pub mod hub;
pub mod interpreter;
pub mod ipc;
pub mod logging;
pub mod notification;
pub mod protocol;
pub mod style;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types for convenience
pub use cli::Args;
pub use config::ConfigStore;
pub use hub::{HubHandle, StateHub};
