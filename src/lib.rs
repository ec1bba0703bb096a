//! Drives an external mpv process over its JSON IPC socket.
//!
//! [`MpvPlayer`] is the entry point: it starts mpv on the first `play`,
//! sends one command (or one batch of queries) per socket connection and
//! kills the process on `close`. Logging goes through the `log` facade; the
//! host application installs the logger.

mod config;
mod mpv;

pub use config::{ConfigError, PlaybackConfig, PlayerConfig};
pub use mpv::*;
