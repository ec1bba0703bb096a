//! MPV IPC module - spawns and controls an external MPV player via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection, launch arguments and spawning
//! - `supervisor.rs` - Process lifecycle: launch, socket readiness wait, exit detection, shutdown
//! - `ipc.rs` - One-shot socket exchanges (connect, write, read until answered, close)
//! - `protocol.rs` - JSON command/response types and serialization
//! - `client.rs` - High-level player with the public command surface

mod client;
mod ipc;
mod process;
mod protocol;
mod supervisor;

pub use client::{MpvPlayer, PlayError, PlaybackState};
pub use ipc::{exchange, Exchange, IpcError, READ_DEADLINE};
pub use process::{find_mpv, mpv_args, Launcher, MpvLauncher, ProcessError};
pub use protocol::{Arg, MpvCommand, MpvEvent, MpvMessage, MpvResponse, PropertyValue};
pub use supervisor::{ProcessState, RunningProcess, Supervisor};
