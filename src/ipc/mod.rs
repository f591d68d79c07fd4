//! Local IPC layer for `clockd-ctl` interaction.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server that accepts fixed-layout binary commands, plus the matching
//! blocking client.

pub mod client;
pub mod commands;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use commands::{Command, Dispatcher};
pub use protocol::{ResultCode, ServiceError};
pub use server::{IpcServer, ServerState};
