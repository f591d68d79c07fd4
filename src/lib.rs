#![forbid(unsafe_code)]

//! `clockd`: clock profile daemon with a local binary control channel.

pub mod clock;
pub mod config;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod telemetry;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
