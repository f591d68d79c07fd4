//! Tests for the version string reported by both binaries and over IPC.

use std::sync::Arc;

use clockd::clock::{ClockManager, MemoryProfileStore, ProfileStore};
use clockd::ipc::protocol::Request;
use clockd::ipc::{Command, Dispatcher};

#[test]
fn cargo_pkg_version_is_valid_semver() {
    let version = env!("CARGO_PKG_VERSION");
    let parts: Vec<&str> = version.split('-').next().unwrap_or("").split('.').collect();
    assert!(
        parts.len() >= 3,
        "CARGO_PKG_VERSION must have at least MAJOR.MINOR.PATCH, got: {version}"
    );
    for part in &parts {
        assert!(
            part.parse::<u64>().is_ok(),
            "CARGO_PKG_VERSION numeric part must parse as u64: '{part}' in '{version}'"
        );
    }
}

#[test]
fn dispatcher_reports_crate_version_by_default() {
    let store: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::in_memory(true));
    let clock = Arc::new(ClockManager::new(Arc::clone(&store)));
    let dispatcher = Dispatcher::new(store, clock);

    let response = dispatcher.dispatch(&Request {
        command_id: Command::GetVersionString.id(),
        payload: bytes::Bytes::new(),
        recv_capacity: Some(64),
    });

    assert!(response.result.is_success());
    let end = response.output.iter().position(|&b| b == 0).unwrap();
    assert_eq!(&response.output[..end], env!("CARGO_PKG_VERSION").as_bytes());
}
