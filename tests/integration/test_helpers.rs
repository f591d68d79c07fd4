//! Shared helpers for IPC integration tests.
//!
//! Every test binds its own socket name so tests can run in parallel
//! without stepping on each other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clockd::clock::{ClockController, ClockManager, MemoryProfileStore, ProfileStore};
use clockd::ipc::{Dispatcher, IpcServer};

static NEXT_SOCKET: AtomicUsize = AtomicUsize::new(0);

/// A socket name unique to this process and call.
pub fn unique_ipc_name(tag: &str) -> String {
    let n = NEXT_SOCKET.fetch_add(1, Ordering::SeqCst);
    format!("clockd-test-{tag}-{}-{n}", std::process::id())
}

/// A stopped server plus handles to the collaborators behind it.
pub struct TestServer {
    pub server: IpcServer,
    pub store: Arc<MemoryProfileStore>,
    pub clock: Arc<ClockManager>,
}

/// Build a stopped server over `store`.
pub fn test_server(tag: &str, store: MemoryProfileStore, max_sessions: usize) -> TestServer {
    let store = Arc::new(store);
    let clock = Arc::new(ClockManager::new(
        Arc::clone(&store) as Arc<dyn ProfileStore>
    ));
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as Arc<dyn ProfileStore>,
        Arc::clone(&clock) as Arc<dyn ClockController>,
    );
    TestServer {
        server: IpcServer::new(unique_ipc_name(tag), max_sessions, dispatcher),
        store,
        clock,
    }
}

/// Build and start a server over an empty, loaded, memory-only store.
pub fn running_server(tag: &str) -> TestServer {
    let ts = test_server(tag, MemoryProfileStore::in_memory(true), 42);
    ts.server.start().expect("server start");
    ts
}
