//! Integration tests for the IPC server lifecycle and end-to-end dispatch.
//!
//! A real server is bound on a unique local socket per test and driven with
//! the blocking [`IpcClient`], or with a raw stream where a test needs to
//! misbehave on the wire.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clockd::clock::{ClockController, MemoryProfileStore, ProfileStore};
use clockd::ipc::protocol::API_VERSION;
use clockd::ipc::{IpcClient, IpcServer, ServerState, ServiceError};
use clockd::models::clock::{ClockContext, ClockModule, ProfileKind};
use clockd::AppError;
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

use super::test_helpers::{running_server, test_server, unique_ipc_name};

const APP: u64 = 0x0100_0000_0001_0000;

fn raw_stream(name: &str) -> Stream {
    let name = name.to_ns_name::<GenericNamespaced>().expect("socket name");
    Stream::connect(name).expect("raw connect")
}

/// Controller whose context snapshot takes long enough to overlap a stop.
#[derive(Default)]
struct SlowClock {
    entered: AtomicBool,
    finished: AtomicBool,
}

impl ClockController for SlowClock {
    fn current_context(&self) -> ClockContext {
        self.entered.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(800));
        self.finished.store(true, Ordering::SeqCst);
        ClockContext::default()
    }

    fn request_stop(&self) {}
}

// ── Lifecycle ─────────────────────────────────────────────

#[test]
fn start_and_stop_transition_state() {
    let ts = test_server("lifecycle", MemoryProfileStore::in_memory(true), 42);
    assert_eq!(ts.server.state(), ServerState::Stopped);

    ts.server.start().expect("start");
    assert_eq!(ts.server.state(), ServerState::Running);

    ts.server.stop();
    assert_eq!(ts.server.state(), ServerState::Stopped);
}

#[test]
fn start_and_stop_are_idempotent() {
    let ts = running_server("idempotent");
    ts.server.start().expect("second start is a no-op");
    assert_eq!(ts.server.state(), ServerState::Running);

    let mut client = IpcClient::connect(ts.server.name()).expect("connect");
    assert_eq!(client.api_version().expect("api version"), API_VERSION);
    drop(client);

    ts.server.stop();
    ts.server.stop();
    assert_eq!(ts.server.state(), ServerState::Stopped);
}

#[test]
fn stop_while_idle_returns_promptly() {
    let ts = running_server("idle-stop");
    let started = Instant::now();
    ts.server.stop();
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "stop took {:?}",
        started.elapsed()
    );
}

#[test]
fn stop_with_connected_idle_client_returns_promptly() {
    let ts = running_server("client-stop");
    let mut client = IpcClient::connect(ts.server.name()).expect("connect");
    client.api_version().expect("api version");

    let started = Instant::now();
    ts.server.stop();
    assert!(started.elapsed() < Duration::from_secs(2));

    let err = client.api_version().expect_err("server is gone");
    assert!(matches!(err, AppError::Disconnected | AppError::Io(_)));
}

#[test]
fn server_restarts_on_same_name() {
    let ts = running_server("restart");
    ts.server.stop();
    ts.server.start().expect("restart");

    let mut client = IpcClient::connect(ts.server.name()).expect("connect");
    assert_eq!(client.api_version().expect("api version"), API_VERSION);
}

#[test]
fn stop_holds_lifecycle_until_worker_joined() {
    let clock = Arc::new(SlowClock::default());
    let server = Arc::new(IpcServer::new(
        unique_ipc_name("slow-stop"),
        4,
        clockd::ipc::Dispatcher::new(
            Arc::new(MemoryProfileStore::in_memory(true)) as Arc<dyn ProfileStore>,
            Arc::clone(&clock) as Arc<dyn ClockController>,
        ),
    ));
    server.start().expect("start");

    let name = server.name().to_owned();
    let caller = std::thread::spawn(move || {
        let mut client = IpcClient::connect(&name).expect("connect");
        let _ = client.current_context();
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while !clock.entered.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "request never reached the controller");
        std::thread::sleep(Duration::from_millis(10));
    }

    let stopper = {
        let server = Arc::clone(&server);
        std::thread::spawn(move || server.stop())
    };
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(server.state(), ServerState::Stopped);
    assert!(
        clock.finished.load(Ordering::SeqCst),
        "state must not report stopped before the in-flight request drains"
    );

    server.start().expect("restart after stop");
    stopper.join().expect("stopper thread");
    caller.join().expect("caller thread");
    assert_eq!(server.state(), ServerState::Running);
    server.stop();
}

#[test]
fn bind_conflict_fails_start_and_stays_stopped() {
    let first = running_server("conflict");
    let second = IpcServer::new(
        first.server.name(),
        4,
        clockd::ipc::Dispatcher::new(
            Arc::clone(&first.store) as Arc<dyn ProfileStore>,
            Arc::clone(&first.clock) as Arc<dyn clockd::clock::ClockController>,
        ),
    );

    let err = second.start().expect_err("name already bound");
    assert!(matches!(err, AppError::Ipc(_)));
    assert_eq!(second.state(), ServerState::Stopped);
    assert_eq!(first.server.state(), ServerState::Running);
}

#[test]
fn dropping_running_server_stops_it() {
    let ts = running_server("drop");
    let name = ts.server.name().to_owned();
    drop(ts);

    assert!(IpcClient::connect(&name).is_err());
}

// ── End-to-end commands ───────────────────────────────────

#[test]
fn set_profile_then_get_profile() {
    let ts = running_server("profile");
    let mut client = IpcClient::connect(ts.server.name()).expect("connect");
    client.ensure_api_version().expect("api version");

    client
        .set_profile_mhz(APP, ClockModule::Cpu, ProfileKind::Docked, 1785)
        .expect("set profile");
    assert_eq!(
        client
            .profile_mhz(APP, ClockModule::Cpu, ProfileKind::Docked)
            .expect("get profile"),
        1785
    );
    assert_eq!(client.profile_count(APP).expect("count"), 1);
    assert_eq!(
        ts.store
            .clock_mhz(APP, ClockModule::Cpu, ProfileKind::Docked),
        1785
    );
}

#[test]
fn version_string_matches_crate_version() {
    let ts = running_server("version");
    let mut client = IpcClient::connect(ts.server.name()).expect("connect");
    assert_eq!(
        client.version_string().expect("version string"),
        env!("CARGO_PKG_VERSION")
    );
}

#[test]
fn context_reflects_enable_and_override() {
    let ts = running_server("context");
    let mut client = IpcClient::connect(ts.server.name()).expect("connect");

    ts.clock.set_application(APP, ProfileKind::HandheldChargingOfficial);
    client.set_enabled(false).expect("disable");
    client
        .set_override_hz(ClockModule::Gpu, 921_000_000)
        .expect("override");

    let ctx = client.current_context().expect("context");
    assert!(!ctx.enabled);
    assert_eq!(ctx.application_id, APP);
    assert_eq!(ctx.profile, ProfileKind::HandheldChargingOfficial);
    assert_eq!(ctx.override_freqs[ClockModule::Gpu.index()], 921_000_000);
}

#[test]
fn corrupt_profile_file_surfaces_config_not_loaded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("profiles.toml");
    std::fs::write(&path, "not = [valid").expect("write");

    let store = MemoryProfileStore::open_or_unloaded(Some(path), true);
    let ts = test_server("unloaded", store, 42);
    ts.server.start().expect("start");
    let mut client = IpcClient::connect(ts.server.name()).expect("connect");

    let not_loaded = ServiceError::ConfigNotLoaded.code().raw();
    let err = client.profile_count(APP).expect_err("not loaded");
    assert!(matches!(err, AppError::Remote(code) if code == not_loaded));
    let err = client
        .set_profile_mhz(APP, ClockModule::Cpu, ProfileKind::Docked, 1785)
        .expect_err("not loaded");
    assert!(matches!(err, AppError::Remote(code) if code == not_loaded));

    assert_eq!(client.api_version().expect("still serving"), API_VERSION);
}

#[test]
fn unknown_command_over_wire_is_generic() {
    let ts = running_server("unknown");
    let mut client = IpcClient::connect(ts.server.name()).expect("connect");

    let response = client.call_raw(77, Bytes::new(), None).expect("response");
    assert_eq!(response.result, ServiceError::Generic.code());
    assert!(response.output.is_empty());

    assert_eq!(client.api_version().expect("session survives"), API_VERSION);
}

#[test]
fn exit_cancels_clock_token() {
    let ts = running_server("exit");
    let token = ts.clock.stop_token();
    let mut client = IpcClient::connect(ts.server.name()).expect("connect");

    client.exit().expect("exit");
    assert!(token.is_cancelled());
    assert!(!ts.clock.is_running());
    assert_eq!(ts.server.state(), ServerState::Running);
}

// ── Misbehaving clients ───────────────────────────────────

#[test]
fn partial_frame_disconnect_does_not_affect_next_client() {
    let ts = running_server("partial");

    {
        let mut raw = raw_stream(ts.server.name());
        raw.write_all(b"SFCI\x00\x00").expect("partial header");
        raw.flush().expect("flush");
    }

    let mut client = IpcClient::connect(ts.server.name()).expect("connect");
    assert_eq!(client.api_version().expect("api version"), API_VERSION);
}

#[test]
fn bad_magic_closes_only_that_session() {
    let ts = running_server("magic");
    let mut healthy = IpcClient::connect(ts.server.name()).expect("connect");

    let mut raw = raw_stream(ts.server.name());
    raw.write_all(&[0u8; 20]).expect("garbage header");
    raw.flush().expect("flush");
    let mut buf = [0u8; 16];
    let read = raw.read(&mut buf).unwrap_or(0);
    assert_eq!(read, 0, "server should close the session");

    assert_eq!(healthy.api_version().expect("still served"), API_VERSION);
}

#[test]
fn concurrent_clients_are_all_served() {
    let ts = running_server("concurrent");
    let name = ts.server.name().to_owned();

    let workers: Vec<_> = (0..8u32)
        .map(|i| {
            let name = name.clone();
            std::thread::spawn(move || {
                let mut client = IpcClient::connect(&name).expect("connect");
                let module = ClockModule::ALL[i as usize % ClockModule::COUNT];
                client
                    .set_profile_mhz(APP + u64::from(i), module, ProfileKind::Handheld, 100 + i)
                    .expect("set");
                client
                    .profile_mhz(APP + u64::from(i), module, ProfileKind::Handheld)
                    .expect("get")
            })
        })
        .collect();

    for (i, worker) in workers.into_iter().enumerate() {
        let mhz = worker.join().expect("worker thread");
        assert_eq!(mhz, 100 + u32::try_from(i).unwrap());
    }
}

#[test]
fn clients_beyond_session_limit_wait_for_a_slot() {
    let ts = test_server("limit", MemoryProfileStore::in_memory(true), 1);
    ts.server.start().expect("start");
    let name = ts.server.name().to_owned();

    let first = {
        let mut client = IpcClient::connect(&name).expect("connect");
        client.api_version().expect("first client served");
        client
    };

    let waiter = std::thread::spawn(move || {
        let mut client = IpcClient::connect(&name).expect("connect");
        client.api_version().expect("second client served")
    });

    std::thread::sleep(Duration::from_millis(100));
    assert!(!waiter.is_finished(), "second client should wait for a slot");

    drop(first);
    assert_eq!(waiter.join().expect("waiter"), API_VERSION);
}
