//! Local IPC command server.
//!
//! Listens on a named local socket (Unix domain socket on Linux/macOS, named
//! pipe on Windows) using the `interprocess` crate and serves the binary
//! protocol from [`super::protocol`] through a [`Dispatcher`].
//!
//! ## Threading
//!
//! Each running server owns one dedicated OS thread driving a
//! current-thread tokio runtime. Every session task and every handler runs
//! on that thread, and handlers are synchronous, so no two handlers of one
//! server ever run at the same time. At most `max_sessions` clients are
//! connected at once; further clients wait in the listener backlog until a
//! session ends.
//!
//! ## Lifecycle
//!
//! [`IpcServer::start`] binds the socket on the caller's thread, so binding
//! errors surface synchronously, then hands the listener to the worker.
//! [`IpcServer::stop`] cancels the worker's [`CancellationToken`], which wakes
//! the blocking accept/receive, and joins the thread. A handler that is
//! already running finishes first, and the server only reports
//! [`ServerState::Stopped`] once the join has returned. Both calls are idempotent and block, so
//! they must not be made from inside an async context.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::commands::Dispatcher;
use super::protocol::ServerCodec;
use crate::{AppError, Result};

/// Lifecycle state of an [`IpcServer`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ServerState {
    /// No worker thread; the socket is not bound.
    Stopped,
    /// The worker thread is serving the socket.
    Running,
}

struct Worker {
    cancel: CancellationToken,
    thread: JoinHandle<()>,
}

/// Command server bound to one named local socket.
pub struct IpcServer {
    name: String,
    max_sessions: usize,
    dispatcher: Arc<Dispatcher>,
    worker: Mutex<Option<Worker>>,
}

impl IpcServer {
    /// Create a stopped server.
    #[must_use]
    pub fn new(name: impl Into<String>, max_sessions: usize, dispatcher: Dispatcher) -> Self {
        Self {
            name: name.into(),
            max_sessions: max_sessions.max(1),
            dispatcher: Arc::new(dispatcher),
            worker: Mutex::new(None),
        }
    }

    /// Socket name this server binds.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        if self.lock().is_some() {
            ServerState::Running
        } else {
            ServerState::Stopped
        }
    }

    /// Bind the socket and spawn the worker thread. No-op when running.
    ///
    /// The worker inherits the calling thread's scheduling policy.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the runtime cannot be built, the socket
    /// cannot be bound, or the thread cannot be spawned. The server stays
    /// [`ServerState::Stopped`] in every error case.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.lock();
        if worker.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::Ipc(format!("failed to build ipc runtime: {err}")))?;

        let listener = {
            let _guard = runtime.enter();
            bind(&self.name)?
        };

        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let max_sessions = self.max_sessions;
        let span = info_span!("ipc_server", name = %self.name);

        let thread = std::thread::Builder::new()
            .name("ipc-server".into())
            .spawn(move || {
                runtime.block_on(
                    serve(listener, dispatcher, max_sessions, worker_cancel).instrument(span),
                );
            })
            .map_err(|err| AppError::Ipc(format!("failed to spawn ipc thread: {err}")))?;

        *worker = Some(Worker { cancel, thread });
        info!(ipc_name = %self.name, max_sessions, "IPC server listening");
        Ok(())
    }

    /// Cancel the worker and wait for it to exit. No-op when stopped.
    ///
    /// The lifecycle lock is held until the join completes, so
    /// [`state`](Self::state) and [`start`](Self::start) wait for the old
    /// worker instead of racing it for the socket.
    pub fn stop(&self) {
        let mut slot = self.lock();
        let Some(worker) = slot.take() else {
            return;
        };

        worker.cancel.cancel();
        if worker.thread.join().is_err() {
            error!(ipc_name = %self.name, "IPC worker thread panicked");
        }
        drop(slot);
        info!(ipc_name = %self.name, "IPC server stopped");
    }

    fn lock(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind(name: &str) -> Result<Listener> {
    let listener_name = name
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))
}

/// Accept loop. Runs until `cancel` fires; every other failure is survivable.
async fn serve(
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    max_sessions: usize,
    cancel: CancellationToken,
) {
    let slots = Arc::new(Semaphore::new(max_sessions));
    let sessions = TaskTracker::new();

    loop {
        let permit = tokio::select! {
            () = cancel.cancelled() => break,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let stream = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted.map_err(AppError::from) {
                Ok(stream) => stream,
                Err(err) if err.is_disconnect() => continue,
                Err(err) => {
                    warn!(%err, "IPC accept failed");
                    continue;
                }
            },
        };

        sessions.spawn(run_session(
            stream,
            Arc::clone(&dispatcher),
            cancel.clone(),
            permit,
        ));
    }

    sessions.close();
    sessions.wait().await;
    info!("IPC server shutting down");
}

/// Serve one client until it disconnects, misbehaves, or the server stops.
async fn run_session(
    stream: Stream,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    _slot: OwnedSemaphorePermit,
) {
    let span = info_span!("ipc_session");
    async move {
        let mut framed = Framed::new(stream, ServerCodec);
        debug!("IPC client connected");

        loop {
            let request = tokio::select! {
                () = cancel.cancelled() => break,
                next = framed.next() => match next {
                    Some(Ok(request)) => request,
                    None => break,
                    Some(Err(err)) if err.is_disconnect() => break,
                    Some(Err(err)) => {
                        warn!(%err, "dropping IPC session");
                        break;
                    }
                },
            };

            let response = dispatcher.dispatch(&request);

            let sent = tokio::select! {
                () = cancel.cancelled() => break,
                sent = framed.send(response) => sent,
            };
            match sent {
                Ok(()) => {}
                Err(err) if err.is_disconnect() => break,
                Err(err) => {
                    warn!(%err, "failed to write ipc response");
                    break;
                }
            }
        }

        debug!("IPC client disconnected");
    }
    .instrument(span)
    .await;
}
