//! Reference-counted access to a single external hardware service.
//!
//! A [`ServicePool`] owns at most one open connection. Holders call
//! [`ServicePool::acquire`] / [`ServicePool::release`] (or take a
//! [`ServiceLease`]) and the connection stays open for the union of all
//! holders' intervals:
//!
//! - the connection is open if and only if the reference count is non-zero;
//! - only the caller performing the 0→1 transition opens it;
//! - only the caller performing the 1→0 transition closes it.
//!
//! Count and connection live behind one mutex, so the open and close steps
//! are serialized against concurrent acquires and releases.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::{AppError, Result};

/// Opens connections to one named external service.
pub trait ServiceConnector: Send + Sync {
    /// Live connection type. Dropping it closes the connection.
    type Connection: Send;

    /// Service name used in logs and errors.
    fn name(&self) -> &str;

    /// Open a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be reached.
    fn open(&self) -> Result<Self::Connection>;
}

/// A connection that can report a temperature.
pub trait TelemetrySource {
    /// Read one temperature sample in milli-degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the reply is malformed.
    fn read_milli_celsius(&mut self) -> Result<i32>;
}

struct PoolState<T> {
    ref_count: u64,
    connection: Option<T>,
}

/// Shared, lazily opened connection to an external service.
pub struct ServicePool<C: ServiceConnector> {
    connector: C,
    state: Mutex<PoolState<C::Connection>>,
}

impl<C: ServiceConnector> ServicePool<C> {
    /// Create a pool in the closed state.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: Mutex::new(PoolState {
                ref_count: 0,
                connection: None,
            }),
        }
    }

    /// Register a holder, opening the connection on the first acquire.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ServiceUnavailable` if the connection cannot be
    /// opened. The reference count is left unchanged in that case.
    pub fn acquire(&self) -> Result<()> {
        let mut state = self.lock();
        if state.ref_count == 0 {
            let connection = self.connector.open().map_err(|err| {
                AppError::ServiceUnavailable(format!(
                    "failed to open {}: {err}",
                    self.connector.name()
                ))
            })?;
            state.connection = Some(connection);
            debug!(service = self.connector.name(), "service connection opened");
        }
        state.ref_count += 1;
        Ok(())
    }

    /// Drop a holder, closing the connection when the last one leaves.
    pub fn release(&self) {
        let mut state = self.lock();
        if state.ref_count == 0 {
            warn!(
                service = self.connector.name(),
                "release without matching acquire"
            );
            return;
        }
        state.ref_count -= 1;
        if state.ref_count == 0 {
            state.connection = None;
            debug!(service = self.connector.name(), "service connection closed");
        }
    }

    /// Acquire and return a guard that releases on drop.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn lease(&self) -> Result<ServiceLease<'_, C>> {
        self.acquire()?;
        Ok(ServiceLease { pool: self })
    }

    /// Close the connection regardless of outstanding holders.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if state.ref_count > 0 {
            debug!(
                service = self.connector.name(),
                outstanding = state.ref_count,
                "forcing service connection closed"
            );
        }
        state.ref_count = 0;
        state.connection = None;
    }

    /// Current number of holders.
    #[must_use]
    pub fn ref_count(&self) -> u64 {
        self.lock().ref_count
    }

    /// Whether the connection is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().connection.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<C::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> ServicePool<C>
where
    C: ServiceConnector,
    C::Connection: TelemetrySource,
{
    /// Read the temperature in milli-degrees Celsius over the open connection.
    ///
    /// The caller must hold an outstanding acquire.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ServiceUnavailable` if the connection is not open,
    /// or the connection's own error if the read fails.
    pub fn read_telemetry_milli_degrees(&self) -> Result<i32> {
        let mut state = self.lock();
        let connection = state.connection.as_mut().ok_or_else(|| {
            AppError::ServiceUnavailable(format!("{} is not open", self.connector.name()))
        })?;
        connection.read_milli_celsius()
    }
}

/// Holder registration that releases its pool on drop.
pub struct ServiceLease<'a, C: ServiceConnector> {
    pool: &'a ServicePool<C>,
}

impl<C> ServiceLease<'_, C>
where
    C: ServiceConnector,
    C::Connection: TelemetrySource,
{
    /// Read the temperature through the leased pool.
    ///
    /// # Errors
    ///
    /// See [`ServicePool::read_telemetry_milli_degrees`].
    pub fn read_telemetry_milli_degrees(&self) -> Result<i32> {
        self.pool.read_telemetry_milli_degrees()
    }
}

impl<C: ServiceConnector> Drop for ServiceLease<'_, C> {
    fn drop(&mut self) {
        self.pool.release();
    }
}
