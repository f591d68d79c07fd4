//! In-process clock controller.
//!
//! Owns the runtime [`ClockContext`] and the stop signal the `Exit` command
//! raises. Frequency computation is left to whoever feeds
//! [`ClockManager::set_application`] and [`ClockManager::set_applied_hz`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ClockController, ProfileStore};
use crate::models::clock::{ClockContext, ClockModule, ProfileKind, ThermalSensor};
use crate::telemetry::pool::{ServiceConnector, ServicePool, TelemetrySource};
use crate::Result;

/// Runtime clock state shared between the control channel and the daemon loop.
pub struct ClockManager {
    store: Arc<dyn ProfileStore>,
    context: Mutex<ClockContext>,
    stop: CancellationToken,
}

impl ClockManager {
    /// Create a manager reading enable/override state from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            context: Mutex::new(ClockContext::default()),
            stop: CancellationToken::new(),
        }
    }

    /// Token cancelled once a stop has been requested.
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Whether the run loop should keep going.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.stop.is_cancelled()
    }

    /// Record the foreground application and active performance mode.
    pub fn set_application(&self, application_id: u64, profile: ProfileKind) {
        let mut ctx = self.lock();
        if ctx.application_id != application_id || ctx.profile != profile {
            info!(
                application_id = %format!("{application_id:016x}"),
                ?profile,
                "context changed"
            );
        }
        ctx.application_id = application_id;
        ctx.profile = profile;
    }

    /// Record the frequency currently applied to `module`, in Hz.
    pub fn set_applied_hz(&self, module: ClockModule, hz: u32) {
        self.lock().freqs[module.index()] = hz;
    }

    /// Sample the skin temperature through `pool` and store it in the context.
    ///
    /// The pool is held only for the duration of the read.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be opened or the read fails.
    pub fn refresh_skin_temperature<C>(&self, pool: &ServicePool<C>) -> Result<i32>
    where
        C: ServiceConnector,
        C::Connection: TelemetrySource,
    {
        let millis = {
            let lease = pool.lease()?;
            lease.read_telemetry_milli_degrees()?
        };
        self.lock().temps[ThermalSensor::Skin.index()] = u32::try_from(millis).unwrap_or(0);
        debug!(millis, "skin temperature sampled");
        Ok(millis)
    }

    fn lock(&self) -> MutexGuard<'_, ClockContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClockController for ClockManager {
    fn current_context(&self) -> ClockContext {
        let mut ctx = *self.lock();
        ctx.enabled = self.store.is_enabled();
        for module in ClockModule::ALL {
            ctx.override_freqs[module.index()] = self.store.override_hz(module);
        }
        ctx
    }

    fn request_stop(&self) {
        if !self.stop.is_cancelled() {
            info!("clock manager stop requested");
        }
        self.stop.cancel();
    }
}
