//! Collaborators the control channel drives.
//!
//! The IPC dispatcher only ever talks to these through the [`ProfileStore`]
//! and [`ClockController`] traits, which it receives at construction time.
//! Implementations must be safe to call from a foreign thread: the
//! dispatcher adds no locking of its own.

pub mod manager;
pub mod profile_store;

use crate::models::clock::{ClockContext, ClockModule, ProfileKind};
use crate::Result;

pub use manager::ClockManager;
pub use profile_store::MemoryProfileStore;

/// Per-application clock profile storage.
pub trait ProfileStore: Send + Sync {
    /// Whether the initial profile load has completed.
    fn has_profiles_loaded(&self) -> bool;

    /// Number of profile kinds that carry at least one clock for `application_id`.
    fn profile_count(&self, application_id: u64) -> u8;

    /// Configured clock in MHz, or 0 when unset.
    fn clock_mhz(&self, application_id: u64, module: ClockModule, profile: ProfileKind) -> u32;

    /// Store a clock in MHz (0 clears it) and persist the change.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` when the change cannot be persisted. The
    /// stored value is left as it was before the call.
    fn set_clock_mhz(
        &self,
        application_id: u64,
        module: ClockModule,
        profile: ProfileKind,
        mhz: u32,
    ) -> Result<()>;

    /// Whether profile application is enabled.
    fn is_enabled(&self) -> bool;

    /// Toggle profile application.
    fn set_enabled(&self, enabled: bool);

    /// Temporary override for `module` in Hz, 0 when none.
    fn override_hz(&self, module: ClockModule) -> u32;

    /// Set a temporary override for `module` in Hz (0 clears it).
    fn set_override_hz(&self, module: ClockModule, hz: u32);
}

/// Owner of the runtime clock state.
pub trait ClockController: Send + Sync {
    /// Snapshot of the current runtime context.
    fn current_context(&self) -> ClockContext;

    /// Ask the controller's run loop to wind down.
    ///
    /// This is a shutdown request, not an immediate termination.
    fn request_stop(&self);
}
