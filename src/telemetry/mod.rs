//! Hardware telemetry services.

pub mod pool;
pub mod thermal;

pub use pool::{ServiceConnector, ServiceLease, ServicePool, TelemetrySource};
pub use thermal::ThermalZoneConnector;
