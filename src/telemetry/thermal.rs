//! Linux sysfs thermal zone used as the temperature service.
//!
//! A thermal zone's `temp` attribute already reports milli-degrees Celsius,
//! so a connection is simply an open handle on that file that gets rewound
//! before every read.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use super::pool::{ServiceConnector, TelemetrySource};
use crate::{AppError, Result};

/// Default skin temperature source.
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Opens a thermal zone `temp` attribute.
#[derive(Debug, Clone)]
pub struct ThermalZoneConnector {
    path: PathBuf,
    name: String,
}

impl ThermalZoneConnector {
    /// Connector for the `temp` attribute at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("thermal zone {}", path.display());
        Self { path, name }
    }
}

impl ServiceConnector for ThermalZoneConnector {
    type Connection = ThermalZone;

    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<ThermalZone> {
        let file = File::open(&self.path)?;
        Ok(ThermalZone { file })
    }
}

/// Open thermal zone attribute.
#[derive(Debug)]
pub struct ThermalZone {
    file: File,
}

impl TelemetrySource for ThermalZone {
    fn read_milli_celsius(&mut self) -> Result<i32> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut raw = String::new();
        self.file.read_to_string(&mut raw)?;
        raw.trim()
            .parse::<i32>()
            .map_err(|err| AppError::Io(format!("invalid thermal reading '{}': {err}", raw.trim())))
    }
}
