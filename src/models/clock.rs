//! Clock-domain selectors and the runtime context snapshot.
//!
//! Every selector is a small closed enumeration. Values arriving from the
//! control channel are raw `u32`s and must go through `from_u32` before use;
//! anything outside the known set maps to `None`.

use bytes::{Buf, BufMut};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Hardware clock domain.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ClockModule {
    /// Application processor.
    Cpu,
    /// Graphics processor.
    Gpu,
    /// Memory controller.
    Mem,
}

impl ClockModule {
    /// Number of clock domains.
    pub const COUNT: usize = 3;

    /// All domains in wire order.
    pub const ALL: [Self; Self::COUNT] = [Self::Cpu, Self::Gpu, Self::Mem];

    /// Wire discriminant value.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::Cpu => 0,
            Self::Gpu => 1,
            Self::Mem => 2,
        }
    }

    /// Parse a wire discriminant; `None` for unknown domains.
    #[must_use]
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Cpu),
            1 => Some(Self::Gpu),
            2 => Some(Self::Mem),
            _ => None,
        }
    }

    /// Position of this domain in per-module arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Cpu => 0,
            Self::Gpu => 1,
            Self::Mem => 2,
        }
    }
}

/// Performance mode a profile applies to.
#[derive(
    Debug,
    Copy,
    Clone,
    Default,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    ValueEnum,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Running on battery.
    #[default]
    Handheld,
    /// Charging from an unidentified charger.
    HandheldCharging,
    /// Charging from a USB port.
    HandheldChargingUsb,
    /// Charging from the official power adapter.
    HandheldChargingOfficial,
    /// Docked to an external display.
    Docked,
}

impl ProfileKind {
    /// Number of profile kinds.
    pub const COUNT: usize = 5;

    /// All kinds in wire order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Handheld,
        Self::HandheldCharging,
        Self::HandheldChargingUsb,
        Self::HandheldChargingOfficial,
        Self::Docked,
    ];

    /// Wire discriminant value.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::Handheld => 0,
            Self::HandheldCharging => 1,
            Self::HandheldChargingUsb => 2,
            Self::HandheldChargingOfficial => 3,
            Self::Docked => 4,
        }
    }

    /// Parse a wire discriminant; `None` for unknown kinds.
    #[must_use]
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Handheld),
            1 => Some(Self::HandheldCharging),
            2 => Some(Self::HandheldChargingUsb),
            3 => Some(Self::HandheldChargingOfficial),
            4 => Some(Self::Docked),
            _ => None,
        }
    }
}

/// Temperature sensor reported in the runtime context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalSensor {
    /// System-on-chip die.
    Soc,
    /// Main board.
    Pcb,
    /// Device skin.
    Skin,
}

impl ThermalSensor {
    /// Number of sensors.
    pub const COUNT: usize = 3;

    /// Position of this sensor in the context temperature array.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Soc => 0,
            Self::Pcb => 1,
            Self::Skin => 2,
        }
    }
}

/// Snapshot of the clock controller's current runtime state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClockContext {
    /// Whether profile application is enabled.
    pub enabled: bool,
    /// Foreground application identifier.
    pub application_id: u64,
    /// Active performance mode.
    pub profile: ProfileKind,
    /// Applied frequency per clock domain, in Hz.
    pub freqs: [u32; ClockModule::COUNT],
    /// Temporary override frequency per clock domain, in Hz (0 = none).
    pub override_freqs: [u32; ClockModule::COUNT],
    /// Temperature per sensor, in milli-degrees Celsius.
    pub temps: [u32; ThermalSensor::COUNT],
}

impl ClockContext {
    /// Size of the packed wire encoding.
    pub const ENCODED_LEN: usize = 1 + 8 + 4 + 4 * (2 * ClockModule::COUNT + ThermalSensor::COUNT);

    /// Append the packed little-endian encoding to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(u8::from(self.enabled));
        dst.put_u64_le(self.application_id);
        dst.put_u32_le(self.profile.to_u32());
        for hz in self.freqs.iter().chain(&self.override_freqs) {
            dst.put_u32_le(*hz);
        }
        for millis in &self.temps {
            dst.put_u32_le(*millis);
        }
    }

    /// Decode a packed context; `None` if `src` is short or the profile is unknown.
    #[must_use]
    pub fn decode(mut src: &[u8]) -> Option<Self> {
        if src.len() < Self::ENCODED_LEN {
            return None;
        }
        let enabled = src.get_u8() != 0;
        let application_id = src.get_u64_le();
        let profile = ProfileKind::from_u32(src.get_u32_le())?;
        let mut ctx = Self {
            enabled,
            application_id,
            profile,
            ..Self::default()
        };
        for slot in ctx.freqs.iter_mut().chain(ctx.override_freqs.iter_mut()) {
            *slot = src.get_u32_le();
        }
        for slot in &mut ctx.temps {
            *slot = src.get_u32_le();
        }
        Some(ctx)
    }
}
