//! In-memory profile store with optional TOML persistence.
//!
//! Profiles are kept per application and per [`ProfileKind`], one MHz value
//! per [`ClockModule`]. When a backing file is configured every successful
//! [`ProfileStore::set_clock_mhz`] rewrites it; a failed write rolls the
//! in-memory value back so memory and disk never disagree.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::ProfileStore;
use crate::models::clock::{ClockModule, ProfileKind};
use crate::{AppError, Result};

type ModuleClocks = [u32; ClockModule::COUNT];

/// One `[[profile]]` table in the backing file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ProfileEntry {
    /// Application identifier as 16 hex digits.
    application_id: String,
    profile: ProfileKind,
    #[serde(default)]
    cpu: u32,
    #[serde(default)]
    gpu: u32,
    #[serde(default)]
    mem: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    profile: Vec<ProfileEntry>,
}

#[derive(Debug)]
struct StoreState {
    loaded: bool,
    enabled: bool,
    clocks: BTreeMap<(u64, ProfileKind), ModuleClocks>,
    overrides: ModuleClocks,
}

/// Thread-safe [`ProfileStore`] backed by memory and, optionally, a TOML file.
#[derive(Debug)]
pub struct MemoryProfileStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl MemoryProfileStore {
    /// Create a store that reports itself as not yet loaded.
    #[must_use]
    pub fn unloaded(enabled: bool) -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState {
                loaded: false,
                enabled,
                clocks: BTreeMap::new(),
                overrides: [0; ClockModule::COUNT],
            }),
        }
    }

    /// Create an empty, loaded, memory-only store.
    #[must_use]
    pub fn in_memory(enabled: bool) -> Self {
        let store = Self::unloaded(enabled);
        store.lock().loaded = true;
        store
    }

    /// Open a store, loading profiles from `path` when given.
    ///
    /// A missing file is treated as an empty profile table; the file is
    /// created on the first write.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the file exists but cannot be read or
    /// parsed.
    pub fn open(path: Option<PathBuf>, enabled: bool) -> Result<Self> {
        let mut store = Self::unloaded(enabled);
        if let Some(path) = path {
            let clocks = load_file(&path)?;
            info!(path = %path.display(), profiles = clocks.len(), "profiles loaded");
            store.lock().clocks = clocks;
            store.path = Some(path);
        }
        store.lock().loaded = true;
        Ok(store)
    }

    /// Open a store like [`open`](Self::open), but keep serving when the
    /// file cannot be loaded.
    ///
    /// A failed load leaves the store permanently not-loaded and memory-only,
    /// so profile commands report `ConfigNotLoaded` and the existing file is
    /// never overwritten.
    #[must_use]
    pub fn open_or_unloaded(path: Option<PathBuf>, enabled: bool) -> Self {
        match Self::open(path, enabled) {
            Ok(store) => store,
            Err(err) => {
                error!(%err, "profile load failed, serving without profiles");
                Self::unloaded(enabled)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, clocks: &BTreeMap<(u64, ProfileKind), ModuleClocks>) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let file = ProfileFile {
            profile: clocks
                .iter()
                .map(|(&(application_id, profile), mhz)| ProfileEntry {
                    application_id: format!("{application_id:016x}"),
                    profile,
                    cpu: mhz[ClockModule::Cpu.index()],
                    gpu: mhz[ClockModule::Gpu.index()],
                    mem: mhz[ClockModule::Mem.index()],
                })
                .collect(),
        };
        let raw = toml::to_string_pretty(&file)
            .map_err(|err| AppError::Store(format!("failed to encode profiles: {err}")))?;
        fs::write(path, raw).map_err(|err| {
            AppError::Store(format!("failed to write {}: {err}", path.display()))
        })?;
        debug!(path = %path.display(), "profiles saved");
        Ok(())
    }
}

impl ProfileStore for MemoryProfileStore {
    fn has_profiles_loaded(&self) -> bool {
        self.lock().loaded
    }

    fn profile_count(&self, application_id: u64) -> u8 {
        let state = self.lock();
        let count = ProfileKind::ALL
            .iter()
            .filter(|&&kind| {
                state
                    .clocks
                    .get(&(application_id, kind))
                    .is_some_and(|mhz| mhz.iter().any(|&v| v != 0))
            })
            .count();
        u8::try_from(count).unwrap_or(u8::MAX)
    }

    fn clock_mhz(&self, application_id: u64, module: ClockModule, profile: ProfileKind) -> u32 {
        self.lock()
            .clocks
            .get(&(application_id, profile))
            .map_or(0, |mhz| mhz[module.index()])
    }

    fn set_clock_mhz(
        &self,
        application_id: u64,
        module: ClockModule,
        profile: ProfileKind,
        mhz: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        let key = (application_id, profile);
        let previous = state.clocks.get(&key).copied();

        let mut updated = previous.unwrap_or([0; ClockModule::COUNT]);
        updated[module.index()] = mhz;
        if updated.iter().all(|&v| v == 0) {
            state.clocks.remove(&key);
        } else {
            state.clocks.insert(key, updated);
        }

        if let Err(err) = self.save(&state.clocks) {
            match previous {
                Some(old) => state.clocks.insert(key, old),
                None => state.clocks.remove(&key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    fn override_hz(&self, module: ClockModule) -> u32 {
        self.lock().overrides[module.index()]
    }

    fn set_override_hz(&self, module: ClockModule, hz: u32) {
        self.lock().overrides[module.index()] = hz;
    }
}

fn load_file(path: &Path) -> Result<BTreeMap<(u64, ProfileKind), ModuleClocks>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(AppError::Store(format!(
                "failed to read {}: {err}",
                path.display()
            )))
        }
    };

    let file: ProfileFile = toml::from_str(&raw)
        .map_err(|err| AppError::Store(format!("invalid profile file: {err}")))?;

    let mut clocks = BTreeMap::new();
    for entry in file.profile {
        let application_id = u64::from_str_radix(&entry.application_id, 16).map_err(|err| {
            AppError::Store(format!(
                "invalid application id '{}': {err}",
                entry.application_id
            ))
        })?;
        clocks.insert(
            (application_id, entry.profile),
            [entry.cpu, entry.gpu, entry.mem],
        );
    }
    Ok(clocks)
}
