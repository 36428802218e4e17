//! Static beacon configuration.
//!
//! Loaded once at start-up from an optional JSON file, then patched from
//! `WSPR_BEACON_*` environment variables. Every field has a default, so an
//! empty file (or none at all) gives a working 20m beacon on a 2 minute
//! schedule.

use crate::band::{BandIndex, EnabledBands, DEFAULT_BAND_INDEX, DEFAULT_GUARD_HZ, WSPR_BANDS};
use crate::control::Schedule;
use crate::encoder::{validate_message, Identity};
use crate::hardware::{MAX_OUTPUT_HZ, MIN_OUTPUT_HZ};
use crate::scheduler::SchedulerConfig;
use crate::session::{TxTiming, DWELL_CORRECTION_MS, REFERENCE_DURATION_MS, SYMBOL_PERIOD_MS, TONE_SPACING_CENTIHERTZ};
use crate::timesync::SyncConfig;
use crate::types::Frequency;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_PATH_VAR: &str = "WSPR_BEACON_CONFIG";
pub const CALLSIGN_VAR: &str = "WSPR_BEACON_CALLSIGN";
pub const LOCATOR_VAR: &str = "WSPR_BEACON_LOCATOR";
pub const POWER_VAR: &str = "WSPR_BEACON_POWER_MW";
pub const CONTROL_ADDR_VAR: &str = "WSPR_BEACON_CONTROL_ADDR";

pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{var}={value:?} is not valid")]
    Env { var: &'static str, value: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    pub symbol_period_ms: u64,
    pub dwell_correction_ms: u64,
    pub tone_spacing_centihertz: u64,
    pub warm_up_lead_seconds: u64,
    pub guard_hz: u64,
    pub poll_interval_ms: u64,
    pub reference_duration_ms: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            symbol_period_ms: SYMBOL_PERIOD_MS,
            dwell_correction_ms: DWELL_CORRECTION_MS,
            tone_spacing_centihertz: TONE_SPACING_CENTIHERTZ,
            warm_up_lead_seconds: 5,
            guard_hz: DEFAULT_GUARD_HZ,
            poll_interval_ms: 20,
            reference_duration_ms: REFERENCE_DURATION_MS,
        }
    }
}

impl TxConfig {
    #[must_use]
    pub fn timing(&self) -> TxTiming {
        TxTiming {
            symbol_period: Duration::from_millis(self.symbol_period_ms),
            dwell_correction: Duration::from_millis(self.dwell_correction_ms),
            tone_spacing: Frequency::from_centihertz(self.tone_spacing_centihertz),
            reference_duration: Duration::from_millis(self.reference_duration_ms),
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            warm_up_lead: Duration::from_secs(self.warm_up_lead_seconds),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..SchedulerConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub gps_timeout_seconds: u64,
    /// Serial device carrying NMEA sentences. No device means no GPS tier.
    pub gps_device: Option<PathBuf>,
    pub ntp_hosts: Vec<String>,
    pub attempts_per_host: u32,
    pub attempt_timeout_seconds: u64,
    pub resync_interval_seconds: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        Self {
            gps_timeout_seconds: defaults.gps_timeout.as_secs(),
            gps_device: None,
            ntp_hosts: defaults.ntp_hosts,
            attempts_per_host: defaults.attempts_per_host,
            attempt_timeout_seconds: defaults.attempt_timeout.as_secs(),
            resync_interval_seconds: defaults.resync_interval.as_secs(),
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            gps_timeout: Duration::from_secs(self.gps_timeout_seconds),
            ntp_hosts: self.ntp_hosts.clone(),
            attempts_per_host: self.attempts_per_host,
            attempt_timeout: Duration::from_secs(self.attempt_timeout_seconds),
            resync_interval: Duration::from_secs(self.resync_interval_seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub correction_ppb: i32,
    pub frequency_hz: u64,
    /// Leaving calibration needs a restart instead of resuming the schedule.
    pub restart_after_save: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            correction_ppb: 0,
            frequency_hz: 14_000_000,
            restart_after_save: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub listen_addr: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_CONTROL_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub identity: Identity,
    pub schedule: Schedule,
    /// Enabled band indices into the band catalog.
    pub bands: Vec<BandIndex>,
    pub tx: TxConfig,
    pub sync: SyncSettings,
    pub calibration: CalibrationConfig,
    pub control: ControlConfig,
    pub settings_path: PathBuf,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            identity: Identity::default(),
            schedule: Schedule::default(),
            bands: vec![DEFAULT_BAND_INDEX],
            tx: TxConfig::default(),
            sync: SyncSettings::default(),
            calibration: CalibrationConfig::default(),
            control: ControlConfig::default(),
            settings_path: PathBuf::from("wspr-beacon-settings.json"),
        }
    }
}

impl BeaconConfig {
    /// Load, apply environment overrides and validate.
    ///
    /// `path` falls back to `WSPR_BEACON_CONFIG`; a path that does not exist
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration");
                Self::load_from(&path)?
            }
            Some(path) => {
                info!(path = %path.display(), "Configuration file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Patch fields from a variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(callsign) = lookup(CALLSIGN_VAR) {
            debug!(callsign = %callsign, "Call sign from environment");
            self.identity.callsign = callsign.trim().to_uppercase();
        }
        if let Some(locator) = lookup(LOCATOR_VAR) {
            self.identity.locator = locator.trim().to_string();
        }
        if let Some(power) = lookup(POWER_VAR) {
            self.identity.power_mw = power.trim().parse().map_err(|_| ConfigError::Env {
                var: POWER_VAR,
                value: power.clone(),
            })?;
        }
        if let Some(addr) = lookup(CONTROL_ADDR_VAR) {
            self.control.listen_addr = addr.trim().to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let identity = &self.identity;
        validate_message(&identity.callsign, &identity.locator, identity.power_dbm())
            .map_err(|e| ConfigError::invalid("identity", e.to_string()))?;

        if let Some(&index) = self.bands.iter().find(|&&i| i >= WSPR_BANDS.len()) {
            return Err(ConfigError::invalid(
                "bands",
                format!("no band {} (catalog has {})", index, WSPR_BANDS.len()),
            ));
        }

        let tx = &self.tx;
        if tx.symbol_period_ms == 0 {
            return Err(ConfigError::invalid("tx.symbol_period_ms", "must be positive"));
        }
        if tx.dwell_correction_ms >= tx.symbol_period_ms {
            return Err(ConfigError::invalid(
                "tx.dwell_correction_ms",
                "must be smaller than the symbol period",
            ));
        }
        if tx.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("tx.poll_interval_ms", "must be positive"));
        }
        if tx.tone_spacing_centihertz == 0 {
            return Err(ConfigError::invalid("tx.tone_spacing_centihertz", "must be positive"));
        }

        let sync = &self.sync;
        if sync.ntp_hosts.is_empty() {
            return Err(ConfigError::invalid("sync.ntp_hosts", "at least one host is required"));
        }
        if sync.attempts_per_host == 0 {
            return Err(ConfigError::invalid("sync.attempts_per_host", "must be at least 1"));
        }
        if sync.attempt_timeout_seconds == 0 || sync.gps_timeout_seconds == 0 {
            return Err(ConfigError::invalid("sync", "timeouts must be positive"));
        }

        let frequency = self.calibration.frequency_hz;
        if !(MIN_OUTPUT_HZ..=MAX_OUTPUT_HZ).contains(&frequency) {
            return Err(ConfigError::invalid(
                "calibration.frequency_hz",
                format!("{} Hz outside synthesizer range", frequency),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn enabled_bands(&self) -> EnabledBands {
        EnabledBands::from_indices(self.bands.iter().copied())
    }

    #[must_use]
    pub fn calibration_frequency(&self) -> Frequency {
        Frequency::from_hz(self.calibration.frequency_hz)
    }
}
