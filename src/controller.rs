//! Top-level beacon controller.
//!
//! Owns every collaborator and runs the single cooperative control loop:
//! boot (probe, correction, first sync), then slot cycles, with calibration
//! preempting the scheduler whenever it is requested.

use crate::band::BandTable;
use crate::calibration::{CalibrationExit, CalibrationMode};
use crate::config::{BeaconConfig, ConfigError};
use crate::control::ControlState;
use crate::encoder::{Identity, SymbolEncoder};
use crate::gps::FastTimeSource;
use crate::hardware::{power_down, HardwareError, Synthesizer};
use crate::ntp::NetworkTimeClient;
use crate::scheduler::{CycleOutcome, CycleReport, TxScheduler};
use crate::session::{TxSession, TxTiming};
use crate::settings::{SettingsError, SettingsStore};
use crate::status::{BeaconPhase, BeaconStatus, StatusBoard, StatusReader};
use crate::timesync::{SyncOutcome, TimeSyncChain};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("synthesizer did not answer its probe, no output is possible")]
    HardwareNotFound,
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why [`Beacon::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    /// Calibration was saved with restart-after-save configured.
    RestartRequired,
}

pub struct Beacon<G, N, S, E, T> {
    identity: Identity,
    configured_identity: Identity,
    configured_correction_ppb: i32,
    timing: TxTiming,
    chain: TimeSyncChain<G, N>,
    scheduler: TxScheduler,
    calibration: CalibrationMode,
    synth: S,
    encoder: E,
    settings: T,
    control: Arc<ControlState>,
    status: StatusBoard,
}

impl<G, N, S, E, T> Beacon<G, N, S, E, T>
where
    G: FastTimeSource,
    N: NetworkTimeClient,
    S: Synthesizer,
    E: SymbolEncoder,
    T: SettingsStore,
{
    /// Assemble a beacon from configuration and collaborators.
    ///
    /// Persisted settings overlay the configuration: a saved correction
    /// replaces the configured one, and saved identity fields (operator
    /// edits or a GPS locator) replace the configured ones.
    pub fn new(
        config: &BeaconConfig,
        chain: TimeSyncChain<G, N>,
        synth: S,
        encoder: E,
        settings: T,
    ) -> Result<Self, BeaconError> {
        let persisted = settings.load()?;
        let mut identity = config.identity.clone();
        if let Some(callsign) = persisted.callsign {
            info!(callsign = %callsign, "Using stored call sign");
            identity.callsign = callsign;
        }
        if let Some(locator) = persisted.locator {
            info!(locator = %locator, "Using stored locator");
            identity.locator = locator;
        }
        if let Some(power_mw) = persisted.power_mw {
            identity.power_mw = power_mw;
        }
        let correction_ppb = persisted
            .correction_ppb
            .unwrap_or(config.calibration.correction_ppb);

        let enabled = config.enabled_bands();
        let control = Arc::new(ControlState::new(
            enabled,
            config.schedule,
            correction_ppb,
            config.calibration_frequency(),
        ));
        let scheduler = TxScheduler::new(config.tx.scheduler(), BandTable::new(enabled, config.tx.guard_hz));
        let calibration = CalibrationMode::new(
            Duration::from_millis(config.tx.poll_interval_ms),
            config.calibration.restart_after_save,
        );

        let status = StatusBoard::new(BeaconStatus {
            callsign: identity.callsign.clone(),
            locator: identity.locator.clone(),
            power_dbm: identity.power_dbm(),
            power_mw: identity.power_mw,
            correction_ppb,
            interval_seconds: config.schedule.interval_seconds(),
            ..BeaconStatus::default()
        });

        Ok(Self {
            identity,
            configured_identity: config.identity.clone(),
            configured_correction_ppb: config.calibration.correction_ppb,
            timing: config.tx.timing(),
            chain,
            scheduler,
            calibration,
            synth,
            encoder,
            settings,
            control,
            status,
        })
    }

    #[must_use]
    pub fn control(&self) -> Arc<ControlState> {
        Arc::clone(&self.control)
    }

    #[must_use]
    pub fn status_reader(&self) -> StatusReader {
        self.status.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> BeaconStatus {
        self.status.snapshot()
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn scheduler(&self) -> &TxScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn chain(&self) -> &TimeSyncChain<G, N> {
        &self.chain
    }

    #[must_use]
    pub fn synth(&self) -> &S {
        &self.synth
    }

    /// Probe the synthesizer, apply the stored correction, and take the first
    /// time sync.
    ///
    /// A failed probe is the only fatal condition. A failed sync is not: the
    /// beacon continues on the unsynchronized clock.
    pub async fn boot(&mut self) -> Result<SyncOutcome, BeaconError> {
        if !self.synth.probe() {
            error!("Synthesizer probe failed");
            self.status.update(|s| {
                s.phase = BeaconPhase::Stopped;
                s.last_error = Some("synthesizer not found".to_string());
            });
            return Err(BeaconError::HardwareNotFound);
        }
        self.synth.set_power(false)?;
        let correction = self.control.correction_ppb();
        self.synth.apply_correction(correction)?;
        info!("Synthesizer ready, correction {} ppb", correction);

        info!("Initial time sync");
        let outcome = self.chain.sync().await;
        self.handle_sync(&outcome);
        Ok(outcome)
    }

    /// Run until shutdown, or until a calibration save demands a restart.
    /// The output is left off either way.
    pub async fn run(&mut self) -> StopReason {
        let reason = loop {
            if self.control.shutdown_requested() {
                break StopReason::Shutdown;
            }

            if self.control.calibration_requested() {
                self.scheduler.disarm();
                match self.calibrate().await {
                    Some(CalibrationExit::ResumeScheduling) | None => continue,
                    Some(CalibrationExit::RestartRequired) => break StopReason::RestartRequired,
                    Some(CalibrationExit::Shutdown) => break StopReason::Shutdown,
                }
            }

            let report = self.run_cycle().await;
            if let Some(sync) = &report.sync {
                self.handle_sync(sync);
            }
        };

        power_down(&mut self.synth);
        self.status.update(|s| {
            s.phase = BeaconPhase::Stopped;
            s.operating_frequency = None;
        });
        info!(?reason, "Beacon stopped");
        reason
    }

    /// One scheduler cycle. Identity edits and a factory reset queued since
    /// the last cycle apply first.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.apply_operator_changes();
        let session = TxSession::new(&self.encoder, &self.identity, self.timing, &self.control);
        let report = self
            .scheduler
            .run_cycle(&mut self.chain, &mut self.synth, &session, &self.control, &self.status)
            .await;
        if let CycleOutcome::Transmitted(outcome) = &report.outcome {
            info!(
                band = report.band_index,
                result = ?outcome.result,
                "Slot done, {} symbols in {} ms",
                outcome.symbols_sent,
                outcome.elapsed_ms
            );
        }
        report
    }

    fn apply_operator_changes(&mut self) {
        if self.control.take_factory_reset() {
            self.factory_reset();
        }
        let Some(update) = self.control.take_identity_update() else {
            return;
        };
        let identity = self.identity.updated(&update);
        if let Err(e) = identity.validate() {
            warn!("Identity change ignored: {}", e);
            return;
        }
        info!(
            callsign = %identity.callsign,
            locator = %identity.locator,
            power_dbm = identity.power_dbm(),
            "Identity changed"
        );
        if let Err(e) = self.settings.save_identity(&identity) {
            warn!("Could not persist identity: {}", e);
        }
        self.identity = identity;
        self.publish_identity();
    }

    fn factory_reset(&mut self) {
        info!("Factory reset, returning to configured identity and correction");
        if let Err(e) = self.settings.clear() {
            warn!("Could not clear stored settings: {}", e);
        }
        self.identity = self.configured_identity.clone();
        let correction = self.configured_correction_ppb;
        self.control.restore_correction(correction);
        if let Err(e) = self.synth.apply_correction(correction) {
            warn!("Could not apply correction {} ppb: {}", correction, e);
        }
        self.status.update(|s| s.correction_ppb = correction);
        self.publish_identity();
    }

    fn publish_identity(&self) {
        let identity = &self.identity;
        self.status.update(|s| {
            s.callsign = identity.callsign.clone();
            s.locator = identity.locator.clone();
            s.power_dbm = identity.power_dbm();
            s.power_mw = identity.power_mw;
        });
    }

    async fn calibrate(&mut self) -> Option<CalibrationExit> {
        info!("Entering calibration mode");
        match self
            .calibration
            .run(&mut self.synth, &mut self.settings, &self.control, &self.status)
            .await
        {
            Ok(exit) => {
                self.status.update(|s| s.correction_ppb = self.control.correction_ppb());
                Some(exit)
            }
            Err(e) => {
                warn!("Calibration failed: {}", e);
                self.status.update(|s| s.last_error = Some(e.to_string()));
                None
            }
        }
    }

    fn handle_sync(&mut self, outcome: &SyncOutcome) {
        self.status.record_sync(self.chain.state(), outcome);
        let SyncOutcome::Gps { locator, .. } = outcome else {
            return;
        };
        if locator.eq_ignore_ascii_case(&self.identity.locator) {
            return;
        }
        info!("Locator updated from GPS: {} -> {}", self.identity.locator, locator);
        self.identity.locator = locator.to_string();
        if let Err(e) = self.settings.save_locator(locator) {
            warn!("Could not persist locator: {}", e);
        }
        let locator = self.identity.locator.clone();
        self.status.update(|s| s.locator = locator);
    }
}
