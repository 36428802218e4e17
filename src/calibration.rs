//! Calibration mode: hold a steady carrier so the operator can trim the
//! crystal correction against a reference receiver.

use crate::control::ControlState;
use crate::hardware::{HardwareError, Synthesizer};
use crate::settings::{SettingsError, SettingsStore};
use crate::status::{BeaconPhase, StatusBoard};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

/// How calibration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationExit {
    /// Correction saved; the scheduler picks up again from slot alignment.
    ResumeScheduling,
    /// Correction saved; the beacon must be restarted before transmitting.
    RestartRequired,
    /// Shutdown requested while calibrating. Nothing was saved.
    Shutdown,
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("synthesizer error during calibration: {0}")]
    Hardware(#[from] HardwareError),
    #[error("could not persist correction: {0}")]
    Settings(#[from] SettingsError),
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationMode {
    poll_interval: Duration,
    restart_after_save: bool,
}

impl CalibrationMode {
    #[must_use]
    pub fn new(poll_interval: Duration, restart_after_save: bool) -> Self {
        Self {
            poll_interval,
            restart_after_save,
        }
    }

    /// Hold the carrier until the operator saves or the beacon shuts down.
    ///
    /// The output is off and the calibration request cleared on every exit,
    /// including errors.
    pub async fn run<S, T>(
        &self,
        synth: &mut S,
        settings: &mut T,
        control: &ControlState,
        status: &StatusBoard,
    ) -> Result<CalibrationExit, CalibrationError>
    where
        S: Synthesizer,
        T: SettingsStore,
    {
        let result = self.hold(synth, settings, control, status).await;
        let power_down = synth.set_power(false);
        control.finish_calibration();
        control.take_interrupt();
        status.update(|s| {
            s.phase = BeaconPhase::Idle;
            s.calibration_frequency = None;
            s.operating_frequency = None;
        });

        let exit = result?;
        power_down?;
        info!(?exit, "Calibration finished");
        Ok(exit)
    }

    async fn hold<S, T>(
        &self,
        synth: &mut S,
        settings: &mut T,
        control: &ControlState,
        status: &StatusBoard,
    ) -> Result<CalibrationExit, CalibrationError>
    where
        S: Synthesizer,
        T: SettingsStore,
    {
        let mut frequency = control.calibration_frequency();
        let correction = control.take_correction_change().unwrap_or_else(|| control.correction_ppb());
        info!("Calibration: holding {} (correction {} ppb)", frequency, correction);

        synth.apply_correction(correction)?;
        synth.set_frequency(frequency)?;
        synth.set_power(true)?;
        status.update(|s| {
            s.phase = BeaconPhase::Calibrating;
            s.calibration_frequency = Some(frequency);
            s.operating_frequency = Some(frequency);
            s.correction_ppb = correction;
        });

        let mut tick = Instant::now();
        loop {
            tick += self.poll_interval;
            sleep_until(tick).await;

            if control.shutdown_requested() {
                warn!("Shutdown during calibration, correction not saved");
                return Ok(CalibrationExit::Shutdown);
            }

            let mut retune = false;
            if let Some(ppb) = control.take_correction_change() {
                info!("Calibration: correction now {} ppb", ppb);
                synth.apply_correction(ppb)?;
                status.update(|s| s.correction_ppb = ppb);
                retune = true;
            }
            let requested = control.calibration_frequency();
            if requested != frequency {
                info!("Calibration: retuning to {}", requested);
                frequency = requested;
                status.update(|s| {
                    s.calibration_frequency = Some(frequency);
                    s.operating_frequency = Some(frequency);
                });
                retune = true;
            }
            if retune {
                synth.set_frequency(frequency)?;
            }

            if control.take_calibration_save() {
                let ppb = control.correction_ppb();
                settings.save_correction(ppb)?;
                info!("Calibration: saved correction {} ppb", ppb);
                return Ok(if self.restart_after_save {
                    CalibrationExit::RestartRequired
                } else {
                    CalibrationExit::ResumeScheduling
                });
            }
        }
    }
}
