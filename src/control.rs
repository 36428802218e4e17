//! Flags and settings shared between the control surface and the controller.
//!
//! Every field has exactly one writer. The control surface raises requests
//! and edits settings; the scheduler, session and calibration mode poll them
//! and clear the requests they consume. Reads may be one poll interval stale.

use crate::band::EnabledBands;
use crate::encoder::IdentityUpdate;
use crate::types::Frequency;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Allowed transmit intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    #[default]
    #[serde(alias = "schedule1")]
    Every2Min,
    #[serde(alias = "schedule2")]
    Every4Min,
    #[serde(alias = "schedule3")]
    Every6Min,
    #[serde(alias = "schedule4")]
    Every8Min,
    #[serde(alias = "schedule5")]
    Every10Min,
}

impl Schedule {
    pub const ALL: [Schedule; 5] = [
        Schedule::Every2Min,
        Schedule::Every4Min,
        Schedule::Every6Min,
        Schedule::Every8Min,
        Schedule::Every10Min,
    ];

    #[must_use]
    pub const fn interval_seconds(self) -> i64 {
        match self {
            Schedule::Every2Min => 120,
            Schedule::Every4Min => 240,
            Schedule::Every6Min => 360,
            Schedule::Every8Min => 480,
            Schedule::Every10Min => 600,
        }
    }

    /// Matches an interval given in minutes.
    #[must_use]
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.interval_seconds() == i64::from(minutes) * 60)
    }

    const fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        Self::ALL.get(usize::from(value)).copied().unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct ControlState {
    interrupt_requested: AtomicBool,
    realign_requested: AtomicBool,
    calibration_requested: AtomicBool,
    calibration_save_requested: AtomicBool,
    calibration_frequency_centihertz: AtomicU64,
    correction_ppb: AtomicI32,
    correction_dirty: AtomicBool,
    enabled_bands: AtomicU16,
    schedule: AtomicU8,
    pending_identity: Mutex<Option<IdentityUpdate>>,
    factory_reset_requested: AtomicBool,
    shutdown_requested: AtomicBool,
}

impl ControlState {
    #[must_use]
    pub fn new(enabled: EnabledBands, schedule: Schedule, correction_ppb: i32, calibration_frequency: Frequency) -> Self {
        Self {
            interrupt_requested: AtomicBool::new(false),
            realign_requested: AtomicBool::new(false),
            calibration_requested: AtomicBool::new(false),
            calibration_save_requested: AtomicBool::new(false),
            calibration_frequency_centihertz: AtomicU64::new(calibration_frequency.centihertz()),
            correction_ppb: AtomicI32::new(correction_ppb),
            correction_dirty: AtomicBool::new(false),
            enabled_bands: AtomicU16::new(enabled.bits()),
            schedule: AtomicU8::new(schedule.to_u8()),
            pending_identity: Mutex::new(None),
            factory_reset_requested: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    // Writers replace whole values; a poisoned slot is still consistent.
    fn identity_slot(&self) -> MutexGuard<'_, Option<IdentityUpdate>> {
        self.pending_identity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Control surface side

    pub fn request_interrupt(&self) {
        self.interrupt_requested.store(true, Ordering::Release);
    }

    pub fn set_enabled_bands(&self, enabled: EnabledBands) {
        self.enabled_bands.store(enabled.bits(), Ordering::Release);
    }

    /// Changing the interval abandons the pending slot and realigns.
    pub fn set_schedule(&self, schedule: Schedule) {
        self.schedule.store(schedule.to_u8(), Ordering::Release);
        self.realign_requested.store(true, Ordering::Release);
        self.request_interrupt();
    }

    pub fn request_calibration(&self, frequency: Frequency) {
        self.calibration_frequency_centihertz.store(frequency.centihertz(), Ordering::Release);
        self.calibration_requested.store(true, Ordering::Release);
        self.request_interrupt();
    }

    pub fn set_calibration_frequency(&self, frequency: Frequency) {
        self.calibration_frequency_centihertz.store(frequency.centihertz(), Ordering::Release);
    }

    pub fn set_correction(&self, ppb: i32) {
        self.correction_ppb.store(ppb, Ordering::Release);
        self.correction_dirty.store(true, Ordering::Release);
    }

    pub fn request_calibration_save(&self, ppb: i32) {
        self.set_correction(ppb);
        self.calibration_save_requested.store(true, Ordering::Release);
    }

    /// Queue an identity edit for the next cycle, folded into any edit
    /// still waiting.
    pub fn request_identity_update(&self, update: IdentityUpdate) {
        let mut slot = self.identity_slot();
        match slot.as_mut() {
            Some(pending) => pending.merge(update),
            None => *slot = Some(update),
        }
    }

    /// Identity edit queued but not yet applied.
    #[must_use]
    pub fn pending_identity(&self) -> Option<IdentityUpdate> {
        self.identity_slot().clone()
    }

    /// Drops any queued identity edit; applied at the next cycle.
    pub fn request_factory_reset(&self) {
        self.identity_slot().take();
        self.factory_reset_requested.store(true, Ordering::Release);
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        self.request_interrupt();
    }

    // Controller side

    #[must_use]
    pub fn interrupt_requested(&self) -> bool {
        self.interrupt_requested.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn calibration_requested(&self) -> bool {
        self.calibration_requested.load(Ordering::Acquire)
    }

    /// Either flag that aborts a countdown or a transmission.
    #[must_use]
    pub fn should_abort(&self) -> bool {
        self.interrupt_requested() || self.calibration_requested()
    }

    pub fn take_interrupt(&self) -> bool {
        self.interrupt_requested.swap(false, Ordering::AcqRel)
    }

    pub fn take_realign(&self) -> bool {
        self.realign_requested.swap(false, Ordering::AcqRel)
    }

    pub fn take_calibration_save(&self) -> bool {
        self.calibration_save_requested.swap(false, Ordering::AcqRel)
    }

    /// Correction value, if it changed since the last call.
    pub fn take_correction_change(&self) -> Option<i32> {
        self.correction_dirty
            .swap(false, Ordering::AcqRel)
            .then(|| self.correction_ppb())
    }

    pub fn take_identity_update(&self) -> Option<IdentityUpdate> {
        self.identity_slot().take()
    }

    pub fn take_factory_reset(&self) -> bool {
        self.factory_reset_requested.swap(false, Ordering::AcqRel)
    }

    /// Put back a correction restored by the controller. Not reported as an
    /// operator change.
    pub fn restore_correction(&self, ppb: i32) {
        self.correction_ppb.store(ppb, Ordering::Release);
        self.correction_dirty.store(false, Ordering::Release);
    }

    pub fn finish_calibration(&self) {
        self.calibration_save_requested.store(false, Ordering::Release);
        self.calibration_requested.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn enabled_bands(&self) -> EnabledBands {
        EnabledBands::from_bits(self.enabled_bands.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn schedule(&self) -> Schedule {
        Schedule::from_u8(self.schedule.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn calibration_frequency(&self) -> Frequency {
        Frequency::from_centihertz(self.calibration_frequency_centihertz.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn correction_ppb(&self) -> i32 {
        self.correction_ppb.load(Ordering::Acquire)
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(
            EnabledBands::from_indices([crate::band::DEFAULT_BAND_INDEX]),
            Schedule::default(),
            0,
            Frequency::from_hz(14_000_000),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_intervals() {
        assert_eq!(Schedule::Every2Min.interval_seconds(), 120);
        assert_eq!(Schedule::Every10Min.interval_seconds(), 600);
        assert_eq!(Schedule::from_minutes(6), Some(Schedule::Every6Min));
        assert_eq!(Schedule::from_minutes(3), None);
    }

    #[test]
    fn test_schedule_serde_accepts_legacy_ids() {
        let s: Schedule = serde_json::from_str("\"schedule3\"").unwrap();
        assert_eq!(s, Schedule::Every6Min);
        let s: Schedule = serde_json::from_str("\"every4min\"").unwrap();
        assert_eq!(s, Schedule::Every4Min);
    }

    #[test]
    fn test_schedule_change_requests_realign() {
        let control = ControlState::default();
        control.set_schedule(Schedule::Every8Min);

        assert_eq!(control.schedule(), Schedule::Every8Min);
        assert!(control.interrupt_requested());
        assert!(control.take_realign());
        assert!(!control.take_realign());
        assert!(control.take_interrupt());
        assert!(!control.interrupt_requested());
    }

    #[test]
    fn test_correction_change_is_consumed_once() {
        let control = ControlState::default();
        assert_eq!(control.take_correction_change(), None);

        control.set_correction(-850);
        assert_eq!(control.take_correction_change(), Some(-850));
        assert_eq!(control.take_correction_change(), None);
        assert_eq!(control.correction_ppb(), -850);
    }

    #[test]
    fn test_identity_updates_merge_until_taken() {
        let control = ControlState::default();
        control.request_identity_update(IdentityUpdate {
            callsign: Some("W1XYZ".to_string()),
            ..IdentityUpdate::default()
        });
        control.request_identity_update(IdentityUpdate {
            power_mw: Some(200),
            ..IdentityUpdate::default()
        });

        let update = control.take_identity_update().unwrap();
        assert_eq!(update.callsign.as_deref(), Some("W1XYZ"));
        assert_eq!(update.power_mw, Some(200));
        assert_eq!(control.take_identity_update(), None);
    }

    #[test]
    fn test_factory_reset_drops_pending_identity() {
        let control = ControlState::default();
        control.request_identity_update(IdentityUpdate {
            locator: Some("JN58".to_string()),
            ..IdentityUpdate::default()
        });
        control.set_correction(400);
        control.request_factory_reset();

        assert_eq!(control.pending_identity(), None);
        assert!(control.take_factory_reset());
        assert!(!control.take_factory_reset());

        control.restore_correction(-120);
        assert_eq!(control.correction_ppb(), -120);
        assert_eq!(control.take_correction_change(), None);
    }

    #[test]
    fn test_calibration_request_aborts() {
        let control = ControlState::default();
        control.request_calibration(Frequency::from_hz(10_000_000));

        assert!(control.should_abort());
        assert_eq!(control.calibration_frequency(), Frequency::from_hz(10_000_000));

        control.take_interrupt();
        assert!(control.should_abort());
        control.finish_calibration();
        assert!(!control.should_abort());
    }
}
