use std::time::Duration;
use wspr_beacon::calibration::{CalibrationError, CalibrationExit, CalibrationMode};
use wspr_beacon::settings::{MemorySettings, PersistedSettings};
use wspr_beacon::status::BeaconPhase;
use wspr_beacon::{ControlState, Frequency, SimulatedSynthesizer, StatusBoard};

const CARRIER_HZ: u64 = 10_000_000;

fn calibrating_control() -> ControlState {
    let control = ControlState::default();
    control.request_calibration(Frequency::from_hz(CARRIER_HZ));
    control
}

#[tokio::test(start_paused = true)]
async fn test_trim_retune_and_save() {
    let mode = CalibrationMode::new(Duration::from_millis(20), false);
    let control = calibrating_control();
    let status = StatusBoard::default();
    let mut synth = SimulatedSynthesizer::new();
    let mut settings = MemorySettings::default();
    let stored = settings.clone();

    let (exit, _) = tokio::join!(mode.run(&mut synth, &mut settings, &control, &status), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(status.snapshot().phase, BeaconPhase::Calibrating);
        control.set_correction(1_200);
        control.set_calibration_frequency(Frequency::from_hz(CARRIER_HZ + 500));
        tokio::time::sleep(Duration::from_secs(1)).await;
        control.request_calibration_save(1_500);
    });

    assert_eq!(exit.unwrap(), CalibrationExit::ResumeScheduling);
    assert_eq!(stored.snapshot().correction_ppb, Some(1_500));
    assert_eq!(synth.state().correction_ppb, 1_500);
    assert_eq!(synth.state().frequency, Frequency::from_hz(CARRIER_HZ + 500));
    assert!(!synth.state().output_on);

    assert!(!control.calibration_requested());
    assert!(!control.interrupt_requested());
    let status = status.snapshot();
    assert_eq!(status.phase, BeaconPhase::Idle);
    assert_eq!(status.calibration_frequency, None);
    assert_eq!(status.correction_ppb, 1_500);
}

#[tokio::test(start_paused = true)]
async fn test_save_can_demand_restart() {
    let mode = CalibrationMode::new(Duration::from_millis(20), true);
    let control = calibrating_control();
    let status = StatusBoard::default();
    let mut synth = SimulatedSynthesizer::new();
    let mut settings = MemorySettings::default();

    control.request_calibration_save(-250);
    let exit = mode.run(&mut synth, &mut settings, &control, &status).await;

    assert_eq!(exit.unwrap(), CalibrationExit::RestartRequired);
    assert_eq!(settings.snapshot().correction_ppb, Some(-250));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_store_untouched() {
    let mode = CalibrationMode::new(Duration::from_millis(20), false);
    let control = calibrating_control();
    let status = StatusBoard::default();
    let mut synth = SimulatedSynthesizer::new();
    let mut settings = MemorySettings::new(PersistedSettings {
        correction_ppb: Some(42),
        ..PersistedSettings::default()
    });

    control.set_correction(9_000);
    control.request_shutdown();
    let exit = mode.run(&mut synth, &mut settings, &control, &status).await;

    assert_eq!(exit.unwrap(), CalibrationExit::Shutdown);
    assert_eq!(settings.snapshot().correction_ppb, Some(42));
    assert!(!synth.state().output_on);
}

#[tokio::test(start_paused = true)]
async fn test_missing_synthesizer_still_clears_request() {
    let mode = CalibrationMode::new(Duration::from_millis(20), false);
    let control = calibrating_control();
    let status = StatusBoard::default();
    let mut synth = SimulatedSynthesizer::absent();
    let mut settings = MemorySettings::default();

    let result = mode.run(&mut synth, &mut settings, &control, &status).await;

    assert!(matches!(result, Err(CalibrationError::Hardware(_))));
    assert!(!control.calibration_requested());
    assert_eq!(status.snapshot().phase, BeaconPhase::Idle);
}
