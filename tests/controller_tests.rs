mod common;

use common::{mid_slot_epoch, sync_config, CountingEncoder, MockNtp, ScriptedGps};
use std::time::Duration;
use wspr_beacon::gps::{FastTimeSource, NoGps};
use wspr_beacon::settings::PersistedSettings;
use wspr_beacon::status::SyncSource;
use wspr_beacon::timesync::SyncOutcome;
use wspr_beacon::*;

type TestBeacon<G> = Beacon<G, MockNtp, SimulatedSynthesizer, CountingEncoder, MemorySettings>;

fn config() -> BeaconConfig {
    let mut config = BeaconConfig::default();
    config.identity = Identity {
        callsign: "K1ABC".to_string(),
        locator: "FN31pr".to_string(),
        power_mw: 500,
    };
    config
}

fn beacon_with<G: FastTimeSource>(
    config: &BeaconConfig,
    gps: G,
    synth: SimulatedSynthesizer,
    settings: MemorySettings,
) -> TestBeacon<G> {
    let chain = TimeSyncChain::new(
        sync_config(&["a"]),
        WallClock::at_epoch(0),
        gps,
        MockNtp::answering("a", mid_slot_epoch()),
    );
    Beacon::new(config, chain, synth, CountingEncoder::default(), settings).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_boot_fails_without_synthesizer() {
    let mut beacon = beacon_with(&config(), NoGps, SimulatedSynthesizer::absent(), MemorySettings::default());

    let result = beacon.boot().await;

    assert!(matches!(result, Err(BeaconError::HardwareNotFound)));
    let status = beacon.status();
    assert_eq!(status.phase, BeaconPhase::Stopped);
    assert!(status.last_error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_persisted_settings_overlay_config() {
    let settings = MemorySettings::new(PersistedSettings {
        correction_ppb: Some(777),
        locator: Some("JN58sc".to_string()),
        ..PersistedSettings::default()
    });
    let mut beacon = beacon_with(&config(), NoGps, SimulatedSynthesizer::new(), settings);
    assert_eq!(beacon.identity().locator, "JN58sc");
    assert_eq!(beacon.control().correction_ppb(), 777);

    let outcome = beacon.boot().await.unwrap();

    assert_eq!(outcome.source(), SyncSource::Network);
    assert_eq!(beacon.synth().state().correction_ppb, 777);
    assert!(!beacon.synth().state().output_on);
    assert_eq!(beacon.chain().now(), mid_slot_epoch());
    let status = beacon.status();
    assert_eq!(status.sync_source, SyncSource::Network);
    assert_eq!(status.last_sync_epoch, Some(mid_slot_epoch()));
}

#[tokio::test(start_paused = true)]
async fn test_gps_locator_replaces_configured_one_and_is_saved() {
    let settings = MemorySettings::default();
    let stored = settings.clone();
    let gps = ScriptedGps::with_fix(mid_slot_epoch(), 48.1173, 11.5167);
    let mut beacon = beacon_with(&config(), gps, SimulatedSynthesizer::new(), settings);

    let outcome = beacon.boot().await.unwrap();

    assert!(matches!(outcome, SyncOutcome::Gps { .. }));
    assert_eq!(beacon.identity().locator, "JN58sc");
    assert_eq!(stored.snapshot().locator.as_deref(), Some("JN58sc"));
    assert_eq!(beacon.status().locator, "JN58sc");
}

#[tokio::test(start_paused = true)]
async fn test_failed_boot_sync_keeps_running_unsynced() {
    let chain = TimeSyncChain::new(
        sync_config(&["a", "b"]),
        WallClock::at_epoch(mid_slot_epoch()),
        NoGps,
        MockNtp::failing(),
    );
    let mut beacon = Beacon::new(
        &config(),
        chain,
        SimulatedSynthesizer::new(),
        CountingEncoder::default(),
        MemorySettings::default(),
    )
    .unwrap();

    let outcome = beacon.boot().await.unwrap();

    assert_eq!(outcome, SyncOutcome::Exhausted { attempts: 6 });
    let status = beacon.status();
    assert_eq!(status.sync_source, SyncSource::None);
    assert!(status.last_error.unwrap().contains("unsynchronized"));
}

#[tokio::test(start_paused = true)]
async fn test_run_until_shutdown() {
    let mut beacon = beacon_with(&config(), NoGps, SimulatedSynthesizer::new(), MemorySettings::default());
    beacon.boot().await.unwrap();
    let control = beacon.control();

    // First slot 12:02:00 completes; the 12:04:00 one is cut short.
    let (reason, _) = tokio::join!(beacon.run(), async {
        tokio::time::sleep(Duration::from_secs(200)).await;
        control.request_shutdown();
    });

    assert_eq!(reason, StopReason::Shutdown);
    let status = beacon.status();
    assert_eq!(status.phase, BeaconPhase::Stopped);
    assert_eq!(status.transmissions_completed, 1);
    assert_eq!(status.transmissions_aborted, 1);
    assert!(!beacon.synth().state().output_on);
    assert_eq!(beacon.scheduler().stats().transmissions_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_calibration_save_with_restart() {
    let mut config = config();
    config.calibration.restart_after_save = true;
    let settings = MemorySettings::default();
    let stored = settings.clone();
    let mut beacon = beacon_with(&config, NoGps, SimulatedSynthesizer::new(), settings);
    beacon.boot().await.unwrap();
    let control = beacon.control();

    let (reason, _) = tokio::join!(beacon.run(), async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        control.request_calibration(Frequency::from_hz(7_040_000));
        tokio::time::sleep(Duration::from_secs(5)).await;
        control.request_calibration_save(321);
    });

    assert_eq!(reason, StopReason::RestartRequired);
    assert_eq!(stored.snapshot().correction_ppb, Some(321));
    assert_eq!(beacon.synth().state().correction_ppb, 321);
    assert_eq!(beacon.synth().state().frequency, Frequency::from_hz(7_040_000));
    assert!(!beacon.synth().state().output_on);
    assert_eq!(beacon.status().correction_ppb, 321);
}

#[tokio::test(start_paused = true)]
async fn test_calibration_resumes_scheduling() {
    let mut beacon = beacon_with(&config(), NoGps, SimulatedSynthesizer::new(), MemorySettings::default());
    beacon.boot().await.unwrap();
    let control = beacon.control();

    let (reason, _) = tokio::join!(beacon.run(), async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        control.request_calibration(Frequency::from_hz(7_040_000));
        tokio::time::sleep(Duration::from_secs(5)).await;
        control.request_calibration_save(-40);
        // Back on schedule: 12:01:45 realigns to 12:02:00, done by 12:03:51.
        tokio::time::sleep(Duration::from_secs(128)).await;
        control.request_shutdown();
    });

    assert_eq!(reason, StopReason::Shutdown);
    assert_eq!(beacon.status().transmissions_completed, 1);
    // Once by calibration, once by the shutdown ahead of 12:04:00.
    assert_eq!(beacon.scheduler().stats().countdowns_interrupted, 2);
}

#[tokio::test(start_paused = true)]
async fn test_identity_change_applies_from_next_cycle_and_is_saved() {
    let settings = MemorySettings::default();
    let stored = settings.clone();
    let encoder = CountingEncoder::default();
    let chain = TimeSyncChain::new(
        sync_config(&["a"]),
        WallClock::at_epoch(0),
        NoGps,
        MockNtp::answering("a", mid_slot_epoch()),
    );
    let mut beacon = Beacon::new(&config(), chain, SimulatedSynthesizer::new(), encoder.clone(), settings).unwrap();
    beacon.boot().await.unwrap();

    beacon.control().request_identity_update(IdentityUpdate {
        callsign: Some("w1xyz".to_string()),
        power_mw: Some(2000),
        ..IdentityUpdate::default()
    });
    beacon.run_cycle().await;

    assert_eq!(
        encoder.last_message(),
        Some(("W1XYZ".to_string(), "FN31pr".to_string(), 33))
    );
    assert_eq!(beacon.identity().callsign, "W1XYZ");
    let saved = stored.snapshot();
    assert_eq!(saved.callsign.as_deref(), Some("W1XYZ"));
    assert_eq!(saved.power_mw, Some(2000));
    let status = beacon.status();
    assert_eq!(status.callsign, "W1XYZ");
    assert_eq!(status.power_dbm, 33);
    assert_eq!(status.power_mw, 2000);
}

#[tokio::test(start_paused = true)]
async fn test_stored_identity_overlays_config() {
    let settings = MemorySettings::new(PersistedSettings {
        callsign: Some("W1XYZ".to_string()),
        power_mw: Some(2000),
        ..PersistedSettings::default()
    });
    let beacon = beacon_with(&config(), NoGps, SimulatedSynthesizer::new(), settings);

    assert_eq!(beacon.identity().callsign, "W1XYZ");
    assert_eq!(beacon.identity().locator, "FN31pr");
    assert_eq!(beacon.status().power_dbm, 33);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_identity_change_keeps_current_identity() {
    let settings = MemorySettings::default();
    let stored = settings.clone();
    let mut beacon = beacon_with(&config(), NoGps, SimulatedSynthesizer::new(), settings);
    beacon.boot().await.unwrap();

    beacon.control().request_identity_update(IdentityUpdate {
        locator: Some("ZZ99".to_string()),
        ..IdentityUpdate::default()
    });
    beacon.run_cycle().await;

    assert_eq!(beacon.identity(), &config().identity);
    assert_eq!(stored.snapshot().locator, None);
    assert_eq!(beacon.status().transmissions_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_factory_reset_restores_configuration() {
    let settings = MemorySettings::new(PersistedSettings {
        correction_ppb: Some(777),
        callsign: Some("W9OLD".to_string()),
        locator: Some("JN58sc".to_string()),
        power_mw: Some(1000),
    });
    let stored = settings.clone();
    let mut beacon = beacon_with(&config(), NoGps, SimulatedSynthesizer::new(), settings);
    beacon.boot().await.unwrap();
    assert_eq!(beacon.synth().state().correction_ppb, 777);

    beacon.control().request_factory_reset();
    beacon.run_cycle().await;

    let configured = config();
    assert_eq!(beacon.identity(), &configured.identity);
    assert_eq!(stored.snapshot(), PersistedSettings::default());
    assert_eq!(beacon.control().correction_ppb(), configured.calibration.correction_ppb);
    assert_eq!(beacon.synth().state().correction_ppb, configured.calibration.correction_ppb);
    let status = beacon.status();
    assert_eq!(status.callsign, "K1ABC");
    assert_eq!(status.locator, "FN31pr");
    assert_eq!(status.correction_ppb, configured.calibration.correction_ppb);
}
